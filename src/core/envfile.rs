use crate::config::topology::StackConfig;
use crate::utils::error::{DeployError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvWriteOutcome {
    Written,
    /// 檔案已存在且未指定 --force
    Skipped,
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([a-z0-9_-]+)\.([a-z]+)\s*\}\}").expect("valid regex")
    })
}

fn resolve_placeholder(config: &StackConfig, name: &str, field: &str) -> Result<String> {
    let unknown = |reason: &str| DeployError::InvalidConfigValueError {
        field: "env".to_string(),
        value: format!("{{{{{}.{}}}}}", name, field),
        reason: reason.to_string(),
    };

    if let Ok(service) = config.service(name) {
        return match field {
            "url" => config.service_url(service),
            "host" => Ok(config.service_host(service)?.to_string()),
            "port" => service
                .port
                .map(|p| p.to_string())
                .ok_or_else(|| unknown("Service has no port")),
            _ => Err(unknown("Expected url, host or port")),
        };
    }

    if let Ok(machine) = config.machine(name) {
        return match field {
            "ip" | "host" => Ok(machine.ip.clone()),
            _ => Err(unknown("Expected ip or host")),
        };
    }

    Err(unknown("No service or machine with this name"))
}

/// 以拓撲解析 `{{service.url|host|port}}` 與 `{{machine.ip}}` 佔位符
pub fn render_template(
    env: &BTreeMap<String, String>,
    config: &StackConfig,
) -> Result<BTreeMap<String, String>> {
    let re = placeholder_regex();
    let mut rendered = BTreeMap::new();

    for (key, template) in env {
        let mut value = String::with_capacity(template.len());
        let mut last = 0;
        for caps in re.captures_iter(template) {
            let whole = caps.get(0).expect("group 0 always matches");
            value.push_str(&template[last..whole.start()]);
            value.push_str(&resolve_placeholder(config, &caps[1], &caps[2])?);
            last = whole.end();
        }
        value.push_str(&template[last..]);

        if value.contains("${") {
            tracing::warn!(
                "⚠️  {} still contains an unset environment variable: {}",
                key,
                value
            );
        }
        rendered.insert(key.clone(), value);
    }

    Ok(rendered)
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\'));
    if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

pub fn format_env(service: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = format!(
        "# Generated by stackctl for {} at {}\n",
        service,
        chrono::Utc::now().to_rfc3339()
    );
    for (key, value) in vars {
        out.push_str(&format!("{}={}\n", key, quote_value(value)));
    }
    out
}

/// 只在檔案不存在（或 force）時寫入，與 `cp -n` 相同
pub fn write_env_file(
    path: &Path,
    service: &str,
    vars: &BTreeMap<String, String>,
    force: bool,
) -> Result<EnvWriteOutcome> {
    if path.exists() && !force {
        tracing::info!(
            "⏭️  {} already exists, leaving it untouched (use --force to overwrite)",
            path.display()
        );
        return Ok(EnvWriteOutcome::Skipped);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format_env(service, vars))?;
    tracing::info!("📝 Wrote {} ({} keys)", path.display(), vars.len());
    Ok(EnvWriteOutcome::Written)
}

pub fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value[1..value.len() - 1]
                .replace("\\\"", "\"")
                .replace("\\\\", "\\")
        } else {
            value.to_string()
        };
        vars.insert(key.trim().to_string(), value);
    }

    vars
}

pub fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    Ok(parse_env_file(&std::fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_resolves_service_and_machine_placeholders() {
        let config = StackConfig::default_topology().unwrap();
        let env = vars(&[
            ("MILVUS_HOST", "{{milvus.host}}"),
            ("MILVUS_PORT", "{{ milvus.port }}"),
            ("LLM", "{{llm-service.url}}/v1"),
            ("MAC", "{{mac-mini.ip}}"),
            ("PLAIN", "document_library"),
        ]);

        let rendered = render_template(&env, &config).unwrap();
        assert_eq!(rendered["MILVUS_HOST"], "192.168.100.42");
        assert_eq!(rendered["MILVUS_PORT"], "19530");
        assert_eq!(rendered["LLM"], "http://192.168.100.43:8001/v1");
        assert_eq!(rendered["MAC"], "192.168.100.41");
        assert_eq!(rendered["PLAIN"], "document_library");
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        let config = StackConfig::default_topology().unwrap();
        assert!(render_template(&vars(&[("X", "{{redis.url}}")]), &config).is_err());
        assert!(render_template(&vars(&[("X", "{{milvus.user}}")]), &config).is_err());
    }

    #[test]
    fn test_parse_env_file() {
        let parsed = parse_env_file(
            "# comment\n\nPORT=8002\nexport HF_TOKEN=abc\nLOG_FORMAT=\"%(asctime)s - %(message)s\"\nQUOTED='x'\nnot a pair\n",
        );
        assert_eq!(parsed["PORT"], "8002");
        assert_eq!(parsed["HF_TOKEN"], "abc");
        assert_eq!(parsed["LOG_FORMAT"], "%(asctime)s - %(message)s");
        assert_eq!(parsed["QUOTED"], "x");
        assert_eq!(parsed.len(), 4);
    }

    #[test]
    fn test_format_env_quotes_values_with_spaces() {
        let text = format_env("docling-service", &vars(&[("A", "plain"), ("B", "two words")]));
        assert!(text.starts_with("# Generated by stackctl for docling-service"));
        assert!(text.contains("A=plain\n"));
        assert!(text.contains("B=\"two words\"\n"));
        assert_eq!(parse_env_file(&text)["B"], "two words");
    }

    #[test]
    fn test_write_env_file_does_not_clobber_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc").join(".env");

        let first = write_env_file(&path, "svc", &vars(&[("PORT", "1")]), false).unwrap();
        assert_eq!(first, EnvWriteOutcome::Written);

        let second = write_env_file(&path, "svc", &vars(&[("PORT", "2")]), false).unwrap();
        assert_eq!(second, EnvWriteOutcome::Skipped);
        assert_eq!(read_env_file(&path).unwrap()["PORT"], "1");

        let forced = write_env_file(&path, "svc", &vars(&[("PORT", "3")]), true).unwrap();
        assert_eq!(forced, EnvWriteOutcome::Written);
        assert_eq!(read_env_file(&path).unwrap()["PORT"], "3");
    }
}
