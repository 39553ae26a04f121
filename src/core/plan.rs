use crate::config::topology::ServiceSpec;
use crate::utils::error::{DeployError, Result};
use std::collections::{HashMap, HashSet};

/// 依 depends_on 排出啟動順序（Kahn），同層依宣告順序。
/// 不在 `services` 內的依賴（其他機器上的服務）不影響排序。
pub fn start_order<'a>(services: &[&'a ServiceSpec]) -> Result<Vec<&'a ServiceSpec>> {
    let local: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();

    let mut remaining: HashMap<&str, usize> = services
        .iter()
        .map(|s| {
            let local_deps = s
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|d| local.contains(d))
                .collect::<HashSet<_>>()
                .len();
            (s.name.as_str(), local_deps)
        })
        .collect();

    let mut ordered = Vec::with_capacity(services.len());
    let mut placed: HashSet<&str> = HashSet::new();

    while ordered.len() < services.len() {
        let next = services
            .iter()
            .find(|s| !placed.contains(s.name.as_str()) && remaining[s.name.as_str()] == 0);

        let Some(next) = next else {
            let mut stuck: Vec<&str> = services
                .iter()
                .map(|s| s.name.as_str())
                .filter(|name| !placed.contains(name))
                .collect();
            stuck.sort_unstable();
            return Err(DeployError::DependencyCycle {
                services: stuck.join(", "),
            });
        };

        placed.insert(next.name.as_str());
        for dependent in services {
            if dependent.depends_on.iter().any(|d| d == &next.name) {
                if let Some(count) = remaining.get_mut(dependent.name.as_str()) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        ordered.push(*next);
    }

    Ok(ordered)
}

pub fn stop_order<'a>(services: &[&'a ServiceSpec]) -> Result<Vec<&'a ServiceSpec>> {
    let mut order = start_order(services)?;
    order.reverse();
    Ok(order)
}

/// 位於其他機器、啟動前需先確認健康的依賴
pub fn remote_dependencies<'a>(
    local: &[&ServiceSpec],
    all: &'a [ServiceSpec],
) -> Vec<&'a ServiceSpec> {
    let local_names: HashSet<&str> = local.iter().map(|s| s.name.as_str()).collect();
    let wanted: HashSet<&str> = local
        .iter()
        .flat_map(|s| s.depends_on.iter().map(String::as_str))
        .filter(|d| !local_names.contains(d))
        .collect();

    all.iter()
        .filter(|s| wanted.contains(s.name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::topology::StackConfig;

    fn names(services: &[&ServiceSpec]) -> Vec<String> {
        services.iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_mac_mini_start_order() {
        let config = StackConfig::default_topology().unwrap();
        let local = config.services_on("mac-mini");
        let order = start_order(&local).unwrap();
        assert_eq!(
            names(&order),
            vec!["mongodb", "neo4j", "docling-service", "orchestrator-api"]
        );

        let reversed = stop_order(&local).unwrap();
        assert_eq!(reversed.first().unwrap().name, "orchestrator-api");
    }

    #[test]
    fn test_dependencies_declared_later_are_started_first() {
        let config = StackConfig::default_topology().unwrap();
        let local = config.services_on("dell-laptop");
        let order = names(&start_order(&local).unwrap());
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("embedding-service") < pos("knowledge-graph-service"));
    }

    #[test]
    fn test_remote_dependencies() {
        let config = StackConfig::default_topology().unwrap();
        let local = config.services_on("dell-laptop");
        let remote = names(&remote_dependencies(&local, &config.services));
        assert_eq!(remote, vec!["neo4j", "llm-service"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let content = r#"
[stack]
name = "cyclic"

[[machines]]
name = "local"
ip = "127.0.0.1"

[[services]]
name = "a"
machine = "local"
kind = "external"
depends_on = ["b"]

[[services]]
name = "b"
machine = "local"
kind = "external"
depends_on = ["a"]

[[services]]
name = "c"
machine = "local"
kind = "external"
"#;
        let config = StackConfig::from_toml_str(content).unwrap();
        let local = config.services_on("local");
        match start_order(&local) {
            Err(DeployError::DependencyCycle { services }) => assert_eq!(services, "a, b"),
            other => panic!("expected cycle, got {:?}", other.map(|o| names(&o))),
        }
    }
}
