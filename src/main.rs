use clap::Parser;
use docstack_deploy::app::{lifecycle, setup, system_test, StackContext};
use docstack_deploy::config::cli::Commands;
use docstack_deploy::utils::error::DeployError;
use docstack_deploy::utils::logger;
use docstack_deploy::{CliConfig, StackConfig};

async fn run(config: CliConfig) -> Result<(), DeployError> {
    let stack = StackConfig::load_or_default(&config.config)?;

    if let Commands::Topology = config.command {
        print!("{}", stack.to_toml_string()?);
        return Ok(());
    }

    let ctx = StackContext::new(stack, config.machine.clone())?;
    tracing::info!("🖥️  Machine: {} | Stack: {}", ctx.machine, ctx.config.stack.name);

    match config.command {
        Commands::Setup(args) => {
            let options = setup::SetupOptions {
                force: args.force,
                skip_prereqs: args.skip_prereqs,
                skip_venv: args.skip_venv,
            };
            let summary = setup::run_setup(&ctx, &options).await?;
            for (service, outcome) in &summary.env_files {
                println!("{:<28} .env {:?}", service, outcome);
            }
            println!("✅ {} is ready", ctx.machine);
        }
        Commands::Env(args) => {
            for service in ctx.local_services(args.only.as_deref())? {
                if service.env.is_empty() {
                    continue;
                }
                if args.print {
                    let vars = ctx.render_env(service)?;
                    println!(
                        "# --- {} ({}) ---",
                        service.name,
                        ctx.config.env_file_path(service).display()
                    );
                    print!(
                        "{}",
                        docstack_deploy::core::envfile::format_env(&service.name, &vars)
                    );
                } else if let Some(outcome) = ctx.write_env(service, args.force)? {
                    println!("{:<28} {:?}", service.name, outcome);
                }
            }
        }
        Commands::Start(args) => {
            let started = lifecycle::start(&ctx, args.only.as_deref()).await?;
            println!("✅ Started: {}", started.join(", "));
        }
        Commands::Stop(args) => {
            let stopped = lifecycle::stop(&ctx, args.only.as_deref()).await?;
            for (service, detail) in stopped {
                println!("{:<28} {}", service, detail);
            }
        }
        Commands::Status(args) => {
            let statuses = lifecycle::status(&ctx).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                print!("{}", lifecycle::render_status_table(&statuses));
            }
        }
        Commands::Health(args) => {
            let outcomes = lifecycle::health(&ctx, args.all).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            } else {
                for o in &outcomes {
                    println!(
                        "{} {:<28} {}  {}",
                        if o.passed { "✅" } else { "❌" },
                        o.name,
                        o.target,
                        o.detail
                    );
                }
            }
            let failed = outcomes.iter().filter(|o| !o.passed).count();
            if failed > 0 {
                return Err(DeployError::SystemTestFailed {
                    failed,
                    total: outcomes.len(),
                });
            }
        }
        Commands::Test(args) => {
            let options = system_test::SystemTestOptions {
                skip_connectivity: args.skip_connectivity,
                skip_smoke: args.skip_smoke,
                attempts: args.attempts,
                document: args.document,
            };
            let report = system_test::run(&ctx, &options).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_table());
            }
            if !report.is_success() {
                return Err(DeployError::SystemTestFailed {
                    failed: report.failed(),
                    total: report.checks.len(),
                });
            }
        }
        Commands::Topology => unreachable!("handled before building the context"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.log_json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::debug!("CLI config: {:?}", config);

    if let Err(e) = run(config).await {
        tracing::error!(
            "❌ {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

        let exit_code = e.exit_code();
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}
