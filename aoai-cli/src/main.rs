//! AOAI CLI Tool
//!
//! Command line interface for checking gateway configuration and backends

use aoai_core::config::loader::{load_config_from_path, load_config_or_default};
use aoai_core::config::model::Config;
use aoai_core::credential::build_credential;
use aoai_core::ClientFactory;
use aoai_loadbalance::{HealthChecker, ProbeOutcome};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aoai-cli")]
#[command(about = "A CLI tool for the Azure OpenAI load balancing gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Probe every configured endpoint the way the gateway does at startup
    HealthCheck {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
        /// Use the built-in endpoint list when the file cannot be loaded
        #[arg(long)]
        allow_fallback: bool,
    },
    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config_example.toml")]
        output: String,
        /// Write the built-in endpoint list instead of the commented template
        #[arg(long)]
        builtin: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            println!("Validating configuration file: {}", config);
            match load_config_from_path(&config) {
                Ok(cfg) => {
                    println!("✅ Configuration is valid");
                    println!("  - {} endpoints configured", cfg.endpoints.len());
                    for endpoint in &cfg.endpoints {
                        println!("    {}", endpoint);
                    }
                    println!("  - credential kind: {:?}", cfg.credential.kind);
                }
                Err(e) => {
                    eprintln!("❌ Configuration validation failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::HealthCheck {
            config,
            allow_fallback,
        } => {
            let cfg = if allow_fallback {
                let source = load_config_or_default(&config);
                if source.is_fallback() {
                    println!("⚠️  {} is unusable, checking the built-in endpoint list", config);
                }
                source.into_config()
            } else {
                load_config_from_path(&config)
                    .with_context(|| format!("Failed to load {config}"))?
            };

            println!("Checking {} endpoints...", cfg.endpoints.len());
            if !run_health_check(&cfg).await? {
                std::process::exit(1);
            }
        }
        Commands::GenerateConfig { output, builtin } => {
            println!("Generating configuration file: {}", output);
            let content = if builtin {
                toml::to_string_pretty(&Config::default())?
            } else {
                CONFIG_TEMPLATE.to_string()
            };
            std::fs::write(&output, content)
                .with_context(|| format!("Failed to write {output}"))?;
            println!("✅ Configuration file generated successfully");
        }
    }

    Ok(())
}

/// 执行健康检查并打印每个后端的结果，返回是否至少有一个健康后端
async fn run_health_check(cfg: &Config) -> Result<bool> {
    let credential = build_credential(&cfg.credential)?;
    let client = ClientFactory::from_settings(&cfg.settings)?;
    let summary = HealthChecker::new(client, credential)
        .check_all(&cfg.endpoints)
        .await?;

    for result in &summary.results {
        let latency = result.latency.as_millis();
        match &result.outcome {
            ProbeOutcome::Healthy => {
                println!("✅ {} ({}ms)", result.endpoint, latency);
            }
            ProbeOutcome::Unhealthy { status, body } => {
                println!("❌ {} status {} ({}ms): {}", result.endpoint, status, latency, body);
            }
            ProbeOutcome::Failed { error } => {
                println!("❌ {} failed ({}ms): {}", result.endpoint, latency, error);
            }
        }
    }

    let healthy = summary.healthy_count();
    println!("{}/{} endpoints healthy", healthy, summary.results.len());
    if healthy == 0 {
        eprintln!("❌ No healthy endpoints, the gateway would refuse to start");
    }
    Ok(healthy > 0)
}

const CONFIG_TEMPLATE: &str = r#"# AOAI Gateway Configuration File

[settings]
# Max idle time between upstream reads before answering 504
request_timeout_seconds = 60
connect_timeout_seconds = 10
max_request_body_bytes = 67108864

[credential]
# default | static | azure_cli | managed_identity
kind = "default"
resource = "https://cognitiveservices.azure.com"
# token = "..."        # static
# client_id = "..."    # user-assigned managed identity

[[endpoints]]
api_version = "2024-05-01-preview"
deployment = "gpt-4-0125-Preview-spot"
url = "https://example-eastus.openai.azure.com/"

[[endpoints]]
api_version = "2024-05-01-preview"
deployment = "gpt-4-0613-spot"
url = "https://example-polandcentral.openai.azure.com/"
"#;
