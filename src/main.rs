use anyhow::Context;
use kgqa::config::NLQConfig;
use kgqa::nlq::HybridCoordinator;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("KGQA_CONFIG").map(PathBuf::from);
    let config = NLQConfig::load(config_path.as_deref()).context("failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(config.logging.max_level())
        .with_ansi(config.logging.ansi)
        .init();

    info!("KGQA v{}", kgqa::version());

    let coordinator =
        HybridCoordinator::from_config(&config, None).context("failed to build NLQ coordinator")?;

    let questions: Vec<String> = std::env::args().skip(1).collect();
    if questions.is_empty() {
        eprintln!("Usage: kgqa <question> [<question> ...]");
        eprintln!("Set KGQA_CONFIG to a YAML file to override defaults.");
        return Ok(());
    }

    let mut succeeded = 0;
    for question in &questions {
        match coordinator.generate(question, None).await {
            Ok(generated) => {
                succeeded += 1;
                println!("{}", serde_json::to_string_pretty(&generated)?);
            }
            Err(e) => error!("Failed to translate '{}': {}", question, e),
        }
    }

    if succeeded == 0 {
        println!("{}", serde_json::to_string_pretty(&coordinator.metrics_summary(None))?);
        anyhow::bail!("none of the {} questions could be translated", questions.len());
    }
    Ok(())
}
