use anyhow::Result;
use clap::{Parser, Subcommand};
use lectern::{store, Config};
use tracing::info;

#[derive(Parser)]
#[command(name = "lectern", about = "Real-time lecture transcription and analysis")]
struct Cli {
    /// Path to the configuration file (TOML), without extension.
    #[arg(long, default_value = "config/lectern")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List stored sessions.
    Sessions,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Some(Command::Sessions) => {
            let sessions = store::list_sessions(&cfg.storage.data_dir)?;
            if sessions.is_empty() {
                info!("no sessions under {}", cfg.storage.data_dir);
            }
            for (root, meta) in sessions {
                println!(
                    "{}  {}  {}  ({})",
                    meta.created_at.format("%Y-%m-%d %H:%M"),
                    meta.session_id,
                    meta.name,
                    root.display()
                );
            }
        }
        None => {
            info!("Lectern v{}", env!("CARGO_PKG_VERSION"));
            info!("Data directory: {}", cfg.storage.data_dir);
            info!("Transcription: {} Hz, {} channel(s)", cfg.transcription.sample_rate, cfg.transcription.channels);
            info!("Model: {} via {}", cfg.llm.model, cfg.llm.provider);
            info!("Summary interval: {}s", cfg.analysis.summary_interval_secs);
            info!("Run with `sessions` to list stored sessions");
        }
    }

    Ok(())
}
