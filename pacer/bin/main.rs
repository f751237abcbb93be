#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use clap::Parser;
use pacer::controller::DemoConfig;

/// Adaptive outbound delivery pacing daemon.
///
/// The engine itself takes no CLI flags; everything here configures
/// the demo's own config-file lookup and its synthetic traffic
/// generator.
#[derive(Debug, Parser)]
#[command(name = "pacer", about = "Adaptive outbound delivery pacing daemon")]
struct Args {
    /// Path to the RON config file. Overrides PACER_CONFIG and the
    /// default search path.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Recipient domains the synthetic message generator cycles
    /// through.
    #[arg(long = "demo-provider")]
    demo_providers: Vec<String>,

    /// Interval between synthetic messages, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    demo_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => find_config_file()?,
    };

    let pacer = pacer::controller::Pacer::load(&config_path).map_err(|e| {
        anyhow::anyhow!("Failed to load config from {}: {e}", config_path.display())
    })?;

    let demo = if args.demo_providers.is_empty() {
        DemoConfig {
            interval_ms: args.demo_interval_ms.max(1),
            ..DemoConfig::default()
        }
    } else {
        DemoConfig {
            providers: args.demo_providers,
            interval_ms: args.demo_interval_ms.max(1),
        }
    };

    pacer.run(demo).await
}

/// Find the configuration file using the following precedence:
/// 1. `PACER_CONFIG` environment variable
/// 2. ./pacer.config.ron (current working directory)
/// 3. /etc/pacer/pacer.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<std::path::PathBuf> {
    if let Ok(env_path) = std::env::var("PACER_CONFIG") {
        let path = std::path::PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "PACER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = vec![
        std::path::PathBuf::from("./pacer.config.ron"),
        std::path::PathBuf::from("/etc/pacer/pacer.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - PACER_CONFIG environment variable\n{paths_tried}"
    )
}
