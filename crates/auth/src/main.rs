// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::{Parser, Subcommand};
use tracing::error;

use tryon_auth::config::AuthConfig;
use tryon_auth::protocol::Envelope;
use tryon_auth::sim::{self, Browser, BrowserOptions};
use tryon_auth::token::TokenGrant;

#[derive(Debug, Parser)]
#[command(name = "tryon-auth", version, about = "Try-on widget cross-context auth")]
struct Cli {
    #[command(flatten)]
    config: AuthConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a sign-in and sign-out in an in-process browser and print a JSON
    /// summary.
    Simulate {
        /// Keep context storage under the state directory.
        #[arg(long)]
        persist: bool,

        /// Make `window.open` fail.
        #[arg(long)]
        block_popups: bool,

        /// Drop the popup's opener reference.
        #[arg(long)]
        sever_opener: bool,

        /// Lifetime of the simulated access token in seconds.
        #[arg(long, default_value_t = 3600)]
        expires_in: u64,
    },
    /// Validate a wire message and print it normalized.
    Decode {
        json: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli.config);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &AuthConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().with_writer(std::io::stderr).init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Simulate { persist, block_popups, sever_opener, expires_in } => {
            let mut opts = if persist {
                BrowserOptions::persistent(cli.config)?
            } else {
                BrowserOptions::new(cli.config)
            };
            opts.popups_blocked = block_popups;
            opts.sever_opener = sever_opener;

            let browser = Browser::launch(opts)?;
            let grant = TokenGrant::new(
                format!("sim-{}", uuid::Uuid::new_v4()),
                Some(format!("sim-refresh-{}", uuid::Uuid::new_v4())),
                expires_in,
            );
            let report = sim::run_scenario(&browser, grant).await?;
            browser.close();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Decode { json } => {
            let value: serde_json::Value = serde_json::from_str(&json)?;
            let envelope = Envelope::decode(&value)
                .ok_or_else(|| anyhow::anyhow!("not a protocol message"))?;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
    }
    Ok(())
}
