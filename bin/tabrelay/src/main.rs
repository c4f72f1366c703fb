mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabrelay")]
#[command(about = "Drive live browser tabs over a loopback WebSocket", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge: WebSocket listener plus the host channel
    Bridge {
        /// Port to listen on (overrides config bridge.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host address to bind (overrides config bridge.host)
        #[arg(long)]
        host: Option<String>,

        /// Use this process's own stdin/stdout as the host channel instead
        /// of spawning `tabrelay host`
        #[arg(long)]
        stdio: bool,
    },

    /// Start the browser host process (framed commands on stdio)
    Host {
        /// Launch a local browser when the DevTools endpoint is unreachable
        #[arg(long)]
        launch: bool,

        /// Run a launched browser headless
        #[arg(long)]
        headless: bool,
    },

    /// Send one command to a running bridge and print the reply
    Send {
        /// Command name (e.g. session-init, navigate, screenshot)
        command: String,

        /// Command params as a JSON object
        #[arg(short = 'P', long, default_value = "{}")]
        params: String,

        /// Bridge WebSocket URL (defaults to the configured host/port)
        #[arg(long)]
        url: Option<String>,

        /// Write binary payloads (screenshot data) into the media directory
        #[arg(long)]
        save: bool,
    },

    /// Run environment diagnostics
    Doctor,

    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout may carry the framed host channel; logging stays on stderr
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Bridge { port, host, stdio } => {
            commands::bridge::run(host, port, stdio).await?;
        }
        Commands::Host { launch, headless } => {
            commands::host::run(launch, headless).await?;
        }
        Commands::Send {
            command,
            params,
            url,
            save,
        } => {
            commands::send::run(&command, &params, url, save).await?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
        Commands::Completions { shell } => {
            commands::completions::run(&shell).await?;
        }
    }

    Ok(())
}
