mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// devtap -- inspect and drive a browser over the DevTools protocol.
#[derive(Parser, Debug)]
#[command(name = "devtap", version, about)]
struct Cli {
    #[command(flatten)]
    endpoint: EndpointArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Where the browser's debugging endpoint lives and which target to attach.
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Host of the remote debugging endpoint
    #[arg(long, global = true, default_value = "127.0.0.1")]
    pub host: String,

    /// Port passed to --remote-debugging-port
    #[arg(long, global = true, default_value_t = 9222)]
    pub port: u16,

    /// Attach to the first page whose URL contains this substring
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// Extra config file layered over ~/.devtap and ./.devtap
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List debuggable targets
    Targets {
        /// Print the raw target list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a JavaScript expression in the page and print the result
    Eval {
        /// Expression to evaluate
        expression: String,
    },

    /// Capture the visible viewport to a file
    Screenshot {
        /// Output file
        path: PathBuf,

        /// Image encoding
        #[arg(long, value_enum, default_value_t = ImageFormat::Png)]
        format: ImageFormat,

        /// Compression quality for jpeg and webp (0-100)
        #[arg(long)]
        quality: Option<u8>,
    },

    /// Print page and network events as they arrive
    Watch {
        /// Only print events whose method starts with this prefix
        #[arg(long)]
        filter: Option<String>,

        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=devtap::wire=trace)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Targets { json } => commands::targets::run(&cli.endpoint, json).await,
        Commands::Eval { expression } => commands::eval::run(&cli.endpoint, &expression).await,
        Commands::Screenshot {
            path,
            format,
            quality,
        } => commands::screenshot::run(&cli.endpoint, &path, format, quality).await,
        Commands::Watch { filter, count } => {
            commands::watch::run(&cli.endpoint, filter.as_deref(), count).await
        }
    }
}
