mod config;
mod output;
mod show;
mod watch;

use clap::{Parser, Subcommand};
use execwatch_core::ExecutionId;
use execwatch_runtime_config::TransportPreference;

#[derive(Parser)]
#[command(name = "execwatch", about = "Follow background job logs as they are written")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track an execution: stored log if it has finished, live output otherwise
    Watch {
        /// Execution id
        id: ExecutionId,

        /// Override the configured transport (auto, push, poll)
        #[arg(long)]
        transport: Option<TransportPreference>,

        /// Print nothing live; write the whole log once tracking ends
        #[arg(long)]
        no_follow: bool,
    },

    /// Print an execution's stored log and summary
    Show {
        /// Execution id
        id: ExecutionId,
    },

    /// Show or set configuration
    Config {
        /// Set the server URL
        #[arg(long)]
        server: Option<String>,

        /// Set the API key
        #[arg(long)]
        api_key: Option<String>,

        /// Set the default transport (auto, push, poll)
        #[arg(long)]
        transport: Option<TransportPreference>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Watch {
            id,
            transport,
            no_follow,
        } => watch::run_watch(id, transport, no_follow).await,
        Commands::Show { id } => show::run_show(id).await,
        Commands::Config {
            server,
            api_key,
            transport,
        } => {
            if server.is_none() && api_key.is_none() && transport.is_none() {
                config::show_config()
            } else {
                config::set_config(server, api_key, transport)
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
