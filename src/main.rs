use clap::{Parser, Subcommand};
use framed_rooms::client::{self, ClientArgs};
use framed_rooms::config::{ServerArgs, ServerSettings, Variant};
use framed_rooms::server::{self, metrics};
use framed_rooms::transport::ShutdownCoordinator;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "framed-rooms")]
#[command(about = "Length-prefixed TCP chat room and shared todo-list servers")]
struct Opts {
    #[command(subcommand)]
    cmd: Mode,
}

/// CLI modes
#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the chat room server
    Chat {
        #[command(flatten)]
        args: ServerArgs,
    },

    /// Run the shared todo-list server
    Todo {
        #[command(flatten)]
        args: ServerArgs,
    },

    /// Send scripted frames to a server and print what comes back
    Client {
        #[command(flatten)]
        client: ClientArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Mode::Chat { args } => run_server(Variant::Chat, args).await?,
        Mode::Todo { args } => run_server(Variant::Todo, args).await?,
        Mode::Client { client: args } => {
            metrics::init_logging("warn");
            client::run_client(args).await?;
        }
    }
    Ok(())
}

async fn run_server(variant: Variant, args: ServerArgs) -> anyhow::Result<()> {
    let settings = ServerSettings::load(variant, args)?;
    metrics::init_logging(&settings.log_level);
    tracing::debug!(?settings, "Resolved configuration");

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let shutdown_clone = shutdown.clone();

    // Spawn signal handler
    tokio::spawn(async move {
        shutdown_clone.wait_for_signal().await;
    });

    let report = server::run(settings, &shutdown).await?;
    if !report.drained {
        tracing::warn!(
            cancelled = report.cancelled,
            aborted = report.aborted,
            "Shutdown needed forced cancellation"
        );
    }
    Ok(())
}
