//! Remcomp - command-line driver for remote computation kernels.
//!
//! Runs the in-memory loopback kernel, or connects to a running kernel to
//! reset it or run the scalar/vector/matrix round-trip demo.

mod demo;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use remcomp_core::kernel::{KernelServer, MemoryKernel};
use remcomp_core::{ClientConfig, ProtocolConfig, RemoteVariableClient};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "remcomp")]
#[command(about = "Client and loopback kernel for remote computation")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Endpoint {
    /// Kernel host
    #[arg(long, default_value = ProtocolConfig::DEFAULT_HOST)]
    host: String,

    /// Kernel port
    #[arg(short, long, default_value_t = ProtocolConfig::DEFAULT_PORT)]
    port: u16,

    /// Per-call timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl Endpoint {
    fn config(&self) -> ClientConfig {
        let config = ClientConfig::new(self.host.clone(), self.port);
        match self.timeout {
            Some(secs) => config.with_call_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the in-memory kernel until Ctrl-C (port 0 = auto-assign)
    Kernel(Endpoint),
    /// Send a scalar, a vector and a matrix and read them back
    Demo(Endpoint),
    /// Reset a running kernel
    Reset(Endpoint),
}

async fn connect(endpoint: &Endpoint) -> Result<RemoteVariableClient> {
    let config = endpoint.config();
    RemoteVariableClient::connect(&config)
        .await
        .with_context(|| format!("could not reach kernel at {}", config.addr()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG overrides --debug
    let log_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match cli.command {
        Command::Kernel(endpoint) => {
            let handle = KernelServer::start(
                Arc::new(MemoryKernel::new()),
                (endpoint.host.as_str(), endpoint.port),
            )
            .await?;

            // Machine-readable port line for scripts that spawn the kernel
            println!("KERNEL_PORT={}", handle.port());
            info!("Kernel running on {}", handle.addr());

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
        }
        Command::Demo(endpoint) => {
            let client = connect(&endpoint).await?;
            let report = demo::run(&client).await?;
            println!("{}", report);
        }
        Command::Reset(endpoint) => {
            let client = connect(&endpoint).await?;
            client.reset().await?;
            info!("Kernel at {} reset", endpoint.config().addr());
        }
    }

    Ok(())
}
