//! Thin smoke-test harness: starts a server exposing a handful of demo
//! methods, or drives a client against one. Not the crate's primary
//! deliverable; this exists only to exercise the fabric end to end from a
//! terminal, with a dual-layer file-plus-colorized-stdout logging setup.

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use evrpc::{Address, Client, ClientConfig, Server, ServerConfig};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*};

use evrpc::logging::ColorizedFormatter;

#[derive(Parser)]
#[command(name = "rpc_demo", about = "Smoke-test harness for the evrpc fabric")]
struct Cli {
    /// Address to bind or connect to, e.g. tcp://127.0.0.1:9000, ipc:///tmp/evrpc.sock, inproc://demo
    #[arg(long, default_value = "inproc://demo")]
    address: String,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Run a server exposing `echo` and `add` methods.
    Serve,
    /// Connect as a client and call `echo`.
    Call {
        #[arg(long, default_value = "hello")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let file_appender = tracing_appender::rolling::daily(".", "rpc_demo.log");
    let (non_blocking_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let detailed_log_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_filter(log_level);

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
        .init();

    let address: Address = cli.address.parse()?;

    match cli.role {
        Role::Serve => serve(address).await,
        Role::Call { message } => call(address, message).await,
    }
}

async fn serve(address: Address) -> Result<()> {
    let mut server = Server::new(ServerConfig::new(address.clone()));
    server
        .register("echo", |params| async move { Ok(params) })
        .map_err(|e| anyhow::anyhow!(e))?;
    server
        .register("add", |params| async move {
            if params.len() != 8 {
                return Err((evrpc::ErrorCode::InvalidParam.as_i32(), vec![]));
            }
            let a = i32::from_le_bytes(params[0..4].try_into().unwrap());
            let b = i32::from_le_bytes(params[4..8].try_into().unwrap());
            Ok((a + b).to_le_bytes().to_vec())
        })
        .map_err(|e| anyhow::anyhow!(e))?;

    server.start().await.map_err(|e| anyhow::anyhow!(e))?;
    info!("serving on {address:?}; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    server.stop().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

async fn call(address: Address, message: String) -> Result<()> {
    let mut config = ClientConfig::new(address);
    config.call_timeout = Some(Duration::from_secs(5));
    let client = Client::connect(config).await.map_err(|e| anyhow::anyhow!(e))?;

    let result = client
        .call("echo", message.clone().into_bytes())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    info!("echo({message:?}) -> {:?}", String::from_utf8_lossy(&result));

    client.disconnect().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
