use clap::Parser;
use memproxy::Proxy;
use n0_error::Result;
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
};
use tracing::{debug, info};

/// Concurrent caching HTTP/1.0 forward proxy.
#[derive(Parser)]
#[command(name = "memproxy", version)]
struct Cli {
    /// TCP port to listen on.
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    spawn_sigpipe_logger()?;

    let listener = TcpListener::bind(("0.0.0.0", cli.port)).await?;
    let addr = listener.local_addr()?;
    println!("proxy listening on {addr}");

    let proxy = Proxy::new();
    tokio::select! {
        res = proxy.serve(listener) => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}

/// Logs SIGPIPE instead of letting a broken client connection end the process.
fn spawn_sigpipe_logger() -> std::io::Result<()> {
    let mut sigpipe = signal(SignalKind::pipe())?;
    tokio::spawn(async move {
        while sigpipe.recv().await.is_some() {
            debug!("received SIGPIPE, ignoring");
        }
    });
    Ok(())
}
