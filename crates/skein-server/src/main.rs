//! Skein echo server binary.
//!
//! # Usage
//!
//! ```bash
//! # Line echo over TCP
//! skein-echo --bind 0.0.0.0:7070
//!
//! # Datagram echo with small queues and a fast heartbeat
//! skein-echo --transport datagram --write-queue-len 16 --cron-period-secs 5
//! ```

use std::time::Duration;

use clap::{Parser, ValueEnum};
use skein_core::{SessionConfig, TransportKind};
use skein_server::{Server, ServerRuntimeConfig, echo};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Stream,
    Datagram,
    Framed,
}

impl From<Kind> for TransportKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Stream => Self::Stream,
            Kind::Datagram => Self::Datagram,
            Kind::Framed => Self::Framed,
        }
    }
}

/// Skein echo server
#[derive(Parser, Debug)]
#[command(name = "skein-echo")]
#[command(about = "Echo server on the skein session engine")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7070")]
    bind: String,

    /// Transport to serve
    #[arg(short, long, value_enum, default_value = "stream")]
    transport: Kind,

    /// Largest accepted message in bytes (0 disables the check)
    #[arg(long, default_value = "1024")]
    max_msg_len: usize,

    /// Read queue capacity per session
    #[arg(long, default_value = "1024")]
    read_queue_len: usize,

    /// Write queue capacity per session
    #[arg(long, default_value = "1024")]
    write_queue_len: usize,

    /// Heartbeat period in seconds
    #[arg(long, default_value = "60")]
    cron_period_secs: u64,

    /// Close grace period in seconds
    #[arg(long, default_value = "7")]
    wait_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Skein echo server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        transport: args.transport.into(),
        session: SessionConfig {
            name: Some("echo".to_string()),
            max_msg_len: args.max_msg_len,
            read_queue_len: args.read_queue_len,
            write_queue_len: args.write_queue_len,
            cron_period: Duration::from_secs(args.cron_period_secs),
            wait_timeout: Duration::from_secs(args.wait_secs),
            ..Default::default()
        },
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run(echo::install) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    Ok(())
}
