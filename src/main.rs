//! Entry point for `tcpend`.
//!
//! Parses CLI arguments and runs either the **sender** (when `-s` names a
//! remote host) or the **receiver**.  All protocol work is delegated to the
//! library; `main.rs` owns only process setup (logging, argument parsing,
//! opening files).
//!
//! ```text
//! tcpend -p 5000 -s 127.0.0.1 -a 6000 -f input.bin -m 1024 -c 4   # sender
//! tcpend -p 6000 -m 1024 -c 4 -f output.bin                       # receiver
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use tcpend::config::Config;
use tcpend::connection::{ReceiverConnection, SenderConnection};
use tcpend::socket::Socket;
use tcpend::stats::TransferStats;

/// Reliable file transfer over UDP.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Local UDP port.
    #[arg(short = 'p', long)]
    port: u16,

    /// Remote IP address; presence selects sender mode.
    #[arg(short = 's', long = "remote-ip", requires = "remote_port")]
    remote_ip: Option<IpAddr>,

    /// Remote UDP port (sender only).
    #[arg(short = 'a', long = "remote-port")]
    remote_port: Option<u16>,

    /// File to send (sender) or to write (receiver).
    #[arg(short = 'f', long)]
    file: PathBuf,

    /// Maximum transmission unit in bytes, header included.
    #[arg(short = 'm', long, default_value_t = 1024)]
    mtu: usize,

    /// Sliding window size in segments.
    #[arg(short = 'c', long = "sws", default_value_t = 4)]
    sws: usize,

    /// Give up the handshake after this many attempts (default: never).
    #[arg(long)]
    max_handshake_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let mut config = Config::new(cli.mtu, cli.sws).context("invalid arguments")?;
    config.handshake.max_attempts = cli.max_handshake_attempts;

    let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port);
    let socket = Socket::bind(local)
        .await
        .with_context(|| format!("binding UDP port {}", cli.port))?;

    let stats = match (cli.remote_ip, cli.remote_port) {
        (Some(ip), Some(port)) => send(socket, SocketAddr::new(ip, port), &cli.file, config).await?,
        _ => receive(socket, &cli.file, config).await?,
    };

    println!("{stats}");
    Ok(())
}

async fn send(socket: Socket, peer: SocketAddr, path: &Path, config: Config) -> Result<TransferStats> {
    let source = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    log::info!("Sending {} to {peer}", path.display());

    let conn = SenderConnection::connect(socket, peer, config).await?;
    Ok(conn.transfer(tokio::io::BufReader::new(source)).await?)
}

async fn receive(socket: Socket, path: &Path, config: Config) -> Result<TransferStats> {
    let file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    let mut sink = tokio::io::BufWriter::new(file);
    log::info!("Receiving into {}", path.display());

    let conn = ReceiverConnection::new(socket, config)?;
    Ok(conn.run(&mut sink).await?)
}
