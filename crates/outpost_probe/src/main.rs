//! # Outpost Probe - Admission Test Client
//!
//! Opens one or more simulated clients against a running Outpost server and
//! reports what the server handed back:
//! - TCP: connects to the listening port and holds the connection open
//! - UDP: performs the rendezvous handshake and prints the dedicated port the
//!   server punched through for it

use clap::{Parser, ValueEnum};
use outpost_net::messaging::rendezvous::{parse_response, RendezvousRequest, MAX_REQUEST_LEN};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

type ProbeResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Tcp,
    Udp,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "outpost-probe")]
#[command(about = "Outpost admission test client")]
struct Args {
    /// Server address (the listening or rendezvous endpoint)
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    server: SocketAddr,

    /// Transport to probe
    #[arg(short, long, value_enum, default_value_t = Mode::Tcp)]
    mode: Mode,

    /// Number of simultaneous clients to simulate
    #[arg(short, long, default_value = "1")]
    clients: u32,

    /// Address each UDP client asks the server to bind its socket to
    #[arg(long, default_value = "0.0.0.0")]
    declare_addr: IpAddr,

    /// Port each UDP client asks the server to bind its socket to (0 = any)
    #[arg(long, default_value = "0")]
    declare_port: u16,

    /// Seconds to wait for the rendezvous response
    #[arg(long, default_value = "5")]
    response_timeout: u64,

    /// Seconds each client stays connected before exiting
    #[arg(short = 'd', long, default_value = "10")]
    hold: u64,
}

/// Connects over TCP and keeps the stream open for the hold period.
async fn probe_tcp(index: u32, args: &Args) -> ProbeResult<()> {
    let stream = TcpStream::connect(args.server).await?;
    info!(
        "🔗 Client {} connected from {} to {}",
        index,
        stream.local_addr()?,
        args.server
    );
    sleep(Duration::from_secs(args.hold)).await;
    info!("👋 Client {} closing", index);
    Ok(())
}

/// Runs the rendezvous handshake and returns the assigned port.
async fn rendezvous(socket: &UdpSocket, args: &Args) -> ProbeResult<u16> {
    let request = RendezvousRequest {
        addr: args.declare_addr,
        port: args.declare_port,
    };
    socket.send_to(request.to_message().as_bytes(), args.server).await?;

    let mut buf = [0u8; MAX_REQUEST_LEN];
    let (len, from) = timeout(
        Duration::from_secs(args.response_timeout),
        socket.recv_from(&mut buf),
    )
    .await
    .map_err(|_| "timed out waiting for rendezvous response")??;

    let text = String::from_utf8_lossy(&buf[..len]);
    parse_response(&buf[..len])
        .ok_or_else(|| format!("unexpected response from {from}: {text:?}").into())
}

async fn probe_udp(index: u32, args: &Args) -> ProbeResult<()> {
    let local = match args.server.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind((local, 0)).await?;
    info!("📨 Client {} requesting rendezvous from {}", index, socket.local_addr()?);

    let port = rendezvous(&socket, args).await?;
    info!("📤 Client {} assigned new port: {}", index, port);

    let dedicated = SocketAddr::new(args.server.ip(), port);
    if let Err(e) = socket.send_to(b"hello", dedicated).await {
        warn!("⚠️ Client {} could not reach {}: {}", index, dedicated, e);
    }

    sleep(Duration::from_secs(args.hold)).await;
    info!("👋 Client {} closing", index);
    Ok(())
}

#[tokio::main]
async fn main() -> ProbeResult<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    info!("🚀 Starting Outpost probe");
    info!("   • Server: {}", args.server);
    info!("   • Mode: {:?}", args.mode);
    info!("   • Clients: {}", args.clients);

    let mut handles = Vec::new();
    for index in 0..args.clients {
        let args = args.clone();
        handles.push(tokio::spawn(async move {
            let result = match args.mode {
                Mode::Tcp => probe_tcp(index, &args).await,
                Mode::Udp => probe_udp(index, &args).await,
            };
            if let Err(e) = result {
                error!("❌ Client {} failed: {}", index, e);
                return false;
            }
            true
        }));

        // The server admits one client per tick.
        sleep(Duration::from_millis(100)).await;
    }

    let mut succeeded = 0;
    for handle in handles {
        if let Ok(true) = handle.await {
            succeeded += 1;
        }
    }

    info!("✅ {}/{} clients completed", succeeded, args.clients);
    if succeeded < args.clients {
        std::process::exit(1);
    }
    Ok(())
}
