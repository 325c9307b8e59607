//! TCP dialing and socket options.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::debug;

/// Keep-alive period used by peers dialing the daemon.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(10);

/// Dial `addr`. A missing listener fails with `ConnectionRefused`; retrying is up to the caller.
pub async fn dial(addr: SocketAddr, keepalive: Option<Duration>) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    configure(&stream, keepalive)?;
    debug!("Connected to {}", addr);
    Ok(stream)
}

/// Apply the socket options shared by dialed and accepted streams.
pub fn configure(stream: &TcpStream, keepalive: Option<Duration>) -> io::Result<()> {
    stream.set_nodelay(true)?;
    if let Some(period) = keepalive {
        let params = TcpKeepalive::new().with_time(period);
        SockRef::from(stream).set_tcp_keepalive(&params)?;
    }
    Ok(())
}
