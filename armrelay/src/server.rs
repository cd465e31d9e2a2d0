/*!
Relay server loop.

Accepts TCP connections one at a time and serves each to completion before
accepting the next, so only one operator console drives the arm at a time and
every serial write comes from the same task.
*/

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::handler::{self, ConnectionOutcome};
use crate::serial::ControllerLink;

/// How often the accept loop wakes up to check the running flag
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Upper bound on the pause after repeated accept failures
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Pause before retrying after `consecutive` accept failures in a row
///
/// Doubles from 50 ms up to [`MAX_ACCEPT_BACKOFF`], so a persistent error
/// such as EMFILE cannot spin the loop.
fn accept_backoff(consecutive: u32) -> Duration {
    let base = Duration::from_millis(50);
    base.saturating_mul(1u32 << consecutive.saturating_sub(1).min(16))
        .min(MAX_ACCEPT_BACKOFF)
}

/// Why the server loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A client sent `quit`
    QuitCommand,
    /// The running flag was cleared (Ctrl+C)
    Interrupted,
}

#[derive(Debug, Default)]
struct ServerStats {
    connections: u64,
    accept_errors: u64,
    read_errors: u64,
    idle_timeouts: u64,
}

/// The listening side of the relay
pub struct RelayServer {
    config: RelayConfig,
    listener: TcpListener,
    running: Arc<AtomicBool>,
}

impl RelayServer {
    /// Bind and listen on the configured address
    ///
    /// Must be called from inside a tokio runtime.
    pub fn bind(config: RelayConfig, running: Arc<AtomicBool>) -> Result<Self> {
        let addr = config.socket_addr()?;
        info!("🔌 Binding TCP listener to {}", addr);

        let listener = Self::listen(addr, config.backlog)
            .map_err(|source| RelayError::Bind { addr, source })?;

        info!("✅ Relay listening on {} (backlog {})", listener.local_addr()?, config.backlog);
        Ok(Self {
            config,
            listener,
            running,
        })
    }

    fn listen(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;
        TcpListener::from_std(socket.into())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get a reference to the running flag for external control
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Serve connections until `quit` or interruption
    ///
    /// The controller link is closed before this returns, and the listening
    /// socket is dropped with `self`, on every exit path.
    pub async fn run<L: ControllerLink + ?Sized>(self, link: &mut L) -> ShutdownReason {
        let mut stats = ServerStats::default();
        let start_time = Instant::now();
        let mut reason = ShutdownReason::Interrupted;
        let mut failed_accepts = 0u32;

        while self.running.load(Ordering::SeqCst) {
            let (stream, peer) = match tokio::time::timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok(accepted)) => {
                    failed_accepts = 0;
                    accepted
                }
                Ok(Err(e)) => {
                    failed_accepts = failed_accepts.saturating_add(1);
                    stats.accept_errors += 1;
                    let pause = accept_backoff(failed_accepts);
                    error!("Accept failed: {} (retrying in {:?})", e, pause);
                    tokio::time::sleep(pause).await;
                    continue;
                }
                // Timeout - continue to check running flag
                Err(_) => continue,
            };

            stats.connections += 1;
            info!("🤝 Client {} connected", peer);

            match handler::handle_connection(stream, peer, link, &self.config, &self.running).await {
                ConnectionOutcome::Quit => {
                    reason = ShutdownReason::QuitCommand;
                    break;
                }
                ConnectionOutcome::Interrupted => break,
                ConnectionOutcome::ReadError => stats.read_errors += 1,
                ConnectionOutcome::IdleTimeout => stats.idle_timeouts += 1,
                ConnectionOutcome::Disconnected => {}
            }
        }

        link.close();

        info!("📈 Relay final stats:");
        info!("   Connections: {}", stats.connections);
        info!("   Accept errors: {}", stats.accept_errors);
        info!("   Read errors: {}", stats.read_errors);
        info!("   Idle timeouts: {}", stats.idle_timeouts);
        info!("   Uptime: {:.1}s", start_time.elapsed().as_secs_f64());
        info!("🔌 Listener closed ({:?})", reason);

        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{axis_ack, ACK_QUIT, ACK_TEST};
    use crate::serial::testing::RecordingLink;
    use shared::frame::CommandFrame;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    fn test_config() -> RelayConfig {
        RelayConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            ..RelayConfig::default()
        }
    }

    fn start(config: RelayConfig) -> (SocketAddr, RecordingLink, Arc<AtomicBool>, JoinHandle<ShutdownReason>) {
        let running = Arc::new(AtomicBool::new(true));
        let server = RelayServer::bind(config, Arc::clone(&running)).unwrap();
        let addr = server.local_addr().unwrap();
        let link = RecordingLink::new();
        let mut server_link = link.clone();
        let task = tokio::spawn(async move { server.run(&mut server_link).await });
        (addr, link, running, task)
    }

    /// Read one newline-terminated acknowledgment
    async fn read_reply(client: &mut TcpStream) -> String {
        let mut reply = Vec::new();
        let mut chunk = [0u8; 256];
        while !reply.ends_with(b"\n") {
            let n = client.read(&mut chunk).await.unwrap();
            assert!(n > 0, "server closed before replying");
            reply.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(reply).unwrap()
    }

    #[tokio::test]
    async fn test_axis_test_and_quit() {
        let (addr, link, _running, task) = start(test_config());
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(&[0xAA, 2, 90]).await.unwrap();
        let reply = read_reply(&mut client).await;
        assert_eq!(reply, axis_ack(2, 90));
        assert!(reply.contains("axis 3") && reply.contains("90"));

        client.write_all(b"TEST").await.unwrap();
        assert_eq!(read_reply(&mut client).await, ACK_TEST);

        client.write_all(b"quit").await.unwrap();
        assert_eq!(read_reply(&mut client).await, ACK_QUIT);

        assert_eq!(task.await.unwrap(), ShutdownReason::QuitCommand);
        assert_eq!(link.frames(), vec![CommandFrame::new(0xAA, 2, 90)]);
        assert!(link.is_closed());

        // The listening socket is gone
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_stays_open_after_protocol_error() {
        let config = RelayConfig {
            reply_on_error: true,
            ..test_config()
        };
        let (addr, link, running, task) = start(config);
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(&[0xAA, 6, 90]).await.unwrap();
        assert!(read_reply(&mut client).await.starts_with("error: Invalid axis"));

        client.write_all(&[0xAA, 5, 180]).await.unwrap();
        assert_eq!(read_reply(&mut client).await, axis_ack(5, 180));

        assert_eq!(link.frames(), vec![CommandFrame::axis_angle(5, 180)]);

        running.store(false, Ordering::SeqCst);
        assert_eq!(task.await.unwrap(), ShutdownReason::Interrupted);
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn test_connections_are_served_one_at_a_time() {
        let (addr, _link, running, task) = start(test_config());

        let first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Lands in the backlog; nobody reads it while `first` is open
        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"TEST").await.unwrap();
        let mut chunk = [0u8; 64];
        let waiting = tokio::time::timeout(Duration::from_millis(300), second.read(&mut chunk)).await;
        assert!(waiting.is_err(), "second client served while first was active");

        drop(first);
        assert_eq!(read_reply(&mut second).await, ACK_TEST);

        running.store(false, Ordering::SeqCst);
        assert_eq!(task.await.unwrap(), ShutdownReason::Interrupted);
    }

    #[tokio::test]
    async fn test_interrupt_without_clients() {
        let (_addr, link, running, task) = start(test_config());
        running.store(false, Ordering::SeqCst);

        assert_eq!(task.await.unwrap(), ShutdownReason::Interrupted);
        assert!(link.is_closed());
        assert!(link.frames().is_empty());
    }

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(50));
        assert_eq!(accept_backoff(2), Duration::from_millis(100));
        assert_eq!(accept_backoff(4), Duration::from_millis(400));
        assert_eq!(accept_backoff(6), MAX_ACCEPT_BACKOFF);
        assert_eq!(accept_backoff(u32::MAX), MAX_ACCEPT_BACKOFF);
        assert!(accept_backoff(0) > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_bad_bind_address_is_fatal() {
        let config = RelayConfig {
            bind_addr: "localhost-ish".to_string(),
            ..test_config()
        };
        let err = RelayServer::bind(config, Arc::new(AtomicBool::new(true))).err().unwrap();
        assert!(err.is_startup_fatal());
    }
}
