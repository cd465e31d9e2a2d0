/*!
Per-connection command handling.

A connection is read until the peer hangs up, a read fails, the relay is
interrupted, or a client sends `quit`. Every decoded command is dispatched
straight away: axis commands are forwarded as a single frame, macros run to
completion, and a text acknowledgment is written back.
*/

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use shared::codec::{self, Command, ControlCommand, ParseError, ParsedFrame, StreamDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::config::{Framing, RelayConfig};
use crate::sequencer;
use crate::serial::{self, ControllerLink};

pub const ACK_TEST: &str = "test command received\n";
pub const ACK_MACRO: &str = "macro executed\n";
pub const ACK_QUIT: &str = "relay server shutting down\n";

/// How often a blocked read wakes up to check the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Peer closed the socket
    Disconnected,
    /// Reading from the peer failed
    ReadError,
    /// Peer stayed silent past the idle timeout
    IdleTimeout,
    /// The relay is shutting down (Ctrl+C)
    Interrupted,
    /// Peer sent `quit`; the whole relay must stop
    Quit,
}

/// What to do after one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub reply: Option<String>,
    pub shutdown: bool,
}

impl Action {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
            shutdown: false,
        }
    }

    fn silent() -> Self {
        Self {
            reply: None,
            shutdown: false,
        }
    }
}

/// Acknowledgment for an axis command, axis shown 1-based
pub fn axis_ack(axis: u8, angle: u8) -> String {
    format!(
        "command received: axis {} set to angle {}°\n",
        u16::from(axis) + 1,
        angle
    )
}

/// Carry out one decoded command against the controller link
pub async fn dispatch<L: ControllerLink + ?Sized>(
    link: &mut L,
    command: Result<Command, ParseError>,
    reply_on_error: bool,
) -> Action {
    match command {
        Ok(Command::Control(ControlCommand::Test)) => {
            info!("📨 TEST command received");
            Action::reply(ACK_TEST)
        }
        Ok(Command::Control(ControlCommand::Quit)) => {
            info!("🛑 quit received, shutting the relay down");
            Action {
                reply: Some(ACK_QUIT.to_string()),
                shutdown: true,
            }
        }
        Ok(Command::Frame(parsed @ ParsedFrame::AxisAngle { axis, angle })) => {
            info!("📨 Axis command: axis {} -> {}°", u16::from(axis) + 1, angle);
            if let Some(frame) = parsed.to_controller_frame() {
                serial::forward(link, frame);
            }
            serial::log_controller_output(link);
            Action::reply(axis_ack(axis, angle))
        }
        Ok(Command::Frame(ParsedFrame::Macro { selector })) => {
            sequencer::run_macro(link, selector).await;
            serial::log_controller_output(link);
            Action::reply(ACK_MACRO)
        }
        Err(e) => {
            warn!("⚠️ Rejected command: {}", e);
            if reply_on_error {
                Action::reply(format!("error: {}\n", e))
            } else {
                Action::silent()
            }
        }
    }
}

/// Serve one accepted connection until it ends
pub async fn handle_connection<L: ControllerLink + ?Sized>(
    mut stream: TcpStream,
    peer: SocketAddr,
    link: &mut L,
    config: &RelayConfig,
    running: &AtomicBool,
) -> ConnectionOutcome {
    let mut buffer = vec![0u8; config.read_buffer_size.max(1)];
    let mut decoder = StreamDecoder::new();
    let idle_timeout = config.idle_timeout();
    let mut last_activity = Instant::now();

    loop {
        let len = match tokio::time::timeout(POLL_INTERVAL, stream.read(&mut buffer)).await {
            Ok(Ok(0)) => {
                info!("👋 Client {} disconnected", peer);
                return ConnectionOutcome::Disconnected;
            }
            Ok(Ok(len)) => len,
            Ok(Err(e)) => {
                error!("Read from {} failed: {}", peer, e);
                return ConnectionOutcome::ReadError;
            }
            Err(_) => {
                if !running.load(Ordering::SeqCst) {
                    return ConnectionOutcome::Interrupted;
                }
                if let Some(limit) = idle_timeout {
                    if last_activity.elapsed() >= limit {
                        warn!("⏱️ Client {} idle for {:?}, closing", peer, limit);
                        return ConnectionOutcome::IdleTimeout;
                    }
                }
                continue;
            }
        };

        last_activity = Instant::now();
        let bytes = &buffer[..len];
        debug!("Received {} bytes from {}: {}", len, peer, hex::encode(bytes));

        let commands = match config.framing {
            Framing::ReadBoundary => vec![codec::parse(bytes)],
            Framing::Stream => {
                decoder.extend(bytes);
                std::iter::from_fn(|| decoder.next_command()).collect()
            }
        };

        for command in commands {
            let action = dispatch(link, command, config.reply_on_error).await;

            if let Some(reply) = &action.reply {
                if let Err(e) = stream.write_all(reply.as_bytes()).await {
                    warn!("Failed to send response to {}: {}", peer, e);
                }
            }

            if action.shutdown {
                // Best effort; the socket closes when `stream` drops
                let _ = stream.shutdown().await;
                return ConnectionOutcome::Quit;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::testing::RecordingLink;
    use shared::frame::CommandFrame;
    use shared::macros::MacroSelector;
    use tokio::net::TcpListener;

    #[test]
    fn test_axis_ack_is_one_based() {
        let ack = axis_ack(2, 90);
        assert!(ack.contains("axis 3"));
        assert!(ack.contains("90"));
    }

    #[tokio::test]
    async fn test_axis_command_forwards_one_frame() {
        let mut link = RecordingLink::new();
        let action = dispatch(&mut link, codec::parse(&[0xAA, 2, 90]), false).await;

        assert_eq!(link.frames(), vec![CommandFrame::new(0xAA, 2, 90)]);
        assert_eq!(action.reply.as_deref(), Some(axis_ack(2, 90).as_str()));
        assert!(!action.shutdown);
    }

    #[tokio::test]
    async fn test_connectivity_check_sends_no_frames() {
        let mut link = RecordingLink::new();
        let action = dispatch(&mut link, codec::parse(b"TEST"), false).await;

        assert_eq!(action, Action::reply(ACK_TEST));
        assert!(link.frames().is_empty());
    }

    #[tokio::test]
    async fn test_quit_requests_shutdown() {
        let mut link = RecordingLink::new();
        let action = dispatch(&mut link, codec::parse(b"quit"), false).await;

        assert!(action.shutdown);
        assert_eq!(action.reply.as_deref(), Some(ACK_QUIT));
        assert!(link.frames().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_commands_are_silent_by_default() {
        let mut link = RecordingLink::new();

        let rejected: [&[u8]; 4] = [&[0xAA, 7, 10], &[0xBB, 9], &[0x42, 0, 0], &[0xAA]];
        for bytes in rejected {
            let action = dispatch(&mut link, codec::parse(bytes), false).await;
            assert_eq!(action, Action::silent());
        }
        assert!(link.frames().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_commands_can_reply() {
        let mut link = RecordingLink::new();
        let action = dispatch(&mut link, codec::parse(&[0xBB, 9]), true).await;

        assert_eq!(
            action.reply.as_deref(),
            Some("error: Unknown macro selector 0x09\n")
        );
        assert!(link.frames().is_empty());
    }

    #[tokio::test]
    async fn test_macro_command_acknowledged_after_sequence() {
        let mut link = RecordingLink::new();
        let command = Ok(Command::Frame(ParsedFrame::Macro {
            selector: MacroSelector::GripOpen,
        }));
        let action = dispatch(&mut link, command, false).await;

        assert_eq!(action.reply.as_deref(), Some(ACK_MACRO));
        assert_eq!(link.frames(), vec![CommandFrame::axis_angle(4, 0x3C)]);
    }

    async fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (client, server, peer)
    }

    #[tokio::test]
    async fn test_stream_framing_handles_coalesced_commands() {
        let (mut client, server, peer) = connected_pair().await;
        let config = RelayConfig {
            framing: Framing::Stream,
            ..RelayConfig::default()
        };
        let running = AtomicBool::new(true);
        let link = RecordingLink::new();
        let mut handler_link = link.clone();

        let handler = tokio::spawn(async move {
            handle_connection(server, peer, &mut handler_link, &config, &running).await
        });

        // Two axis commands in one write, then a split one
        client.write_all(&[0xAA, 0, 10, 0xAA, 1, 20, 0xAA]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(&[2, 30]).await.unwrap();

        // Unread acks would turn the close into a reset
        let mut acks = Vec::new();
        let mut chunk = [0u8; 256];
        while acks.iter().filter(|&&b| b == b'\n').count() < 3 {
            let n = client.read(&mut chunk).await.unwrap();
            assert!(n > 0, "handler closed before acknowledging");
            acks.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(
            String::from_utf8(acks).unwrap(),
            [axis_ack(0, 10), axis_ack(1, 20), axis_ack(2, 30)].concat()
        );
        drop(client);

        assert_eq!(handler.await.unwrap(), ConnectionOutcome::Disconnected);
        assert_eq!(
            link.frames(),
            vec![
                CommandFrame::axis_angle(0, 10),
                CommandFrame::axis_angle(1, 20),
                CommandFrame::axis_angle(2, 30),
            ]
        );
    }

    #[tokio::test]
    async fn test_idle_connection_is_closed() {
        let (_client, server, peer) = connected_pair().await;
        let config = RelayConfig {
            idle_timeout_secs: Some(0),
            ..RelayConfig::default()
        };
        let running = AtomicBool::new(true);
        let mut link = RecordingLink::new();

        let outcome = handle_connection(server, peer, &mut link, &config, &running).await;
        assert_eq!(outcome, ConnectionOutcome::IdleTimeout);
    }

    #[tokio::test]
    async fn test_cleared_running_flag_interrupts_read() {
        let (_client, server, peer) = connected_pair().await;
        let config = RelayConfig::default();
        let running = AtomicBool::new(false);
        let mut link = RecordingLink::new();

        let outcome = handle_connection(server, peer, &mut link, &config, &running).await;
        assert_eq!(outcome, ConnectionOutcome::Interrupted);
    }
}
