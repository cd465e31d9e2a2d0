/*!
Serial transport to the arm controller.

The controller speaks raw 3-byte frames and never acknowledges them, so a
write is fire-and-forget: a failed or short write is logged and the frame is
dropped. Anything the controller sends back is only drained opportunistically
for the log.
*/

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use shared::frame::CommandFrame;
use shared::protocol::FRAME_SIZE_BYTES;
use tracing::{debug, error, info};

use crate::error::{RelayError, Result};

/// Fixed line speed of the controller UART
pub const BAUD_RATE: u32 = 115_200;

/// Port timeout; `serialport` applies it to writes as well as reads, so a
/// write waits for the device however long it takes. Reads stay non-blocking
/// because `read_available` only reads bytes already queued.
const PORT_TIMEOUT: Duration = Duration::MAX;

/// Largest chunk pulled from the controller in one drain
const DRAIN_CHUNK: usize = 256;

/// Anything frames can be forwarded to
///
/// The relay owns exactly one link for its whole lifetime and hands it by
/// `&mut` to whoever needs to write, so writes are serialized by the borrow.
pub trait ControllerLink: Send {
    /// Write one frame, blocking until the OS accepts it
    fn write_frame(&mut self, frame: CommandFrame) -> Result<()>;

    /// Best-effort non-blocking read of whatever the controller sent
    fn read_available(&mut self) -> Vec<u8>;

    /// Release the underlying device
    fn close(&mut self) {}
}

/// Forward a frame, logging and dropping it on failure
///
/// Returns whether the frame reached the link.
pub fn forward<L: ControllerLink + ?Sized>(link: &mut L, frame: CommandFrame) -> bool {
    match link.write_frame(frame) {
        Ok(()) => {
            debug!("➡️ Serial frame sent: {}", hex::encode(frame.to_bytes()));
            true
        }
        Err(e) => {
            error!("❌ Serial write failed, frame {} dropped: {}", frame, e);
            false
        }
    }
}

/// Drain and log any bytes the controller has sent
pub fn log_controller_output<L: ControllerLink + ?Sized>(link: &mut L) {
    let bytes = link.read_available();
    if !bytes.is_empty() {
        debug!("⬅️ Controller sent {} bytes: {}", bytes.len(), hex::encode(&bytes));
    }
}

/// Real serial port link
pub struct SerialLink {
    path: String,
    port: Option<Box<dyn SerialPort>>,
    configured: bool,
}

impl SerialLink {
    /// Open the device for exclusive use
    pub fn open(path: &str) -> Result<Self> {
        info!("🔌 Opening serial device {}", path);

        let port = serialport::new(path, BAUD_RATE)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| RelayError::device_unavailable(path, e))?;

        info!("✅ Serial device {} opened", path);
        Self::from_port(path, port)
    }

    /// Wrap an already open port
    pub fn from_port(path: &str, mut port: Box<dyn SerialPort>) -> Result<Self> {
        port.set_timeout(PORT_TIMEOUT).map_err(RelayError::SerialConfig)?;
        Ok(Self {
            path: path.to_string(),
            port: Some(port),
            configured: false,
        })
    }

    /// Apply 115200 8N1 without flow control
    ///
    /// Only the first call touches the line; later calls are no-ops.
    pub fn configure(&mut self) -> Result<()> {
        if self.configured {
            return Ok(());
        }

        let port = self.port_mut()?;
        port.set_baud_rate(BAUD_RATE).map_err(RelayError::SerialConfig)?;
        port.set_data_bits(DataBits::Eight).map_err(RelayError::SerialConfig)?;
        port.set_parity(Parity::None).map_err(RelayError::SerialConfig)?;
        port.set_stop_bits(StopBits::One).map_err(RelayError::SerialConfig)?;
        port.set_flow_control(FlowControl::None).map_err(RelayError::SerialConfig)?;

        self.configured = true;
        info!("📊 Serial line configured: {} baud, 8N1, no flow control", BAUD_RATE);
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial link already closed",
            ))
        })
    }
}

impl ControllerLink for SerialLink {
    fn write_frame(&mut self, frame: CommandFrame) -> Result<()> {
        let bytes = frame.to_bytes();
        let written = self.port_mut()?.write(&bytes)?;
        if written != FRAME_SIZE_BYTES {
            return Err(RelayError::ShortWrite {
                written,
                expected: FRAME_SIZE_BYTES,
            });
        }
        Ok(())
    }

    fn read_available(&mut self) -> Vec<u8> {
        let Some(port) = self.port.as_mut() else {
            return Vec::new();
        };

        let waiting = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => {
                debug!("Could not query controller input: {}", e);
                return Vec::new();
            }
        };
        if waiting == 0 {
            return Vec::new();
        }

        let mut buffer = vec![0u8; waiting.min(DRAIN_CHUNK)];
        match port.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                buffer
            }
            Err(e) => {
                debug!("Controller read failed: {}", e);
                Vec::new()
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("🔌 Serial device {} closed", self.path);
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Link that only logs frames, for running without a controller attached
#[derive(Debug, Default)]
pub struct DryRunLink {
    frames_logged: u64,
}

impl DryRunLink {
    pub fn new() -> Self {
        info!("🧪 Dry-run mode: frames are logged, not sent");
        Self::default()
    }

    pub fn frames_logged(&self) -> u64 {
        self.frames_logged
    }
}

impl ControllerLink for DryRunLink {
    fn write_frame(&mut self, frame: CommandFrame) -> Result<()> {
        self.frames_logged += 1;
        info!(
            "🧪 [dry-run] frame {}: axis {} -> {}",
            hex::encode(frame.to_bytes()),
            u16::from(frame.param1) + 1,
            frame.param2
        );
        Ok(())
    }

    fn read_available(&mut self) -> Vec<u8> {
        Vec::new()
    }

    fn close(&mut self) {
        info!("🧪 Dry-run link closed after {} frames", self.frames_logged());
    }
}
