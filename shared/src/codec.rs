/*!
Client command parsing.

Clients send either an ASCII control token (`TEST`, `quit`) or a binary
command (`0xAA axis angle`, `0xBB selector`). Two entry points are provided:

- [`parse`] treats one buffer as exactly one command. Bytes past the command
  are ignored. This is how the relay has always read its socket.
- [`StreamDecoder`] treats the socket as a byte stream and splits it into
  commands by header, carrying partial commands across reads.

Both are pure functions of the bytes they are given.
*/

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::frame::CommandFrame;
use crate::macros::MacroSelector;
use crate::protocol::{
    AXIS_ANGLE_HEADER, AXIS_COUNT, AXIS_FRAME_LEN, CONTROL_TOKEN_LEN, MACRO_FRAME_LEN,
    MACRO_HEADER, QUIT_TOKEN, TEST_TOKEN,
};

/// Errors produced while parsing a client buffer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("Incomplete command")]
    Incomplete,

    #[error("Invalid header byte 0x{0:02X}")]
    InvalidHeader(u8),

    #[error("Invalid axis index {0} (expected 0-5)")]
    InvalidAxis(u8),

    #[error("Unknown macro selector 0x{0:02X}")]
    UnknownMacroSelector(u8),
}

/// ASCII control tokens recognised ahead of binary parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Connectivity check
    Test,
    /// Shut the whole relay down
    Quit,
}

/// A validated binary command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedFrame {
    /// Move one axis (0-based) to an angle
    AxisAngle { axis: u8, angle: u8 },
    /// Run a canned macro
    Macro { selector: MacroSelector },
}

impl ParsedFrame {
    /// Controller frame for an axis command
    ///
    /// Returns `None` for macros; those expand into several frames.
    pub fn to_controller_frame(&self) -> Option<CommandFrame> {
        match *self {
            ParsedFrame::AxisAngle { axis, angle } => Some(CommandFrame::axis_angle(axis, angle)),
            ParsedFrame::Macro { .. } => None,
        }
    }
}

/// Anything a client buffer can decode to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Control(ControlCommand),
    Frame(ParsedFrame),
}

/// Parse one client buffer as a single command
pub fn parse(buffer: &[u8]) -> Result<Command, ParseError> {
    if let Some(control) = match_control_token(buffer) {
        return Ok(Command::Control(control));
    }

    if buffer.len() < MACRO_FRAME_LEN {
        return Err(ParseError::Incomplete);
    }

    match buffer[0] {
        AXIS_ANGLE_HEADER => {
            if buffer.len() < AXIS_FRAME_LEN {
                return Err(ParseError::Incomplete);
            }
            let axis = buffer[1];
            if axis >= AXIS_COUNT {
                return Err(ParseError::InvalidAxis(axis));
            }
            Ok(Command::Frame(ParsedFrame::AxisAngle {
                axis,
                angle: buffer[2],
            }))
        }
        MACRO_HEADER => {
            let selector = MacroSelector::try_from(buffer[1])?;
            Ok(Command::Frame(ParsedFrame::Macro { selector }))
        }
        other => Err(ParseError::InvalidHeader(other)),
    }
}

fn match_control_token(buffer: &[u8]) -> Option<ControlCommand> {
    if buffer.starts_with(TEST_TOKEN) {
        Some(ControlCommand::Test)
    } else if buffer.starts_with(QUIT_TOKEN) {
        Some(ControlCommand::Quit)
    } else {
        None
    }
}

/// Header-delimited decoder for a client byte stream
///
/// Bytes are appended with [`StreamDecoder::extend`] and commands are pulled
/// with [`StreamDecoder::next_command`] until it returns `None`, meaning the
/// buffered tail is a partial command. A byte that cannot begin any command
/// is reported once as [`ParseError::InvalidHeader`] and dropped.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: BytesMut,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet decoded
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete command from the buffer
    pub fn next_command(&mut self) -> Option<Result<Command, ParseError>> {
        let first = *self.buffer.first()?;

        let unit_len = match first {
            AXIS_ANGLE_HEADER => AXIS_FRAME_LEN,
            MACRO_HEADER => MACRO_FRAME_LEN,
            _ if self.could_be_control_token() => {
                if self.buffer.len() < CONTROL_TOKEN_LEN {
                    return None;
                }
                CONTROL_TOKEN_LEN
            }
            other => {
                self.buffer.advance(1);
                return Some(Err(ParseError::InvalidHeader(other)));
            }
        };

        if self.buffer.len() < unit_len {
            return None;
        }

        let unit = self.buffer.split_to(unit_len);
        Some(parse(&unit))
    }

    fn could_be_control_token(&self) -> bool {
        let n = self.buffer.len().min(CONTROL_TOKEN_LEN);
        let head = &self.buffer[..n];
        TEST_TOKEN.starts_with(head) || QUIT_TOKEN.starts_with(head)
    }
}
