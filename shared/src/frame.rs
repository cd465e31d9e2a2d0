/*!
Controller frame data structure.

Every command that reaches the arm controller over the serial link is a
fixed 3-byte frame: a header byte followed by two parameter bytes.
*/

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{AXIS_ANGLE_HEADER, FRAME_SIZE_BYTES};

/// A 3-byte command frame as sent to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandFrame {
    pub header: u8,
    pub param1: u8,
    pub param2: u8,
}

impl CommandFrame {
    /// Create a frame from raw parts
    pub const fn new(header: u8, param1: u8, param2: u8) -> Self {
        Self { header, param1, param2 }
    }

    /// Create an axis-angle frame (`0xAA`, axis, angle)
    ///
    /// `axis` is the 0-based wire index. The angle byte is passed through
    /// untouched.
    pub const fn axis_angle(axis: u8, angle: u8) -> Self {
        Self::new(AXIS_ANGLE_HEADER, axis, angle)
    }

    /// Wire representation of this frame
    pub const fn to_bytes(&self) -> [u8; FRAME_SIZE_BYTES] {
        [self.header, self.param1, self.param2]
    }

    /// Rebuild a frame from its wire representation
    pub const fn from_bytes(bytes: [u8; FRAME_SIZE_BYTES]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2])
    }

    pub fn is_axis_angle(&self) -> bool {
        self.header == AXIS_ANGLE_HEADER
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X} {:02X}", self.header, self.param1, self.param2)
    }
}
