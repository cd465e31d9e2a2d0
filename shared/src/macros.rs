/*!
Canned macro choreography.

Each macro selector maps to a fixed, process-wide table of axis-angle frames.
The tables are constant; the sequencer in the relay replays them in order and
waits `delay_after` behind every frame so the arm can settle mechanically.
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::codec::ParseError;
use crate::frame::CommandFrame;

/// Settle time between choreography frames
pub const STEP_DELAY: Duration = Duration::from_millis(500);

/// Macro selector values carried in `param1` of a `0xBB` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MacroSelector {
    Reset = 0x00,
    ShiftLeft = 0x01,
    ShiftRight = 0x02,
    GripClose = 0x03,
    GripOpen = 0x04,
}

impl MacroSelector {
    /// Parse a selector byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Reset),
            0x01 => Some(Self::ShiftLeft),
            0x02 => Some(Self::ShiftRight),
            0x03 => Some(Self::GripClose),
            0x04 => Some(Self::GripOpen),
            _ => None,
        }
    }

    /// Human-readable macro name used in logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::ShiftLeft => "shift-left",
            Self::ShiftRight => "shift-right",
            Self::GripClose => "grip-close",
            Self::GripOpen => "grip-open",
        }
    }

    /// The frames this macro sends, in order
    pub fn steps(self) -> &'static [MacroStep] {
        match self {
            // The reset table lists all six axes but only the first four
            // entries are ever sent to the controller.
            Self::Reset => &RESET_TABLE[..RESET_STEPS_SENT],
            Self::ShiftLeft => &SHIFT_LEFT_TABLE,
            Self::ShiftRight => &SHIFT_RIGHT_TABLE,
            Self::GripClose => &GRIP_CLOSE_TABLE,
            Self::GripOpen => &GRIP_OPEN_TABLE,
        }
    }
}

impl TryFrom<u8> for MacroSelector {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(ParseError::UnknownMacroSelector(value))
    }
}

impl fmt::Display for MacroSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// One frame of a macro plus the pause that follows it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroStep {
    pub frame: CommandFrame,
    pub delay_after: Duration,
}

impl MacroStep {
    const fn axis(axis: u8, angle: u8) -> Self {
        Self {
            frame: CommandFrame::axis_angle(axis, angle),
            delay_after: STEP_DELAY,
        }
    }
}

const RESET_STEPS_SENT: usize = 4;

static RESET_TABLE: [MacroStep; 6] = [
    MacroStep::axis(1, 0x5A),
    MacroStep::axis(2, 0x5A),
    MacroStep::axis(3, 0x5A),
    MacroStep::axis(0, 0x5A),
    MacroStep::axis(4, 0x5A),
    MacroStep::axis(5, 0x5A),
];

static SHIFT_LEFT_TABLE: [MacroStep; 5] = [
    MacroStep::axis(0, 0x00),
    MacroStep::axis(1, 0x38),
    MacroStep::axis(2, 0x0C),
    MacroStep::axis(3, 0x14),
    MacroStep::axis(5, 0x63),
];

// Same pose as shift-left with the base swung the other way
static SHIFT_RIGHT_TABLE: [MacroStep; 5] = [
    MacroStep::axis(0, 0xB4),
    MacroStep::axis(1, 0x38),
    MacroStep::axis(2, 0x0C),
    MacroStep::axis(3, 0x14),
    MacroStep::axis(5, 0x63),
];

// Open the gripper, then clamp
static GRIP_CLOSE_TABLE: [MacroStep; 2] = [
    MacroStep::axis(4, 0x3C),
    MacroStep::axis(4, 0x82),
];

static GRIP_OPEN_TABLE: [MacroStep; 1] = [MacroStep::axis(4, 0x3C)];
