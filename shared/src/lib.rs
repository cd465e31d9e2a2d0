/*!
# Shared Protocol Types

Wire-level types for the robotic arm command relay. Everything in this crate
is pure: no sockets, no serial ports, no sleeping.

## Core Types

- [`CommandFrame`] - 3-byte frame understood by the arm controller
- [`Command`] - decoded client command (control token or binary frame)
- [`MacroSelector`] / [`MacroStep`] - canned choreography tables

## Modules

- [`frame`] - controller frame layout
- [`codec`] - client buffer parsing and stream framing
- [`macros`] - macro selectors and their step tables
*/

pub mod codec;
pub mod frame;
pub mod macros;

// Re-export commonly used types
pub use codec::{parse, Command, ControlCommand, ParseError, ParsedFrame, StreamDecoder};
pub use frame::CommandFrame;
pub use macros::{MacroSelector, MacroStep, STEP_DELAY};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Header of a single-axis command
    pub const AXIS_ANGLE_HEADER: u8 = 0xAA;

    /// Header of a macro command
    pub const MACRO_HEADER: u8 = 0xBB;

    /// Number of controllable axes (wire indices 0..=5)
    pub const AXIS_COUNT: u8 = 6;

    /// Size of a controller frame in bytes
    pub const FRAME_SIZE_BYTES: usize = 3;

    /// Minimum client bytes for an axis command
    pub const AXIS_FRAME_LEN: usize = 3;

    /// Minimum client bytes for a macro command
    pub const MACRO_FRAME_LEN: usize = 2;

    /// Connectivity check token
    pub const TEST_TOKEN: &[u8] = b"TEST";

    /// Shutdown token
    pub const QUIT_TOKEN: &[u8] = b"quit";

    /// Length of both control tokens
    pub const CONTROL_TOKEN_LEN: usize = 4;
}
