//! Command and event surface between the launcher frontend and its terminals.
//!
//! [`Bridge`] answers the frontend's terminal commands over a
//! [`gantry_pty::SessionRegistry`]. Output is pushed as events by
//! [`events::pump_output`]; [`Bridge::read`] serves frontends that poll
//! instead.

pub mod bridge;
pub mod error;
pub mod events;
pub mod launch;
pub mod request;

pub use bridge::Bridge;
pub use error::BridgeError;
pub use events::{
    emit_input, handle_stdin, pump_output, ExitedPayload, OutputSink, PumpEnd, SinkError,
    StdinPayload, StdoutPayload, EXITED_EVENT, STDIN_EVENT, STDOUT_EVENT,
};
pub use launch::run_in_terminal;
pub use request::{BridgeRequest, BridgeResponse, TerminalInfo};
