//! gantry-pty: native pseudo-terminal sessions for the launcher's terminal view.
//!
//! This crate owns the shell (or one-off command) the terminal window talks
//! to. It spawns the child on a PTY, drains its output on a dedicated thread
//! into a bounded buffer, and hands that output to the bridge in order, while
//! user input is written straight back to the PTY master.
//!
//! # Architecture
//!
//! - [`PtyHandle`]: Low-level PTY process management (spawn, resize, reap).
//! - [`OutputRing`]: Bounded output buffer that drops the oldest bytes on overflow.
//! - [`PtySession`]: A live PTY plus its drain thread: non-blocking reads,
//!   ordered subscriptions, writes, resize, idempotent close.
//! - [`SessionRegistry`]: All sessions of the app, keyed by [`SessionId`].
//! - [`Utf8Decoder`]: Text framing that never splits a character.
//! - [`BridgeConfig`]: Shell, sizes, buffer limits and environment.

pub mod config;
mod drain;
pub mod pty;
pub mod registry;
pub mod ring;
pub mod session;
pub mod utf8;

pub use config::{BridgeConfig, ConfigError};
pub use pty::{PtyError, PtyHandle, SpawnCommand, TermSize};
pub use registry::SessionRegistry;
pub use ring::OutputRing;
pub use session::{OutputSubscription, PtySession, ReadError, SessionId, WriteError};
pub use utf8::Utf8Decoder;
