//! Realtime stream: one authenticated connection per session.
//!
//! [`StreamBinding`] owns the connection and its listener slots,
//! [`transport`] moves text frames over a WebSocket, and [`event`] parses
//! them into [`StreamEvent`]s.

pub mod binding;
pub mod event;
pub mod transport;

pub use binding::{ConnectionState, StreamBinding, Subscription};
pub use event::{DeviceData, EventKind, StreamEvent};
pub use transport::{FramePipe, StreamTransport, WsTransport};
