//! # mdsync-collab — Realtime relay for one shared Markdown document
//!
//! Every connected browser sees the same document and the live cursors of
//! everyone else. Edits are last-write-wins on the whole document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    WebSocket     ┌─────────────┐
//! │ Browser     │ ◄──────────────► │ Connection  │ reader + writer
//! │ (per user)  │    JSON frames   │ (per user)  │
//! └─────────────┘                  └──────┬──────┘
//!                                         │ HubEvent (mpsc)
//!                                         ▼
//!                                  ┌─────────────┐
//!                                  │ Hub         │ document + cursors
//!                                  │ (arbiter)   │ single task, no locks
//!                                  └──────┬──────┘
//!                                         │ bounded outbound queues
//!                                         ▼
//!                                  every Connection's writer
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON envelope and cursor types
//! - [`hub`]: the arbiter (registration, fan-out, teardown)
//! - [`connection`]: per-socket reader and writer
//! - [`render`]: Markdown → sanitized HTML
//! - [`identity`]: random display ids and cursor colors
//! - [`server`]: HTTP routes, static client, WebSocket upgrade

pub mod protocol;
pub mod render;
pub mod identity;
pub mod hub;
pub mod connection;
pub mod server;

// Re-exports for convenience
pub use protocol::{CursorInfo, Envelope, MessageKind, ProtocolError};
pub use render::{MarkdownRenderer, RenderCache, RenderError, Renderer};
pub use identity::ParticipantIdentity;
pub use hub::{
    ConnectionId, Frame, Hub, HubClosed, HubEvent, HubHandle, HubSnapshot, HubStats,
    Registration,
};
pub use connection::Connection;
pub use server::{RelayServer, ServerConfig, ServerError};
