//! Tunnel manager core
//!
//! Owns the per-device tunnel lifecycle (`PENDING → CONNECTED →
//! CLOSED`), the single multiplexed connection each tunnel carries,
//! and the routing of proxied HTTP round trips and socket sessions
//! over it. Everything network-facing sits behind the [`transport`]
//! traits so the same machinery runs over a WebSocket in production
//! and an in-memory duplex in tests.

pub mod error;
pub mod manager;
pub mod pending;
pub mod session;
pub mod transport;
pub mod tunnel;

pub use error::TunnelError;
pub use manager::{TunnelManager, TunnelManagerConfig};
pub use session::{StreamEvent, StreamHandle};
pub use transport::{memory, Connection, FrameSink, FrameSource, TransportError};
pub use tunnel::{ProxyRequest, ProxyResponse, TunnelState, TunnelStatus};
