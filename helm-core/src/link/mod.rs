//! Reconnecting duplex channels.
//!
//! | Module     | Purpose                                             |
//! |------------|-----------------------------------------------------|
//! | `state`    | Pure status / attempt / timer state machine          |
//! | `endpoint` | Validated `ws://` / `wss://` addresses               |
//! | `socket`   | `Connector` / `Socket` seam + WebSocket transport    |
//! | `memory`   | In-memory transport for simulation and tests         |
//! | `channel`  | `DuplexChannel` handle and its driver task           |

pub mod channel;
pub mod endpoint;
pub mod memory;
pub mod socket;
pub mod state;

pub use channel::{ChannelConfig, DuplexChannel};
pub use endpoint::Endpoint;
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer, PendingConnection};
pub use socket::{Connector, Socket, WsConnector};
pub use state::{ChannelMachine, ChannelStatus, LinkState, ReconnectState};
