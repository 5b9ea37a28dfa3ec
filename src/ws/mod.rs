//! # WebSocket Gateway
//!
//! Authenticates sockets, translates the `{event, data}` wire vocabulary
//! into hub calls, and serializes hub events back onto sockets. The gateway
//! is stateless beyond per-socket identity, the set of rooms the socket has
//! joined, and a reference to the hub.

mod gateway;
pub mod protocol;

pub use gateway::ws_handler;
