//! Paytm Money Broadcast Adapter
//!
//! Client for the live market data broadcast:
//!
//! - **auth**: token-carrying WebSocket upgrade
//! - **codec**: binary packet decoder (little-endian fixed layouts)
//! - **messages**: subscription preference JSON
//! - **heartbeat** / **reconnect**: liveness and backoff
//! - **connection**: lifecycle state machine feeding the snapshot queue

pub mod auth;
pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use auth::{AccessToken, AuthError};
pub use codec::{DecodeError, decode, decode_frame};
pub use connection::{
    ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState, ConnectionStats,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{SubscriptionPreference, subscription_message};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
