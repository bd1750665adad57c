//! Domain Layer - Market data records and subscriptions.
//!
//! Pure types with no I/O. Everything here is shared by the decoder,
//! the snapshot repository and the stream connection.

/// Decoded market data records and packet types.
pub mod market_data;

/// Instrument subscriptions requested from the venue.
pub mod subscription;
