//! Binary Packet Codec
//!
//! Decodes the Paytm Money broadcast wire format. A binary frame carries
//! one or more packets back to back:
//!
//! ```text
//! [u8 discriminant][fixed-width little-endian payload][u8 discriminant][...]
//! ```
//!
//! Payload widths per discriminant:
//!
//! | Discriminant | Type          | Payload bytes |
//! |--------------|---------------|---------------|
//! | 61           | `LTP`         | 22            |
//! | 62           | `QUOTE`       | 66            |
//! | 63           | `FULL`        | 174           |
//! | 64           | `INDEX_LTP`   | 22            |
//! | 65           | `INDEX_QUOTE` | 42            |
//! | 66           | `INDEX_FULL`  | 38            |
//!
//! Prices arrive as IEEE-754 `f32` and are converted to `Decimal` rounded
//! to [`PRICE_SCALE`] places. Times are `u32` epoch seconds.
//!
//! Decoding is pure: the same bytes always give the same result, and no
//! input can make it panic.

use bytes::Buf;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::domain::market_data::{
    DepthLevel, Full, IndexFull, IndexLtp, IndexQuote, Ltp, MarketData, PacketType, Quote,
};

/// Decimal places kept for every price-like field.
pub const PRICE_SCALE: u32 = 2;

/// Levels in the `FULL` depth ladder.
pub const DEPTH_LEVELS: usize = 5;

/// Bytes per depth level.
const DEPTH_LEVEL_WIDTH: usize = 20;

/// Payload width of a packet type, excluding the discriminant byte.
#[must_use]
pub const fn payload_len(packet_type: PacketType) -> usize {
    match packet_type {
        PacketType::Ltp | PacketType::IndexLtp => 22,
        PacketType::Quote => 66,
        PacketType::Full => DEPTH_LEVELS * DEPTH_LEVEL_WIDTH + 66 + 8,
        PacketType::IndexQuote => 42,
        PacketType::IndexFull => 38,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Reasons a packet cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Discriminant is not one of the known packet types.
    #[error("unknown packet discriminant {discriminant} ({length} bytes follow)")]
    UnknownDiscriminant {
        /// Discriminant byte.
        discriminant: u8,
        /// Bytes available after the discriminant.
        length: usize,
    },

    /// Payload shorter than the packet layout.
    #[error("truncated {packet_type} packet: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Layout selected by the discriminant.
        packet_type: PacketType,
        /// Bytes required by the layout.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// A price field is NaN, infinite or outside the decimal range.
    #[error("unrepresentable {field} in {packet_type} packet")]
    UnrepresentablePrice {
        /// Layout being decoded.
        packet_type: PacketType,
        /// Offending field.
        field: &'static str,
    },
}

impl DecodeError {
    /// Discriminant of the packet that failed.
    #[must_use]
    pub const fn discriminant(&self) -> u8 {
        match self {
            Self::UnknownDiscriminant { discriminant, .. } => *discriminant,
            Self::Truncated { packet_type, .. } | Self::UnrepresentablePrice { packet_type, .. } => {
                packet_type.discriminant()
            }
        }
    }

    /// Payload length seen when the packet failed.
    #[must_use]
    pub const fn length(&self) -> usize {
        match self {
            Self::UnknownDiscriminant { length, .. } => *length,
            Self::Truncated { actual, .. } => *actual,
            Self::UnrepresentablePrice { packet_type, .. } => payload_len(*packet_type),
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownDiscriminant { .. } => "unknown_discriminant",
            Self::Truncated { .. } => "truncated",
            Self::UnrepresentablePrice { .. } => "unrepresentable_price",
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a single packet payload.
///
/// Bytes beyond the layout width are ignored.
///
/// # Errors
///
/// Returns `DecodeError` for an unknown discriminant, a payload shorter
/// than the layout, or a price that cannot be represented.
pub fn decode(discriminant: u8, payload: &[u8]) -> Result<MarketData, DecodeError> {
    let packet_type =
        PacketType::from_discriminant(discriminant).ok_or(DecodeError::UnknownDiscriminant {
            discriminant,
            length: payload.len(),
        })?;

    let expected = payload_len(packet_type);
    if payload.len() < expected {
        return Err(DecodeError::Truncated {
            packet_type,
            expected,
            actual: payload.len(),
        });
    }

    let mut reader = PacketReader {
        buf: &payload[..expected],
        packet_type,
    };

    let record = match packet_type {
        PacketType::Ltp => MarketData::Ltp(reader.ltp()?),
        PacketType::Quote => MarketData::Quote(reader.quote()?),
        PacketType::Full => MarketData::Full(reader.full()?),
        PacketType::IndexLtp => MarketData::IndexLtp(reader.index_ltp()?),
        PacketType::IndexQuote => MarketData::IndexQuote(reader.index_quote()?),
        PacketType::IndexFull => MarketData::IndexFull(reader.index_full()?),
    };
    Ok(record)
}

/// Iterate the packets of a binary frame.
///
/// Yields one result per packet. Iteration stops after an unknown
/// discriminant or a truncated packet, since the rest of the frame can no
/// longer be aligned.
#[must_use]
pub const fn decode_frame(frame: &[u8]) -> FramePackets<'_> {
    FramePackets {
        rest: frame,
        done: false,
    }
}

/// Iterator returned by [`decode_frame`].
#[derive(Debug, Clone)]
pub struct FramePackets<'a> {
    rest: &'a [u8],
    done: bool,
}

impl Iterator for FramePackets<'_> {
    type Item = Result<MarketData, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (&discriminant, body) = self.rest.split_first()?;

        let Some(packet_type) = PacketType::from_discriminant(discriminant) else {
            self.done = true;
            return Some(Err(DecodeError::UnknownDiscriminant {
                discriminant,
                length: body.len(),
            }));
        };

        let width = payload_len(packet_type);
        if body.len() < width {
            self.done = true;
            return Some(Err(DecodeError::Truncated {
                packet_type,
                expected: width,
                actual: body.len(),
            }));
        }

        let (payload, rest) = body.split_at(width);
        self.rest = rest;
        Some(decode(discriminant, payload))
    }
}

/// Cursor over a payload whose length has already been checked.
struct PacketReader<'a> {
    buf: &'a [u8],
    packet_type: PacketType,
}

impl PacketReader<'_> {
    fn u8(&mut self) -> u8 {
        self.buf.get_u8()
    }

    fn u16(&mut self) -> u16 {
        self.buf.get_u16_le()
    }

    fn u32(&mut self) -> u32 {
        self.buf.get_u32_le()
    }

    fn security_id(&mut self) -> String {
        self.u32().to_string()
    }

    fn time(&mut self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.u32()), 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn price(&mut self, field: &'static str) -> Result<Decimal, DecodeError> {
        let raw = self.buf.get_f32_le();
        let unrepresentable = || DecodeError::UnrepresentablePrice {
            packet_type: self.packet_type,
            field,
        };
        if !raw.is_finite() {
            return Err(unrepresentable());
        }
        let mut value = Decimal::from_f32(raw)
            .ok_or_else(unrepresentable)?
            .round_dp(PRICE_SCALE);
        value.rescale(PRICE_SCALE);
        Ok(value)
    }

    fn ltp(&mut self) -> Result<Ltp, DecodeError> {
        Ok(Ltp {
            last_price: self.price("last_price")?,
            last_trade_time: self.time(),
            security_id: self.security_id(),
            tradable: self.u8(),
            mode: self.u8(),
            change_absolute: self.price("change_absolute")?,
            change_percent: self.price("change_percent")?,
        })
    }

    fn quote(&mut self) -> Result<Quote, DecodeError> {
        Ok(Quote {
            last_price: self.price("last_price")?,
            last_trade_time: self.time(),
            security_id: self.security_id(),
            tradable: self.u8(),
            mode: self.u8(),
            last_traded_quantity: self.u32(),
            average_traded_price: self.price("average_traded_price")?,
            volume_traded: self.u32(),
            total_buy_quantity: self.u32(),
            total_sell_quantity: self.u32(),
            open: self.price("open")?,
            close: self.price("close")?,
            high: self.price("high")?,
            low: self.price("low")?,
            change_percent: self.price("change_percent")?,
            change_absolute: self.price("change_absolute")?,
            week52_high: self.price("week52_high")?,
            week52_low: self.price("week52_low")?,
        })
    }

    fn depth_level(&mut self) -> Result<DepthLevel, DecodeError> {
        Ok(DepthLevel {
            buy_quantity: self.u32(),
            sell_quantity: self.u32(),
            buy_orders: self.u16(),
            sell_orders: self.u16(),
            buy_price: self.price("buy_price")?,
            sell_price: self.price("sell_price")?,
        })
    }

    fn full(&mut self) -> Result<Full, DecodeError> {
        let market_depth = (0..DEPTH_LEVELS)
            .map(|_| self.depth_level())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Full {
            market_depth,
            quote: self.quote()?,
            open_interest: self.u32(),
            change_open_interest: self.u32(),
        })
    }

    fn index_ltp(&mut self) -> Result<IndexLtp, DecodeError> {
        Ok(IndexLtp {
            last_price: self.price("last_price")?,
            last_trade_time: self.time(),
            security_id: self.security_id(),
            tradable: self.u8(),
            mode: self.u8(),
            change_absolute: self.price("change_absolute")?,
            change_percent: self.price("change_percent")?,
        })
    }

    fn index_quote(&mut self) -> Result<IndexQuote, DecodeError> {
        Ok(IndexQuote {
            last_price: self.price("last_price")?,
            security_id: self.security_id(),
            tradable: self.u8(),
            mode: self.u8(),
            open: self.price("open")?,
            close: self.price("close")?,
            high: self.price("high")?,
            low: self.price("low")?,
            change_percent: self.price("change_percent")?,
            change_absolute: self.price("change_absolute")?,
            week52_high: self.price("week52_high")?,
            week52_low: self.price("week52_low")?,
        })
    }

    fn index_full(&mut self) -> Result<IndexFull, DecodeError> {
        Ok(IndexFull {
            last_price: self.price("last_price")?,
            security_id: self.security_id(),
            tradable: self.u8(),
            mode: self.u8(),
            open: self.price("open")?,
            close: self.price("close")?,
            high: self.price("high")?,
            low: self.price("low")?,
            change_percent: self.price("change_percent")?,
            change_absolute: self.price("change_absolute")?,
            last_trade_time: self.time(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
