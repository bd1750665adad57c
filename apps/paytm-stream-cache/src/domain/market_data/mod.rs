//! Market Data Records
//!
//! Typed records for every packet the Paytm Money broadcast can deliver.
//! A record is identified by `(security_id, packet_type)` and always
//! exposes the time of the last trade (or index update) it describes.
//!
//! # Packet Types
//!
//! | Type          | Discriminant | Contents                                  |
//! |---------------|--------------|-------------------------------------------|
//! | `LTP`         | 61           | Last traded price and change              |
//! | `QUOTE`       | 62           | LTP plus volumes, OHLC and 52-week range  |
//! | `FULL`        | 63           | QUOTE plus 5-level depth and open interest |
//! | `INDEX_LTP`   | 64           | Index value and change                    |
//! | `INDEX_QUOTE` | 65           | Index value, OHLC and 52-week range       |
//! | `INDEX_FULL`  | 66           | Index value, OHLC and update time         |

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Packet Type
// =============================================================================

/// Closed set of packet layouts published by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketType {
    /// Last traded price for a tradable instrument.
    Ltp,
    /// Quote for a tradable instrument.
    Quote,
    /// Quote plus market depth for a tradable instrument.
    Full,
    /// Last value of an index.
    IndexLtp,
    /// Quote for an index.
    IndexQuote,
    /// Full snapshot of an index.
    IndexFull,
}

impl PacketType {
    /// Wire discriminant that prefixes packets of this type.
    #[must_use]
    pub const fn discriminant(self) -> u8 {
        match self {
            Self::Ltp => 61,
            Self::Quote => 62,
            Self::Full => 63,
            Self::IndexLtp => 64,
            Self::IndexQuote => 65,
            Self::IndexFull => 66,
        }
    }

    /// Resolve a wire discriminant.
    #[must_use]
    pub const fn from_discriminant(discriminant: u8) -> Option<Self> {
        match discriminant {
            61 => Some(Self::Ltp),
            62 => Some(Self::Quote),
            63 => Some(Self::Full),
            64 => Some(Self::IndexLtp),
            65 => Some(Self::IndexQuote),
            66 => Some(Self::IndexFull),
            _ => None,
        }
    }

    /// Name used in cache keys and serialized records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ltp => "LTP",
            Self::Quote => "QUOTE",
            Self::Full => "FULL",
            Self::IndexLtp => "INDEX_LTP",
            Self::IndexQuote => "INDEX_QUOTE",
            Self::IndexFull => "INDEX_FULL",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Record Payloads
// =============================================================================

/// Last traded price of a tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ltp {
    /// Venue security identifier.
    pub security_id: String,
    /// Tradable flag as published by the venue.
    pub tradable: u8,
    /// Subscription mode echoed by the venue.
    pub mode: u8,
    /// Last traded price.
    pub last_price: Decimal,
    /// Time of the last trade.
    pub last_trade_time: DateTime<Utc>,
    /// Absolute change from the previous close.
    pub change_absolute: Decimal,
    /// Percentage change from the previous close.
    pub change_percent: Decimal,
}

/// Quote for a tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Venue security identifier.
    pub security_id: String,
    /// Tradable flag as published by the venue.
    pub tradable: u8,
    /// Subscription mode echoed by the venue.
    pub mode: u8,
    /// Last traded price.
    pub last_price: Decimal,
    /// Time of the last trade.
    pub last_trade_time: DateTime<Utc>,
    /// Quantity of the last trade.
    pub last_traded_quantity: u32,
    /// Volume weighted average traded price.
    pub average_traded_price: Decimal,
    /// Volume traded in the session.
    pub volume_traded: u32,
    /// Total pending buy quantity.
    pub total_buy_quantity: u32,
    /// Total pending sell quantity.
    pub total_sell_quantity: u32,
    /// Session open.
    pub open: Decimal,
    /// Previous close.
    pub close: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Percentage change from the previous close.
    pub change_percent: Decimal,
    /// Absolute change from the previous close.
    pub change_absolute: Decimal,
    /// 52-week high.
    pub week52_high: Decimal,
    /// 52-week low.
    pub week52_low: Decimal,
}

/// One level of the order book ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Quantity bid at this level.
    pub buy_quantity: u32,
    /// Quantity offered at this level.
    pub sell_quantity: u32,
    /// Number of bid orders.
    pub buy_orders: u16,
    /// Number of offer orders.
    pub sell_orders: u16,
    /// Bid price.
    pub buy_price: Decimal,
    /// Offer price.
    pub sell_price: Decimal,
}

/// Quote plus depth and open interest for a tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Full {
    /// Quote section of the packet.
    pub quote: Quote,
    /// Five level depth ladder, best level first.
    pub market_depth: Vec<DepthLevel>,
    /// Open interest.
    pub open_interest: u32,
    /// Change in open interest.
    pub change_open_interest: u32,
}

/// Last value of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLtp {
    /// Venue security identifier.
    pub security_id: String,
    /// Tradable flag as published by the venue.
    pub tradable: u8,
    /// Subscription mode echoed by the venue.
    pub mode: u8,
    /// Last index value.
    pub last_price: Decimal,
    /// Time of the last index update.
    pub last_trade_time: DateTime<Utc>,
    /// Absolute change from the previous close.
    pub change_absolute: Decimal,
    /// Percentage change from the previous close.
    pub change_percent: Decimal,
}

/// Quote for an index.
///
/// The venue does not send an update time for this layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexQuote {
    /// Venue security identifier.
    pub security_id: String,
    /// Tradable flag as published by the venue.
    pub tradable: u8,
    /// Subscription mode echoed by the venue.
    pub mode: u8,
    /// Last index value.
    pub last_price: Decimal,
    /// Session open.
    pub open: Decimal,
    /// Previous close.
    pub close: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Percentage change from the previous close.
    pub change_percent: Decimal,
    /// Absolute change from the previous close.
    pub change_absolute: Decimal,
    /// 52-week high.
    pub week52_high: Decimal,
    /// 52-week low.
    pub week52_low: Decimal,
}

/// Full snapshot of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFull {
    /// Venue security identifier.
    pub security_id: String,
    /// Tradable flag as published by the venue.
    pub tradable: u8,
    /// Subscription mode echoed by the venue.
    pub mode: u8,
    /// Last index value.
    pub last_price: Decimal,
    /// Session open.
    pub open: Decimal,
    /// Previous close.
    pub close: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Percentage change from the previous close.
    pub change_percent: Decimal,
    /// Absolute change from the previous close.
    pub change_absolute: Decimal,
    /// Time of the last index update.
    pub last_trade_time: DateTime<Utc>,
}

// =============================================================================
// Market Data
// =============================================================================

/// A decoded market data record.
///
/// Serialized with a `packet_type` tag so cached entries can be decoded
/// without knowing which key they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "packet_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketData {
    /// `LTP` packet.
    Ltp(Ltp),
    /// `QUOTE` packet.
    Quote(Quote),
    /// `FULL` packet.
    Full(Full),
    /// `INDEX_LTP` packet.
    IndexLtp(IndexLtp),
    /// `INDEX_QUOTE` packet.
    IndexQuote(IndexQuote),
    /// `INDEX_FULL` packet.
    IndexFull(IndexFull),
}

impl MarketData {
    /// Packet layout this record was decoded from.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::Ltp(_) => PacketType::Ltp,
            Self::Quote(_) => PacketType::Quote,
            Self::Full(_) => PacketType::Full,
            Self::IndexLtp(_) => PacketType::IndexLtp,
            Self::IndexQuote(_) => PacketType::IndexQuote,
            Self::IndexFull(_) => PacketType::IndexFull,
        }
    }

    /// Venue security identifier.
    #[must_use]
    pub fn security_id(&self) -> &str {
        match self {
            Self::Ltp(p) => &p.security_id,
            Self::Quote(p) => &p.security_id,
            Self::Full(p) => &p.quote.security_id,
            Self::IndexLtp(p) => &p.security_id,
            Self::IndexQuote(p) => &p.security_id,
            Self::IndexFull(p) => &p.security_id,
        }
    }

    /// Event time used to order cached snapshots.
    ///
    /// `INDEX_QUOTE` carries no time on the wire and reports the Unix epoch.
    #[must_use]
    pub const fn last_trade_time(&self) -> DateTime<Utc> {
        match self {
            Self::Ltp(p) => p.last_trade_time,
            Self::Quote(p) => p.last_trade_time,
            Self::Full(p) => p.quote.last_trade_time,
            Self::IndexLtp(p) => p.last_trade_time,
            Self::IndexQuote(_) => DateTime::<Utc>::UNIX_EPOCH,
            Self::IndexFull(p) => p.last_trade_time,
        }
    }

    /// Last traded price or index value.
    #[must_use]
    pub const fn last_price(&self) -> Decimal {
        match self {
            Self::Ltp(p) => p.last_price,
            Self::Quote(p) => p.last_price,
            Self::Full(p) => p.quote.last_price,
            Self::IndexLtp(p) => p.last_price,
            Self::IndexQuote(p) => p.last_price,
            Self::IndexFull(p) => p.last_price,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sample_ltp() -> MarketData {
        MarketData::Ltp(Ltp {
            security_id: "13".to_string(),
            tradable: 1,
            mode: 1,
            last_price: dec("22150.50"),
            last_trade_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            change_absolute: dec("12.25"),
            change_percent: dec("0.06"),
        })
    }

    #[test]
    fn discriminants_round_trip() {
        for discriminant in 61..=66 {
            let packet_type = PacketType::from_discriminant(discriminant).unwrap();
            assert_eq!(packet_type.discriminant(), discriminant);
        }
        assert_eq!(PacketType::from_discriminant(60), None);
        assert_eq!(PacketType::from_discriminant(67), None);
    }

    #[test]
    fn record_serializes_with_packet_type_tag() {
        let json = serde_json::to_value(sample_ltp()).unwrap();
        assert_eq!(json["packet_type"], "LTP");
        assert_eq!(json["security_id"], "13");
        assert_eq!(json["last_price"], "22150.50");
    }

    #[test]
    fn record_ignores_unknown_fields() {
        let mut json = serde_json::to_value(sample_ltp()).unwrap();
        json["added_later"] = serde_json::json!(true);
        let decoded: MarketData = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, sample_ltp());
    }

    #[test]
    fn index_quote_reports_epoch_time() {
        let record = MarketData::IndexQuote(IndexQuote {
            security_id: "13".to_string(),
            tradable: 0,
            mode: 2,
            last_price: dec("22150.50"),
            open: dec("22100.00"),
            close: dec("22050.00"),
            high: dec("22200.00"),
            low: dec("22000.00"),
            change_percent: dec("0.45"),
            change_absolute: dec("100.50"),
            week52_high: dec("22500.00"),
            week52_low: dec("18000.00"),
        });
        assert_eq!(record.last_trade_time(), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(record.packet_type(), PacketType::IndexQuote);
    }

    #[test]
    fn accessors_expose_identity() {
        let record = sample_ltp();
        assert_eq!(record.security_id(), "13");
        assert_eq!(record.packet_type(), PacketType::Ltp);
        assert_eq!(record.last_price(), dec("22150.50"));
    }
}
