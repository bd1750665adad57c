//! Subscription Descriptor
//!
//! The set of instruments and modes requested from the venue. The
//! descriptor is fixed for the lifetime of the process and replayed after
//! every (re)connect.
//!
//! # Format
//!
//! Subscriptions are written as `MODE:SCRIP_TYPE:EXCHANGE:SCRIP_ID`, for
//! example `FULL:INDEX:NSE:13` for the NIFTY 50 index. Several entries are
//! separated by commas. Duplicates collapse into one entry.

use std::fmt;
use std::str::FromStr;

use super::market_data::PacketType;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while parsing subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Entry does not have four colon-separated parts.
    #[error("invalid subscription '{0}': expected MODE:SCRIP_TYPE:EXCHANGE:SCRIP_ID")]
    InvalidFormat(String),

    /// Unknown subscription mode.
    #[error("unknown subscription mode: {0}")]
    UnknownMode(String),

    /// Unknown scrip type.
    #[error("unknown scrip type: {0}")]
    UnknownScripType(String),

    /// Unknown exchange.
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    /// Scrip id is empty or not numeric.
    #[error("invalid scrip id: '{0}'")]
    InvalidScripId(String),
}

// =============================================================================
// Subscription Parts
// =============================================================================

/// Amount of data requested per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionMode {
    /// Last traded price only.
    Ltp,
    /// Quote.
    Quote,
    /// Quote with market depth.
    Full,
}

impl SubscriptionMode {
    /// Venue name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ltp => "LTP",
            Self::Quote => "QUOTE",
            Self::Full => "FULL",
        }
    }
}

impl FromStr for SubscriptionMode {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LTP" => Ok(Self::Ltp),
            "QUOTE" => Ok(Self::Quote),
            "FULL" => Ok(Self::Full),
            other => Err(SubscriptionError::UnknownMode(other.to_string())),
        }
    }
}

/// Kind of instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScripType {
    /// Market index.
    Index,
    /// Cash equity.
    Equity,
    /// Exchange traded fund.
    Etf,
    /// Future contract.
    Future,
    /// Option contract.
    Option,
}

impl ScripType {
    /// Venue name of the scrip type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Index => "INDEX",
            Self::Equity => "EQUITY",
            Self::Etf => "ETF",
            Self::Future => "FUTURE",
            Self::Option => "OPTION",
        }
    }
}

impl FromStr for ScripType {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INDEX" => Ok(Self::Index),
            "EQUITY" => Ok(Self::Equity),
            "ETF" => Ok(Self::Etf),
            "FUTURE" => Ok(Self::Future),
            "OPTION" => Ok(Self::Option),
            other => Err(SubscriptionError::UnknownScripType(other.to_string())),
        }
    }
}

/// Listing exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// National Stock Exchange.
    Nse,
    /// Bombay Stock Exchange.
    Bse,
}

impl Exchange {
    /// Venue name of the exchange.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nse => "NSE",
            Self::Bse => "BSE",
        }
    }
}

impl FromStr for Exchange {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NSE" => Ok(Self::Nse),
            "BSE" => Ok(Self::Bse),
            other => Err(SubscriptionError::UnknownExchange(other.to_string())),
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A single instrument subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    mode: SubscriptionMode,
    scrip_type: ScripType,
    exchange: Exchange,
    scrip_id: String,
}

impl Subscription {
    /// Create a subscription.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::InvalidScripId` if the id is empty or
    /// contains anything other than ASCII digits.
    pub fn new(
        mode: SubscriptionMode,
        scrip_type: ScripType,
        exchange: Exchange,
        scrip_id: impl Into<String>,
    ) -> Result<Self, SubscriptionError> {
        let scrip_id = scrip_id.into();
        if scrip_id.is_empty() || !scrip_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SubscriptionError::InvalidScripId(scrip_id));
        }
        Ok(Self {
            mode,
            scrip_type,
            exchange,
            scrip_id,
        })
    }

    /// Requested mode.
    #[must_use]
    pub const fn mode(&self) -> SubscriptionMode {
        self.mode
    }

    /// Instrument kind.
    #[must_use]
    pub const fn scrip_type(&self) -> ScripType {
        self.scrip_type
    }

    /// Listing exchange.
    #[must_use]
    pub const fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// Venue scrip id. Packets report it back as their security id.
    #[must_use]
    pub fn scrip_id(&self) -> &str {
        &self.scrip_id
    }

    /// Packet layout the venue sends for this subscription.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match (self.scrip_type, self.mode) {
            (ScripType::Index, SubscriptionMode::Ltp) => PacketType::IndexLtp,
            (ScripType::Index, SubscriptionMode::Quote) => PacketType::IndexQuote,
            (ScripType::Index, SubscriptionMode::Full) => PacketType::IndexFull,
            (_, SubscriptionMode::Ltp) => PacketType::Ltp,
            (_, SubscriptionMode::Quote) => PacketType::Quote,
            (_, SubscriptionMode::Full) => PacketType::Full,
        }
    }
}

impl FromStr for Subscription {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let [mode, scrip_type, exchange, scrip_id] = parts.as_slice() else {
            return Err(SubscriptionError::InvalidFormat(s.trim().to_string()));
        };
        Self::new(
            mode.parse()?,
            scrip_type.parse()?,
            exchange.parse()?,
            scrip_id.trim(),
        )
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.mode.as_str(),
            self.scrip_type.as_str(),
            self.exchange.as_str(),
            self.scrip_id
        )
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// Ordered, de-duplicated set of subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDescriptor {
    entries: Vec<Subscription>,
}

impl SubscriptionDescriptor {
    /// Build a descriptor, keeping the first occurrence of each entry.
    #[must_use]
    pub fn new(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let mut entries: Vec<Subscription> = Vec::new();
        for subscription in subscriptions {
            if !entries.contains(&subscription) {
                entries.push(subscription);
            }
        }
        Self { entries }
    }

    /// Parse a comma separated list of subscriptions.
    ///
    /// Blank entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first entry that fails to parse.
    pub fn parse(list: &str) -> Result<Self, SubscriptionError> {
        let subscriptions = list
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Subscription>, _>>()?;
        Ok(Self::new(subscriptions))
    }

    /// Iterate subscriptions in request order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Number of subscriptions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the descriptor requests nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(security_id, packet_type)` pairs the venue will publish.
    #[must_use]
    pub fn expected_records(&self) -> Vec<(String, PacketType)> {
        self.entries
            .iter()
            .map(|s| (s.scrip_id.clone(), s.packet_type()))
            .collect()
    }
}

impl fmt::Display for SubscriptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parse_nifty_full_index() {
        let sub: Subscription = "FULL:INDEX:NSE:13".parse().unwrap();
        assert_eq!(sub.mode(), SubscriptionMode::Full);
        assert_eq!(sub.scrip_type(), ScripType::Index);
        assert_eq!(sub.exchange(), Exchange::Nse);
        assert_eq!(sub.scrip_id(), "13");
        assert_eq!(sub.packet_type(), PacketType::IndexFull);
        assert_eq!(sub.to_string(), "FULL:INDEX:NSE:13");
    }

    #[test_case("LTP:INDEX:NSE:13", PacketType::IndexLtp ; "index ltp")]
    #[test_case("QUOTE:INDEX:NSE:13", PacketType::IndexQuote ; "index quote")]
    #[test_case("FULL:INDEX:BSE:51", PacketType::IndexFull ; "index full")]
    #[test_case("LTP:EQUITY:NSE:1333", PacketType::Ltp ; "equity ltp")]
    #[test_case("QUOTE:ETF:NSE:7", PacketType::Quote ; "etf quote")]
    #[test_case("full:future:nse:35001", PacketType::Full ; "lowercase future full")]
    fn subscription_maps_to_packet_type(entry: &str, expected: PacketType) {
        let sub: Subscription = entry.parse().unwrap();
        assert_eq!(sub.packet_type(), expected);
    }

    #[test_case("FULL:INDEX:NSE" ; "missing scrip id")]
    #[test_case("FULL:INDEX:NSE:13:X" ; "too many parts")]
    #[test_case("" ; "empty")]
    fn malformed_entries_rejected(entry: &str) {
        assert!(matches!(
            entry.parse::<Subscription>(),
            Err(SubscriptionError::InvalidFormat(_))
        ));
    }

    #[test]
    fn unknown_parts_rejected() {
        assert_eq!(
            "DEPTH:INDEX:NSE:13".parse::<Subscription>(),
            Err(SubscriptionError::UnknownMode("DEPTH".to_string()))
        );
        assert_eq!(
            "FULL:BOND:NSE:13".parse::<Subscription>(),
            Err(SubscriptionError::UnknownScripType("BOND".to_string()))
        );
        assert_eq!(
            "FULL:INDEX:MCX:13".parse::<Subscription>(),
            Err(SubscriptionError::UnknownExchange("MCX".to_string()))
        );
        assert_eq!(
            "FULL:INDEX:NSE:NIFTY".parse::<Subscription>(),
            Err(SubscriptionError::InvalidScripId("NIFTY".to_string()))
        );
    }

    #[test]
    fn descriptor_deduplicates_in_order() {
        let descriptor =
            SubscriptionDescriptor::parse("FULL:INDEX:NSE:13, LTP:EQUITY:NSE:1333,FULL:INDEX:NSE:13")
                .unwrap();
        assert_eq!(descriptor.len(), 2);
        assert_eq!(descriptor.to_string(), "FULL:INDEX:NSE:13,LTP:EQUITY:NSE:1333");
        assert_eq!(
            descriptor.expected_records(),
            vec![
                ("13".to_string(), PacketType::IndexFull),
                ("1333".to_string(), PacketType::Ltp),
            ]
        );
    }

    #[test]
    fn descriptor_ignores_blank_entries() {
        let descriptor = SubscriptionDescriptor::parse(" , ,").unwrap();
        assert!(descriptor.is_empty());
    }
}
