//! Paytm Money Broadcast Messages
//!
//! Outbound control messages. The venue accepts a single JSON text frame
//! holding an array of subscription preferences:
//!
//! ```json
//! [{"actionType":"ADD","modeType":"FULL","scripType":"INDEX","exchangeType":"NSE","scripId":"13"}]
//! ```
//!
//! Market data itself arrives as binary frames, see [`super::codec`].

use serde::{Deserialize, Serialize};

use crate::domain::subscription::{Subscription, SubscriptionDescriptor};

/// Action that adds a scrip to the feed.
pub const ACTION_ADD: &str = "ADD";

/// One entry of the subscription preference array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPreference {
    /// `ADD`
    pub action_type: String,

    /// `LTP`, `QUOTE` or `FULL`
    pub mode_type: String,

    /// `INDEX`, `EQUITY`, `ETF`, `FUTURE` or `OPTION`
    pub scrip_type: String,

    /// `NSE` or `BSE`
    pub exchange_type: String,

    /// Numeric scrip (security) id as a string
    pub scrip_id: String,
}

impl SubscriptionPreference {
    /// Preference that adds `subscription` to the feed.
    #[must_use]
    pub fn add(subscription: &Subscription) -> Self {
        Self {
            action_type: ACTION_ADD.to_string(),
            mode_type: subscription.mode().as_str().to_string(),
            scrip_type: subscription.scrip_type().as_str().to_string(),
            exchange_type: subscription.exchange().as_str().to_string(),
            scrip_id: subscription.scrip_id().to_string(),
        }
    }
}

/// Serialize the subscription message for `descriptor`.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn subscription_message(descriptor: &SubscriptionDescriptor) -> Result<String, serde_json::Error> {
    let preferences: Vec<SubscriptionPreference> =
        descriptor.iter().map(SubscriptionPreference::add).collect();
    serde_json::to_string(&preferences)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_message_format() {
        let descriptor = SubscriptionDescriptor::parse("FULL:INDEX:NSE:13").unwrap();
        let json = subscription_message(&descriptor).unwrap();
        assert_eq!(
            json,
            r#"[{"actionType":"ADD","modeType":"FULL","scripType":"INDEX","exchangeType":"NSE","scripId":"13"}]"#
        );
    }

    #[test]
    fn test_subscription_message_preserves_order() {
        let descriptor =
            SubscriptionDescriptor::parse("LTP:EQUITY:BSE:500325,QUOTE:INDEX:NSE:13").unwrap();
        let json = subscription_message(&descriptor).unwrap();

        let parsed: Vec<SubscriptionPreference> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].scrip_id, "500325");
        assert_eq!(parsed[0].exchange_type, "BSE");
        assert_eq!(parsed[0].mode_type, "LTP");
        assert_eq!(parsed[1].scrip_type, "INDEX");
        assert!(parsed.iter().all(|p| p.action_type == ACTION_ADD));
    }

    #[test]
    fn test_empty_descriptor_serializes_empty_array() {
        let descriptor = SubscriptionDescriptor::parse("").unwrap();
        assert_eq!(subscription_message(&descriptor).unwrap(), "[]");
    }
}
