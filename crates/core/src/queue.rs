//! Queue classes and the typed mutations that travel through them.
//!
//! Every mutation the ordering app can make while offline belongs to exactly
//! one [`QueueClass`]. The payload for each class is a concrete type that is
//! validated when it enters the edge, so the durable queue never holds a body
//! the backend would reject for structural reasons.
//!
//! The typed [`Mutation`] is a read-only view. A [`Payload`] keeps the text
//! the app submitted, and that text is what the queue stores and what is
//! POSTed upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{Email, EntryId, OrderId, Price, ProductId, TenantId};

/// The partition a queued mutation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueClass {
    Orders,
    Analytics,
    VoiceCommands,
}

impl QueueClass {
    /// All queue classes, in drain priority order.
    pub const ALL: [Self; 3] = [Self::Orders, Self::Analytics, Self::VoiceCommands];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Analytics => "analytics",
            Self::VoiceCommands => "voice-commands",
        }
    }

    /// Path of the upstream endpoint that accepts this class's mutations.
    #[must_use]
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Orders => "/api/orders",
            Self::Analytics => "/api/analytics/batch",
            Self::VoiceCommands => "/api/voice/commands",
        }
    }

    /// The sync tag that drains this class.
    #[must_use]
    pub const fn sync_tag(self) -> SyncTag {
        SyncTag(self)
    }

    /// The class whose endpoint is exactly `path`, if any.
    #[must_use]
    pub fn for_endpoint(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        Self::ALL.into_iter().find(|class| class.endpoint() == path)
    }
}

impl std::fmt::Display for QueueClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueClass {
    type Err = MutationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orders" => Ok(Self::Orders),
            "analytics" => Ok(Self::Analytics),
            "voice-commands" => Ok(Self::VoiceCommands),
            _ => Err(MutationError::UnknownQueue(s.to_string())),
        }
    }
}

/// A background-sync trigger tag such as `sync-orders`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncTag(QueueClass);

impl SyncTag {
    const PREFIX: &'static str = "sync-";

    #[must_use]
    pub const fn class(self) -> QueueClass {
        self.0
    }
}

impl std::fmt::Display for SyncTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl std::str::FromStr for SyncTag {
    type Err = MutationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .and_then(|class| class.parse().ok())
            .map(Self)
            .ok_or_else(|| MutationError::UnknownSyncTag(s.to_string()))
    }
}

/// Reasons a mutation payload is refused at the boundary.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown queue class: {0}")]
    UnknownQueue(String),

    #[error("unknown sync tag: {0}")]
    UnknownSyncTag(String),

    #[error("order must contain at least one line")]
    EmptyOrder,

    #[error("order line {line}: quantity must be at least 1")]
    InvalidQuantity { line: usize },

    #[error("order line {line}: unit price cannot be negative")]
    NegativePrice { line: usize },

    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    #[error("confidence must be between 0 and 1 (got {0})")]
    ConfidenceOutOfRange(f32),

    #[error("payload is not valid UTF-8")]
    NotUtf8,
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Price,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
}

/// An order placed from the customer ordering app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub tenant_id: TenantId,
    /// Client-side order number, when the app assigns one before submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(alias = "items")]
    pub lines: Vec<OrderLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<Email>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrderSubmission {
    fn validate(&self) -> Result<(), MutationError> {
        if self.tenant_id.as_str().trim().is_empty() {
            return Err(MutationError::EmptyField { field: "tenantId" });
        }
        if self.lines.is_empty() {
            return Err(MutationError::EmptyOrder);
        }
        for (line, item) in self.lines.iter().enumerate() {
            if item.quantity == 0 {
                return Err(MutationError::InvalidQuantity { line });
            }
            if item.unit_price.is_negative() {
                return Err(MutationError::NegativePrice { line });
            }
        }
        Ok(())
    }
}

/// A usage analytics event recorded by the ordering app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    #[serde(alias = "event")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A voice order command captured by the kiosk microphone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCommand {
    pub transcript: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_language() -> String {
    "de-CH".to_string()
}

/// The typed view of a mutation body, one variant per queue class.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Order(OrderSubmission),
    Analytics(AnalyticsEvent),
    VoiceCommand(VoiceCommand),
}

impl Mutation {
    /// Parse and validate a JSON body for the given queue class.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Json`] if the body does not match the class's
    /// shape, or a validation error if a field breaks a domain rule.
    pub fn parse(class: QueueClass, body: &[u8]) -> Result<Self, MutationError> {
        let mutation = match class {
            QueueClass::Orders => Self::Order(serde_json::from_slice(body)?),
            QueueClass::Analytics => Self::Analytics(serde_json::from_slice(body)?),
            QueueClass::VoiceCommands => Self::VoiceCommand(serde_json::from_slice(body)?),
        };
        mutation.validate()?;
        Ok(mutation)
    }

    #[must_use]
    pub const fn class(&self) -> QueueClass {
        match self {
            Self::Order(_) => QueueClass::Orders,
            Self::Analytics(_) => QueueClass::Analytics,
            Self::VoiceCommand(_) => QueueClass::VoiceCommands,
        }
    }

    /// Check domain rules for the payload.
    ///
    /// # Errors
    ///
    /// Returns the first rule the payload breaks.
    pub fn validate(&self) -> Result<(), MutationError> {
        match self {
            Self::Order(order) => order.validate(),
            Self::Analytics(event) => {
                if event.name.trim().is_empty() {
                    return Err(MutationError::EmptyField { field: "name" });
                }
                Ok(())
            }
            Self::VoiceCommand(command) => {
                if command.transcript.trim().is_empty() {
                    return Err(MutationError::EmptyField {
                        field: "transcript",
                    });
                }
                if let Some(confidence) = command.confidence
                    && !(0.0..=1.0).contains(&confidence)
                {
                    return Err(MutationError::ConfidenceOutOfRange(confidence));
                }
                Ok(())
            }
        }
    }
}

/// A validated mutation body together with the exact text it arrived as.
///
/// Serializes as the JSON it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    mutation: Mutation,
    raw: String,
}

impl Payload {
    /// Validate `body` for `class` and keep it verbatim.
    ///
    /// # Errors
    ///
    /// Same as [`Mutation::parse`].
    pub fn parse(class: QueueClass, body: &[u8]) -> Result<Self, MutationError> {
        let mutation = Mutation::parse(class, body)?;
        let raw = String::from_utf8(body.to_vec()).map_err(|_| MutationError::NotUtf8)?;
        Ok(Self { mutation, raw })
    }

    /// Validate a decoded JSON value, keeping its compact serialization.
    ///
    /// # Errors
    ///
    /// Same as [`Mutation::parse`].
    pub fn from_value(class: QueueClass, value: &Value) -> Result<Self, MutationError> {
        Self::parse(class, &serde_json::to_vec(value)?)
    }

    #[must_use]
    pub const fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    #[must_use]
    pub const fn class(&self) -> QueueClass {
        self.mutation.class()
    }

    /// The body exactly as submitted.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }
}

impl Serialize for Payload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value: Value = serde_json::from_str(&self.raw).map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}

/// A pending mutation held in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: EntryId,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Wrap a payload in a new entry with a generated ID.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self::with_id(EntryId::generate(), payload)
    }

    /// Wrap a payload in a new entry with a caller-supplied ID.
    #[must_use]
    pub fn with_id(id: EntryId, payload: Payload) -> Self {
        Self {
            id,
            payload,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn class(&self) -> QueueClass {
        self.payload.class()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn order_json() -> Value {
        json!({
            "tenantId": "zuri-burger",
            "lines": [{
                "productId": "p-1",
                "name": "Classic Burger",
                "quantity": 2,
                "unitPrice": { "amount": "14.50", "currencyCode": "CHF" }
            }],
            "customerName": "Anna",
            "pickupSlot": "12:15"
        })
    }

    #[test]
    fn test_queue_class_endpoints() {
        assert_eq!(QueueClass::Orders.endpoint(), "/api/orders");
        assert_eq!(QueueClass::Analytics.endpoint(), "/api/analytics/batch");
        assert_eq!(QueueClass::VoiceCommands.endpoint(), "/api/voice/commands");
        assert_eq!(
            QueueClass::for_endpoint("/api/orders/"),
            Some(QueueClass::Orders)
        );
        assert_eq!(QueueClass::for_endpoint("/api/orders/42"), None);
    }

    #[test]
    fn test_sync_tag_parse() {
        let tag: SyncTag = "sync-voice-commands".parse().unwrap();
        assert_eq!(tag.class(), QueueClass::VoiceCommands);
        assert_eq!(tag.to_string(), "sync-voice-commands");
        assert!("sync-payments".parse::<SyncTag>().is_err());
        assert!("orders".parse::<SyncTag>().is_err());
    }

    #[test]
    fn test_payload_keeps_submitted_text() {
        // Aliases and omitted defaults are stored as sent
        let body = br#"{ "event":"menu_view" }"#;
        let payload = Payload::parse(QueueClass::Analytics, body).unwrap();
        assert_eq!(payload.as_bytes(), body);
        assert_eq!(payload.class(), QueueClass::Analytics);
        match payload.mutation() {
            Mutation::Analytics(event) => assert_eq!(event.name, "menu_view"),
            other => panic!("expected analytics event, got {other:?}"),
        }

        let voice = br#"{"transcript":"zwei Burger"}"#;
        assert_eq!(
            Payload::parse(QueueClass::VoiceCommands, voice).unwrap().as_bytes(),
            voice
        );
    }

    #[test]
    fn test_payload_serializes_as_its_json() {
        let payload = Payload::from_value(QueueClass::Orders, &order_json()).unwrap();
        assert_eq!(serde_json::to_value(&payload).unwrap(), order_json());
    }

    #[test]
    fn test_order_items_alias() {
        let mut body = order_json();
        let lines = body["lines"].take();
        body.as_object_mut().unwrap().remove("lines");
        body["items"] = lines;
        let payload = Payload::from_value(QueueClass::Orders, &body).unwrap();
        assert!(payload.as_str().contains("\"items\""));
        assert!(!payload.as_str().contains("\"lines\""));
    }

    #[test]
    fn test_order_validation() {
        let mut empty = order_json();
        empty["lines"] = json!([]);
        assert!(matches!(
            Mutation::parse(QueueClass::Orders, empty.to_string().as_bytes()),
            Err(MutationError::EmptyOrder)
        ));

        let mut zero = order_json();
        zero["lines"][0]["quantity"] = json!(0);
        assert!(matches!(
            Mutation::parse(QueueClass::Orders, zero.to_string().as_bytes()),
            Err(MutationError::InvalidQuantity { line: 0 })
        ));

        let mut negative = order_json();
        negative["lines"][0]["unitPrice"]["amount"] = json!("-1.00");
        assert!(matches!(
            Mutation::parse(QueueClass::Orders, negative.to_string().as_bytes()),
            Err(MutationError::NegativePrice { line: 0 })
        ));
    }

    #[test]
    fn test_wrong_shape_is_rejected_not_defaulted() {
        let result = Mutation::parse(QueueClass::Orders, br#"{"hello":"world"}"#);
        assert!(matches!(result, Err(MutationError::Json(_))));

        let result = Mutation::parse(QueueClass::Analytics, b"not json");
        assert!(matches!(result, Err(MutationError::Json(_))));
    }

    #[test]
    fn test_analytics_validation() {
        let ok = Mutation::parse(
            QueueClass::Analytics,
            br#"{"name":"menu_viewed","properties":{"category":"drinks"}}"#,
        )
        .unwrap();
        assert_eq!(ok.class(), QueueClass::Analytics);

        let blank = Mutation::parse(QueueClass::Analytics, br#"{"name":"  "}"#);
        assert!(matches!(
            blank,
            Err(MutationError::EmptyField { field: "name" })
        ));
    }

    #[test]
    fn test_voice_command_defaults_and_validation() {
        let command =
            Mutation::parse(QueueClass::VoiceCommands, br#"{"transcript":"zwei Burger"}"#).unwrap();
        match command {
            Mutation::VoiceCommand(ref voice) => assert_eq!(voice.language, "de-CH"),
            _ => panic!("expected voice command"),
        }

        let bad = Mutation::parse(
            QueueClass::VoiceCommands,
            br#"{"transcript":"zwei Burger","confidence":1.5}"#,
        );
        assert!(matches!(bad, Err(MutationError::ConfidenceOutOfRange(_))));
    }

    #[test]
    fn test_queue_entry_class_follows_payload() {
        let payload = Payload::from_value(QueueClass::Orders, &order_json()).unwrap();
        let entry = QueueEntry::new(payload);
        assert_eq!(entry.class(), QueueClass::Orders);
    }
}
