//! Push payloads, notification actions, and click routing.
//!
//! A push message arrives as JSON from the messaging backend. Every field is
//! optional and falls back to a fixed default, but a body that is not JSON or
//! names an unknown notification `type` is refused.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{OrderId, TenantId};

pub const DEFAULT_TITLE: &str = "EATECH";
pub const DEFAULT_BODY: &str = "You have a new notification";
pub const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/icons/badge-72x72.png";
pub const DEFAULT_TAG: &str = "eatech-notification";
pub const DEFAULT_VIBRATE: [u32; 3] = [200, 100, 200];
pub const DISMISS_ACTION: &str = "dismiss";

/// Errors raised while reading a push payload.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("malformed push payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Discriminator that selects the action set of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    OrderReady,
    OrderUpdate,
    NewMenu,
    Promotion,
    #[default]
    Generic,
}

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

const fn action_row(
    action: &'static str,
    title: &'static str,
    icon: &'static str,
) -> (&'static str, &'static str, &'static str) {
    (action, title, icon)
}

const DISMISS_ROW: (&str, &str, &str) = action_row(DISMISS_ACTION, "Dismiss", "/icons/close.png");

impl NotificationKind {
    /// The ordered action set for this kind. Always ends with `dismiss`.
    #[must_use]
    pub fn actions(self) -> Vec<NotificationAction> {
        let primary = match self {
            Self::OrderReady | Self::OrderUpdate => {
                action_row("view-order", "View order", "/icons/view.png")
            }
            Self::NewMenu => action_row("view-menu", "View menu", "/icons/menu.png"),
            Self::Promotion => action_row("view-offer", "View offer", "/icons/offer.png"),
            Self::Generic => action_row("open", "Open", "/icons/open.png"),
        };

        [primary, DISMISS_ROW]
            .into_iter()
            .map(|(action, title, icon)| NotificationAction {
                action: action.to_string(),
                title: title.to_string(),
                icon: icon.to_string(),
            })
            .collect()
    }
}

/// Navigation data carried by a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An inbound push message.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    pub vibrate: Option<Vec<u32>>,
    pub require_interaction: Option<bool>,
    pub silent: Option<bool>,
    #[serde(rename = "type")]
    pub kind: Option<NotificationKind>,
    pub data: Option<NotificationData>,
    pub payload: Option<NotificationData>,
}

impl PushMessage {
    /// Parse a push body. An empty body is a message with every field defaulted.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Malformed`] for non-JSON bodies, wrong field types,
    /// or an unknown `type`.
    pub fn parse(body: &[u8]) -> Result<Self, PushError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(body)?)
    }

    /// Build the notification to display, filling defaults.
    #[must_use]
    pub fn into_notification(self) -> Notification {
        let kind = self.kind.unwrap_or_default();
        let mut data = self.data.or(self.payload).unwrap_or_default();
        if data.url.is_none() {
            data.url = Some("/".to_string());
        }

        Notification {
            title: self.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: self.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: self.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            badge: self.badge.unwrap_or_else(|| DEFAULT_BADGE.to_string()),
            tag: self.tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
            vibrate: self.vibrate.unwrap_or_else(|| DEFAULT_VIBRATE.to_vec()),
            require_interaction: self.require_interaction.unwrap_or(false),
            silent: self.silent.unwrap_or(false),
            kind,
            actions: kind.actions(),
            data,
        }
    }
}

/// A notification ready to be shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub silent: bool,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

/// The user clicked a notification or one of its actions.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationClick {
    /// Action ID, or `None` when the notification body was clicked.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub data: NotificationData,
}

/// Where a click should take the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    /// The dismiss action: close and do nothing else.
    Dismiss,
    Navigate(String),
}

impl NotificationClick {
    /// Resolve the navigation target for this click.
    #[must_use]
    pub fn target(&self) -> ClickTarget {
        let default_url = || {
            self.data
                .url
                .clone()
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| "/".to_string())
        };

        match self.action.as_deref() {
            Some(DISMISS_ACTION) => ClickTarget::Dismiss,
            Some("view-order") => ClickTarget::Navigate(
                self.data
                    .order_id
                    .as_ref()
                    .map_or_else(default_url, |id| format!("/orders/{id}")),
            ),
            Some("view-menu") => ClickTarget::Navigate(
                self.data
                    .tenant_id
                    .as_ref()
                    .map_or_else(|| "/menu".to_string(), |id| format!("/menu/{id}")),
            ),
            Some("view-offer") => ClickTarget::Navigate(
                self.data
                    .url
                    .clone()
                    .unwrap_or_else(|| "/promotions".to_string()),
            ),
            _ => ClickTarget::Navigate(default_url()),
        }
    }
}
