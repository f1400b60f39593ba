//! Push and notification gateway.
//!
//! Turns inbound push payloads into notifications and routes notification
//! clicks to an application window: an open window already showing the
//! target URL is focused, otherwise a new one is opened.

mod clients;
mod sink;

pub use clients::{ClientDirectory, ClientInfo, ClientRegistry, DEFAULT_CLIENT_CAPACITY};
pub use sink::{NotificationCenter, NotificationSink};

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use eatech_core::ClientId;
use eatech_core::push::{ClickTarget, Notification, NotificationClick, PushError, PushMessage};

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClickOutcome {
    /// The dismiss action; nothing was navigated.
    Dismissed,
    Focused {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        url: String,
    },
    Opened {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        url: String,
    },
}

/// Receives push events and notification clicks.
#[derive(Clone)]
pub struct PushGateway {
    sink: Arc<dyn NotificationSink>,
    clients: Arc<dyn ClientRegistry>,
}

impl PushGateway {
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>, clients: Arc<dyn ClientRegistry>) -> Self {
        Self { sink, clients }
    }

    /// Parse a push body and show the resulting notification.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Malformed`] if the body is not a valid push payload;
    /// nothing is shown then.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub fn handle_push(&self, body: &[u8]) -> Result<Notification, PushError> {
        let notification = PushMessage::parse(body)
            .inspect_err(|e| tracing::warn!(error = %e, "Rejected push payload"))?
            .into_notification();

        self.sink.show(notification.clone());
        Ok(notification)
    }

    /// Close the clicked notification and navigate to its target.
    #[instrument(skip(self, click), fields(action = ?click.action))]
    pub fn handle_click(&self, click: &NotificationClick) -> ClickOutcome {
        if let Some(tag) = &click.tag {
            self.sink.close(tag);
        }

        let url = match click.target() {
            ClickTarget::Dismiss => return ClickOutcome::Dismissed,
            ClickTarget::Navigate(url) => url,
        };

        if let Some(client) = self.clients.find_by_url(&url)
            && self.clients.focus(&client.id)
        {
            tracing::debug!(client_id = %client.id, %url, "Focused existing client");
            return ClickOutcome::Focused {
                client_id: client.id,
                url,
            };
        }

        let client = self.clients.open(&url);
        tracing::debug!(client_id = %client.id, %url, "Opened new client");
        ClickOutcome::Opened {
            client_id: client.id,
            url,
        }
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }

    #[must_use]
    pub fn clients(&self) -> &Arc<dyn ClientRegistry> {
        &self.clients
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use eatech_core::OrderId;
    use eatech_core::push::{DEFAULT_TITLE, NotificationData};

    use super::*;

    fn gateway() -> (PushGateway, Arc<NotificationCenter>, Arc<ClientDirectory>) {
        let sink = Arc::new(NotificationCenter::new());
        let clients = Arc::new(ClientDirectory::new());
        (
            PushGateway::new(sink.clone(), clients.clone()),
            sink,
            clients,
        )
    }

    #[test]
    fn test_push_shows_notification_with_defaults() {
        let (gateway, sink, _) = gateway();
        let shown = gateway.handle_push(b"{}").unwrap();
        assert_eq!(shown.title, DEFAULT_TITLE);
        assert_eq!(sink.visible(), vec![shown]);
    }

    #[test]
    fn test_malformed_push_shows_nothing() {
        let (gateway, sink, _) = gateway();
        assert!(gateway.handle_push(b"<xml/>").is_err());
        assert!(sink.visible().is_empty());
    }

    #[test]
    fn test_click_view_order_opens_order_page() {
        let (gateway, sink, _) = gateway();
        gateway
            .handle_push(br#"{"type":"order-ready","tag":"order-42","data":{"orderId":"42"}}"#)
            .unwrap();

        let click = NotificationClick {
            action: Some("view-order".to_string()),
            tag: Some("order-42".to_string()),
            data: NotificationData {
                order_id: Some(OrderId::new("42")),
                ..NotificationData::default()
            },
        };
        let outcome = gateway.handle_click(&click);

        assert!(matches!(outcome, ClickOutcome::Opened { ref url, .. } if url == "/orders/42"));
        assert!(sink.visible().is_empty());
    }

    #[test]
    fn test_click_focuses_existing_client() {
        let (gateway, _, clients) = gateway();
        let existing = clients.register(None, "https://app.eatech.ch/menu/zuri-burger");

        let click = NotificationClick {
            data: NotificationData {
                url: Some("/menu/zuri-burger".to_string()),
                ..NotificationData::default()
            },
            ..NotificationClick::default()
        };
        let outcome = gateway.handle_click(&click);

        assert_eq!(
            outcome,
            ClickOutcome::Focused {
                client_id: existing.id,
                url: "/menu/zuri-burger".to_string()
            }
        );
        assert_eq!(clients.list().len(), 1);
    }

    #[test]
    fn test_dismiss_does_not_navigate() {
        let (gateway, _, clients) = gateway();
        let click = NotificationClick {
            action: Some("dismiss".to_string()),
            ..NotificationClick::default()
        };
        assert_eq!(gateway.handle_click(&click), ClickOutcome::Dismissed);
        assert!(clients.list().is_empty());
    }
}
