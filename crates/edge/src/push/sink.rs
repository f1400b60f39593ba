//! Where notifications are displayed.

use std::sync::{Mutex, MutexGuard, PoisonError};

use eatech_core::push::Notification;

/// Displays notifications to the user.
pub trait NotificationSink: Send + Sync {
    /// Show a notification. A visible notification with the same tag is replaced.
    fn show(&self, notification: Notification);

    /// Close every visible notification with `tag`. Returns how many were closed.
    fn close(&self, tag: &str) -> usize;

    /// Currently visible notifications, oldest first.
    fn visible(&self) -> Vec<Notification>;
}

/// In-memory notification tray, polled by the host UI.
#[derive(Debug)]
pub struct NotificationCenter {
    capacity: usize,
    visible: Mutex<Vec<Notification>>,
}

impl NotificationCenter {
    const DEFAULT_CAPACITY: usize = 50;

    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// A tray that keeps at most `capacity` notifications, dropping the oldest.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            visible: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.visible.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for NotificationCenter {
    fn show(&self, notification: Notification) {
        tracing::info!(tag = %notification.tag, title = %notification.title, "Showing notification");
        let mut visible = self.lock();
        visible.retain(|shown| shown.tag != notification.tag);
        visible.push(notification);
        if visible.len() > self.capacity {
            let excess = visible.len() - self.capacity;
            visible.drain(..excess);
        }
    }

    fn close(&self, tag: &str) -> usize {
        let mut visible = self.lock();
        let before = visible.len();
        visible.retain(|shown| shown.tag != tag);
        before - visible.len()
    }

    fn visible(&self) -> Vec<Notification> {
        self.lock().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use eatech_core::push::PushMessage;

    use super::*;

    fn notification(tag: &str, title: &str) -> Notification {
        PushMessage {
            tag: Some(tag.to_string()),
            title: Some(title.to_string()),
            ..PushMessage::default()
        }
        .into_notification()
    }

    #[test]
    fn test_same_tag_replaces() {
        let center = NotificationCenter::new();
        center.show(notification("order-42", "Preparing"));
        center.show(notification("order-42", "Ready"));
        center.show(notification("promo", "2 for 1"));

        let visible = center.visible();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[1].title, "2 for 1");
        assert_eq!(visible[0].title, "Ready");
    }

    #[test]
    fn test_close_by_tag() {
        let center = NotificationCenter::new();
        center.show(notification("a", "A"));
        assert_eq!(center.close("a"), 1);
        assert_eq!(center.close("a"), 0);
        assert!(center.visible().is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let center = NotificationCenter::with_capacity(2);
        for tag in ["1", "2", "3"] {
            center.show(notification(tag, tag));
        }
        let tags: Vec<String> = center.visible().into_iter().map(|n| n.tag).collect();
        assert_eq!(tags, ["2", "3"]);
    }
}
