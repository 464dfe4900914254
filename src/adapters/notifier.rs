//! Notifier that writes events to the tracing log.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::{ContentItem, NotificationEvent};

use super::Notifier;

/// Logs every notification; delivery transports plug in behind `Notifier`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotificationEvent, item: &ContentItem, detail: &str) -> Result<()> {
        match event {
            NotificationEvent::ReviewRequested | NotificationEvent::Published => {
                info!(?event, item_id = %item.id, platform = %item.platform, %detail, "Notification");
            }
            NotificationEvent::ReviewReminder => {
                warn!(?event, item_id = %item.id, platform = %item.platform, %detail, "Notification");
            }
            NotificationEvent::Failed | NotificationEvent::AuthExpired => {
                error!(?event, item_id = %item.id, platform = %item.platform, %detail, "Notification");
            }
        }
        Ok(())
    }
}
