// src/notify/chat.rs
use std::sync::Arc;

use anyhow::Result;

use super::{Notification, NotificationKind, Notifier};
use crate::ingest::types::ChatSource;

/// Posts notifications back into the chat platform: summaries to the output
/// dialog, failures to the error dialog.
pub struct ChatNotifier {
    chat: Arc<dyn ChatSource>,
    output_dialog_id: i64,
    error_dialog_id: i64,
}

impl ChatNotifier {
    pub fn new(chat: Arc<dyn ChatSource>, output_dialog_id: i64, error_dialog_id: i64) -> Self {
        Self {
            chat,
            output_dialog_id,
            error_dialog_id,
        }
    }

    fn destination(&self, kind: NotificationKind) -> i64 {
        match kind {
            NotificationKind::Summary => self.output_dialog_id,
            NotificationKind::Failure => self.error_dialog_id,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for ChatNotifier {
    async fn send(&self, n: &Notification) -> Result<()> {
        let text = match n.kind {
            NotificationKind::Summary => n.body.clone(),
            NotificationKind::Failure => n.plain_text(),
        };
        self.chat.send_text(&text, self.destination(n.kind)).await
    }

    fn name(&self) -> &'static str {
        "chat"
    }
}
