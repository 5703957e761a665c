//! Per-destination message delivery workers.
//!
//! One worker task per destination, created lazily and reused. Each worker
//! consumes its queue strictly in arrival order, so no two sends for the
//! same destination race. Delivery failures are logged and the message is
//! dropped; there are no retries, only the optional fallback text supplied
//! by the producer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use rolekeeper_core::traits::Platform;
use rolekeeper_core::types::OutboundMessage;

/// How a message will be delivered, decided per message by the worker.
#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryPlan {
    /// Nothing to send (no text, no usable file).
    Drop,
    Text(String),
    /// File attachment without caption; `fallback` is sent as a follow-up
    /// text when the file delivery fails.
    File { fallback: Option<String> },
    /// Text and file concatenated into a single text message.
    Merged(String),
    /// File attachment with the text as caption.
    Captioned(String),
}

/// Decide the delivery shape for `message` under the platform size `limit`.
pub fn plan_delivery(message: &OutboundMessage, limit: usize) -> DeliveryPlan {
    let text = message.text.trim();
    let has_file = !message.file_name.is_empty() && !message.file_data.is_empty();

    if text.is_empty() {
        if !has_file {
            return DeliveryPlan::Drop;
        }
        let fallback = (!message.error_fallback.is_empty()).then(|| message.error_fallback.clone());
        return DeliveryPlan::File { fallback };
    }
    if !has_file {
        return DeliveryPlan::Text(text.to_string());
    }
    if message.allow_merge && message.text.len() + message.file_data.len() < limit {
        return DeliveryPlan::Merged(format!("{text}\n{}", message.file_data));
    }
    DeliveryPlan::Captioned(text.to_string())
}

/// Lazily creates and hands out the per-destination delivery queues.
pub struct SenderManager {
    platform: Arc<dyn Platform>,
    message_limit: usize,
    senders: HashMap<String, mpsc::Sender<OutboundMessage>>,
}

impl SenderManager {
    pub fn new(platform: Arc<dyn Platform>, message_limit: usize) -> Self {
        Self {
            platform,
            message_limit,
            senders: HashMap::new(),
        }
    }

    /// Get the delivery queue for `destination`, spawning its worker on
    /// first use. An empty destination id yields `None`: the related
    /// messages are disabled by configuration.
    pub fn sender(&mut self, destination: &str) -> Option<mpsc::Sender<OutboundMessage>> {
        if destination.is_empty() {
            return None;
        }
        if let Some(sender) = self.senders.get(destination) {
            return Some(sender.clone());
        }

        // capacity 1: producers block while the worker is busy
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(deliver_loop(
            Arc::clone(&self.platform),
            destination.to_string(),
            rx,
            self.message_limit,
        ));
        self.senders.insert(destination.to_string(), tx.clone());
        Some(tx)
    }
}

async fn deliver_loop(
    platform: Arc<dyn Platform>,
    destination: String,
    mut receiver: mpsc::Receiver<OutboundMessage>,
    limit: usize,
) {
    while let Some(message) = receiver.recv().await {
        deliver(platform.as_ref(), &destination, message, limit).await;
    }
    tracing::debug!("Delivery worker for {destination} stopped");
}

async fn deliver(platform: &dyn Platform, destination: &str, message: OutboundMessage, limit: usize) {
    match plan_delivery(&message, limit) {
        DeliveryPlan::Drop => {}
        DeliveryPlan::Text(text) | DeliveryPlan::Merged(text) => {
            if let Err(e) = platform.send_message(destination, &text).await {
                tracing::warn!("Message sending failed: {e}");
            }
        }
        DeliveryPlan::File { fallback } => {
            if let Err(e) = platform
                .send_file(destination, "", &message.file_name, message.file_data.as_bytes())
                .await
            {
                tracing::warn!("File sending failed: {e}");
                if let Some(fallback) = fallback
                    && let Err(e) = platform.send_message(destination, &fallback).await
                {
                    tracing::warn!("Fallback message sending failed: {e}");
                }
            }
        }
        DeliveryPlan::Captioned(caption) => {
            if let Err(e) = platform
                .send_file(
                    destination,
                    &caption,
                    &message.file_name,
                    message.file_data.as_bytes(),
                )
                .await
            {
                tracing::warn!("Message with file sending failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str, file: &str, data: &str, merge: bool) -> OutboundMessage {
        OutboundMessage {
            text: text.into(),
            file_name: file.into(),
            file_data: data.into(),
            error_fallback: String::new(),
            allow_merge: merge,
        }
    }

    #[test]
    fn test_text_only() {
        let plan = plan_delivery(&message("hello", "", "", false), 2000);
        assert_eq!(plan, DeliveryPlan::Text("hello".into()));
    }

    #[test]
    fn test_whitespace_text_with_file_is_file_only() {
        let mut msg = message("   ", "a.csv", "data", false);
        msg.error_fallback = "upload failed".into();
        assert_eq!(
            plan_delivery(&msg, 2000),
            DeliveryPlan::File {
                fallback: Some("upload failed".into())
            }
        );
    }

    #[test]
    fn test_merge_under_limit() {
        let plan = plan_delivery(&message("head", "a.txt", "body", true), 2000);
        assert_eq!(plan, DeliveryPlan::Merged("head\nbody".into()));
    }

    #[test]
    fn test_merge_refused_over_limit() {
        let plan = plan_delivery(&message("head", "a.txt", "body", true), 8);
        assert_eq!(plan, DeliveryPlan::Captioned("head".into()));
    }

    #[test]
    fn test_merge_not_allowed_is_captioned() {
        let plan = plan_delivery(&message("head", "a.txt", "body", false), 2000);
        assert_eq!(plan, DeliveryPlan::Captioned("head".into()));
    }

    #[test]
    fn test_nothing_to_send() {
        assert_eq!(plan_delivery(&message("", "", "", false), 2000), DeliveryPlan::Drop);
        assert_eq!(
            plan_delivery(&message("", "a.txt", "", false), 2000),
            DeliveryPlan::Drop
        );
    }
}
