//! Requester notification bridge.
//!
//! Connection artifacts (QR image, pairing code) must reach the user who
//! requested the subbot, privately. The supervisor only publishes; this
//! bridge picks up `qr_ready`/`pairing_code` events from the gateway,
//! looks up the requester chat and hands the artifact to the configured
//! [`Notifier`]. Delivery is fire-and-forget: the supervisor guarantees
//! that the event was published, not that delivery succeeded.

use std::sync::Arc;

use tracing::{info, warn};

use hivebot_core::wire::base64_decode;

use crate::gateway::{EventGateway, EventHandler, SubbotEvent};
use crate::storage::Database;

/// Delivery sink for connection artifacts.
pub trait Notifier: Send + Sync {
    /// Deliver a rendered QR image privately to the requester chat.
    fn deliver_qr(&self, chat: &str, code: &str, image: &[u8]);

    /// Deliver a pairing code privately to the requester chat.
    fn deliver_pairing_code(&self, chat: &str, code: &str, display: &str);

    /// Post an acknowledgement in the originating chat.
    fn acknowledge(&self, chat: &str, code: &str);
}

/// Notifier that only logs deliveries. Stands in until a chat transport
/// is wired up.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver_qr(&self, chat: &str, code: &str, image: &[u8]) {
        info!(chat, code, bytes = image.len(), "QR image ready for delivery");
    }

    fn deliver_pairing_code(&self, chat: &str, code: &str, display: &str) {
        let disp = display;
        info!(chat, code, "display" = disp, "Pairing code ready for delivery");
    }

    fn acknowledge(&self, chat: &str, code: &str) {
        info!(chat, code, "Subbot artifact delivered");
    }
}

/// Gateway handler feeding the notifier.
pub struct NotifierBridge {
    db: Database,
    notifier: Arc<dyn Notifier>,
}

impl NotifierBridge {
    pub const fn new(db: Database, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Register for the artifact events on the gateway.
    pub async fn install(self: &Arc<Self>, gateway: &EventGateway) {
        gateway
            .register("qr_ready", Arc::clone(self) as Arc<dyn EventHandler>)
            .await;
        gateway
            .register("pairing_code", Arc::clone(self) as Arc<dyn EventHandler>)
            .await;
    }
}

impl EventHandler for NotifierBridge {
    fn handle(&self, event: &SubbotEvent) {
        let db = self.db.clone();
        let notifier = Arc::clone(&self.notifier);
        let event = event.clone();

        tokio::spawn(async move {
            let row = match db.get_subbot(&event.code).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    warn!(code = %event.code, "No record for artifact delivery");
                    return;
                }
                Err(e) => {
                    warn!(code = %event.code, error = %e, "Lookup failed for artifact delivery");
                    return;
                }
            };

            match event.event.as_str() {
                "qr_ready" => {
                    let encoded = event
                        .payload
                        .get("qr")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    match base64_decode(encoded) {
                        Ok(image) => {
                            notifier.deliver_qr(&row.requester_chat, &event.code, &image);
                        }
                        Err(e) => {
                            warn!(code = %event.code, error = %e, "QR payload is not valid base64");
                            return;
                        }
                    }
                }
                "pairing_code" => {
                    let display = event
                        .payload
                        .get("display")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    notifier.deliver_pairing_code(&row.requester_chat, &event.code, display);
                }
                _ => return,
            }

            notifier.acknowledge(&row.requester_chat, &event.code);
        });
    }
}
