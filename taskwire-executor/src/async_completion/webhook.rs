use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use taskwire_core::WebhookPayload;
use taskwire_core::config::WebhookConfig;
use tokio::sync::{RwLock, watch};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-taskwire-signature";
pub const TIMESTAMP_HEADER: &str = "x-taskwire-timestamp";

/// Callback invoked for an inbound webhook notification.
pub type WebhookCallback = Arc<dyn Fn(&WebhookPayload) + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature headers")]
    MissingSignature,
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("timestamp outside tolerance window")]
    StaleTimestamp,
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// Callback URL issued for one asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRegistration {
    pub operation_id: String,
    pub url: String,
}

/// Outcome of routing one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookDelivery {
    /// A registered operation was waiting on this notification.
    pub matched: bool,
}

struct Operation {
    task_type: String,
    sender: watch::Sender<Option<WebhookPayload>>,
}

#[derive(Default)]
struct Callbacks {
    by_task_type: HashMap<String, WebhookCallback>,
    on_task_status_change: Option<WebhookCallback>,
    on_activity: Option<WebhookCallback>,
}

/// Issues callback URLs for asynchronous operations and routes inbound
/// notifications to the waiters and callbacks registered for them.
pub struct WebhookManager {
    url_template: String,
    secret: Option<String>,
    tolerance: Duration,
    operations: RwLock<HashMap<String, Operation>>,
    callbacks: RwLock<Callbacks>,
}

impl WebhookManager {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            url_template: config.url_template.clone(),
            secret: config.secret.clone(),
            tolerance: config.signature_tolerance,
            operations: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Callbacks::default()),
        }
    }

    pub fn callback_url(&self, agent_id: &str, task_type: &str, operation_id: &str) -> String {
        self.url_template
            .replace("{agent_id}", agent_id)
            .replace("{task_type}", task_type)
            .replace("{operation_id}", operation_id)
    }

    /// Allocate an operation id and callback URL. Notifications that arrive
    /// before anyone subscribes are kept until [`subscribe`](Self::subscribe).
    pub async fn register(&self, agent_id: &str, task_type: &str) -> WebhookRegistration {
        let operation_id = uuid::Uuid::new_v4().to_string();
        let url = self.callback_url(agent_id, task_type, &operation_id);
        let (sender, _) = watch::channel(None);
        self.operations.write().await.insert(
            operation_id.clone(),
            Operation {
                task_type: task_type.to_string(),
                sender,
            },
        );
        tracing::debug!(agent_id, task_type, operation_id = %operation_id, "registered webhook");
        WebhookRegistration { operation_id, url }
    }

    pub async fn subscribe(&self, operation_id: &str) -> Option<watch::Receiver<Option<WebhookPayload>>> {
        self.operations
            .read()
            .await
            .get(operation_id)
            .map(|operation| operation.sender.subscribe())
    }

    pub async fn unregister(&self, operation_id: &str) {
        self.operations.write().await.remove(operation_id);
    }

    pub async fn is_registered(&self, operation_id: &str) -> bool {
        self.operations.read().await.contains_key(operation_id)
    }

    /// Handle notifications for `task_type` instead of the status-change fallback.
    pub async fn on_task_type(&self, task_type: &str, callback: WebhookCallback) {
        self.callbacks
            .write()
            .await
            .by_task_type
            .insert(task_type.to_string(), callback);
    }

    pub async fn on_task_status_change(&self, callback: WebhookCallback) {
        self.callbacks.write().await.on_task_status_change = Some(callback);
    }

    /// Fires for every notification, after any task-specific callback.
    pub async fn on_activity(&self, callback: WebhookCallback) {
        self.callbacks.write().await.on_activity = Some(callback);
    }

    pub fn requires_signature(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `sha256=<hex>` over `"{timestamp}.{body}"`. Passes when no
    /// secret is configured.
    pub fn verify_signature(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(WebhookError::MissingSignature);
        };

        let sent_at: i64 = timestamp.trim().parse().map_err(|_| WebhookError::StaleTimestamp)?;
        let skew = now.timestamp().abs_diff(sent_at);
        if skew > self.tolerance.as_secs() {
            return Err(WebhookError::StaleTimestamp);
        }

        let provided = signature
            .trim()
            .strip_prefix("sha256=")
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or(WebhookError::InvalidSignature)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(timestamp.trim().as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| WebhookError::InvalidSignature)
    }

    /// Route a verified notification to its waiter and callbacks.
    pub async fn handle(&self, payload: WebhookPayload) -> WebhookDelivery {
        let matched = match self.operations.read().await.get(&payload.operation_id) {
            Some(operation) => {
                if operation.task_type != payload.task_type {
                    tracing::warn!(
                        operation_id = %payload.operation_id,
                        expected = %operation.task_type,
                        received = %payload.task_type,
                        "webhook task type mismatch"
                    );
                }
                operation.sender.send_replace(Some(payload.clone()));
                true
            }
            None => false,
        };

        let callbacks = self.callbacks.read().await;
        match callbacks.by_task_type.get(&payload.task_type) {
            Some(callback) => callback(&payload),
            None => {
                if let Some(callback) = &callbacks.on_task_status_change {
                    callback(&payload);
                }
            }
        }
        if let Some(callback) = &callbacks.on_activity {
            callback(&payload);
        }

        tracing::info!(
            operation_id = %payload.operation_id,
            task_type = %payload.task_type,
            status = %payload.status,
            matched,
            "webhook received"
        );
        WebhookDelivery { matched }
    }
}

/// Compute the `sha256=<hex>` signature header value for a notification body.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn manager(secret: Option<&str>) -> WebhookManager {
        WebhookManager::new(&WebhookConfig {
            url_template: "https://hooks.example/webhooks/{task_type}/{operation_id}?agent={agent_id}".into(),
            secret: secret.map(str::to_string),
            signature_tolerance: Duration::from_secs(300),
        })
    }

    fn payload(operation_id: &str, task_type: &str) -> WebhookPayload {
        WebhookPayload {
            operation_id: operation_id.to_string(),
            task_type: task_type.to_string(),
            status: "completed".into(),
            result: Some(serde_json::json!({"media_buy_id": "mb-1"})),
            error: None,
            context_id: None,
            task_id: Some("t-1".into()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn fills_url_template() {
        let url = manager(None).callback_url("sales", "create_media_buy", "op-1");
        assert_eq!(url, "https://hooks.example/webhooks/create_media_buy/op-1?agent=sales");
    }

    #[test]
    fn verifies_hmac_signature() {
        let manager = manager(Some("s3cret"));
        let now = Utc::now();
        let timestamp = now.timestamp().to_string();
        let body = br#"{"status":"completed"}"#;
        let signature = sign("s3cret", &timestamp, body);

        assert_eq!(
            manager.verify_signature(Some(&timestamp), Some(&signature), body, now),
            Ok(())
        );
        assert_eq!(
            manager.verify_signature(Some(&timestamp), Some(&signature), b"tampered", now),
            Err(WebhookError::InvalidSignature)
        );
        assert_eq!(
            manager.verify_signature(None, Some(&signature), body, now),
            Err(WebhookError::MissingSignature)
        );
        let later = now + chrono::Duration::seconds(301);
        assert_eq!(
            manager.verify_signature(Some(&timestamp), Some(&signature), body, later),
            Err(WebhookError::StaleTimestamp)
        );
    }

    #[test]
    fn unsigned_manager_accepts_anything() {
        assert!(manager(None).verify_signature(None, None, b"{}", Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn early_notification_is_kept_for_late_subscriber() {
        let manager = manager(None);
        let registration = manager.register("sales", "create_media_buy").await;
        let delivery = manager
            .handle(payload(&registration.operation_id, "create_media_buy"))
            .await;
        assert!(delivery.matched);

        let receiver = manager.subscribe(&registration.operation_id).await.expect("subscribe");
        let seen = receiver.borrow().clone().expect("payload retained");
        assert_eq!(seen.task_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn task_type_callback_takes_precedence_over_fallback() {
        let manager = manager(None);
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let typed = log.clone();
        manager
            .on_task_type(
                "create_media_buy",
                Arc::new(move |p: &WebhookPayload| typed.lock().unwrap().push(format!("typed:{}", p.task_type))),
            )
            .await;
        let fallback = log.clone();
        manager
            .on_task_status_change(Arc::new(move |p: &WebhookPayload| {
                fallback.lock().unwrap().push(format!("fallback:{}", p.task_type))
            }))
            .await;
        let activity = log.clone();
        manager
            .on_activity(Arc::new(move |_: &WebhookPayload| activity.lock().unwrap().push("activity".into())))
            .await;

        let unmatched = manager.handle(payload("unknown-op", "create_media_buy")).await;
        assert!(!unmatched.matched);
        manager.handle(payload("unknown-op", "sync_creatives")).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "typed:create_media_buy".to_string(),
                "activity".to_string(),
                "fallback:sync_creatives".to_string(),
                "activity".to_string(),
            ]
        );
    }
}
