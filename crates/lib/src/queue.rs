//! # Queue Consumer Plumbing
//!
//! Blob-created event parsing plus a peek-lock receiver for the message
//! broker. Delivery is at-most-once: the worker completes every received
//! message whether or not processing succeeded.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::constants::SERVICE_BUS_API_VERSION;
use crate::errors::QueueError;

type HmacSha256 = Hmac<Sha256>;

/// A blob-created event as delivered by the broker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlobCreatedEvent {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, rename = "eventType")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "eventTime")]
    pub event_time: Option<String>,
    pub data: BlobEventData,
    #[serde(default, rename = "dataVersion")]
    pub data_version: Option<String>,
    #[serde(default, rename = "metadataVersion")]
    pub metadata_version: Option<String>,
}

/// The `data` payload; `url` is the only field the consumer relies on.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlobEventData {
    pub url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl BlobCreatedEvent {
    pub fn parse(body: &str) -> Result<Self, QueueError> {
        serde_json::from_str(body).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    /// The blob named by the event: the URL's last path segment.
    pub fn blob_name(&self) -> Result<String, QueueError> {
        blob_name_from_url(&self.data.url)
    }
}

/// Derives a blob name from a blob URL's last path segment.
pub fn blob_name_from_url(url: &str) -> Result<String, QueueError> {
    url.split('/')
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| QueueError::Malformed(format!("no blob name in url: {url}")))
}

/// One peek-locked message.
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    pub body: String,
    pub message_id: Option<String>,
    pub lock_token: Option<String>,
}

#[derive(Deserialize)]
struct BrokerProperties {
    #[serde(rename = "MessageId")]
    message_id: Option<String>,
    #[serde(rename = "LockToken")]
    lock_token: Option<String>,
}

/// Peek-lock receiver for one broker queue, authenticated with a shared
/// access signature.
#[derive(Clone, Debug)]
pub struct ServiceBusReceiver {
    http: reqwest::Client,
    base_url: String,
    queue_name: String,
    key_name: String,
    key: String,
}

impl ServiceBusReceiver {
    pub fn new(
        namespace: impl Into<String>,
        queue_name: impl Into<String>,
        key_name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://{}.servicebus.windows.net", namespace.into()),
            queue_name: queue_name.into(),
            key_name: key_name.into(),
            key: key.into(),
        }
    }

    /// Points the receiver at a custom endpoint (emulator or test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn sas_token(&self) -> Result<String, QueueError> {
        let resource = format!("{}/{}", self.base_url, self.queue_name);
        let encoded_resource: String =
            url::form_urlencoded::byte_serialize(resource.as_bytes()).collect();
        let expiry = Utc::now().timestamp() + 3600;

        let string_to_sign = format!("{encoded_resource}\n{expiry}");
        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes()).map_err(|_| {
            QueueError::Malformed("shared access key has an invalid length".to_string())
        })?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        let encoded_signature: String =
            url::form_urlencoded::byte_serialize(signature.as_bytes()).collect();

        Ok(format!(
            "SharedAccessSignature sr={encoded_resource}&sig={encoded_signature}&se={expiry}&skn={}",
            self.key_name
        ))
    }

    /// Receives up to `max_message_count` messages, long-polling each receive
    /// for at most `max_wait_secs`. Returns as soon as the queue is drained.
    pub async fn receive_batch(
        &self,
        max_message_count: usize,
        max_wait_secs: u64,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let token = self.sas_token()?;
        let url = format!(
            "{}/{}/messages/head?api-version={SERVICE_BUS_API_VERSION}&timeout={max_wait_secs}",
            self.base_url, self.queue_name
        );

        let mut messages = Vec::new();
        while messages.len() < max_message_count {
            let response = self
                .http
                .post(&url)
                .header("Authorization", &token)
                .header("Content-Length", "0")
                .send()
                .await?;

            let status = response.status();
            match status.as_u16() {
                201 => {
                    let properties = response
                        .headers()
                        .get("BrokerProperties")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| serde_json::from_str::<BrokerProperties>(v).ok());
                    let body = response.text().await.unwrap_or_default();
                    messages.push(ReceivedMessage {
                        body,
                        message_id: properties.as_ref().and_then(|p| p.message_id.clone()),
                        lock_token: properties.as_ref().and_then(|p| p.lock_token.clone()),
                    });
                }
                204 => break,
                code => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(QueueError::Api {
                        status: code,
                        message,
                    });
                }
            }
        }
        debug!(count = messages.len(), "received message batch");
        Ok(messages)
    }

    /// Completes (acknowledges) a peek-locked message, removing it from the
    /// queue.
    pub async fn complete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let (Some(message_id), Some(lock_token)) = (&message.message_id, &message.lock_token)
        else {
            return Err(QueueError::Malformed(
                "message has no id or lock token".to_string(),
            ));
        };

        let token = self.sas_token()?;
        let url = format!(
            "{}/{}/messages/{message_id}/{lock_token}?api-version={SERVICE_BUS_API_VERSION}",
            self.base_url, self.queue_name
        );
        let response = self
            .http
            .delete(&url)
            .header("Authorization", token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(QueueError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_parse_the_documented_shape() {
        let body = r#"{
            "topic": "/subscriptions/s/resourceGroups/g/providers/Microsoft.Storage/storageAccounts/acct",
            "subject": "/blobServices/default/containers/data/blobs/report_config.json",
            "eventType": "Microsoft.Storage.BlobCreated",
            "id": "evt-1",
            "eventTime": "2024-05-01T12:00:00Z",
            "data": {
                "api": "PutBlob",
                "contentType": "application/json",
                "url": "https://acct.blob.core.windows.net/data/report_config.json"
            },
            "dataVersion": "1.0",
            "metadataVersion": "1"
        }"#;
        let event = BlobCreatedEvent::parse(body).unwrap();
        assert_eq!(event.event_type.as_deref(), Some("Microsoft.Storage.BlobCreated"));
        assert_eq!(event.blob_name().unwrap(), "report_config.json");
        assert_eq!(
            event.data.extra.get("api").and_then(Value::as_str),
            Some("PutBlob")
        );
    }

    #[test]
    fn events_without_a_url_are_rejected() {
        assert!(BlobCreatedEvent::parse(r#"{"data": {}}"#).is_err());
        assert!(BlobCreatedEvent::parse("not json").is_err());
    }

    #[test]
    fn blob_names_come_from_the_last_segment() {
        assert_eq!(
            blob_name_from_url("https://acct.blob.core.windows.net/data/cfg.json").unwrap(),
            "cfg.json"
        );
        assert!(blob_name_from_url("https://acct.blob.core.windows.net/data/").is_err());
    }
}
