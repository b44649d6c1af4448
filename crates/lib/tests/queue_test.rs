//! Broker receiver tests against a mocked queue endpoint.

use anyhow::Result;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use docflow::queue::{BlobCreatedEvent, ServiceBusReceiver};

fn receiver(server: &MockServer) -> ServiceBusReceiver {
    ServiceBusReceiver::new("testns", "doc-queue", "policy", "secret-key")
        .with_base_url(server.uri())
}

fn event_body() -> String {
    serde_json::json!({
        "topic": "/subscriptions/s/providers/Microsoft.Storage/storageAccounts/acct",
        "subject": "/blobServices/default/containers/data/blobs/cfg.json",
        "eventType": "Microsoft.Storage.BlobCreated",
        "id": "evt-1",
        "eventTime": "2024-05-01T12:00:00Z",
        "data": {"url": "https://acct.blob.core.windows.net/data/cfg.json"},
        "dataVersion": "1.0",
        "metadataVersion": "1"
    })
    .to_string()
}

#[tokio::test]
async fn receive_drains_until_the_queue_is_empty() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/doc-queue/messages/head"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header(
                    "BrokerProperties",
                    r#"{"MessageId":"m1","LockToken":"t1"}"#,
                )
                .set_body_string(event_body()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/doc-queue/messages/head"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let messages = receiver(&server).receive_batch(20, 5).await?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_id.as_deref(), Some("m1"));
    assert_eq!(messages[0].lock_token.as_deref(), Some("t1"));

    let event = BlobCreatedEvent::parse(&messages[0].body)?;
    assert_eq!(event.blob_name()?, "cfg.json");
    Ok(())
}

#[tokio::test]
async fn receive_stops_at_the_batch_limit() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/doc-queue/messages/head"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header(
                    "BrokerProperties",
                    r#"{"MessageId":"m","LockToken":"t"}"#,
                )
                .set_body_string(event_body()),
        )
        .mount(&server)
        .await;

    let messages = receiver(&server).receive_batch(2, 5).await?;
    assert_eq!(messages.len(), 2);
    Ok(())
}

#[tokio::test]
async fn completion_deletes_the_locked_message() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/doc-queue/messages/head"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header(
                    "BrokerProperties",
                    r#"{"MessageId":"m1","LockToken":"t1"}"#,
                )
                .set_body_string(event_body()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/doc-queue/messages/head"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/doc-queue/messages/m1/t1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let receiver = receiver(&server);
    let messages = receiver.receive_batch(1, 5).await?;
    receiver.complete(&messages[0]).await?;
    Ok(())
}

#[tokio::test]
async fn broker_errors_surface_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/doc-queue/messages/head"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let err = receiver(&server).receive_batch(1, 5).await.unwrap_err();
    assert!(matches!(
        err,
        docflow::errors::QueueError::Api { status: 401, .. }
    ));
}
