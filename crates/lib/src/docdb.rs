//! # Document Database Manifest Store
//!
//! Records the final document manifest in a key/partition document store.
//! The store is a trait so jobs can run against test doubles; the production
//! implementation speaks the Cosmos REST surface with master-key auth.

use std::fmt::Debug;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use dyn_clone::DynClone;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::info;

use crate::errors::DocDbError;

type HmacSha256 = Hmac<Sha256>;

/// Upserts document manifests keyed by id and partition.
#[async_trait]
pub trait ManifestStore: Send + Sync + Debug + DynClone {
    async fn upsert(&self, document: &Value) -> Result<(), DocDbError>;
}

dyn_clone::clone_trait_object!(ManifestStore);

/// Cosmos-backed manifest store for one database container.
#[derive(Clone, Debug)]
pub struct CosmosManifestStore {
    http: reqwest::Client,
    endpoint: String,
    master_key: String,
    database: String,
    container: String,
    partition_value: String,
}

impl CosmosManifestStore {
    pub fn new(
        endpoint: impl Into<String>,
        master_key: impl Into<String>,
        database: impl Into<String>,
        container: impl Into<String>,
        partition_value: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            master_key: master_key.into(),
            database: database.into(),
            container: container.into(),
            partition_value: partition_value.into(),
        }
    }

    fn resource_link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.container)
    }

    fn auth_header(&self, verb: &str, resource_link: &str, date: &str) -> Result<String, DocDbError> {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.to_lowercase(),
            "docs",
            resource_link,
            date.to_lowercase()
        );
        let decoded = BASE64.decode(&self.master_key).map_err(|_| DocDbError::Api {
            status: 0,
            message: "master key is not valid base64".to_string(),
        })?;
        let mut mac = HmacSha256::new_from_slice(&decoded).map_err(|_| DocDbError::Api {
            status: 0,
            message: "master key has an invalid length".to_string(),
        })?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let token = format!("type=master&ver=1.0&sig={signature}");
        let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
        Ok(encoded)
    }
}

#[async_trait]
impl ManifestStore for CosmosManifestStore {
    async fn upsert(&self, document: &Value) -> Result<(), DocDbError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let resource_link = self.resource_link();
        let auth = self.auth_header("POST", &resource_link, &date)?;
        let url = format!("{}/{}/docs", self.endpoint, resource_link);

        let response = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .header("x-ms-date", date)
            .header("x-ms-version", crate::constants::DOCDB_API_VERSION)
            .header("x-ms-documentdb-is-upsert", "true")
            .header(
                "x-ms-documentdb-partitionkey",
                format!("[\"{}\"]", self.partition_value),
            )
            .json(document)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DocDbError::Api {
                status: status.as_u16(),
                message,
            });
        }
        info!(
            id = document.get("id").and_then(|v| v.as_str()).unwrap_or(""),
            "manifest upserted"
        );
        Ok(())
    }
}
