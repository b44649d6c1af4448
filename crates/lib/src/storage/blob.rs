//! # Blob Store Adapter
//!
//! Container and blob CRUD over the blob service REST surface, with the
//! naming rules enforced here rather than in callers. Supports three
//! credential modes: an account key (Shared Key Lite request signing plus
//! service-SAS generation), a pre-issued SAS token appended to every request,
//! or anonymous access for local emulators and tests.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use reqwest::Method;
use sha2::Sha256;
use tracing::{debug, warn};
use url::Url;

use crate::constants::BLOB_API_VERSION;
use crate::errors::StorageError;

type HmacSha256 = Hmac<Sha256>;

/// Transforms an arbitrary name into a valid container name.
///
/// Containers allow only lowercase `[a-z0-9-]`, no consecutive hyphens, no
/// leading or trailing hyphen, and a length of 3..=63. The transformation is
/// idempotent.
pub fn sanitize_container_name(original: &str) -> String {
    let mut name: String = original
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();

    while name.contains("--") {
        name = name.replace("--", "-");
    }
    let mut name = name.trim_matches('-').to_string();

    while name.len() < 3 {
        name.push('a');
    }
    if name.len() > 63 {
        name.truncate(63);
    }
    name
}

/// Lightly sanitizes a blob name: strips control characters and trailing
/// dots/slashes/backslashes, caps the length at 1024, and substitutes
/// `unnamed-blob` for empty results. Idempotent.
pub fn sanitize_blob_name(original: &str) -> String {
    let name: String = original.chars().filter(|c| !c.is_control()).collect();
    let mut name = name
        .trim_end_matches(|c| matches!(c, '.' | '/' | '\\'))
        .to_string();
    if name.chars().count() > 1024 {
        name = name.chars().take(1024).collect();
    }
    if name.is_empty() {
        name = "unnamed-blob".to_string();
    }
    name
}

/// How the adapter authenticates against the storage account.
#[derive(Clone, Debug)]
pub enum BlobCredential {
    /// Base64-encoded account key; enables request signing and SAS creation.
    AccountKey(String),
    /// A pre-issued SAS token (with or without the leading `?`).
    SasToken(String),
    /// No authentication; local emulators and test servers.
    Anonymous,
}

/// Permission set for generated SAS URLs.
#[derive(Clone, Copy, Debug)]
pub struct SasPermissions {
    pub read: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
    pub list: bool,
}

impl Default for SasPermissions {
    fn default() -> Self {
        Self {
            read: true,
            create: true,
            write: true,
            delete: true,
            list: true,
        }
    }
}

impl SasPermissions {
    /// Permission string in the service's canonical ordering.
    fn as_str(&self) -> String {
        let mut s = String::new();
        if self.read {
            s.push('r');
        }
        if self.create {
            s.push('c');
        }
        if self.write {
            s.push('w');
        }
        if self.delete {
            s.push('d');
        }
        if self.list {
            s.push('l');
        }
        s
    }
}

/// High-level client for one storage account.
#[derive(Clone, Debug)]
pub struct BlobStore {
    http: reqwest::Client,
    account_name: String,
    account_url: String,
    credential: BlobCredential,
}

impl BlobStore {
    pub fn new(account_name: impl Into<String>, credential: BlobCredential) -> Self {
        let account_name = account_name.into();
        let account_url = format!("https://{account_name}.blob.core.windows.net");
        Self {
            http: reqwest::Client::new(),
            account_name,
            account_url,
            credential,
        }
    }

    /// Reads `AZURE_STORAGE_ACCOUNT_NAME` plus, in order of preference,
    /// `AZURE_STORAGE_ACCOUNT_KEY` or `AZURE_STORAGE_SAS_TOKEN`.
    pub fn from_env() -> Result<Self, StorageError> {
        let account_name = std::env::var("AZURE_STORAGE_ACCOUNT_NAME")
            .map_err(|_| StorageError::Unauthorized("AZURE_STORAGE_ACCOUNT_NAME is not set".into()))?;
        let credential = if let Ok(key) = std::env::var("AZURE_STORAGE_ACCOUNT_KEY") {
            BlobCredential::AccountKey(key)
        } else if let Ok(token) = std::env::var("AZURE_STORAGE_SAS_TOKEN") {
            BlobCredential::SasToken(token)
        } else {
            BlobCredential::Anonymous
        };
        Ok(Self::new(account_name, credential))
    }

    /// Points the adapter at a custom endpoint (emulator or test server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.account_url = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn account_url(&self) -> &str {
        &self.account_url
    }

    // --- Request plumbing ---

    fn build_url(&self, path: &str, query: &[(String, String)]) -> String {
        let mut pairs: Vec<(String, String)> = query.to_vec();
        if let BlobCredential::SasToken(token) = &self.credential {
            for piece in token.trim_start_matches('?').split('&') {
                if let Some((k, v)) = piece.split_once('=') {
                    pairs.push((k.to_string(), v.to_string()));
                }
            }
        }
        let mut url = format!("{}/{}", self.account_url, path);
        if !pairs.is_empty() {
            let encoded: String = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            url.push('?');
            url.push_str(&encoded);
        }
        url
    }

    fn shared_key_lite_header(
        &self,
        key: &str,
        verb: &Method,
        path: &str,
        query: &[(String, String)],
        content_type: &str,
        ms_headers: &[(String, String)],
    ) -> Result<String, StorageError> {
        let mut canonical_headers: Vec<(String, String)> = ms_headers.to_vec();
        canonical_headers.sort();
        let canonical_headers: String = canonical_headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();

        let mut canonical_resource = format!("/{}/{}", self.account_name, path);
        if let Some((_, comp)) = query.iter().find(|(k, _)| k == "comp") {
            canonical_resource.push_str(&format!("?comp={comp}"));
        }

        let string_to_sign =
            format!("{verb}\n\n{content_type}\n\n{canonical_headers}{canonical_resource}");

        let decoded = BASE64
            .decode(key)
            .map_err(|_| StorageError::Unauthorized("account key is not valid base64".into()))?;
        let mut mac = HmacSha256::new_from_slice(&decoded)
            .map_err(|_| StorageError::Unauthorized("account key has an invalid length".into()))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKeyLite {}:{signature}", self.account_name))
    }

    async fn send(
        &self,
        verb: Method,
        path: &str,
        query: &[(String, String)],
        extra_ms_headers: &[(String, String)],
        content_type: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, StorageError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut ms_headers: Vec<(String, String)> = vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), BLOB_API_VERSION.to_string()),
        ];
        ms_headers.extend_from_slice(extra_ms_headers);

        let url = self.build_url(path, query);
        let mut request = self.http.request(verb.clone(), &url);
        for (k, v) in &ms_headers {
            request = request.header(k, v);
        }
        if let Some(ct) = content_type {
            request = request.header("Content-Type", ct);
        }
        if let BlobCredential::AccountKey(key) = &self.credential {
            let auth = self.shared_key_lite_header(
                key,
                &verb,
                path,
                query,
                content_type.unwrap_or(""),
                &ms_headers,
            )?;
            request = request.header("Authorization", auth);
        }
        if let Some(bytes) = body {
            request = request.body(bytes);
        }

        Ok(request.send().await?)
    }

    async fn fail_for_status(
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            404 => StorageError::NotFound(context.to_string()),
            401 | 403 => StorageError::Unauthorized(context.to_string()),
            409 => StorageError::AlreadyExists(context.to_string()),
            code => StorageError::Service {
                status: code,
                message,
            },
        })
    }

    // --- Container management ---

    /// Creates a container if it does not exist. Returns the sanitized name.
    pub async fn create_container(&self, container_name: &str) -> Result<String, StorageError> {
        let safe_name = sanitize_container_name(container_name);
        let query = [("restype".to_string(), "container".to_string())];
        let response = self
            .send(Method::PUT, &safe_name, &query, &[], None, Some(Vec::new()))
            .await?;
        match Self::fail_for_status(response, &safe_name).await {
            Ok(_) => Ok(safe_name),
            Err(StorageError::AlreadyExists(_)) => Ok(safe_name),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_container(&self, container_name: &str) -> Result<(), StorageError> {
        let safe_name = sanitize_container_name(container_name);
        let query = [("restype".to_string(), "container".to_string())];
        let response = self
            .send(Method::DELETE, &safe_name, &query, &[], None, None)
            .await?;
        Self::fail_for_status(response, &safe_name).await?;
        Ok(())
    }

    pub async fn list_containers(&self) -> Result<Vec<String>, StorageError> {
        let query = [("comp".to_string(), "list".to_string())];
        let response = self.send(Method::GET, "", &query, &[], None, None).await?;
        let response = Self::fail_for_status(response, "list containers").await?;
        let body = response.text().await?;
        Ok(extract_names(&body))
    }

    // --- Blob operations ---

    /// Uploads a local file and returns the blob's full URI.
    pub async fn upload_blob(
        &self,
        container_name: &str,
        blob_name: &str,
        local_path: &Path,
    ) -> Result<String, StorageError> {
        let safe_container = sanitize_container_name(container_name);
        let safe_blob = sanitize_blob_name(blob_name);
        let bytes = tokio::fs::read(local_path).await?;

        let path = format!("{safe_container}/{safe_blob}");
        let headers = [("x-ms-blob-type".to_string(), "BlockBlob".to_string())];
        let response = self
            .send(
                Method::PUT,
                &path,
                &[],
                &headers,
                Some("application/octet-stream"),
                Some(bytes),
            )
            .await?;
        Self::fail_for_status(response, &path).await?;

        debug!(container = %safe_container, blob = %safe_blob, "uploaded blob");
        Ok(format!("{}/{path}", self.account_url))
    }

    pub async fn download_blob(
        &self,
        container_name: &str,
        blob_name: &str,
        destination: &Path,
    ) -> Result<(), StorageError> {
        let safe_container = sanitize_container_name(container_name);
        let safe_blob = sanitize_blob_name(blob_name);
        let path = format!("{safe_container}/{safe_blob}");

        let response = self.send(Method::GET, &path, &[], &[], None, None).await?;
        let response = Self::fail_for_status(response, &path).await?;
        let bytes = response.bytes().await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, &bytes).await?;
        Ok(())
    }

    /// Downloads a blob addressed by its full URI into `local_dir`, returning
    /// the local file path. The file is named after the last URL segment.
    pub async fn download_blob_url(
        &self,
        blob_url: &str,
        local_dir: &Path,
    ) -> Result<PathBuf, StorageError> {
        let parsed = Url::parse(blob_url)
            .map_err(|_| StorageError::InvalidUrl(blob_url.to_string()))?;
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        if segments.len() < 2 {
            return Err(StorageError::InvalidUrl(blob_url.to_string()));
        }
        let container = segments[0];
        let blob_name = segments[1..].join("/");
        let filename = segments.last().unwrap_or(&"blob").to_string();

        let destination = local_dir.join(filename);
        self.download_blob(container, &blob_name, &destination)
            .await?;
        Ok(destination)
    }

    pub async fn delete_blob(
        &self,
        container_name: &str,
        blob_name: &str,
    ) -> Result<(), StorageError> {
        let safe_container = sanitize_container_name(container_name);
        let safe_blob = sanitize_blob_name(blob_name);
        let path = format!("{safe_container}/{safe_blob}");
        let response = self.send(Method::DELETE, &path, &[], &[], None, None).await?;
        Self::fail_for_status(response, &path).await?;
        Ok(())
    }

    pub async fn list_blobs(
        &self,
        container_name: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let safe_container = sanitize_container_name(container_name);
        let mut query = vec![
            ("restype".to_string(), "container".to_string()),
            ("comp".to_string(), "list".to_string()),
        ];
        if let Some(prefix) = prefix {
            query.push(("prefix".to_string(), sanitize_blob_name(prefix)));
        }
        let response = self
            .send(Method::GET, &safe_container, &query, &[], None, None)
            .await?;
        let response = Self::fail_for_status(response, &safe_container).await?;
        let body = response.text().await?;
        Ok(extract_names(&body))
    }

    // --- SAS URL generation ---

    /// Generates a service-SAS URL with the default 7-day duration and full
    /// read/write/delete/create/list permissions.
    pub fn create_sas_url(
        &self,
        container_name: &str,
        blob_name: &str,
    ) -> Result<String, StorageError> {
        self.create_sas_url_with(
            container_name,
            blob_name,
            ChronoDuration::days(7),
            SasPermissions::default(),
        )
    }

    pub fn create_sas_url_with(
        &self,
        container_name: &str,
        blob_name: &str,
        duration: ChronoDuration,
        permissions: SasPermissions,
    ) -> Result<String, StorageError> {
        let BlobCredential::AccountKey(key) = &self.credential else {
            return Err(StorageError::MissingAccountKey);
        };
        let safe_container = sanitize_container_name(container_name);
        let safe_blob = sanitize_blob_name(blob_name);

        let start = Utc::now();
        let expiry = start + duration;
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let expiry = expiry.to_rfc3339_opts(SecondsFormat::Secs, true);
        let perms = permissions.as_str();

        let canonical_resource =
            format!("/blob/{}/{safe_container}/{safe_blob}", self.account_name);
        // Service SAS string-to-sign; empty lines cover the unused
        // identifier, IP, snapshot, encryption-scope and response-header
        // override fields.
        let string_to_sign = format!(
            "{perms}\n{start}\n{expiry}\n{canonical_resource}\n\n\nhttps\n{BLOB_API_VERSION}\nb\n\n\n\n\n\n\n"
        );

        let decoded = BASE64
            .decode(key)
            .map_err(|_| StorageError::Unauthorized("account key is not valid base64".into()))?;
        let mut mac = HmacSha256::new_from_slice(&decoded)
            .map_err(|_| StorageError::Unauthorized("account key has an invalid length".into()))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("sv", BLOB_API_VERSION)
            .append_pair("spr", "https")
            .append_pair("st", &start)
            .append_pair("se", &expiry)
            .append_pair("sr", "b")
            .append_pair("sp", &perms)
            .append_pair("sig", &signature)
            .finish();

        Ok(format!(
            "{}/{safe_container}/{safe_blob}?{query}",
            self.account_url
        ))
    }

    // --- Recursive folder upload/download ---

    /// Recursively uploads a directory, preserving relative paths in blob
    /// names. The container defaults to the directory name.
    pub async fn upload_folder(
        &self,
        local_folder: &Path,
        container_name: Option<&str>,
    ) -> Result<(), StorageError> {
        let derived;
        let container = match container_name {
            Some(name) => name,
            None => {
                derived = local_folder
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "folder".to_string());
                &derived
            }
        };
        let safe_container = self.create_container(container).await?;

        let mut files = Vec::new();
        collect_files(local_folder, &mut files)?;
        for file_path in files {
            let relative = file_path
                .strip_prefix(local_folder)
                .map_err(|_| StorageError::InvalidUrl(file_path.display().to_string()))?;
            let blob_path = relative.to_string_lossy().replace('\\', "/");
            self.upload_blob(&safe_container, &blob_path, &file_path)
                .await?;
        }
        Ok(())
    }

    /// Downloads every blob in a container, recreating the folder structure
    /// under `local_folder`.
    pub async fn download_folder(
        &self,
        container_name: &str,
        local_folder: &Path,
    ) -> Result<(), StorageError> {
        let safe_container = sanitize_container_name(container_name);
        tokio::fs::create_dir_all(local_folder).await?;

        for blob_name in self.list_blobs(&safe_container, None).await? {
            let destination = local_folder.join(&blob_name);
            if let Err(e) = self
                .download_blob(&safe_container, &blob_name, &destination)
                .await
            {
                warn!(blob = %blob_name, "failed to download blob: {e}");
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Pulls `<Name>` elements out of a listing response.
fn extract_names(xml: &str) -> Vec<String> {
    let re = Regex::new(r"<Name>([^<]*)</Name>").expect("static regex");
    re.captures_iter(xml)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_are_sanitized() {
        assert_eq!(sanitize_container_name("My_Container"), "my-container");
        assert_eq!(sanitize_container_name("--doc..2024--"), "doc-2024");
        assert_eq!(sanitize_container_name("a"), "aaa");
        assert_eq!(sanitize_container_name(""), "aaa");
        let long = "x".repeat(100);
        assert_eq!(sanitize_container_name(&long).len(), 63);
    }

    #[test]
    fn container_sanitization_is_idempotent() {
        for name in ["My_Container", "--a--b--", "UPPER case!!", "", "ok-name-3"] {
            let once = sanitize_container_name(name);
            assert_eq!(sanitize_container_name(&once), once);
        }
    }

    #[test]
    fn blob_names_are_sanitized() {
        assert_eq!(sanitize_blob_name("pages/page_1/file.txt"), "pages/page_1/file.txt");
        assert_eq!(sanitize_blob_name("trailing///"), "trailing");
        assert_eq!(sanitize_blob_name("dots..."), "dots");
        assert_eq!(sanitize_blob_name("ctl\u{0001}char"), "ctlchar");
        assert_eq!(sanitize_blob_name(""), "unnamed-blob");
        assert_eq!(sanitize_blob_name("..."), "unnamed-blob");
        let long = "b".repeat(2000);
        assert_eq!(sanitize_blob_name(&long).chars().count(), 1024);
    }

    #[test]
    fn blob_sanitization_is_idempotent() {
        for name in ["a/b/c.txt", "trailing...", "", "x\u{007f}y"] {
            let once = sanitize_blob_name(name);
            assert_eq!(sanitize_blob_name(&once), once);
        }
    }

    #[test]
    fn sas_urls_require_an_account_key() {
        let store = BlobStore::new("unit", BlobCredential::Anonymous);
        assert!(matches!(
            store.create_sas_url("c", "b"),
            Err(StorageError::MissingAccountKey)
        ));
    }

    #[test]
    fn sas_urls_carry_the_expected_query() {
        let key = BASE64.encode(b"super-secret-account-key");
        let store = BlobStore::new("unit", BlobCredential::AccountKey(key));
        let url = store.create_sas_url("My_Container", "pages/page_1.txt").unwrap();
        assert!(url.starts_with("https://unit.blob.core.windows.net/my-container/pages/page_1.txt?"));
        for param in ["sv=", "st=", "se=", "sr=b", "sp=rcwdl", "sig="] {
            assert!(url.contains(param), "missing {param} in {url}");
        }
    }

    #[test]
    fn listing_names_are_extracted() {
        let xml = r#"<?xml version="1.0"?><EnumerationResults><Blobs><Blob><Name>a.txt</Name></Blob><Blob><Name>pages/b.txt</Name></Blob></Blobs></EnumerationResults>"#;
        assert_eq!(extract_names(xml), vec!["a.txt", "pages/b.txt"]);
    }
}
