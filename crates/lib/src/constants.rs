//! Process-wide defaults shared across the pipeline, storage and search layers.

/// Container watched for uploaded source documents.
pub const DEFAULT_UPLOAD_DOCUMENT_CONTAINER: &str = "documents";
/// Container watched by the queue consumer for configuration JSON blobs.
pub const DEFAULT_UPLOAD_JSON_CONTAINER: &str = "data";
/// Container that receives processed document artifacts.
pub const DEFAULT_OUTPUT_CONTAINER: &str = "processed";

/// Default search index name.
pub const DEFAULT_SEARCH_INDEX: &str = "document-index";
/// Partition key property written into every manifest record.
pub const MANIFEST_CATEGORY_KEY: &str = "categoryId";
/// Fixed partition key value for document manifests.
pub const MANIFEST_CATEGORY_VALUE: &str = "documents";

/// Per-request timeout for LLM and embedding calls, in seconds.
pub const LLM_REQUEST_TIMEOUT_SECS: u64 = 300;
/// Total retry budget for a single logical LLM call, in seconds.
pub const LLM_RETRY_BUDGET_SECS: u64 = 300;
/// Default sampling temperature for chat-family models.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Rasterization resolution for page images.
pub const PAGE_RENDER_DPI: u32 = 300;

/// Recall set size for the vector arm of a hybrid query.
pub const VECTOR_KNN: usize = 50;
/// Maximum concurrent search requests issued by a wide search.
pub const WIDE_SEARCH_CONCURRENCY: usize = 25;

pub const VECTOR_ALGORITHM_NAME: &str = "myHnsw";
pub const VECTOR_PROFILE_NAME: &str = "myHnswProfile";
pub const VECTORIZER_NAME: &str = "myVectorizer";
pub const SEMANTIC_CONFIG_NAME: &str = "my-semantic-config";

pub const SEARCH_API_VERSION: &str = "2024-07-01";
pub const BLOB_API_VERSION: &str = "2021-08-06";
pub const SERVICE_BUS_API_VERSION: &str = "2015-01";
pub const DOCDB_API_VERSION: &str = "2018-12-31";
