//! Search index client tests against a mocked search service.

use anyhow::Result;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use docflow::registry::ModelDescriptor;
use docflow::search::{QueryType, SearchIndexClient, SearchParams, UnitType};
use docflow::SearchUnit;
use docflow_test_utils::MockGateway;

const DIMS: usize = 8;

fn embedding_descriptor() -> ModelDescriptor {
    let mut descriptor = ModelDescriptor::embedding("text-embedding-3-small");
    descriptor.endpoint = "https://unit.openai.azure.com".to_string();
    descriptor.key = "k".to_string();
    descriptor.dimensions = Some(DIMS);
    descriptor.bind(Box::new(MockGateway::new().with_embed_dimensions(DIMS)));
    descriptor
}

fn client(server: &MockServer) -> SearchIndexClient {
    SearchIndexClient::new(server.uri(), "api-key", "document-index", embedding_descriptor())
}

fn sample_unit(text: &str) -> SearchUnit {
    SearchUnit {
        index_id: None,
        metadata: docflow::PDFMetadata {
            document_id: "doc_1".to_string(),
            document_path: "doc.pdf".to_string(),
            filename: "doc.pdf".to_string(),
            total_pages: 1,
            processed_pages: 1,
            output_directory: "out".to_string(),
            cloud_storage_path: None,
        },
        page_number: 1,
        page_image_path: "pages/page_1/page_1.jpg".to_string(),
        unit_type: UnitType::Text,
        text_file_cloud_storage_path: None,
        page_image_cloud_storage_path: None,
        text: text.to_string(),
        text_vector: None,
    }
}

fn hit_json(id: &str, score: f64, text: &str) -> Value {
    json!({
        "@search.score": score,
        "index_id": id,
        "metadata": {
            "document_id": "doc_1",
            "document_path": "doc.pdf",
            "filename": "doc.pdf",
            "total_pages": 1,
            "processed_pages": 1,
            "output_directory": "out"
        },
        "page_number": 1,
        "page_image_path": "pages/page_1/page_1.jpg",
        "unit_type": "text",
        "text": text
    })
}

async fn body_of(server: &MockServer, method_name: &str, path_name: &str) -> Value {
    let requests = server.received_requests().await.unwrap();
    let request = requests
        .iter()
        .find(|r| r.method.to_string() == method_name && r.url.path() == path_name)
        .unwrap_or_else(|| panic!("no {method_name} {path_name} request recorded"));
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn a_missing_index_is_created_with_the_derived_schema() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/document-index"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/indexes/document-index"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).create_or_update_index().await?;

    let schema = body_of(&server, "PUT", "/indexes/document-index").await;
    let fields = schema["fields"].as_array().unwrap();
    assert_eq!(fields[0]["name"], "index_id");
    assert_eq!(fields[0]["key"], true);
    let vector = fields.iter().find(|f| f["name"] == "text_vector").unwrap();
    assert_eq!(vector["dimensions"], DIMS);
    assert_eq!(schema["semantic"]["configurations"][0]["name"], "my-semantic-config");
    Ok(())
}

#[tokio::test]
async fn a_vector_dimension_conflict_fails_before_committing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/document-index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fields": [
                {"name": "text_vector", "type": "Collection(Edm.Single)", "dimensions": 3072}
            ]
        })))
        .mount(&server)
        .await;

    let err = client(&server).create_or_update_index().await.unwrap_err();
    assert!(matches!(
        err,
        docflow::errors::SearchError::DimensionMismatch { existing: 3072, configured: 8 }
    ));
}

#[tokio::test]
async fn uploads_fill_embeddings_and_generated_keys() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/document-index/docs/search.index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"key": "a", "status": true},
                {"key": "b", "status": true}
            ]
        })))
        .mount(&server)
        .await;

    let units = vec![sample_unit("first unit"), sample_unit("second unit")];
    let result = client(&server).upload_units(units).await?;
    assert_eq!(result.succeeded, 2);
    assert!(!result.is_partial());

    let body = body_of(&server, "POST", "/indexes/document-index/docs/search.index").await;
    let actions = body["value"].as_array().unwrap();
    assert_eq!(actions.len(), 2);
    for action in actions {
        assert_eq!(action["@search.action"], "mergeOrUpload");
        assert!(action["index_id"].as_str().unwrap().len() > 10);
        assert_eq!(action["text_vector"].as_array().unwrap().len(), DIMS);
    }
    Ok(())
}

#[tokio::test]
async fn partial_batch_failures_are_reported_per_item() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/document-index/docs/search.index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"key": "a", "status": true},
                {"key": "b", "status": false, "errorMessage": "quota exceeded"}
            ]
        })))
        .mount(&server)
        .await;

    let units = vec![sample_unit("first"), sample_unit("second")];
    let result = client(&server).upload_units(units).await?;
    assert_eq!(result.succeeded, 1);
    assert!(result.is_partial());
    assert_eq!(result.failed, vec![("b".to_string(), "quota exceeded".to_string())]);
    Ok(())
}

#[tokio::test]
async fn hybrid_search_combines_keyword_and_vector_arms() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/document-index/docs/search.post.search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                hit_json("a", 3.2, "revenue grew 12%"),
                hit_json("b", 2.1, "growth outlook"),
                hit_json("c", 1.0, "quarterly report"),
            ]
        })))
        .mount(&server)
        .await;

    let mut params = SearchParams::default();
    params.top = 3;
    params.unit_type = Some(UnitType::Table);
    let hits = client(&server)
        .hybrid_search("quarterly revenue growth", &params)
        .await?;

    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(hits.iter().all(|h| !h.unit.text.is_empty()));

    let body = body_of(&server, "POST", "/indexes/document-index/docs/search.post.search").await;
    assert_eq!(body["search"], "quarterly revenue growth");
    assert_eq!(body["top"], 3);
    assert_eq!(body["queryType"], "semantic");
    assert_eq!(body["semanticConfiguration"], "my-semantic-config");
    assert_eq!(body["filter"], "unit_type eq 'table'");
    let vector_query = &body["vectorQueries"][0];
    assert_eq!(vector_query["kind"], "text");
    assert_eq!(vector_query["k"], 50);
    assert_eq!(vector_query["fields"], "text_vector");
    Ok(())
}

#[tokio::test]
async fn keyword_queries_skip_the_semantic_configuration() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/document-index/docs/search.post.search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .mount(&server)
        .await;

    let mut params = SearchParams::default();
    params.query_type = QueryType::Keyword;
    client(&server).hybrid_search("anything", &params).await?;

    let body = body_of(&server, "POST", "/indexes/document-index/docs/search.post.search").await;
    assert_eq!(body["queryType"], "simple");
    assert!(body.get("semanticConfiguration").is_none());
    Ok(())
}

#[tokio::test]
async fn wide_search_deduplicates_by_key_in_first_seen_order() -> Result<()> {
    let server = MockServer::start().await;
    // Every pass returns the same two units.
    Mock::given(method("POST"))
        .and(path("/indexes/document-index/docs/search.post.search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                hit_json("a", 2.0, "first"),
                hit_json("b", 1.0, "second"),
            ]
        })))
        .mount(&server)
        .await;

    let text_gateway = MockGateway::new();
    // The expansion repeats a term; dedup must still hold.
    text_gateway.add_structured(
        "Broaden the net",
        json!({
            "expanded_terms": ["quarterly revenue", "quarterly revenue"],
            "related_areas": ["earnings calls"]
        }),
    );

    let params = SearchParams::default();
    let hits = client(&server)
        .wide_search("revenue growth", &params, &text_gateway)
        .await?;

    let ids: Vec<&str> = hits
        .iter()
        .map(|h| h.unit.index_id.as_deref().unwrap())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);

    // 4 queries (original + 2 expanded + 1 related), keyword + semantic each.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 8);
    let bound = params.top * (2 * (1 + 2 * params.top_wide_search));
    assert!(hits.len() <= bound);
    Ok(())
}

#[tokio::test]
async fn deletes_are_batched_by_key() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/document-index/docs/search.index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .delete_units(&["a".to_string(), "b".to_string()])
        .await?;

    let body = body_of(&server, "POST", "/indexes/document-index/docs/search.index").await;
    let actions = body["value"].as_array().unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0]["@search.action"], "delete");
    assert_eq!(actions[0]["index_id"], "a");
    Ok(())
}
