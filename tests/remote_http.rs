use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use tree_sync::remote::{NotionClient, NotionConfig};
use tree_sync_core::client::RemoteClient;
use tree_sync_core::contract::{ChildKind, DatasetRef, RemoteRef, RemoteStore};
use tree_sync_core::error::RemoteError;
use tree_sync_core::node::{Block, Column, ColumnKind, Row, Schema};
use tree_sync_core::retry::{default_classify, RetryPolicy};
use tree_sync_core::throttle::RateLimiter;

fn client(server: &MockServer) -> NotionClient {
    NotionClient::new(NotionConfig {
        api_base_url: server.uri(),
        api_version: "2025-09-03".into(),
        token: "secret-token".into(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn child_page(id: &str, title: &str) -> Value {
    json!({ "id": id, "type": "child_page", "child_page": { "title": title } })
}

fn children_count(request: &Request) -> usize {
    request
        .body_json::<Value>()
        .ok()
        .and_then(|b| b["children"].as_array().map(Vec::len))
        .unwrap_or(0)
}

#[tokio::test]
async fn find_children_pages_through_results_and_filters_by_title() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blocks/root/children"))
        .and(query_param_is_missing("start_cursor"))
        .and(header("authorization", "Bearer secret-token"))
        .and(header("notion-version", "2025-09-03"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [child_page("p-1", "Other"), { "id": "b-1", "type": "paragraph" }],
            "has_more": true,
            "next_cursor": "c2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blocks/root/children"))
        .and(query_param("start_cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                child_page("p-2", "Story"),
                { "id": "d-1", "type": "child_database", "child_database": { "title": "Story" } }
            ],
            "has_more": false,
            "next_cursor": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let found = client(&server)
        .find_children(&RemoteRef::from("root"), "Story")
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, RemoteRef::from("p-2"));
    assert_eq!(found[0].kind, ChildKind::Page);
    assert_eq!(found[1].kind, ChildKind::Dataset);
}

#[tokio::test]
async fn statuses_map_onto_remote_errors() {
    let server = MockServer::start().await;
    let cases = [
        ("gone", ResponseTemplate::new(404).set_body_string("object_not_found")),
        (
            "archived",
            ResponseTemplate::new(400).set_body_string("Can't edit block that is archived."),
        ),
        ("invalid", ResponseTemplate::new(400).set_body_string("body failed validation")),
        ("denied", ResponseTemplate::new(401).set_body_string("unauthorized")),
        (
            "busy",
            ResponseTemplate::new(429).insert_header("Retry-After", "2"),
        ),
        ("down", ResponseTemplate::new(503)),
        ("conflict", ResponseTemplate::new(409)),
    ];
    for (id, response) in cases {
        Mock::given(method("PATCH"))
            .and(path(format!("/pages/{id}")))
            .respond_with(response)
            .mount(&server)
            .await;
    }

    let remote = client(&server);
    let archive = |id: &'static str| {
        let remote = &remote;
        async move { remote.archive(&RemoteRef::from(id)).await.unwrap_err() }
    };

    assert!(archive("gone").await.is_not_found());
    assert!(archive("archived").await.is_archived());
    assert!(matches!(archive("invalid").await, RemoteError::Validation(_)));
    assert!(matches!(archive("denied").await, RemoteError::Unauthorized(_)));
    assert_eq!(
        archive("busy").await,
        RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(2))
        }
    );
    assert!(matches!(archive("down").await, RemoteError::Transient(_)));
    assert!(matches!(archive("conflict").await, RemoteError::Transient(_)));
}

#[tokio::test]
async fn unreachable_server_is_transient() {
    let remote = NotionClient::new(NotionConfig {
        api_base_url: "http://127.0.0.1:9".into(),
        timeout: Duration::from_secs(2),
        ..NotionConfig::default()
    })
    .unwrap();
    let err = remote.archive(&RemoteRef::from("x")).await.unwrap_err();
    assert!(matches!(err, RemoteError::Transient(_)), "got {err:?}");
}

#[tokio::test]
async fn long_documents_are_created_then_appended_in_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pages"))
        .and(body_partial_json(json!({ "parent": { "page_id": "story" } })))
        .and(|req: &Request| children_count(req) == 80)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "doc-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/blocks/doc-1/children"))
        .and(|req: &Request| children_count(req) == 20)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let body: Vec<Block> = (0..100).map(|i| Block::text(format!("line {i}"))).collect();
    let id = client(&server)
        .create_document(&RemoteRef::from("story"), "Prologue", &body)
        .await
        .unwrap();
    assert_eq!(id, RemoteRef::from("doc-1"));
}

#[tokio::test]
async fn overwrite_keeps_child_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blocks/doc-1/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "b-1", "type": "paragraph" },
                child_page("p-1", "Appendix"),
                { "id": "b-2", "type": "image" }
            ],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/blocks/b-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/blocks/b-2"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/blocks/p-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/blocks/doc-1/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .overwrite_document(&RemoteRef::from("doc-1"), &[Block::text("fresh")])
        .await
        .unwrap();
}

fn cast_schema() -> Schema {
    Schema::new(vec![
        Column::new("Name", ColumnKind::Title),
        Column::new("Portrait", ColumnKind::Files),
    ])
}

#[tokio::test]
async fn datasets_are_created_with_initial_data_source() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/databases"))
        .and(body_partial_json(json!({
            "parent": { "type": "page_id", "page_id": "story" },
            "initial_data_source": {
                "properties": { "Name": { "title": {} }, "Portrait": { "files": {} } }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "db-1",
            "data_sources": [{ "id": "ds-1" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reference = client(&server)
        .create_dataset(&RemoteRef::from("story"), "Cast", &cast_schema())
        .await
        .unwrap();
    assert_eq!(
        reference,
        DatasetRef {
            dataset: RemoteRef::from("db-1"),
            rows: RemoteRef::from("ds-1"),
        }
    );
}

#[tokio::test]
async fn retrieve_dataset_reads_schema_from_data_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/databases/db-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "db-1",
            "data_sources": [{ "id": "ds-1" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data_sources/ds-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ds-1",
            "properties": {
                "Name": { "id": "title", "type": "title", "title": {} },
                "Portrait": { "id": "abc", "type": "files", "files": {} },
                "Created": { "id": "xyz", "type": "created_time", "created_time": {} }
            }
        })))
        .mount(&server)
        .await;

    let dataset = client(&server)
        .retrieve_dataset(&RemoteRef::from("db-1"))
        .await
        .unwrap();
    assert_eq!(dataset.reference.rows, RemoteRef::from("ds-1"));
    assert_eq!(dataset.schema.columns.len(), 2);
}

#[tokio::test]
async fn query_rows_follows_cursor() {
    let server = MockServer::start().await;
    let row = |id: &str, title: &str| {
        json!({
            "id": id,
            "properties": { "Name": { "type": "title", "title": [{ "plain_text": title }] } }
        })
    };
    Mock::given(method("POST"))
        .and(path("/data_sources/ds-1/query"))
        .and(|req: &Request| {
            req.body_json::<Value>()
                .map(|b| b.get("start_cursor").is_none())
                .unwrap_or(false)
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [row("r-1", "Vajra")],
            "has_more": true,
            "next_cursor": "next"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/data_sources/ds-1/query"))
        .and(body_partial_json(json!({ "start_cursor": "next" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [row("r-2", "Lyria")],
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let rows = client(&server)
        .query_rows(&DatasetRef {
            dataset: RemoteRef::from("db-1"),
            rows: RemoteRef::from("ds-1"),
        })
        .await
        .unwrap();
    let titles: Vec<_> = rows.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Vajra", "Lyria"]);
}

#[tokio::test]
async fn rows_are_created_under_the_data_source_with_icon() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pages"))
        .and(body_partial_json(json!({
            "parent": { "data_source_id": "ds-1" },
            "icon": { "external": { "url": "https://img.example/v.png" } },
            "properties": { "Name": { "title": [{ "text": { "content": "Vajra" } }] } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "row-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let row = Row::new([("Name", "Vajra"), ("Portrait", "https://img.example/v.png")])
        .with_icon("https://img.example/v.png");
    let id = client(&server)
        .create_row(
            &DatasetRef {
                dataset: RemoteRef::from("db-1"),
                rows: RemoteRef::from("ds-1"),
            },
            &cast_schema(),
            &row,
        )
        .await
        .unwrap();
    assert_eq!(id, RemoteRef::from("row-1"));
}

#[tokio::test]
async fn wrapped_client_retries_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/pages/p-1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/pages/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let wrapped = RemoteClient::new(
        client(&server),
        RateLimiter::unlimited(),
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_total_wait: Duration::from_secs(2),
            jitter: false,
            classify: default_classify,
        },
    );
    wrapped.archive(&RemoteRef::from("p-1")).await.unwrap();
}

#[tokio::test]
async fn overwrite_dataset_patches_the_data_source() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/data_sources/ds-1"))
        .and(body_partial_json(json!({
            "title": [{ "text": { "content": "Cast" } }],
            "properties": { "Name": { "title": {} }, "Portrait": { "files": {} } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "ds-1" })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .overwrite_dataset(
            &DatasetRef {
                dataset: RemoteRef::from("db-1"),
                rows: RemoteRef::from("ds-1"),
            },
            "Cast",
            &cast_schema(),
        )
        .await
        .unwrap();
}
