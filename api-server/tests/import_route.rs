use std::sync::Arc;
use std::time::Duration;

use posts_api::config::ImportConfig;
use posts_api::import::{FetchError, ImportService};
use posts_api::routes::posts::{IMPORT_SUCCESS_MESSAGE, import_posts, list_posts};
use posts_api::store::SharedStore;
use posts_api::test_support::{
    InMemoryPostStore, RecordingDelay, ScriptedSource, TestRocketBuilder,
};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use rocket::routes;

fn upstream_body(count: i64) -> String {
    let posts: Vec<String> = (1..=count)
        .map(|id| {
            format!(
                r#"{{"userId":{},"id":{id},"title":"title {id}","body":"body {id}"}}"#,
                (id - 1) / 10 + 1
            )
        })
        .collect();
    format!("[{}]", posts.join(","))
}

fn test_config() -> ImportConfig {
    ImportConfig {
        backoff_base: Duration::from_millis(1),
        ..ImportConfig::default()
    }
}

async fn client_for(
    source: Arc<ScriptedSource>,
    delay: Arc<RecordingDelay>,
    store: Arc<InMemoryPostStore>,
) -> Client {
    let shared: SharedStore = store;
    let service = ImportService::from_parts(&test_config(), source, delay, shared.clone());

    TestRocketBuilder::new()
        .mount_routes(routes![import_posts, list_posts])
        .manage_store(shared)
        .manage_import_service(service)
        .async_client()
        .await
}

#[rocket::async_test]
async fn import_stores_every_upstream_post() {
    let store = Arc::new(InMemoryPostStore::new());
    let client = client_for(
        Arc::new(ScriptedSource::new(vec![Ok(upstream_body(100))])),
        Arc::new(RecordingDelay::default()),
        store.clone(),
    )
    .await;

    let response = client.post("/import/posts").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::Plain));
    assert_eq!(
        response.into_string().await.as_deref(),
        Some(IMPORT_SUCCESS_MESSAGE)
    );

    assert_eq!(store.ids().len(), 100);
    let first = store.get(1).expect("post 1 stored");
    assert_eq!(first.user_id, 1);
    assert_eq!(first.title, "title 1");
    assert_eq!(first.body, "body 1");
}

#[rocket::async_test]
async fn repeated_import_leaves_one_row_per_id() {
    let store = Arc::new(InMemoryPostStore::new());
    let client = client_for(
        Arc::new(ScriptedSource::new(vec![
            Ok(upstream_body(20)),
            Ok(upstream_body(20)),
        ])),
        Arc::new(RecordingDelay::default()),
        store.clone(),
    )
    .await;

    for _ in 0..2 {
        let response = client.post("/import/posts").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
    }

    assert_eq!(store.ids(), (1..=20).collect::<Vec<_>>());
}

#[rocket::async_test]
async fn transient_failure_is_retried_before_success() {
    let store = Arc::new(InMemoryPostStore::new());
    let source = Arc::new(ScriptedSource::new(vec![
        Err(FetchError::HttpStatus { code: 503 }),
        Ok(upstream_body(3)),
    ]));
    let delay = Arc::new(RecordingDelay::default());
    let client = client_for(source.clone(), delay.clone(), store.clone()).await;

    let response = client.post("/import/posts").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    assert_eq!(source.attempts(), 2);
    assert_eq!(delay.recorded(), vec![Duration::from_millis(1)]);
    assert_eq!(store.ids(), vec![1, 2, 3]);
}

#[rocket::async_test]
async fn exhausted_fetch_reports_failure_text() {
    let store = Arc::new(InMemoryPostStore::new());
    let source = Arc::new(ScriptedSource::always(|| FetchError::HttpStatus {
        code: 503,
    }));
    let client = client_for(
        source.clone(),
        Arc::new(RecordingDelay::default()),
        store.clone(),
    )
    .await;

    let response = client.post("/import/posts").dispatch().await;
    assert_eq!(response.status(), Status::InternalServerError);

    let body = response.into_string().await.expect("response body");
    assert!(body.starts_with("Import failed: "), "unexpected body: {body}");
    assert!(body.contains("503"), "unexpected body: {body}");

    assert_eq!(source.attempts(), 3);
    assert!(store.ids().is_empty());
}

#[rocket::async_test]
async fn malformed_payload_fails_without_writes() {
    let store = Arc::new(InMemoryPostStore::new());
    let source = Arc::new(ScriptedSource::new(vec![Ok("not json".to_string())]));
    let client = client_for(
        source.clone(),
        Arc::new(RecordingDelay::default()),
        store.clone(),
    )
    .await;

    let response = client.post("/import/posts").dispatch().await;
    assert_eq!(response.status(), Status::InternalServerError);

    let body = response.into_string().await.expect("response body");
    assert!(body.starts_with("Import failed: "), "unexpected body: {body}");

    assert_eq!(source.attempts(), 1);
    assert_eq!(store.bulk_calls(), 0);
    assert!(store.ids().is_empty());
}

#[rocket::async_test]
async fn rejected_row_does_not_fail_the_import() {
    let store = Arc::new(InMemoryPostStore::new().failing_ids([2]));
    let client = client_for(
        Arc::new(ScriptedSource::new(vec![Ok(upstream_body(3))])),
        Arc::new(RecordingDelay::default()),
        store.clone(),
    )
    .await;

    let response = client.post("/import/posts").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    assert_eq!(store.ids(), vec![1, 3]);
    assert_eq!(store.single_call_order(), vec![1, 2, 3]);
}
