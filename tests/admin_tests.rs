//! Admin surface tests: shared-secret gating and shard-list replacement.

use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use davshard::admin;
use davshard::config::{ConfigStore, FileConfigStore, RuntimeConfig, ADMIN_SECRET_KEY, SHARDS_KEY};
use davshard::dav::AppState;
use davshard::meta::MetadataIndex;
use davshard::store::LocalStore;

fn state_with_secret(secret: Option<&str>) -> (AppState, tempfile::TempDir, tempfile::TempDir) {
    let data = tempfile::tempdir().unwrap();
    let config_dir = tempfile::tempdir().unwrap();
    let config = FileConfigStore::new(config_dir.path()).unwrap();
    if let Some(s) = secret {
        config.put_blob(ADMIN_SECRET_KEY, s).unwrap();
    }
    let state = AppState {
        config: Arc::new(config),
        meta: Arc::new(MetadataIndex::in_memory().unwrap()),
        store: Arc::new(LocalStore::new(data.path())),
        client: reqwest::Client::new(),
    };
    (state, data, config_dir)
}

fn secret_headers(value: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert("x-admin-secret", value.parse().unwrap());
    h
}

#[tokio::test]
async fn get_returns_the_raw_document() {
    let (state, _d, _c) = state_with_secret(Some("s3cr3t"));
    let doc = r#"[{"id":"A","type":"local","bucket":"bucket-a"}]"#;
    state.config.put_blob(SHARDS_KEY, doc).unwrap();

    let resp = admin::get_shards(State(state.clone()), secret_headers("s3cr3t"))
        .await
        .unwrap();
    let (parts, body) = resp.into_parts();
    assert_eq!(parts.status.as_u16(), 200);
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    assert_eq!(bytes, doc.as_bytes());
}

#[tokio::test]
async fn get_without_a_stored_document_answers_an_empty_array() {
    let (state, _d, _c) = state_with_secret(Some("s3cr3t"));
    let resp = admin::get_shards(State(state), secret_headers("s3cr3t")).await.unwrap();
    let (_, body) = resp.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), b"[]");
}

#[tokio::test]
async fn wrong_or_missing_secret_is_unauthorized() {
    let (state, _d, _c) = state_with_secret(Some("s3cr3t"));
    let err = admin::get_shards(State(state.clone()), secret_headers("nope"))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status().as_u16(), 401);

    let err = admin::get_shards(State(state), HeaderMap::new()).await.unwrap_err();
    assert_eq!(err.into_response().status().as_u16(), 401);
}

#[tokio::test]
async fn unset_secret_disables_the_surface() {
    let (state, _d, _c) = state_with_secret(None);
    let err = admin::get_shards(State(state), secret_headers("anything"))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status().as_u16(), 401);
}

#[tokio::test]
async fn post_replaces_the_shard_list_and_later_requests_see_it() {
    let (state, _d, _c) = state_with_secret(Some("s3cr3t"));
    let doc = r#"[{"id":"B","type":"local","bucket":"bucket-b"}]"#;

    let resp = admin::post_shards(State(state.clone()), secret_headers("s3cr3t"), doc.to_string())
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // The next per-request load picks up the new document.
    let cfg = RuntimeConfig::load(state.config.as_ref());
    assert_eq!(cfg.shards.len(), 1);
    assert_eq!(cfg.shards[0].id, "B");
}

#[tokio::test]
async fn post_rejects_non_array_payloads() {
    let (state, _d, _c) = state_with_secret(Some("s3cr3t"));

    let err = admin::post_shards(State(state.clone()), secret_headers("s3cr3t"), "{\"id\":\"A\"}".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status().as_u16(), 400);

    let err = admin::post_shards(State(state), secret_headers("s3cr3t"), "not json".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status().as_u16(), 400);
}
