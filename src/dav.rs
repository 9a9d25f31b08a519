//! WebDAV protocol surface over the shard router and metadata index.
//!
//! Every request is handled statelessly: the shard configuration is
//! re-fetched from the config store, the path is normalized, Basic auth is
//! checked against the per-request credential, and the method is dispatched.
//! Object I/O and the metadata mutation are two independent steps with no
//! transaction between them; an interruption leaves an orphaned object or a
//! dangling record.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::admin;
use crate::config::{ConfigStore, RuntimeConfig, ShardDescriptor, ShardKind};
use crate::error::{AppError, AppResult};
use crate::forward;
use crate::meta::{FileRecord, MetadataIndex};
use crate::router::{self, Intent};
use crate::store::LocalStore;

pub mod xml;

/// The one fixed Basic-auth username.
pub const BASIC_USER: &str = "admin";

const DEFAULT_LOCK_TIMEOUT: &str = "Second-3600";

const ALLOWED_METHODS: &str = "OPTIONS, GET, HEAD, PUT, DELETE, PROPFIND, MKCOL, MOVE, LOCK, UNLOCK";

/// Shared server state injected into all handlers. Everything mutable lives
/// behind the config store and the metadata index; the shard list itself is
/// loaded per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<dyn ConfigStore>,
    pub meta: Arc<MetadataIndex>,
    pub store: Arc<LocalStore>,
    pub client: reqwest::Client,
}

/// Mount the DAV dispatch plus the admin surface.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route(admin::CONFIG_PATH, get(admin::get_shards).post(admin::post_shards))
        .fallback(dispatch)
        .with_state(state)
}

/// Start the gateway bound to the given port.
pub async fn run_with_port(port: u16, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("Starting davshard on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    match handle(state, req).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

/// Decode, NFC-normalize and canonicalize a request path. Trailing slashes
/// are stripped (except root) so collection and member forms address the
/// same record.
pub fn normalize_path(raw: &str) -> AppResult<String> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| AppError::bad_request("bad_path", "path is not valid percent-encoded UTF-8"))?;
    let mut path: String = decoded.nfc().collect();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    Ok(path)
}

fn unauthorized() -> AppError {
    AppError::auth("unauthorized", "invalid credentials")
}

fn check_basic_auth(headers: &HeaderMap, cfg: &RuntimeConfig) -> AppResult<()> {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Err(unauthorized());
    };
    let decoded = BASE64.decode(encoded.trim()).map_err(|_| unauthorized())?;
    let decoded = String::from_utf8(decoded).map_err(|_| unauthorized())?;
    let Some((user, pass)) = decoded.split_once(':') else {
        return Err(unauthorized());
    };
    if user == BASIC_USER && pass == cfg.dav_password {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

fn build(builder: axum::http::response::Builder, body: Body) -> AppResult<Response> {
    builder
        .body(body)
        .map_err(|e| AppError::internal("response_build", e.to_string()))
}

/// Handle one DAV request end to end. The axum route adapter wraps this; it
/// is also the entry point for driving the gateway without a socket.
pub async fn handle(state: AppState, req: Request) -> AppResult<Response> {
    let cfg = RuntimeConfig::load(state.config.as_ref());
    let (parts, body) = req.into_parts();
    let path = normalize_path(parts.uri.path())?;
    check_basic_auth(&parts.headers, &cfg)?;

    match parts.method.as_str() {
        "OPTIONS" => options(),
        // HEAD answers unconditionally; no existence check is performed.
        "HEAD" => build(Response::builder().status(StatusCode::OK), Body::empty()),
        "GET" => get_object(&state, &cfg, &path).await,
        "PUT" => {
            let declared_len = parts
                .headers
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let content_type = parts
                .headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let bytes = to_bytes(body, usize::MAX)
                .await
                .map_err(|e| AppError::bad_request("body_read", e.to_string()))?;
            put_object(&state, &cfg, &path, bytes.to_vec(), content_type.as_deref(), declared_len).await
        }
        "DELETE" => delete_object(&state, &cfg, &path).await,
        "PROPFIND" => propfind(&state, &path),
        "MKCOL" => mkcol(&state, &path),
        "MOVE" => move_record(&state, &cfg, &parts.headers, &path).await,
        "LOCK" => lock(&parts.headers, &path),
        "UNLOCK" => build(Response::builder().status(StatusCode::NO_CONTENT), Body::empty()),
        other => Err(AppError::conflict("method_not_allowed", format!("unsupported method {}", other))),
    }
}

fn options() -> AppResult<Response> {
    build(
        Response::builder()
            .status(StatusCode::OK)
            .header("allow", ALLOWED_METHODS)
            .header("dav", "1, 2")
            .header("ms-author-via", "DAV"),
        Body::empty(),
    )
}

async fn get_object(state: &AppState, cfg: &RuntimeConfig, path: &str) -> AppResult<Response> {
    let Some(shard) = router::resolve(&state.meta, cfg, path, Intent::Read)? else {
        return Err(AppError::not_found("not_found", format!("no shard resolves {}", path)));
    };
    match shard.kind {
        ShardKind::Local => {
            let Some((bytes, meta)) = state.store.get(&shard.bucket, path)? else {
                return Err(AppError::not_found("not_found", format!("no object at {}", path)));
            };
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", meta.content_type.as_deref().unwrap_or("application/octet-stream"))
                .header("etag", format!("\"{}\"", meta.etag));
            if let Some(rec) = state.meta.lookup(path)? {
                builder = builder.header("last-modified", xml::http_date(rec.updated_at));
            }
            build(builder, Body::from(bytes))
        }
        ShardKind::Remote => {
            let resp = forward::forward(
                &state.client,
                shard,
                cfg.credentials_for(&shard.id),
                reqwest::Method::GET,
                path,
                None,
                None,
            )
            .await?;
            // Read responses pass through untouched, with a permissive
            // cross-origin header added.
            let status = StatusCode::from_u16(resp.status)
                .map_err(|e| AppError::upstream("bad_upstream_status", e.to_string()))?;
            build(
                Response::builder()
                    .status(status)
                    .header("content-type", resp.content_type.as_deref().unwrap_or("application/octet-stream"))
                    .header("access-control-allow-origin", "*"),
                Body::from(resp.body),
            )
        }
    }
}

async fn put_object(
    state: &AppState,
    cfg: &RuntimeConfig,
    path: &str,
    bytes: Vec<u8>,
    content_type: Option<&str>,
    declared_len: Option<u64>,
) -> AppResult<Response> {
    let Some(shard) = router::resolve(&state.meta, cfg, path, Intent::Write)? else {
        return Err(AppError::not_configured("no_shards", "shard list is empty"));
    };
    let size = declared_len.unwrap_or(bytes.len() as u64);

    match shard.kind {
        ShardKind::Local => {
            state.store.put(&shard.bucket, path, &bytes, content_type)?;
        }
        ShardKind::Remote => {
            let resp = forward::forward(
                &state.client,
                shard,
                cfg.credentials_for(&shard.id),
                reqwest::Method::PUT,
                path,
                content_type,
                Some(bytes),
            )
            .await?;
            if !resp.is_success() {
                return Err(AppError::upstream(
                    "upstream_write_rejected",
                    format!("shard '{}' answered {}", shard.id, resp.status),
                ));
            }
        }
    }

    state.meta.upsert(path, &shard.id, false, size, Utc::now().timestamp())?;
    build(Response::builder().status(StatusCode::CREATED), Body::empty())
}

async fn delete_shard_object(
    state: &AppState,
    cfg: &RuntimeConfig,
    shard: &ShardDescriptor,
    key: &str,
) -> AppResult<()> {
    match shard.kind {
        ShardKind::Local => {
            state.store.delete(&shard.bucket, key)?;
        }
        ShardKind::Remote => {
            // Best effort; DELETE answers 204 regardless of upstream.
            if let Err(e) = forward::forward(
                &state.client,
                shard,
                cfg.credentials_for(&shard.id),
                reqwest::Method::DELETE,
                key,
                None,
                None,
            )
            .await
            {
                warn!("remote delete at shard '{}' failed: {}", shard.id, e);
            }
        }
    }
    Ok(())
}

async fn delete_object(state: &AppState, cfg: &RuntimeConfig, path: &str) -> AppResult<Response> {
    // The exact object, at whichever shard read-intent resolution names.
    if let Some(shard) = router::resolve(&state.meta, cfg, path, Intent::Delete)? {
        let shard = shard.clone();
        delete_shard_object(state, cfg, &shard, path).await?;
    }
    // Descendant objects, each at its own pinned shard, before the records
    // that pin them go away.
    for rec in state.meta.list_descendants(path)? {
        if rec.is_dir {
            continue;
        }
        if let Some(shard) = router::resolve(&state.meta, cfg, &rec.path, Intent::Delete)? {
            let shard = shard.clone();
            delete_shard_object(state, cfg, &shard, &rec.path).await?;
        }
    }
    state.meta.delete_path_and_descendants(path)?;
    build(Response::builder().status(StatusCode::NO_CONTENT), Body::empty())
}

fn entry_of(rec: &FileRecord) -> xml::DavEntry {
    xml::DavEntry {
        path: rec.path.clone(),
        is_dir: rec.is_dir,
        size: rec.size,
        updated_at: rec.updated_at,
    }
}

fn propfind(state: &AppState, path: &str) -> AppResult<Response> {
    let listing = state.meta.list_children(path)?;
    let has_self = listing.iter().any(|r| r.path == path);

    // The root is always addressable even without an explicit record;
    // anything else needs a record or at least one child.
    if !has_self && listing.is_empty() && path != "/" {
        return Err(AppError::not_found("not_found", format!("nothing at {}", path)));
    }

    let mut entries: Vec<xml::DavEntry> = Vec::with_capacity(listing.len() + 1);
    if !has_self {
        entries.push(xml::DavEntry {
            path: path.to_string(),
            is_dir: true,
            size: 0,
            updated_at: Utc::now().timestamp(),
        });
    }
    entries.extend(listing.iter().map(entry_of));

    build(
        Response::builder()
            .status(StatusCode::MULTI_STATUS)
            .header("content-type", "application/xml; charset=\"utf-8\""),
        Body::from(xml::multistatus(&entries)),
    )
}

fn mkcol(state: &AppState, path: &str) -> AppResult<Response> {
    state.meta.insert_directory(path, Utc::now().timestamp())?;
    build(Response::builder().status(StatusCode::CREATED), Body::empty())
}

async fn move_record(
    state: &AppState,
    cfg: &RuntimeConfig,
    headers: &HeaderMap,
    path: &str,
) -> AppResult<Response> {
    let Some(dest) = headers.get("destination").and_then(|v| v.to_str().ok()) else {
        return Err(AppError::bad_request("missing_destination", "MOVE requires a Destination header"));
    };
    // Only the path component of the absolute destination URL is consumed.
    let url = reqwest::Url::parse(dest)
        .map_err(|_| AppError::bad_request("bad_destination", "Destination must be an absolute URL"))?;
    let new_path = normalize_path(url.path())?;

    // Find the owning shard before the record moves.
    let owner = router::resolve(&state.meta, cfg, path, Intent::Read)?.cloned();

    // The record rename never cascades to descendants and touches no other
    // field; descendant records keep the old prefix.
    state.meta.rename_path(path, &new_path)?;

    // Re-key the object on its owning shard so the bytes stay fetchable at
    // the new path. The bytes never leave the shard: locally this is a
    // filesystem rename, remotely a server-side copy.
    if let Some(shard) = owner {
        match shard.kind {
            ShardKind::Local => {
                state.store.rename(&shard.bucket, path, &new_path)?;
            }
            ShardKind::Remote => {
                let creds = cfg.credentials_for(&shard.id);
                let resp = forward::copy_object(&state.client, &shard, creds, path, &new_path).await?;
                if !resp.is_success() {
                    return Err(AppError::upstream(
                        "upstream_copy_rejected",
                        format!("shard '{}' answered {}", shard.id, resp.status),
                    ));
                }
                if let Err(e) = forward::forward(
                    &state.client,
                    &shard,
                    creds,
                    reqwest::Method::DELETE,
                    path,
                    None,
                    None,
                )
                .await
                {
                    warn!("remote cleanup after move failed at shard '{}': {}", shard.id, e);
                }
            }
        }
    }

    build(Response::builder().status(StatusCode::CREATED), Body::empty())
}

/// Non-enforcing lock stub: every call synthesizes a fresh token, nothing is
/// persisted and no exclusion is provided; it exists for client protocol
/// compliance only.
fn lock(headers: &HeaderMap, _path: &str) -> AppResult<Response> {
    let timeout = headers
        .get("timeout")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_LOCK_TIMEOUT.to_string());
    let token = format!("urn:uuid:{}", Uuid::new_v4());

    build(
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/xml; charset=\"utf-8\"")
            .header("lock-token", format!("<{}>", token)),
        Body::from(xml::lock_discovery(BASIC_USER, &timeout, &token)),
    )
}
