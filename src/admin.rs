//! Thin admin surface: shared-secret-gated read/write of the raw shard-list
//! document. Not subject to DAV Basic auth; disabled entirely when no admin
//! secret is configured.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::config::{RuntimeConfig, SHARDS_KEY};
use crate::dav::AppState;
use crate::error::{AppError, AppResult};

/// The fixed config path the admin surface answers on.
pub const CONFIG_PATH: &str = "/_config/shards";

const SECRET_HEADER: &str = "x-admin-secret";

fn check_secret(cfg: &RuntimeConfig, headers: &HeaderMap) -> AppResult<()> {
    let Some(expected) = cfg.admin_secret.as_deref() else {
        return Err(AppError::auth("admin_disabled", "no admin secret configured"));
    };
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided == expected {
        Ok(())
    } else {
        Err(AppError::auth("bad_admin_secret", "invalid admin secret"))
    }
}

/// Return the raw shard-list document as stored.
pub async fn get_shards(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let cfg = RuntimeConfig::load(state.config.as_ref());
    check_secret(&cfg, &headers)?;
    let doc = state
        .config
        .get_blob(SHARDS_KEY)
        .map_err(|e| AppError::io("config_read", e.to_string()))?
        .unwrap_or_else(|| "[]".to_string());
    Ok((
        StatusCode::OK,
        [("content-type", "application/json")],
        doc,
    )
        .into_response())
}

/// Replace the shard-list document. The payload must parse as a JSON array.
pub async fn post_shards(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AppError> {
    let cfg = RuntimeConfig::load(state.config.as_ref());
    check_secret(&cfg, &headers)?;

    let parsed: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| AppError::bad_request("bad_shard_doc", format!("payload is not JSON: {}", e)))?;
    if !parsed.is_array() {
        return Err(AppError::bad_request("bad_shard_doc", "payload must be a JSON array"));
    }

    state
        .config
        .put_blob(SHARDS_KEY, &body)
        .map_err(|e| AppError::io("config_write", e.to_string()))?;
    info!("shard list replaced ({} entries)", parsed.as_array().map(|a| a.len()).unwrap_or(0));
    Ok((StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"}))).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(secret: Option<&str>) -> RuntimeConfig {
        RuntimeConfig {
            shards: Vec::new(),
            dav_password: "password".into(),
            admin_secret: secret.map(|s| s.to_string()),
            credentials: HashMap::new(),
        }
    }

    fn with_secret(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(SECRET_HEADER, value.parse().unwrap());
        h
    }

    #[test]
    fn secret_gate() {
        assert!(check_secret(&cfg(Some("s3cr3t")), &with_secret("s3cr3t")).is_ok());
        assert!(check_secret(&cfg(Some("s3cr3t")), &with_secret("nope")).is_err());
        assert!(check_secret(&cfg(Some("s3cr3t")), &HeaderMap::new()).is_err());
        // Unset secret disables the surface outright.
        assert!(check_secret(&cfg(None), &with_secret("anything")).is_err());
    }
}
