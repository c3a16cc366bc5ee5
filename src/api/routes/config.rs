//! Configuration management endpoints.

use crate::api::state::AppState;
use crate::config::Config;
use crate::error::{Error, Result};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;

/// Maximum accepted size for uploaded TLS material
const MAX_TLS_UPLOAD: usize = 10 * 1024 * 1024;

/// `GET /config` - the current effective configuration.
///
/// Secrets (passwords, keys, provider tokens) are masked.
pub async fn get_config(State(state): State<AppState>) -> Json<Config> {
    let mut config = state.config_snapshot();

    if !config.server.basic_auth.password.is_empty() {
        config.server.basic_auth.password = "***".into();
    }
    if !config.storage.s3.secret_key.is_empty() {
        config.storage.s3.secret_key = "***".into();
    }
    for tokens in config.tokens.values_mut() {
        let masked = tokens.keys().iter().map(|_| "***".to_string()).collect();
        *tokens = crate::config::TokenList::Many(masked);
    }

    Json(config)
}

/// `PUT /config/:section` - partial update of one configuration section.
///
/// The patch is merged over the section, the result validated, and the
/// config file rewritten atomically with a backup. Most sections only take
/// full effect after a restart.
pub async fn update_config_section(
    State(state): State<AppState>,
    Path(section): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    let previous = state.config_snapshot();

    let result = state.with_config_mut(|config| {
        config.merge_section(&section, patch)?;
        config.validate()?;
        Ok::<Config, Error>(config.clone())
    });

    let updated = match result {
        Ok(updated) => updated,
        Err(e) => {
            // Roll the in-memory config back to its validated state.
            state.with_config_mut(|config| *config = previous);
            return Err(e);
        }
    };

    updated.save(&state.config_path)?;

    tracing::info!(section, "configuration section updated");
    Ok(Json(serde_json::json!({
        "status": "updated",
        "section": section,
        "restart_required": true,
    })))
}

/// `POST /config/tls/upload` - multipart upload of certificate and key.
///
/// The key file is written with owner-only permissions; the server config
/// is pointed at the uploaded files and persisted.
pub async fn upload_tls(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let mut certificate: Option<Vec<u8>> = None;
    let mut key: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("bad multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidInput(format!("failed to read {name:?}: {e}")))?;

        if data.len() > MAX_TLS_UPLOAD {
            return Err(Error::InvalidInput(format!(
                "{name:?} exceeds the {MAX_TLS_UPLOAD} byte limit"
            )));
        }

        match name.as_str() {
            "certificate" => certificate = Some(data.to_vec()),
            "key" => key = Some(data.to_vec()),
            other => {
                return Err(Error::InvalidInput(format!(
                    "unexpected multipart field {other:?}"
                )))
            }
        }
    }

    let certificate =
        certificate.ok_or_else(|| Error::InvalidInput("missing certificate field".into()))?;
    let key = key.ok_or_else(|| Error::InvalidInput("missing key field".into()))?;

    let base = state
        .config_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("tls");
    tokio::fs::create_dir_all(&base).await?;

    let cert_path = base.join("server.crt");
    let key_path = base.join("server.key");

    tokio::fs::write(&cert_path, &certificate).await?;
    tokio::fs::write(&key_path, &key).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    let updated = state.with_config_mut(|config| {
        config.server.certificate_path = Some(cert_path.clone());
        config.server.key_file_path = Some(key_path.clone());
        config.clone()
    });
    updated.save(&state.config_path)?;

    tracing::info!("TLS certificate and key uploaded");
    Ok(Json(serde_json::json!({
        "status": "uploaded",
        "certificate_path": cert_path,
        "key_path": key_path,
        "restart_required": true,
    })))
}

/// `POST /config/restart` - trigger an in-process shutdown.
///
/// A supervisor is expected to restart the process.
pub async fn restart(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    tracing::info!("restart requested through the API");
    state.shutdown.cancel();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "restarting" })),
    )
}
