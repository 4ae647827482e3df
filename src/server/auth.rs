//! Request gate: credential lookup, then query decryption.

use super::AppState;
use crate::envelope::{parse_form, QUERY_PARAM};
use crate::error::SyncError;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tracing::{debug, error};

/// Header carrying the monitor credential.
pub const AUTH_HEADER: &str = "AUTH_KEY";

/// Error response with the plain-text bodies clients expect.
#[derive(Debug)]
pub struct ApiError {
    pub status_code: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found() -> Self {
        Self {
            status_code: StatusCode::NOT_FOUND,
            message: "Not Found.".to_owned(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal Server Error.".to_owned(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Unauthorized => Self {
                status_code: StatusCode::UNAUTHORIZED,
                message: "Unauthorized access.".to_owned(),
            },
            SyncError::Decrypt(_) | SyncError::InvalidPath(_) => Self {
                status_code: StatusCode::BAD_REQUEST,
                message: "Bad Request.".to_owned(),
            },
            other => {
                error!("Request failed: {}", other);
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code, self.message).into_response()
    }
}

/// Parameters of one request after the sealed `query` has been merged in.
///
/// Lookups are lenient: a missing value is `""`, a missing or non-numeric
/// integer is `0`.
#[derive(Debug, Clone, Default)]
pub struct QueryParams(HashMap<String, String>);

impl QueryParams {
    /// Plain query-string pairs overwritten by the decrypted ones.
    pub fn merge(plain: HashMap<String, String>, decrypted: HashMap<String, String>) -> Self {
        let mut params = plain;
        params.extend(decrypted);
        Self(params)
    }

    pub fn get(&self, name: &str) -> &str {
        self.0.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn int(&self, name: &str) -> i64 {
        self.get(name).trim().parse().unwrap_or(0)
    }
}

/// Resolve `AUTH_KEY` to a monitor or reject with 401.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let monitor = req
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|key| state.monitor(key))
        .cloned()
        .ok_or(SyncError::Unauthorized)?;

    req.extensions_mut().insert(monitor);
    Ok(next.run(req).await)
}

/// Open the sealed `query` parameter or reject with 400.
pub async fn decrypt_query(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let plain = parse_form(req.uri().query().unwrap_or(""));
    let sealed = plain.get(QUERY_PARAM).map(String::as_str).unwrap_or("");

    let decrypted = state.decryptor().open(sealed).map_err(|e| {
        debug!(uri = %req.uri().path(), "Rejecting query: {}", e);
        e
    })?;

    req.extensions_mut()
        .insert(QueryParams::merge(plain, decrypted));
    Ok(next.run(req).await)
}
