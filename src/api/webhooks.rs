use super::{parse_gateway, tag, AppState};
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::RawCallback;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use tracing::info;

/// POST /payments/callback/{gateway}
///
/// No caller authentication; the adapter verifies the provider's signature
/// or the signed callback URL. Unmatched and replayed callbacks are still
/// acknowledged with 200 so the provider stops redelivering.
pub async fn handle_callback(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let gateway = parse_gateway(&gateway).map_err(|e| tag(e, request_id.as_deref()))?;
    info!(gateway = %gateway, bytes = body.len(), "callback received");

    let mut callback = RawCallback::new(body.to_vec());
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            callback = callback.with_header(name.as_str(), value);
        }
    }
    for (name, value) in query {
        callback = callback.with_query(&name, value);
    }

    let result = state
        .reconciler
        .reconcile(gateway, callback)
        .await
        .map_err(|e| tag(e.into(), request_id.as_deref()))?;

    Ok(Json(json!({ "status": "ok", "result": result })))
}
