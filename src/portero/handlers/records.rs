use crate::portero::store::RecordStore;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, instrument};

#[utoipa::path(
    get,
    path= "/users/{id}",
    params(
        ("id" = String, Path, description = "Identity id"),
    ),
    responses (
        (status = 200, description = "Verification record", body = crate::portero::store::VerificationRecord, content_type = "application/json"),
        (status = 404, description = "No verification record for this identity"),
    ),
    tag = "records",
)]
/// Look up the verification record for an identity id.
#[instrument(skip(store))]
pub async fn user_record(
    Extension(store): Extension<Arc<RecordStore>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match store.find_by_id(&id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(json!(record))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "verification record not found" })),
        ),
        Err(err) => {
            error!("Record lookup failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
        }
    }
}
