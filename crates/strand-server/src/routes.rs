//! HTTP mutation and read routes.
//!
//! The auth layer in front of this service injects the caller's identity as
//! `x-user-id` / `x-user-role` headers; requests arriving without them are
//! treated as anonymous customers.

use crate::gateway::{AddQueueEntryRequest, Caller, CreateBookingRequest, Gateway};
use crate::metrics;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use strand_core::{BookingStatus, EntryStatus, RoomRegistry, SyncError};
use tracing::error;

use crate::config::Config;

/// Shared server state.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub registry: Arc<RoomRegistry>,
    pub config: Config,
}

/// REST routes; the WebSocket endpoint is added by the caller.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queue", post(add_to_queue))
        .route(
            "/queue/entry/:entry_id",
            put(update_queue_entry).delete(remove_queue_entry),
        )
        .route("/queue/:salon_id/:date", get(get_queue))
        .route("/bookings", post(create_booking))
        .route("/bookings/availability", get(availability))
        .route(
            "/bookings/:booking_id",
            put(update_booking).delete(cancel_booking),
        )
        .route("/health", get(health))
}

/// Maps the error taxonomy onto HTTP statuses with a JSON body.
pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SyncError::InvalidTransition { .. } | SyncError::SlotTaken { .. } => {
                StatusCode::CONFLICT
            }
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Forbidden(_) => StatusCode::FORBIDDEN,
            SyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Invariant violation");
        }
        metrics::record_error(self.0.code());

        let mut body = json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        if let SyncError::SlotTaken { conflicting } = &self.0 {
            body["conflictingBookingId"] = json!(conflicting);
        }
        (status, Json(body)).into_response()
    }
}

fn caller_from_headers(headers: &HeaderMap) -> Caller {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let role = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("customer")
        .to_string();
    Caller { user_id, role }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn add_to_queue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddQueueEntryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.gateway.add_queue_entry(req).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
struct UpdateEntryRequest {
    status: EntryStatus,
}

async fn update_queue_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
    Json(req): Json<UpdateEntryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .gateway
        .transition_queue_entry(&entry_id, req.status)
        .await?;
    Ok(Json(entry))
}

async fn remove_queue_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.gateway.remove_queue_entry(&entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_queue(
    State(state): State<Arc<AppState>>,
    Path((salon_id, date)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.gateway.queue_snapshot(&salon_id, &date).await?;
    Ok(Json(entries))
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state.gateway.create_booking(req).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

#[derive(Debug, Deserialize)]
struct UpdateBookingRequest {
    status: BookingStatus,
}

async fn update_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers);
    let booking = state
        .gateway
        .update_booking(&caller, &booking_id, req.status)
        .await?;
    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
struct CancelBookingRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers);
    // DELETE bodies are optional.
    let reason = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<CancelBookingRequest>(&body)
            .map_err(|e| SyncError::InvalidInput(format!("invalid cancel body: {e}")))?
            .reason
    };
    let booking = state
        .gateway
        .cancel_booking(&caller, &booking_id, reason)
        .await?;
    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityQuery {
    salon_id: String,
    date: String,
    service_id: String,
    start: String,
}

async fn availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let verdict = state
        .gateway
        .check_availability(&query.salon_id, &query.date, &query.service_id, &query.start)
        .await?;
    Ok(Json(verdict))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "u-1".parse().unwrap());
        headers.insert("x-user-role", "staff".parse().unwrap());
        let caller = caller_from_headers(&headers);
        assert_eq!(caller.user_id.as_deref(), Some("u-1"));
        assert_eq!(caller.role, "staff");

        let anonymous = caller_from_headers(&HeaderMap::new());
        assert!(anonymous.user_id.is_none());
        assert_eq!(anonymous.role, "customer");
    }

    #[test]
    fn test_slot_taken_body_carries_conflicting_id() {
        let response = ApiError(SyncError::SlotTaken {
            conflicting: "b-1".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (SyncError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                SyncError::invalid_transition("WAITING", "COMPLETED"),
                StatusCode::CONFLICT,
            ),
            (SyncError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (SyncError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                SyncError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
