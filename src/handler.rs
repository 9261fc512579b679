use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_macros::debug_handler;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use std::sync::Arc;

use crate::dto::{ErrorResponse, HealthResponse, SendEmailRequest};
use crate::service::{RelayError, RelayService};

pub fn router(service: Arc<RelayService>) -> Router {
    Router::new()
        .route("/send-email", post(send_email))
        .route("/health", get(health_check))
        .with_state(service)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[debug_handler]
pub async fn send_email(
    State(service): State<Arc<RelayService>>,
    payload: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        // No JSON content type means no body fields, which validation reports.
        Err(JsonRejection::MissingJsonContentType(_)) => SendEmailRequest::default(),
        Err(rejection) => {
            tracing::warn!("Rejected malformed send request: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::rejected(rejection.body_text())),
            )
                .into_response();
        }
    };

    match service.send_email(request).await {
        Ok(r) => (StatusCode::OK, Json(r)).into_response(),
        Err(RelayError::InvalidRequest(message)) => {
            tracing::warn!("Rejected send request: {message}");
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::rejected(message))).into_response()
        }
        Err(RelayError::TransportFailure(e)) => {
            tracing::error!("Failed to send email: {e}");
            let body = ErrorResponse {
                success: false,
                message: "Failed to send email".to_string(),
                error: Some(e.to_string()),
                error_code: e.code(),
                error_response: e.payload().cloned(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

#[debug_handler]
pub async fn health_check() -> Response {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK".to_string(),
            message: "Email server is running".to_string(),
        }),
    )
        .into_response()
}
