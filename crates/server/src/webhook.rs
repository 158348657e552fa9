use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use linesheet_core::InterfaceError;
use linesheet_line::{
    parse_webhook, BatchProcessor, EventContext, EventResult, SignatureVerifier, SIGNATURE_HEADER,
};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct WebhookState {
    pub verifier: SignatureVerifier,
    pub processor: BatchProcessor,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook", post(receive)).with_state(state)
}

/// Maps an interface failure onto the HTTP status the platform sees. The body
/// carries only the user-safe message and the correlation id.
pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.user_message(),
            "correlation_id": self.0.correlation_id(),
        });
        (status, Json(body)).into_response()
    }
}

pub async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Vec<EventResult>>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    info!(
        event_name = "ingress.line.webhook_received",
        correlation_id = %correlation_id,
        body_bytes = body.len(),
        "received webhook request"
    );

    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    if let Err(rejection) = state.verifier.verify(&body, signature) {
        warn!(
            event_name = "ingress.line.signature_rejected",
            correlation_id = %correlation_id,
            error = %rejection,
            "webhook signature rejected"
        );
        return Err(ApiError(InterfaceError::unauthorized(rejection.to_string(), correlation_id)));
    }

    let envelopes = match parse_webhook(&body) {
        Ok(envelopes) => envelopes,
        Err(parse_error) => {
            warn!(
                event_name = "ingress.line.body_rejected",
                correlation_id = %correlation_id,
                error = %parse_error,
                "webhook body could not be parsed"
            );
            return Err(ApiError(InterfaceError::bad_request(
                parse_error.to_string(),
                correlation_id,
            )));
        }
    };

    let ctx = EventContext { correlation_id: correlation_id.clone() };
    match state.processor.process(envelopes, &ctx).await {
        Ok(results) => {
            info!(
                event_name = "ingress.line.webhook_completed",
                correlation_id = %correlation_id,
                event_count = results.len(),
                "webhook batch processed"
            );
            Ok(Json(results))
        }
        Err(batch_error) => {
            error!(
                event_name = "ingress.line.batch_failed",
                correlation_id = %correlation_id,
                error = %batch_error,
                "webhook batch aborted"
            );
            Err(ApiError(InterfaceError::internal(batch_error.to_string(), correlation_id)))
        }
    }
}
