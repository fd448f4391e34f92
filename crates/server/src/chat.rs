use std::convert::Infallible;

use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde_json::json;
use tokio_stream::{wrappers::ReceiverStream, StreamExt as _};
use tracing::{error, warn};

use consultai_agent::{ChatError, ChatResult, RequestContext};
use consultai_core::domain::short_id;

use crate::auth::AuthenticatedUser;
use crate::state::AppState;

const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Single entry point for the chat protocol. Streaming requests answer with
/// server-sent events, everything else with a JSON body.
pub async fn chatkit(State(state): State<AppState>, request: Request) -> Response {
    let context = RequestContext {
        user_id: request.extensions().get::<AuthenticatedUser>().map(|user| user.0.clone()),
        correlation_id: short_id("req"),
    };

    let payload = match to_bytes(request.into_body(), BODY_LIMIT).await {
        Ok(payload) => payload,
        Err(error) => {
            warn!(event_name = "http.chat.body_rejected", error = %error, "could not read chat body");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": error.to_string() }))).into_response();
        }
    };

    let correlation_id = context.correlation_id.clone();
    match state.chat.process(&payload, context).await {
        Ok(ChatResult::Json(body)) => Json(body).into_response(),
        Ok(ChatResult::Stream(events)) => {
            let stream = ReceiverStream::new(events).map(|event| {
                let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".into());
                Ok::<_, Infallible>(Event::default().data(data))
            });
            Sse::new(stream).into_response()
        }
        Err(chat_error) => {
            let status = status_for(&chat_error);
            if status.is_server_error() {
                error!(
                    event_name = "http.chat.failed",
                    correlation_id = %correlation_id,
                    error = %chat_error,
                    "chat request failed"
                );
            }
            (status, Json(json!({ "error": chat_error.to_string() }))).into_response()
        }
    }
}

fn status_for(error: &ChatError) -> StatusCode {
    match error {
        ChatError::InvalidRequest(_) | ChatError::UnknownRequest(_) => StatusCode::BAD_REQUEST,
        ChatError::ThreadNotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Repository(_) | ChatError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
