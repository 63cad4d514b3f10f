use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AckMode;
use crate::llm::Completer;
use crate::notify::Notifier;

pub const ACK_TEXT: &str = "✅ generating response...";

/// Form fields Mattermost sends with an outgoing webhook call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutgoingWebhookForm {
    pub token: String,
    pub text: String,
    pub trigger_word: String,
    pub channel_name: String,
    pub user_name: String,
    pub post_id: String,
}

/// Shared per-process state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub completer: Arc<dyn Completer>,
    pub notifier: Arc<dyn Notifier>,
    pub token: Arc<str>,
    pub ack_mode: AckMode,
    /// Background relays in fire-and-forget mode, drained on shutdown.
    pub relays: TaskTracker,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("forbidden")]
    Forbidden,
    #[error("failed to generate answer: {0:#}")]
    Completion(anyhow::Error),
    #[error("failed to deliver answer: {0:#}")]
    Delivery(anyhow::Error),
}

fn caused_by_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|e| e.is_timeout())
    })
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Forbidden => StatusCode::FORBIDDEN,
            RelayError::Completion(e) | RelayError::Delivery(e) if caused_by_timeout(e) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            RelayError::Completion(_) | RelayError::Delivery(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn public_text(&self) -> &'static str {
        match self {
            RelayError::Forbidden => "forbidden",
            RelayError::Completion(_) => "failed to generate answer",
            RelayError::Delivery(_) => "failed to deliver answer",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "text": self.public_text() }))).into_response()
    }
}

/// Message posted back into the channel.
pub fn format_answer(user_name: &str, answer: &str) -> String {
    format!("**@{}**\n{}", user_name, answer)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_outgoing_webhook))
        .route("/end", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn handle_outgoing_webhook(
    State(state): State<AppState>,
    Form(form): Form<OutgoingWebhookForm>,
) -> Result<Json<Value>, RelayError> {
    if form.token.is_empty() || form.token != *state.token {
        warn!(
            "Rejected outgoing webhook call from channel '{}' (bad token)",
            form.channel_name
        );
        return Err(RelayError::Forbidden);
    }

    let request_id = Uuid::new_v4();
    let span = info_span!(
        "relay",
        %request_id,
        user = %form.user_name,
        channel = %form.channel_name,
        post_id = %form.post_id
    );

    match state.ack_mode {
        AckMode::AfterDelivery => relay(&state, &form).instrument(span).await?,
        AckMode::FireAndForget => {
            let relays = state.relays.clone();
            let state = state.clone();
            relays.spawn(
                async move {
                    // Already logged inside relay; nobody is waiting on the result.
                    let _ = relay(&state, &form).await;
                }
                .instrument(span),
            );
        }
    }

    Ok(Json(json!({ "text": ACK_TEXT })))
}

/// Ask the model and post the answer into the channel.
async fn relay(state: &AppState, form: &OutgoingWebhookForm) -> Result<(), RelayError> {
    info!(
        "Question via trigger '{}': {} chars",
        form.trigger_word,
        form.text.len()
    );

    let answer = state
        .completer
        .generate_answer(&form.text)
        .await
        .map_err(RelayError::Completion)
        .inspect_err(|e| error!("{}", e))?;

    let message = format_answer(&form.user_name, &answer);
    state
        .notifier
        .notify(&message, None)
        .await
        .map_err(RelayError::Delivery)
        .inspect_err(|e| error!("{}", e))?;

    info!("Answer relayed ({} chars)", answer.len());
    Ok(())
}
