//! Change event route handler
//!
//! Lets an operator push a change event into the registry by hand.

use crate::error::ApiResult;
use crate::models::{EventResponse, SuccessResponse};
use crate::registry::ContextEvent;
use crate::state::SharedState;
use axum::{extract::State, Json};
use tracing::info;

/// Apply one change event and report the resulting generation
pub async fn apply_event(
    State(state): State<SharedState>,
    Json(event): Json<ContextEvent>,
) -> ApiResult<Json<SuccessResponse<EventResponse>>> {
    let kind = event.kind();
    let generation = state.registry.handle(event).await?;

    info!(event = kind, generation, "Change event applied");

    Ok(Json(SuccessResponse::with_data(
        format!("Event '{}' applied.", kind),
        EventResponse {
            event: kind.to_string(),
            generation,
        },
    )))
}
