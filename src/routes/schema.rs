//! Schema inspection route handlers
//!
//! Read-only views over the currently published snapshot.

use crate::error::ApiResult;
use crate::models::{HeartbeatResponse, SchemaDetail, SchemaListResponse, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::debug;

/// List the published schemas
pub async fn list_schemas(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<SchemaListResponse>>> {
    let snapshot = state.registry.snapshot();
    let response = SchemaListResponse::new(&snapshot, state.registry.is_circuit_break());

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} schema(s).", response.schemas.len()),
        response,
    )))
}

/// Describe one schema
pub async fn get_schema(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SuccessResponse<SchemaDetail>>> {
    debug!(schema = %name, "Describing schema");

    let ctx = state.registry.get_schema(&name)?;

    Ok(Json(SuccessResponse::with_data(
        format!("Schema '{}' retrieved.", name),
        SchemaDetail::from(ctx.as_ref()),
    )))
}

/// Latest heartbeat results
pub async fn heartbeat(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<HeartbeatResponse>>> {
    let results = state.heartbeat.last_results();

    Ok(Json(SuccessResponse::with_data(
        format!("{} data source(s) reported.", results.len()),
        HeartbeatResponse { results },
    )))
}
