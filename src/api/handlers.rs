use axum::{body::Bytes, extract::State, Json};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::error::AppError;
use crate::api::state::AppState;
use crate::batch::TradeRecord;

/// Buffers one trade. The body is kept exactly as sent.
pub async fn store_trade(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, AppError> {
    let record = TradeRecord::from_json_bytes(&body).map_err(|e| {
        warn!(error = %e, bytes = body.len(), "Rejected trade payload");
        AppError::from(e)
    })?;

    state.buffer.append(record);
    let pending = state.buffer.len();
    metrics::counter!("trade_anchor_trades_ingested_total").increment(1);
    metrics::gauge!("trade_anchor_pending_trades").set(pending as f64);
    debug!(pending, "Trade stored");

    Ok(Json(json!({ "message": "Trade stored" })))
}
