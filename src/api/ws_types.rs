use serde::Serialize;

use crate::execution::FillEvent;
use crate::models::{PendingOrder, Position};

/// Messages broadcast to all connected dashboard WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    #[serde(rename = "fill")]
    FillUpdate(FillEvent),

    #[serde(rename = "pending_update")]
    PendingUpdate(PendingOrder),

    #[serde(rename = "position_update")]
    PositionUpdate(Position),
}
