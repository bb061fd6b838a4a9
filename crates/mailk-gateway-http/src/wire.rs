//! Provider wire format.
//!
//! Every response is an envelope `{ "success": bool, "data": {...}, "message": "..." }`.
//! Order bodies carry `id`, `state`, `total` and optional timestamps.

use chrono::{DateTime, Utc};
use mailk_execution::{GatewayError, GatewayResult, OrderRecord};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderDto {
    id: String,
    state: String,
    #[serde(default)]
    total: i64,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    cancelled: Option<DateTime<Utc>>,
    #[serde(default)]
    cancellation_reason: Option<String>,
}

impl From<OrderDto> for OrderRecord {
    fn from(d: OrderDto) -> Self {
        OrderRecord {
            order_id: d.id,
            state: d.state,
            total: d.total,
            created: d.created,
            modified: d.modified,
            cancelled: d.cancelled,
            cancellation_reason: d.cancellation_reason.filter(|r| !r.trim().is_empty()),
        }
    }
}

/// Decode a successful (2xx) order response.
pub(crate) fn decode_order(status: u16, body: &str) -> GatewayResult<OrderRecord> {
    let env: Envelope<OrderDto> =
        serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    if !env.success {
        return Err(GatewayError::Rejected {
            status,
            body: env.message.unwrap_or_else(|| body.to_string()),
        });
    }
    env.data
        .map(OrderRecord::from)
        .ok_or_else(|| GatewayError::Decode("response has no order data".to_string()))
}

/// Decode a successful (2xx) response whose payload is irrelevant.
pub(crate) fn decode_ack(status: u16, body: &str) -> GatewayResult<()> {
    if body.trim().is_empty() {
        return Ok(());
    }
    let env: Envelope<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    if env.success {
        Ok(())
    } else {
        Err(GatewayError::Rejected {
            status,
            body: env.message.unwrap_or_else(|| body.to_string()),
        })
    }
}

/// Map a non-success status. 404 on an order path means the order is gone.
pub(crate) fn classify(status: u16, body: String, order_id: Option<&str>) -> GatewayError {
    match (status, order_id) {
        (404, Some(id)) => GatewayError::NotFound {
            order_id: id.to_string(),
        },
        _ => GatewayError::Rejected {
            status,
            body: truncate(body, 512),
        },
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}
