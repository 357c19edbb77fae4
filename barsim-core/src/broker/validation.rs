//! Submission-time checks.

use crate::domain::{Instrument, OrderRequest, OrderType, OrderTypeKind};
use rust_decimal::Decimal;
use thiserror::Error;

/// Reasons a submission is rejected. Returned to the strategy; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderValidationError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("insufficient cash: need {required}, have {available}")]
    InsufficientCash {
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient shares of {instrument}: need {required}, have {available}")]
    InsufficientShares {
        instrument: Instrument,
        required: u64,
        available: i64,
    },
}

/// Check quantity and required prices, producing the typed order type.
pub fn validate_request(request: &OrderRequest) -> Result<(OrderType, u64), OrderValidationError> {
    if request.quantity <= 0 {
        return Err(OrderValidationError::InvalidOrder(format!(
            "quantity must be positive, got {}",
            request.quantity
        )));
    }
    let quantity = request.quantity as u64;

    let limit = || require_price("limit", request.limit_price, request.kind);
    let stop = || require_price("stop", request.stop_price, request.kind);

    let order_type = match request.kind {
        OrderTypeKind::Market => OrderType::Market,
        OrderTypeKind::Limit => OrderType::Limit {
            limit_price: limit()?,
        },
        OrderTypeKind::Stop => OrderType::Stop {
            stop_price: stop()?,
        },
        OrderTypeKind::StopLimit => OrderType::StopLimit {
            stop_price: stop()?,
            limit_price: limit()?,
        },
    };
    if request.on_close && order_type != OrderType::Market {
        return Err(OrderValidationError::InvalidOrder(format!(
            "on_close is only valid for market orders, got {:?}",
            request.kind
        )));
    }
    Ok((order_type, quantity))
}

fn require_price(
    field: &str,
    price: Option<Decimal>,
    kind: OrderTypeKind,
) -> Result<Decimal, OrderValidationError> {
    match price {
        None => Err(OrderValidationError::InvalidOrder(format!(
            "{kind:?} order requires a {field} price"
        ))),
        Some(p) if p <= Decimal::ZERO => Err(OrderValidationError::InvalidOrder(format!(
            "{field} price must be positive, got {p}"
        ))),
        Some(p) => Ok(p),
    }
}
