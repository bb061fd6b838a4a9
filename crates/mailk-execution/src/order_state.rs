//! Provider order lifecycle vocabulary.
//!
//! The provider reports an order's lifecycle as a free-form label. The
//! controller only branches on three of them; everything else is carried as
//! [`OrderState::Other`] and stored verbatim in the status.
//!
//! ```text
//!   create ──► AwaitingFulfillment ──► Fulfilled (term.)
//!                      │
//!                      └──────────────► Cancelled (term.)
//! ```

use std::fmt;

/// Lifecycle state of a provider order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderState {
    /// Accepted by the provider, not yet handed to the carrier.
    AwaitingFulfillment,
    /// Handed to the carrier. **Terminal.** Drives `status.sent`.
    Fulfilled,
    /// Cancelled, by the controller or provider-side. **Terminal.**
    Cancelled,
    /// Any label the controller does not interpret, normalized.
    Other(String),
}

impl OrderState {
    /// Parse a provider label. Case-insensitive; `-` and spaces are treated as
    /// `_`, and the US spelling `canceled` is accepted.
    pub fn parse(raw: &str) -> Self {
        let norm: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match norm.as_str() {
            "awaiting_fulfillment" => OrderState::AwaitingFulfillment,
            "fulfilled" => OrderState::Fulfilled,
            "cancelled" | "canceled" => OrderState::Cancelled,
            _ => OrderState::Other(norm),
        }
    }

    /// Returns `true` if the provider will not move the order any further.
    /// A terminal order needs no cancel on deletion.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Cancelled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderState::AwaitingFulfillment => "awaiting_fulfillment",
            OrderState::Fulfilled => "fulfilled",
            OrderState::Cancelled => "cancelled",
            OrderState::Other(s) => s,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
