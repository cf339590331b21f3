//! Order state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// ```text
/// Open ──┬──► Fulfilled
///        └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Order is open; items can be added or removed.
    #[default]
    Open,

    /// Order has been fulfilled (terminal).
    Fulfilled,

    /// Order was cancelled (terminal).
    Cancelled,
}

impl OrderState {
    /// Returns true if items can be modified in this state.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderState::Open)
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Fulfilled | OrderState::Cancelled)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderState::Open => "Open",
            OrderState::Fulfilled => "Fulfilled",
            OrderState::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}
