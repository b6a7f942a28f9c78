//! Trade status and its transition table
use std::fmt;

/// Lifecycle of a trade.
///
/// Only `Pending`, `Accepted` and `Cancelled` are reachable. `OfferCancelled`,
/// `ListCancelled` and `BothCancelled` are reserved terminal variants kept so
/// stored records carrying them still decode; nothing transitions into them.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum TradeStatus {
    #[n(0)]
    #[serde(rename = "P")]
    Pending,
    #[n(1)]
    #[serde(rename = "A")]
    Accepted,
    #[n(2)]
    #[serde(rename = "C")]
    Cancelled,
    #[n(3)]
    #[serde(rename = "OC")]
    OfferCancelled,
    #[n(4)]
    #[serde(rename = "LC")]
    ListCancelled,
    #[n(5)]
    #[serde(rename = "BC")]
    BothCancelled,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Trade is no longer pending.")]
    NotPending,
    #[error("Trade has already been cancelled.")]
    AlreadyCancelled,
    #[error("Cannot move trade from {from} to {to}.")]
    Illegal { from: TradeStatus, to: TradeStatus },
}

impl TradeStatus {
    pub const ALL: [TradeStatus; 6] = [
        TradeStatus::Pending,
        TradeStatus::Accepted,
        TradeStatus::Cancelled,
        TradeStatus::OfferCancelled,
        TradeStatus::ListCancelled,
        TradeStatus::BothCancelled,
    ];

    /// Wire code used by the JSON interface.
    pub fn code(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "P",
            TradeStatus::Accepted => "A",
            TradeStatus::Cancelled => "C",
            TradeStatus::OfferCancelled => "OC",
            TradeStatus::ListCancelled => "LC",
            TradeStatus::BothCancelled => "BC",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        TradeStatus::ALL.into_iter().find(|status| status.code() == code)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending | TradeStatus::Accepted)
    }

    /// The whole transition table. Everything not listed here is rejected.
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (TradeStatus::Pending, TradeStatus::Accepted)
                | (TradeStatus::Pending, TradeStatus::Cancelled)
                | (TradeStatus::Accepted, TradeStatus::Cancelled)
        )
    }

    pub fn transition(self, next: TradeStatus) -> Result<TradeStatus, TransitionError> {
        if self.can_transition_to(next) {
            return Ok(next);
        }

        Err(match (self, next) {
            (_, TradeStatus::Accepted) => TransitionError::NotPending,
            (from, TradeStatus::Cancelled) if from.is_terminal() => {
                TransitionError::AlreadyCancelled
            }
            (from, to) => TransitionError::Illegal { from, to },
        })
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradeStatus::Pending => "Pending",
            TradeStatus::Accepted => "Accepted",
            TradeStatus::Cancelled => "Cancelled",
            TradeStatus::OfferCancelled => "OfferCancelled",
            TradeStatus::ListCancelled => "ListCancelled",
            TradeStatus::BothCancelled => "BothCancelled",
        };
        f.write_str(name)
    }
}
