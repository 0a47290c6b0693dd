use std::fmt;

use serde::{Deserialize, Serialize};

use crate::slots::SlotId;
use crate::store::SlotStateStore;
use crate::templates::TemplateKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "phase", content = "slot", rename_all = "snake_case")]
pub enum DialoguePhase {
    Idle,
    Greeting,
    Eliciting(SlotId),
    AwaitingRecommendation,
    Offering,
    FallbackRestart,
    Closed,
}

impl DialoguePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn eliciting_slot(&self) -> Option<SlotId> {
        match self {
            Self::Eliciting(slot) => Some(*slot),
            _ => None,
        }
    }
}

impl fmt::Display for DialoguePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Greeting => f.write_str("greeting"),
            Self::Eliciting(slot) => write!(f, "eliciting({slot})"),
            Self::AwaitingRecommendation => f.write_str("awaiting_recommendation"),
            Self::Offering => f.write_str("offering"),
            Self::FallbackRestart => f.write_str("fallback_restart"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueEvent {
    SessionStarted,
    GreetingDelivered,
    AnswerAccepted { slot: SlotId },
    AnswerRejected { slot: SlotId },
    RetryLimitReached { slot: SlotId },
    RecommendationsFound { count: usize },
    RecommendationsEmpty,
    GatewayUnavailable,
    RestartAcknowledged,
    ContinueRequested,
    StopRequested,
    ContinueUnclear,
    FillerReceived,
    GoodbyeRequested,
}

/// Snapshot of the slot store the transition function is allowed to see.
/// Build it after the current answer has been stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub next_unfilled: Option<SlotId>,
}

impl Default for FlowContext {
    fn default() -> Self {
        Self { next_unfilled: Some(SlotId::first()) }
    }
}

impl FlowContext {
    pub fn from_store(store: &SlotStateStore) -> Self {
        Self { next_unfilled: store.next_unfilled() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueAction {
    Emit(TemplateKey),
    InvokeGateway,
    SurfaceRecommendations,
    ResetSlots,
    DestroySession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialoguePhase,
    pub to: DialoguePhase,
    pub event: DialogueEvent,
    pub actions: Vec<DialogueAction>,
}

impl TransitionOutcome {
    /// Template keys in emission order.
    pub fn emitted(&self) -> impl Iterator<Item = TemplateKey> + '_ {
        self.actions.iter().filter_map(|action| match action {
            DialogueAction::Emit(key) => Some(*key),
            _ => None,
        })
    }

    pub fn has_action(&self, action: DialogueAction) -> bool {
        self.actions.contains(&action)
    }
}
