use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flows::{DialogueAction, DialoguePhase, TransitionOutcome};
use crate::ports::RecommendationResult;
use crate::registry::ValidatedAnswer;
use crate::slots::SlotId;
use crate::store::SlotStateStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConversationId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

/// One conversation. Owns its slot store exclusively; nothing here is shared between
/// sessions.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    id: ConversationId,
    phase: DialoguePhase,
    slots: SlotStateStore,
    turn_count: u32,
    failures: [u32; 5],
    pending: Option<RecommendationResult>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            phase: DialoguePhase::Idle,
            slots: SlotStateStore::new(),
            turn_count: 0,
            failures: [0; 5],
            pending: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn phase(&self) -> DialoguePhase {
        self.phase
    }

    pub fn slots(&self) -> &SlotStateStore {
        &self.slots
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn begin_turn(&mut self, now: DateTime<Utc>) -> u32 {
        self.turn_count = self.turn_count.saturating_add(1);
        self.last_activity_at = now;
        self.turn_count
    }

    /// Applies a committed transition: moves to the new phase and performs the reset the
    /// transition asked for.
    pub fn commit(&mut self, outcome: &TransitionOutcome) {
        if outcome.has_action(DialogueAction::ResetSlots) {
            self.reset();
        }
        self.phase = outcome.to;
    }

    pub fn fill_slot(&mut self, answer: ValidatedAnswer) {
        self.clear_failure(answer.slot());
        self.slots.fill(answer);
    }

    /// Increments the consecutive-failure counter of `slot` and returns the new value.
    pub fn record_failure(&mut self, slot: SlotId) -> u32 {
        let counter = &mut self.failures[slot.index()];
        *counter = counter.saturating_add(1);
        *counter
    }

    pub fn clear_failure(&mut self, slot: SlotId) {
        self.failures[slot.index()] = 0;
    }

    pub fn consecutive_failures(&self, slot: SlotId) -> u32 {
        self.failures[slot.index()]
    }

    pub fn set_pending(&mut self, result: RecommendationResult) {
        self.pending = Some(result);
    }

    pub fn pending_recommendations(&self) -> Option<&RecommendationResult> {
        self.pending.as_ref()
    }

    /// Forgets every slot value, failure counter and pending result.
    pub fn reset(&mut self) {
        self.slots.reset();
        self.failures = [0; 5];
        self.pending = None;
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_activity_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{ConversationId, Session};
    use crate::flows::{DialogueAction, DialogueEvent, DialoguePhase, TransitionOutcome};
    use crate::ports::RecommendationResult;
    use crate::registry::SlotRegistry;
    use crate::slots::{SlotAnswer, SlotId, SlotValue};
    use crate::templates::TemplateKey;

    #[test]
    fn conversation_ids_parse_from_their_display_form() {
        let id = ConversationId::new();
        assert_eq!(id.to_string().parse::<ConversationId>().ok(), Some(id));
        assert!("not-a-uuid".parse::<ConversationId>().is_err());
    }

    #[test]
    fn new_session_starts_idle_and_empty() {
        let session = Session::new(ConversationId::new(), Utc::now());
        assert_eq!(session.phase(), DialoguePhase::Idle);
        assert_eq!(session.turn_count(), 0);
        assert_eq!(session.slots().unset_slots(), SlotId::PRIORITY.to_vec());
        assert!(session.pending_recommendations().is_none());
    }

    #[test]
    fn failures_count_consecutively_until_the_slot_is_filled() {
        let mut session = Session::new(ConversationId::new(), Utc::now());
        assert_eq!(session.record_failure(SlotId::TotalCredits), 1);
        assert_eq!(session.record_failure(SlotId::TotalCredits), 2);
        assert_eq!(session.consecutive_failures(SlotId::Fields), 0);

        let answer = SlotRegistry::standard()
            .validate(SlotId::TotalCredits, &SlotAnswer::Value(SlotValue::TotalCredits(9)))
            .expect("9 credits is valid");
        session.fill_slot(answer);
        assert_eq!(session.consecutive_failures(SlotId::TotalCredits), 0);
        assert!(session.slots().is_filled(SlotId::TotalCredits));
    }

    #[test]
    fn committing_a_reset_transition_forgets_everything() {
        let mut session = Session::new(ConversationId::new(), Utc::now());
        let answer = SlotRegistry::standard()
            .validate(SlotId::Fields, &SlotAnswer::DontCare)
            .expect("fields accept a wildcard");
        session.fill_slot(answer);
        session.record_failure(SlotId::TotalCredits);
        session.set_pending(RecommendationResult::empty());

        session.commit(&TransitionOutcome {
            from: DialoguePhase::FallbackRestart,
            to: DialoguePhase::Eliciting(SlotId::TotalCredits),
            event: DialogueEvent::RestartAcknowledged,
            actions: vec![
                DialogueAction::ResetSlots,
                DialogueAction::Emit(TemplateKey::Request(SlotId::TotalCredits)),
            ],
        });

        assert_eq!(session.phase(), DialoguePhase::Eliciting(SlotId::TotalCredits));
        assert_eq!(session.slots().unset_slots(), SlotId::PRIORITY.to_vec());
        assert_eq!(session.consecutive_failures(SlotId::TotalCredits), 0);
        assert!(session.pending_recommendations().is_none());
    }

    #[test]
    fn idle_detection_uses_last_activity() {
        let start = Utc::now();
        let mut session = Session::new(ConversationId::new(), start);
        assert!(session.is_idle_since(start + Duration::seconds(1)));

        let later = start + Duration::seconds(30);
        assert_eq!(session.begin_turn(later), 1);
        assert!(!session.is_idle_since(start + Duration::seconds(10)));
        assert_eq!(session.created_at(), start);
        assert_eq!(session.last_activity_at(), later);
    }
}
