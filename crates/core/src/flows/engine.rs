use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    DialogueAction, DialogueEvent, DialoguePhase, FlowContext, TransitionOutcome,
};
use crate::slots::SlotId;
use crate::templates::TemplateKey;

pub trait DialogueFlow {
    fn initial_phase(&self) -> DialoguePhase;
    fn transition(
        &self,
        current: &DialoguePhase,
        event: &DialogueEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, TransitionError>;
}

/// Fixed-priority slot filling: ask for the first unset slot, re-ask on bad input,
/// recommend once everything is filled.
#[derive(Clone, Debug, Default)]
pub struct SlotFillingFlow;

impl DialogueFlow for SlotFillingFlow {
    fn initial_phase(&self) -> DialoguePhase {
        DialoguePhase::Idle
    }

    fn transition(
        &self,
        current: &DialoguePhase,
        event: &DialogueEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, TransitionError> {
        transition_slot_filling(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: DialogueFlow,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_phase(&self) -> DialoguePhase {
        self.flow.initial_phase()
    }

    pub fn apply(
        &self,
        current: &DialoguePhase,
        event: &DialogueEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &DialoguePhase,
        event: &DialogueEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.to_string())
                    .with_metadata("to", outcome.to.to_string())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<SlotFillingFlow> {
    fn default() -> Self {
        Self::new(SlotFillingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {state} using event {event:?}")]
    InvalidTransition { state: DialoguePhase, event: DialogueEvent },
    #[error("answer for {received} arrived while eliciting {expected}")]
    SlotOutOfTurn { expected: SlotId, received: SlotId },
}

fn transition_slot_filling(
    current: &DialoguePhase,
    event: &DialogueEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, TransitionError> {
    use DialogueAction::{DestroySession, Emit, InvokeGateway, ResetSlots, SurfaceRecommendations};
    use DialogueEvent::{
        AnswerAccepted, AnswerRejected, ContinueRequested, ContinueUnclear, FillerReceived,
        GatewayUnavailable, GoodbyeRequested, GreetingDelivered, RecommendationsEmpty, RecommendationsFound,
        RestartAcknowledged, RetryLimitReached, SessionStarted, StopRequested,
    };
    use DialoguePhase::{
        AwaitingRecommendation, Closed, Eliciting, FallbackRestart, Greeting, Idle, Offering,
    };

    let invalid = || TransitionError::InvalidTransition { state: *current, event: *event };

    let (to, actions) = match (current, event) {
        (Closed, _) => return Err(invalid()),
        (_, GoodbyeRequested) => {
            (Closed, vec![Emit(TemplateKey::Closing), DestroySession])
        }
        (Idle, SessionStarted) => (Greeting, vec![Emit(TemplateKey::Welcome)]),
        (Greeting, GreetingDelivered) => advance(context),
        (Eliciting(expected), AnswerAccepted { slot }) => {
            ensure_in_turn(*expected, *slot)?;
            advance(context)
        }
        (Eliciting(expected), AnswerRejected { slot }) => {
            ensure_in_turn(*expected, *slot)?;
            (Eliciting(*expected), vec![Emit(TemplateKey::RequestWithError(*expected))])
        }
        (Eliciting(expected), FillerReceived) => {
            (Eliciting(*expected), vec![Emit(TemplateKey::Request(*expected))])
        }
        (Eliciting(expected), RetryLimitReached { slot }) => {
            ensure_in_turn(*expected, *slot)?;
            (FallbackRestart, vec![Emit(TemplateKey::FailRestart)])
        }
        (AwaitingRecommendation, RecommendationsFound { count }) if *count > 0 => {
            (Offering, vec![SurfaceRecommendations, Emit(TemplateKey::RequestMore)])
        }
        (AwaitingRecommendation, RecommendationsFound { .. })
        | (AwaitingRecommendation, RecommendationsEmpty)
        | (AwaitingRecommendation, GatewayUnavailable) => {
            (FallbackRestart, vec![Emit(TemplateKey::FailRestart)])
        }
        (FallbackRestart, RestartAcknowledged) | (Offering, ContinueRequested) => {
            let first = SlotId::first();
            (Eliciting(first), vec![ResetSlots, Emit(TemplateKey::Request(first))])
        }
        (Offering, StopRequested) => (Closed, vec![Emit(TemplateKey::Closing), DestroySession]),
        (Offering, ContinueUnclear) | (Offering, FillerReceived) => {
            (Offering, vec![Emit(TemplateKey::RequestMore)])
        }
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

fn advance(context: &FlowContext) -> (DialoguePhase, Vec<DialogueAction>) {
    match context.next_unfilled {
        Some(next) => (
            DialoguePhase::Eliciting(next),
            vec![DialogueAction::Emit(TemplateKey::Request(next))],
        ),
        None => (DialoguePhase::AwaitingRecommendation, vec![DialogueAction::InvokeGateway]),
    }
}

fn ensure_in_turn(expected: SlotId, received: SlotId) -> Result<(), TransitionError> {
    if expected == received {
        Ok(())
    } else {
        Err(TransitionError::SlotOutOfTurn { expected, received })
    }
}
