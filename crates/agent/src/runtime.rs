use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use adviser_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use adviser_core::config::AppConfig;
use adviser_core::{
    ConversationId, DialogueAction, DialogueError, DialogueEvent, DialoguePhase, DomainError,
    ExtractionFailure, Extractor, FlowContext, FlowEngine, GatewayError, RecommendationGateway,
    RecommendationResult, Session, SlotFillingFlow, SlotId, SlotRegistry, TemplateKey,
    TemplateRenderer, TransitionOutcome, UserAct,
};

use crate::telemetry::TracingAuditSink;

const AUDIT_ACTOR: &str = "dialogue-runtime";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub extractor_timeout: Duration,
    pub gateway_timeout: Duration,
    /// `None` re-prompts forever.
    pub max_consecutive_failures: Option<u32>,
    pub idle_timeout: Duration,
    pub max_active_sessions: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            extractor_timeout: Duration::from_millis(2_000),
            gateway_timeout: Duration::from_millis(5_000),
            max_consecutive_failures: None,
            idle_timeout: Duration::from_secs(1_800),
            max_active_sessions: 1_024,
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            extractor_timeout: config.dialogue.extractor_timeout(),
            gateway_timeout: config.dialogue.gateway_timeout(),
            max_consecutive_failures: config.dialogue.max_consecutive_failures,
            idle_timeout: config.session.idle_timeout(),
            max_active_sessions: config.session.max_active_sessions,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenderedPrompt {
    pub key: TemplateKey,
    pub text: String,
}

/// Everything the transport needs to answer one user turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnOutput {
    pub session_id: ConversationId,
    pub prompts: Vec<RenderedPrompt>,
    /// Set when this turn surfaced a non-empty gateway result.
    pub recommendations: Option<RecommendationResult>,
    pub phase: DialoguePhase,
    pub closed: bool,
}

impl TurnOutput {
    pub fn keys(&self) -> Vec<TemplateKey> {
        self.prompts.iter().map(|prompt| prompt.key).collect()
    }

    pub fn text(&self) -> String {
        self.prompts.iter().map(|prompt| prompt.text.as_str()).collect::<Vec<_>>().join("\n")
    }
}

type SessionHandle = Arc<Mutex<Session>>;

/// Owns every open conversation and drives it through the slot-filling flow.
///
/// Sessions never share state. Turns of one session are strictly sequential: a turn that
/// arrives while the previous one is still running is refused with
/// [`DialogueError::TurnInProgress`].
pub struct DialogueRuntime {
    engine: FlowEngine<SlotFillingFlow>,
    registry: SlotRegistry,
    extractor: Arc<dyn Extractor>,
    gateway: Arc<dyn RecommendationGateway>,
    renderer: Arc<dyn TemplateRenderer>,
    audit: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
    sessions: RwLock<HashMap<ConversationId, SessionHandle>>,
}

impl DialogueRuntime {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        gateway: Arc<dyn RecommendationGateway>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            engine: FlowEngine::default(),
            registry: SlotRegistry::standard(),
            extractor,
            gateway,
            renderer,
            audit: Arc::new(TracingAuditSink),
            settings: RuntimeSettings::default(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Opens a conversation: greets and asks for the first slot.
    pub async fn start_session(&self) -> Result<TurnOutput, DialogueError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.settings.max_active_sessions {
            tracing::warn!(
                event_name = "dialogue.session_limit_reached",
                limit = self.settings.max_active_sessions,
                "refusing to open another session"
            );
            return Err(DialogueError::SessionLimitReached {
                limit: self.settings.max_active_sessions,
            });
        }

        let id = ConversationId::new();
        let mut session = Session::new(id, Utc::now());
        let audit = audit_context(&session, session.turn_count());

        let greeting = self.apply(&mut session, DialogueEvent::SessionStarted, &audit)?;
        let first_request = self.apply(&mut session, DialogueEvent::GreetingDelivered, &audit)?;
        let prompts = self.render(&[greeting, first_request])?;
        let phase = session.phase();

        sessions.insert(id, Arc::new(Mutex::new(session)));
        drop(sessions);

        self.audit.emit(AuditEvent::new(
            &audit,
            "session.started",
            AuditCategory::Session,
            AuditOutcome::Success,
        ));
        tracing::info!(
            event_name = "dialogue.session_started",
            correlation_id = %audit.correlation_id,
            session_id = %id,
            "conversation opened"
        );

        Ok(TurnOutput { session_id: id, prompts, recommendations: None, phase, closed: false })
    }

    /// Processes one user utterance and commits every transition it causes.
    pub async fn handle_turn(
        &self,
        id: ConversationId,
        raw: &str,
    ) -> Result<TurnOutput, DialogueError> {
        let handle = self.session_handle(id).await?;
        let mut session =
            handle.try_lock().map_err(|_| DialogueError::TurnInProgress(id.to_string()))?;
        if session.is_closed() {
            return Err(DialogueError::SessionClosed(id.to_string()));
        }

        let turn = session.begin_turn(Utc::now());
        let audit = audit_context(&session, turn);
        let result = self.run_turn(&mut session, raw, &audit).await;
        let phase = session.phase();
        drop(session);

        match result {
            Ok(output) => {
                if output.closed {
                    self.discard(id, "session.closed").await;
                }
                tracing::info!(
                    event_name = "dialogue.turn_completed",
                    correlation_id = %audit.correlation_id,
                    session_id = %id,
                    turn,
                    phase = %output.phase,
                    prompts = output.prompts.len(),
                    closed = output.closed,
                    "turn committed"
                );
                Ok(output)
            }
            Err(error) => {
                tracing::error!(
                    event_name = "dialogue.turn_failed",
                    correlation_id = %audit.correlation_id,
                    session_id = %id,
                    turn,
                    phase = %phase,
                    error = %error,
                    "turn failed"
                );
                if error.is_fatal() {
                    self.discard(id, "session.aborted").await;
                }
                Err(error)
            }
        }
    }

    /// Drops a session immediately, e.g. when the user disconnects.
    pub async fn abort(&self, id: ConversationId) -> bool {
        self.discard(id, "session.aborted").await
    }

    /// Drops every session idle since before `now - idle_timeout`. Sessions in the middle of
    /// a turn are never expired.
    pub async fn expire_idle(&self, now: DateTime<Utc>) -> Vec<ConversationId> {
        let Ok(idle) = chrono::Duration::from_std(self.settings.idle_timeout) else {
            return Vec::new();
        };
        let Some(cutoff) = now.checked_sub_signed(idle) else {
            return Vec::new();
        };

        let mut sessions = self.sessions.write().await;
        let expired: Vec<ConversationId> = sessions
            .iter()
            .filter(|(_, handle)| {
                handle.try_lock().map(|session| session.is_idle_since(cutoff)).unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        drop(sessions);

        for id in &expired {
            let context = AuditContext::new(Some(*id), None, id.to_string(), AUDIT_ACTOR);
            self.audit.emit(AuditEvent::new(
                &context,
                "session.expired",
                AuditCategory::Session,
                AuditOutcome::Success,
            ));
            tracing::info!(
                event_name = "dialogue.session_expired",
                session_id = %id,
                "idle conversation dropped"
            );
        }
        expired
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of a session; waits for a running turn to finish.
    pub async fn inspect(&self, id: ConversationId) -> Option<Session> {
        let handle = self.sessions.read().await.get(&id).cloned()?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    async fn session_handle(&self, id: ConversationId) -> Result<SessionHandle, DialogueError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DialogueError::UnknownSession(id.to_string()))
    }

    async fn discard(&self, id: ConversationId, event_type: &str) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            let context = AuditContext::new(Some(id), None, id.to_string(), AUDIT_ACTOR);
            self.audit.emit(AuditEvent::new(
                &context,
                event_type,
                AuditCategory::Session,
                AuditOutcome::Success,
            ));
            tracing::info!(
                event_name = "dialogue.session_discarded",
                session_id = %id,
                reason = event_type,
                "conversation discarded"
            );
        }
        removed
    }

    async fn run_turn(
        &self,
        session: &mut Session,
        raw: &str,
        audit: &AuditContext,
    ) -> Result<TurnOutput, DialogueError> {
        let act = self.classify(session.id(), raw).await;
        let first_event = if act == UserAct::Goodbye {
            DialogueEvent::GoodbyeRequested
        } else {
            match session.phase() {
                DialoguePhase::Eliciting(_) if act == UserAct::Filler => {
                    DialogueEvent::FillerReceived
                }
                DialoguePhase::Eliciting(slot) => {
                    self.interpret_answer(session, slot, raw, audit).await
                }
                DialoguePhase::Offering => match act {
                    UserAct::Affirm => DialogueEvent::ContinueRequested,
                    UserAct::Deny => DialogueEvent::StopRequested,
                    UserAct::Filler => DialogueEvent::FillerReceived,
                    UserAct::Inform | UserAct::Goodbye => DialogueEvent::ContinueUnclear,
                },
                other => {
                    return Err(DomainError::InvariantViolation(format!(
                        "session {} is waiting for input in phase {other}",
                        session.id()
                    ))
                    .into());
                }
            }
        };

        let mut outcomes = Vec::new();
        let mut next = Some(first_event);
        while let Some(event) = next.take() {
            let outcome = self.apply(session, event, audit)?;
            next = self.follow_up(session, &outcome, audit).await?;
            outcomes.push(outcome);
        }

        let surfaced = outcomes
            .iter()
            .any(|outcome| outcome.has_action(DialogueAction::SurfaceRecommendations));
        let closed =
            outcomes.iter().any(|outcome| outcome.has_action(DialogueAction::DestroySession));

        Ok(TurnOutput {
            session_id: session.id(),
            prompts: self.render(&outcomes)?,
            recommendations: if surfaced { session.pending_recommendations().cloned() } else { None },
            phase: session.phase(),
            closed,
        })
    }

    async fn classify(&self, id: ConversationId, raw: &str) -> UserAct {
        match timeout(self.settings.extractor_timeout, self.extractor.classify(&id, raw)).await {
            Ok(act) => act,
            Err(_) => {
                tracing::warn!(
                    event_name = "dialogue.classify_timed_out",
                    session_id = %id,
                    timeout_ms = millis(self.settings.extractor_timeout),
                    "treating utterance as plain information"
                );
                UserAct::Inform
            }
        }
    }

    async fn interpret_answer(
        &self,
        session: &mut Session,
        slot: SlotId,
        raw: &str,
        audit: &AuditContext,
    ) -> DialogueEvent {
        let id = session.id();
        let extracted =
            match timeout(self.settings.extractor_timeout, self.extractor.extract(&id, slot, raw))
                .await
            {
                Ok(extracted) => extracted,
                Err(_) => Err(ExtractionFailure::new(
                    slot,
                    raw,
                    format!(
                        "extractor timed out after {}ms",
                        millis(self.settings.extractor_timeout)
                    ),
                )),
            };

        let answer = match extracted {
            Ok(answer) => answer,
            Err(failure) => {
                tracing::debug!(
                    event_name = "dialogue.extraction_failed",
                    session_id = %id,
                    slot = slot.as_str(),
                    reason = %failure.reason,
                    "answer not understood"
                );
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "extraction.failed",
                        AuditCategory::Extraction,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("slot", slot.as_str())
                    .with_metadata("reason", failure.reason),
                );
                return self.reject(session, slot);
            }
        };

        match self.registry.validate(slot, &answer) {
            Ok(validated) => {
                session.fill_slot(validated);
                DialogueEvent::AnswerAccepted { slot }
            }
            Err(error) => {
                tracing::debug!(
                    event_name = "dialogue.validation_rejected",
                    session_id = %id,
                    slot = slot.as_str(),
                    error = %error,
                    "answer rejected"
                );
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "validation.rejected",
                        AuditCategory::Validation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("slot", slot.as_str())
                    .with_metadata("error", error.to_string()),
                );
                self.reject(session, slot)
            }
        }
    }

    fn reject(&self, session: &mut Session, slot: SlotId) -> DialogueEvent {
        let failures = session.record_failure(slot);
        match self.settings.max_consecutive_failures {
            Some(limit) if failures >= limit => DialogueEvent::RetryLimitReached { slot },
            _ => DialogueEvent::AnswerRejected { slot },
        }
    }

    /// Event the runtime raises on its own after `outcome`, if any.
    async fn follow_up(
        &self,
        session: &mut Session,
        outcome: &TransitionOutcome,
        audit: &AuditContext,
    ) -> Result<Option<DialogueEvent>, DialogueError> {
        if outcome.has_action(DialogueAction::InvokeGateway) {
            return self.consult_gateway(session, audit).await.map(Some);
        }
        if outcome.to == DialoguePhase::FallbackRestart {
            return Ok(Some(DialogueEvent::RestartAcknowledged));
        }
        Ok(None)
    }

    async fn consult_gateway(
        &self,
        session: &mut Session,
        audit: &AuditContext,
    ) -> Result<DialogueEvent, DialogueError> {
        let slots = session.slots().filled_slots().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "gateway requested for session {} with unset slots",
                session.id()
            ))
        })?;

        let response = match timeout(self.settings.gateway_timeout, self.gateway.recommend(&slots))
            .await
        {
            Ok(response) => response,
            Err(_) => Err(GatewayError::Timeout { elapsed_ms: millis(self.settings.gateway_timeout) }),
        };

        match response {
            Ok(result) => {
                let count = result.len();
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "recommendation.gateway_completed",
                        AuditCategory::Recommendation,
                        AuditOutcome::Success,
                    )
                    .with_metadata("plans", count.to_string()),
                );
                if result.is_empty() {
                    return Ok(DialogueEvent::RecommendationsEmpty);
                }
                session.set_pending(result);
                Ok(DialogueEvent::RecommendationsFound { count })
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "dialogue.gateway_failed",
                    correlation_id = %audit.correlation_id,
                    session_id = %session.id(),
                    error = %error,
                    "recommendation gateway failed, restarting elicitation"
                );
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "recommendation.gateway_failed",
                        AuditCategory::Recommendation,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                Ok(DialogueEvent::GatewayUnavailable)
            }
        }
    }

    fn apply(
        &self,
        session: &mut Session,
        event: DialogueEvent,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, DialogueError> {
        let context = FlowContext::from_store(session.slots());
        let outcome = self.engine.apply_with_audit(
            &session.phase(),
            &event,
            &context,
            self.audit.as_ref(),
            audit,
        )?;
        session.commit(&outcome);
        Ok(outcome)
    }

    fn render(&self, outcomes: &[TransitionOutcome]) -> Result<Vec<RenderedPrompt>, DialogueError> {
        outcomes
            .iter()
            .flat_map(|outcome| outcome.emitted())
            .map(|key| -> Result<RenderedPrompt, DialogueError> {
                Ok(RenderedPrompt { key, text: self.renderer.render(&key)? })
            })
            .collect()
    }
}

fn audit_context(session: &Session, turn: u32) -> AuditContext {
    AuditContext::new(
        Some(session.id()),
        Some(turn),
        format!("{}:{turn}", session.id()),
        AUDIT_ACTOR,
    )
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use adviser_core::audit::{AuditOutcome, InMemoryAuditSink};
    use adviser_core::{
        ConversationId, CoursePlan, CourseRecord, DialogueError, DialoguePhase, ExtractionFailure,
        Extractor, FilledSlots, GatewayError, RecommendationGateway, RecommendationResult,
        SlotAnswer, SlotId, TemplateKey, UserAct,
    };

    use super::{DialogueRuntime, RuntimeSettings};
    use crate::extraction::KeywordExtractor;
    use crate::templates::TemplateCatalog;

    const FILL_ALL: [&str; 5] = ["9", "don't care", "don't care", "don't care", "winter"];

    struct FixedGateway(RecommendationResult);

    #[async_trait]
    impl RecommendationGateway for FixedGateway {
        async fn recommend(
            &self,
            _slots: &FilledSlots,
        ) -> Result<RecommendationResult, GatewayError> {
            Ok(self.0.clone())
        }
    }

    struct FailingGateway;

    #[async_trait]
    impl RecommendationGateway for FailingGateway {
        async fn recommend(
            &self,
            _slots: &FilledSlots,
        ) -> Result<RecommendationResult, GatewayError> {
            Err(GatewayError::Unavailable("catalog offline".to_string()))
        }
    }

    struct SlowGateway;

    #[async_trait]
    impl RecommendationGateway for SlowGateway {
        async fn recommend(
            &self,
            _slots: &FilledSlots,
        ) -> Result<RecommendationResult, GatewayError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(one_plan())
        }
    }

    /// Understands everything like the keyword extractor, but only after a delay.
    struct SlowExtractor {
        delay: Duration,
    }

    #[async_trait]
    impl Extractor for SlowExtractor {
        async fn classify(&self, _session: &ConversationId, raw: &str) -> UserAct {
            KeywordExtractor::new().classify_text(raw)
        }

        async fn extract(
            &self,
            _session: &ConversationId,
            slot: SlotId,
            raw: &str,
        ) -> Result<SlotAnswer, ExtractionFailure> {
            tokio::time::sleep(self.delay).await;
            KeywordExtractor::new().extract_text(slot, raw)
        }
    }

    fn one_plan() -> RecommendationResult {
        RecommendationResult::new(vec![CoursePlan::new(vec![CourseRecord {
            name: "Dialog Systems".to_string(),
            credits: 9,
            meetings: vec!["Tue 14:00-15:30".to_string()],
        }])])
    }

    fn runtime_with(gateway: Arc<dyn RecommendationGateway>) -> DialogueRuntime {
        DialogueRuntime::new(
            Arc::new(KeywordExtractor::new()),
            gateway,
            Arc::new(TemplateCatalog::standard().expect("built-in templates compile")),
        )
    }

    async fn fill_all(runtime: &DialogueRuntime, id: ConversationId) -> super::TurnOutput {
        let mut last = None;
        for answer in FILL_ALL {
            last = Some(runtime.handle_turn(id, answer).await.expect("answer accepted"));
        }
        last.expect("five answers were given")
    }

    #[tokio::test]
    async fn new_session_greets_and_asks_for_credits() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let output = runtime.start_session().await.expect("session starts");

        assert_eq!(
            output.keys(),
            vec![TemplateKey::Welcome, TemplateKey::Request(SlotId::TotalCredits)]
        );
        assert_eq!(output.phase, DialoguePhase::Eliciting(SlotId::TotalCredits));
        assert!(output.text().ends_with("How many credits would you like to earn?"));
        assert_eq!(runtime.active_sessions().await, 1);
    }

    #[tokio::test]
    async fn slots_are_requested_in_priority_order() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;

        let mut requested = vec![SlotId::TotalCredits];
        for answer in &FILL_ALL[..4] {
            let output = runtime.handle_turn(id, answer).await.expect("answer accepted");
            requested.extend(output.keys().into_iter().filter_map(|key| key.slot()));
        }
        assert_eq!(requested, SlotId::PRIORITY.to_vec());
    }

    #[tokio::test]
    async fn rejected_answers_reprompt_without_advancing() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;

        let output = runtime.handle_turn(id, "10").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::RequestWithError(SlotId::TotalCredits)]);
        assert_eq!(output.phase, DialoguePhase::Eliciting(SlotId::TotalCredits));

        let output = runtime.handle_turn(id, "lots of them").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::RequestWithError(SlotId::TotalCredits)]);

        let session = runtime.inspect(id).await.expect("session still open");
        assert_eq!(session.consecutive_failures(SlotId::TotalCredits), 2);
        assert!(!session.slots().is_filled(SlotId::TotalCredits));
    }

    #[tokio::test]
    async fn spelled_out_totals_past_sixty_are_reprompted() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;

        for answer in ["ninety-nine", "three hundred credits"] {
            let output = runtime.handle_turn(id, answer).await.expect("turn handled");
            assert_eq!(
                output.keys(),
                vec![TemplateKey::RequestWithError(SlotId::TotalCredits)],
                "{answer}"
            );
        }

        let session = runtime.inspect(id).await.expect("session still open");
        assert!(!session.slots().is_filled(SlotId::TotalCredits));
        assert_eq!(session.consecutive_failures(SlotId::TotalCredits), 2);
    }

    #[tokio::test]
    async fn greetings_and_thanks_repeat_the_question_without_counting_a_failure() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;

        let output = runtime.handle_turn(id, "hello").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::Request(SlotId::TotalCredits)]);
        let session = runtime.inspect(id).await.expect("session still open");
        assert_eq!(session.consecutive_failures(SlotId::TotalCredits), 0);

        let offered = fill_all(&runtime, id).await;
        assert_eq!(offered.phase, DialoguePhase::Offering);
        let output = runtime.handle_turn(id, "thanks!").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::RequestMore]);
        assert_eq!(output.phase, DialoguePhase::Offering);
    }

    #[tokio::test]
    async fn semester_refuses_a_wildcard() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;
        for answer in &FILL_ALL[..4] {
            runtime.handle_turn(id, answer).await.expect("answer accepted");
        }

        let output = runtime.handle_turn(id, "don't care").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::RequestWithError(SlotId::Semester)]);
        assert_eq!(output.phase, DialoguePhase::Eliciting(SlotId::Semester));
    }

    #[tokio::test]
    async fn completed_slots_surface_recommendations_and_ask_for_more() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;

        let output = fill_all(&runtime, id).await;
        assert_eq!(output.keys(), vec![TemplateKey::RequestMore]);
        assert_eq!(output.phase, DialoguePhase::Offering);
        assert_eq!(output.recommendations, Some(one_plan()));
    }

    #[tokio::test]
    async fn continuing_after_an_offer_starts_over_with_empty_slots() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;
        fill_all(&runtime, id).await;

        let output = runtime.handle_turn(id, "yes please").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::Request(SlotId::TotalCredits)]);
        assert!(output.recommendations.is_none());

        let session = runtime.inspect(id).await.expect("session still open");
        assert_eq!(session.slots().unset_slots(), SlotId::PRIORITY.to_vec());
        assert!(session.pending_recommendations().is_none());
    }

    #[tokio::test]
    async fn unclear_answer_to_an_offer_asks_again() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;
        fill_all(&runtime, id).await;

        let output = runtime.handle_turn(id, "hmm, the weather is nice").await.expect("turn");
        assert_eq!(output.keys(), vec![TemplateKey::RequestMore]);
        assert_eq!(output.phase, DialoguePhase::Offering);
    }

    #[tokio::test]
    async fn gateway_errors_restart_like_an_empty_result_but_are_audited_as_failures() {
        let sink = InMemoryAuditSink::default();
        let runtime = runtime_with(Arc::new(FailingGateway)).with_audit_sink(Arc::new(sink.clone()));
        let id = runtime.start_session().await.expect("session starts").session_id;

        let output = fill_all(&runtime, id).await;
        assert_eq!(
            output.keys(),
            vec![TemplateKey::FailRestart, TemplateKey::Request(SlotId::TotalCredits)]
        );
        assert_eq!(output.phase, DialoguePhase::Eliciting(SlotId::TotalCredits));

        let failures = sink.events_of_type("recommendation.gateway_failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].outcome, AuditOutcome::Failed);
        assert!(sink.events_of_type("recommendation.gateway_completed").is_empty());
    }

    #[tokio::test]
    async fn slow_gateway_times_out_into_the_fallback() {
        let settings = RuntimeSettings {
            gateway_timeout: Duration::from_millis(20),
            ..RuntimeSettings::default()
        };
        let runtime = runtime_with(Arc::new(SlowGateway)).with_settings(settings);
        let id = runtime.start_session().await.expect("session starts").session_id;

        let output = fill_all(&runtime, id).await;
        assert_eq!(
            output.keys(),
            vec![TemplateKey::FailRestart, TemplateKey::Request(SlotId::TotalCredits)]
        );
        assert!(output.recommendations.is_none());
    }

    #[tokio::test]
    async fn slow_extractor_counts_as_a_failed_answer() {
        let settings = RuntimeSettings {
            extractor_timeout: Duration::from_millis(20),
            ..RuntimeSettings::default()
        };
        let runtime = DialogueRuntime::new(
            Arc::new(SlowExtractor { delay: Duration::from_millis(500) }),
            Arc::new(FixedGateway(one_plan())),
            Arc::new(TemplateCatalog::standard().expect("built-in templates compile")),
        )
        .with_settings(settings);
        let id = runtime.start_session().await.expect("session starts").session_id;

        let output = runtime.handle_turn(id, "9").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::RequestWithError(SlotId::TotalCredits)]);
    }

    #[tokio::test]
    async fn retry_cap_forces_a_restart() {
        let settings =
            RuntimeSettings { max_consecutive_failures: Some(2), ..RuntimeSettings::default() };
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan()))).with_settings(settings);
        let id = runtime.start_session().await.expect("session starts").session_id;
        runtime.handle_turn(id, "12").await.expect("credits accepted");

        let output = runtime.handle_turn(id, "purple").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::RequestWithError(SlotId::UserSchedules)]);

        let output = runtime.handle_turn(id, "purple").await.expect("turn handled");
        assert_eq!(
            output.keys(),
            vec![TemplateKey::FailRestart, TemplateKey::Request(SlotId::TotalCredits)]
        );
        let session = runtime.inspect(id).await.expect("session still open");
        assert_eq!(session.slots().unset_slots(), SlotId::PRIORITY.to_vec());
        assert_eq!(session.consecutive_failures(SlotId::UserSchedules), 0);
    }

    #[tokio::test]
    async fn goodbye_closes_and_destroys_the_session() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let id = runtime.start_session().await.expect("session starts").session_id;

        let output = runtime.handle_turn(id, "bye").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::Closing]);
        assert!(output.closed);
        assert_eq!(output.phase, DialoguePhase::Closed);
        assert_eq!(runtime.active_sessions().await, 0);

        let error = runtime.handle_turn(id, "hello?").await.expect_err("session is gone");
        assert!(matches!(error, DialogueError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn overlapping_turns_for_one_session_are_refused() {
        let runtime = DialogueRuntime::new(
            Arc::new(SlowExtractor { delay: Duration::from_millis(100) }),
            Arc::new(FixedGateway(one_plan())),
            Arc::new(TemplateCatalog::standard().expect("built-in templates compile")),
        );
        let id = runtime.start_session().await.expect("session starts").session_id;

        let (first, second) =
            tokio::join!(runtime.handle_turn(id, "9"), runtime.handle_turn(id, "12"));
        assert_eq!(
            first.expect("first turn runs").keys(),
            vec![TemplateKey::Request(SlotId::UserSchedules)]
        );
        assert!(matches!(second, Err(DialogueError::TurnInProgress(_))));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())));
        let left = runtime.start_session().await.expect("session starts").session_id;
        let right = runtime.start_session().await.expect("session starts").session_id;

        runtime.handle_turn(left, "9").await.expect("turn handled");
        let output = runtime.handle_turn(right, "10").await.expect("turn handled");
        assert_eq!(output.keys(), vec![TemplateKey::RequestWithError(SlotId::TotalCredits)]);

        let left = runtime.inspect(left).await.expect("left open");
        let right = runtime.inspect(right).await.expect("right open");
        assert!(left.slots().is_filled(SlotId::TotalCredits));
        assert!(!right.slots().is_filled(SlotId::TotalCredits));
    }

    #[tokio::test]
    async fn session_limit_refuses_new_conversations() {
        let settings = RuntimeSettings { max_active_sessions: 1, ..RuntimeSettings::default() };
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan()))).with_settings(settings);
        let id = runtime.start_session().await.expect("first session starts").session_id;

        let error = runtime.start_session().await.expect_err("limit reached");
        assert_eq!(error, DialogueError::SessionLimitReached { limit: 1 });

        assert!(runtime.abort(id).await);
        assert!(!runtime.abort(id).await);
        runtime.start_session().await.expect("slot freed by abort");
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let sink = InMemoryAuditSink::default();
        let settings =
            RuntimeSettings { idle_timeout: Duration::from_secs(60), ..RuntimeSettings::default() };
        let runtime = runtime_with(Arc::new(FixedGateway(one_plan())))
            .with_settings(settings)
            .with_audit_sink(Arc::new(sink.clone()));
        let id = runtime.start_session().await.expect("session starts").session_id;

        assert!(runtime.expire_idle(Utc::now()).await.is_empty());
        let expired = runtime.expire_idle(Utc::now() + chrono::Duration::seconds(120)).await;
        assert_eq!(expired, vec![id]);
        assert_eq!(runtime.active_sessions().await, 0);
        assert_eq!(sink.events_of_type("session.expired").len(), 1);
    }
}
