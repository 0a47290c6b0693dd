use adviser_core::audit::{AuditEvent, AuditOutcome, AuditSink};

/// Audit sink that forwards every event to `tracing` as a structured log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session_id = event
            .conversation_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let turn = event.turn.unwrap_or_default();
        let metadata = render_metadata(&event);

        match event.outcome {
            AuditOutcome::Failed => tracing::warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                session_id = %session_id,
                turn,
                category = ?event.category,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Success | AuditOutcome::Rejected => tracing::info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                session_id = %session_id,
                turn,
                category = ?event.category,
                outcome = ?event.outcome,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}

fn render_metadata(event: &AuditEvent) -> String {
    event
        .metadata
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}
