//! Collaborator seams of the dialogue core.
//!
//! The core never parses text, queries courses or formats sentences itself. It talks to
//! an [`Extractor`], a [`RecommendationGateway`] and a [`TemplateRenderer`], and only ever
//! branches on the shape of what they return.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::ConversationId;
use crate::slots::{SlotAnswer, SlotId};
use crate::store::FilledSlots;
use crate::templates::TemplateKey;

/// Coarse dialogue act of a user turn, decided before any slot extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAct {
    Goodbye,
    Affirm,
    Deny,
    /// A bare greeting or thanks carrying no answer.
    Filler,
    Inform,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("could not read a {slot} answer from `{raw}`: {reason}")]
pub struct ExtractionFailure {
    pub slot: SlotId,
    pub raw: String,
    pub reason: String,
}

impl ExtractionFailure {
    pub fn new(slot: SlotId, raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { slot, raw: raw.into(), reason: reason.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("recommendation gateway timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
    #[error("recommendation gateway unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("no template registered for `{0}`")]
    Missing(String),
    #[error("failed to render template `{key}`: {message}")]
    Render { key: String, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub name: String,
    pub credits: u32,
    pub meetings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePlan {
    pub courses: Vec<CourseRecord>,
    pub total_credits: u32,
}

impl CoursePlan {
    pub fn new(courses: Vec<CourseRecord>) -> Self {
        let total_credits = courses.iter().map(|course| course.credits).sum();
        Self { courses, total_credits }
    }
}

/// Gateway answer. The dialogue policy only asks whether it is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub plans: Vec<CoursePlan>,
}

impl RecommendationResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(plans: Vec<CoursePlan>) -> Self {
        Self { plans }
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn classify(&self, session: &ConversationId, raw: &str) -> UserAct;

    async fn extract(
        &self,
        session: &ConversationId,
        slot: SlotId,
        raw: &str,
    ) -> Result<SlotAnswer, ExtractionFailure>;
}

#[async_trait]
pub trait RecommendationGateway: Send + Sync {
    async fn recommend(&self, slots: &FilledSlots) -> Result<RecommendationResult, GatewayError>;
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, key: &TemplateKey) -> Result<String, TemplateError>;
}
