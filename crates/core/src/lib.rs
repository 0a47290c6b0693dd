pub mod audit;
pub mod config;
pub mod errors;
pub mod flows;
pub mod ports;
pub mod registry;
pub mod session;
pub mod slots;
pub mod store;
pub mod templates;

pub use errors::{DialogueError, DomainError};
pub use flows::{
    DialogueAction, DialogueEvent, DialogueFlow, DialoguePhase, FlowContext, FlowEngine,
    SlotFillingFlow, TransitionError, TransitionOutcome,
};
pub use ports::{
    CoursePlan, CourseRecord, ExtractionFailure, Extractor, GatewayError, RecommendationGateway,
    RecommendationResult, TemplateError, TemplateRenderer, UserAct,
};
pub use registry::{RegistryError, SlotDefinition, SlotRegistry, ValidatedAnswer, ValidationError};
pub use session::{ConversationId, Session};
pub use slots::{
    CourseFormat, Field, PartOfDay, Preference, ScheduleConflict, Semester, SlotAnswer, SlotId,
    SlotValue, Weekday,
};
pub use store::{FilledSlots, SlotStateStore};
pub use templates::TemplateKey;
