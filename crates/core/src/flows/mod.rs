pub mod engine;
pub mod states;

pub use engine::{DialogueFlow, FlowEngine, SlotFillingFlow, TransitionError};
pub use states::{DialogueAction, DialogueEvent, DialoguePhase, FlowContext, TransitionOutcome};
