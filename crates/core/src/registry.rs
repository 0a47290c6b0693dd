use serde::Serialize;
use thiserror::Error;

use crate::slots::{SlotAnswer, SlotId, SlotValue};
use crate::templates::TemplateKey;

pub const MIN_TOTAL_CREDITS: i64 = 3;
pub const MAX_TOTAL_CREDITS: i64 = 60;
pub const CREDIT_STEP: i64 = 3;

pub type Validator = fn(&SlotValue) -> Result<SlotValue, ValidationError>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown slot identifier `{0}`")]
    UnknownSlot(String),
    #[error("unknown template key `{0}`")]
    UnknownTemplate(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{slot} does not accept a \"don't care\" answer")]
    DontCareNotAccepted { slot: SlotId },
    #[error("expected a value for {expected}, got a value for {found}")]
    SlotMismatch { expected: SlotId, found: SlotId },
    #[error("total credits must be between {MIN_TOTAL_CREDITS} and {MAX_TOTAL_CREDITS}, got {value}")]
    CreditsOutOfRange { value: i64 },
    #[error("total credits must be a multiple of {CREDIT_STEP}, got {value}")]
    CreditsNotMultipleOfThree { value: i64 },
    #[error("{slot} needs at least one entry")]
    EmptySelection { slot: SlotId },
}

/// Static description of one slot: how it is validated and which templates ask for it.
#[derive(Clone, Copy, Debug)]
pub struct SlotDefinition {
    pub id: SlotId,
    pub accepts_dont_care: bool,
    pub request_template: TemplateKey,
    pub error_template: TemplateKey,
    validator: Validator,
}

impl SlotDefinition {
    fn new(id: SlotId, accepts_dont_care: bool, validator: Validator) -> Self {
        Self {
            id,
            accepts_dont_care,
            request_template: TemplateKey::Request(id),
            error_template: TemplateKey::RequestWithError(id),
            validator,
        }
    }
}

/// An answer that passed its slot's contract. Only the registry can build one, which
/// keeps unchecked values out of the slot store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidatedAnswer {
    slot: SlotId,
    answer: SlotAnswer,
}

impl ValidatedAnswer {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn answer(&self) -> &SlotAnswer {
        &self.answer
    }

    pub fn into_answer(self) -> SlotAnswer {
        self.answer
    }
}

#[derive(Clone, Debug)]
pub struct SlotRegistry {
    definitions: [SlotDefinition; 5],
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl SlotRegistry {
    pub fn standard() -> Self {
        Self {
            definitions: [
                SlotDefinition::new(SlotId::TotalCredits, false, validate_total_credits),
                SlotDefinition::new(SlotId::UserSchedules, true, validate_user_schedules),
                SlotDefinition::new(SlotId::Fields, true, validate_fields),
                SlotDefinition::new(SlotId::Formats, true, validate_formats),
                SlotDefinition::new(SlotId::Semester, false, validate_semester),
            ],
        }
    }

    pub fn get(&self, slot: SlotId) -> &SlotDefinition {
        &self.definitions[slot.index()]
    }

    pub fn lookup(&self, name: &str) -> Result<&SlotDefinition, RegistryError> {
        let slot = name.parse::<SlotId>()?;
        Ok(self.get(slot))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &SlotDefinition> {
        self.definitions.iter()
    }

    pub fn validate(
        &self,
        slot: SlotId,
        answer: &SlotAnswer,
    ) -> Result<ValidatedAnswer, ValidationError> {
        let definition = self.get(slot);
        let normalized = match answer {
            SlotAnswer::DontCare if definition.accepts_dont_care => SlotAnswer::DontCare,
            SlotAnswer::DontCare => return Err(ValidationError::DontCareNotAccepted { slot }),
            SlotAnswer::Value(value) => {
                if value.slot() != slot {
                    return Err(ValidationError::SlotMismatch { expected: slot, found: value.slot() });
                }
                SlotAnswer::Value((definition.validator)(value)?)
            }
        };

        Ok(ValidatedAnswer { slot, answer: normalized })
    }
}

fn validate_total_credits(value: &SlotValue) -> Result<SlotValue, ValidationError> {
    let SlotValue::TotalCredits(credits) = value else {
        return Err(mismatch(SlotId::TotalCredits, value));
    };
    let credits = *credits;
    if !(MIN_TOTAL_CREDITS..=MAX_TOTAL_CREDITS).contains(&credits) {
        return Err(ValidationError::CreditsOutOfRange { value: credits });
    }
    if credits % CREDIT_STEP != 0 {
        return Err(ValidationError::CreditsNotMultipleOfThree { value: credits });
    }
    Ok(SlotValue::TotalCredits(credits))
}

fn validate_user_schedules(value: &SlotValue) -> Result<SlotValue, ValidationError> {
    let SlotValue::UserSchedules(conflicts) = value else {
        return Err(mismatch(SlotId::UserSchedules, value));
    };
    Ok(SlotValue::UserSchedules(non_empty_sorted(SlotId::UserSchedules, conflicts)?))
}

fn validate_fields(value: &SlotValue) -> Result<SlotValue, ValidationError> {
    let SlotValue::Fields(fields) = value else {
        return Err(mismatch(SlotId::Fields, value));
    };
    Ok(SlotValue::Fields(non_empty_sorted(SlotId::Fields, fields)?))
}

fn validate_formats(value: &SlotValue) -> Result<SlotValue, ValidationError> {
    let SlotValue::Formats(formats) = value else {
        return Err(mismatch(SlotId::Formats, value));
    };
    Ok(SlotValue::Formats(non_empty_sorted(SlotId::Formats, formats)?))
}

fn validate_semester(value: &SlotValue) -> Result<SlotValue, ValidationError> {
    match value {
        SlotValue::Semester(semester) => Ok(SlotValue::Semester(*semester)),
        other => Err(mismatch(SlotId::Semester, other)),
    }
}

fn non_empty_sorted<T>(slot: SlotId, entries: &[T]) -> Result<Vec<T>, ValidationError>
where
    T: Clone + Ord,
{
    if entries.is_empty() {
        return Err(ValidationError::EmptySelection { slot });
    }
    let mut sorted = entries.to_vec();
    sorted.sort();
    sorted.dedup();
    Ok(sorted)
}

fn mismatch(expected: SlotId, value: &SlotValue) -> ValidationError {
    ValidationError::SlotMismatch { expected, found: value.slot() }
}
