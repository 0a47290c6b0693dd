use serde::Serialize;

use crate::registry::ValidatedAnswer;
use crate::slots::{
    CourseFormat, Field, Preference, ScheduleConflict, Semester, SlotAnswer, SlotId, SlotValue,
};

/// Per-conversation slot values. Only registry-validated answers can be stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SlotStateStore {
    values: [Option<ValidatedAnswer>; 5],
}

impl SlotStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: SlotId) -> Option<&SlotAnswer> {
        self.values[slot.index()].as_ref().map(ValidatedAnswer::answer)
    }

    pub fn is_filled(&self, slot: SlotId) -> bool {
        self.values[slot.index()].is_some()
    }

    /// Stores the answer under its slot, replacing any earlier value.
    pub fn fill(&mut self, answer: ValidatedAnswer) {
        let index = answer.slot().index();
        self.values[index] = Some(answer);
    }

    /// Highest-priority slot without a value.
    pub fn next_unfilled(&self) -> Option<SlotId> {
        SlotId::PRIORITY.into_iter().find(|slot| !self.is_filled(*slot))
    }

    pub fn is_complete(&self) -> bool {
        self.next_unfilled().is_none()
    }

    pub fn unset_slots(&self) -> Vec<SlotId> {
        SlotId::PRIORITY.into_iter().filter(|slot| !self.is_filled(*slot)).collect()
    }

    pub fn filled_count(&self) -> usize {
        self.values.iter().filter(|value| value.is_some()).count()
    }

    pub fn reset(&mut self) {
        self.values = Default::default();
    }

    /// Typed snapshot of a complete store, or `None` while any slot is unset.
    pub fn filled_slots(&self) -> Option<FilledSlots> {
        let total_credits = match self.get(SlotId::TotalCredits)? {
            SlotAnswer::Value(SlotValue::TotalCredits(credits)) => u32::try_from(*credits).ok()?,
            _ => return None,
        };
        let user_schedules = match self.get(SlotId::UserSchedules)? {
            SlotAnswer::DontCare => Preference::DontCare,
            SlotAnswer::Value(SlotValue::UserSchedules(conflicts)) => {
                Preference::Only(conflicts.clone())
            }
            _ => return None,
        };
        let fields = match self.get(SlotId::Fields)? {
            SlotAnswer::DontCare => Preference::DontCare,
            SlotAnswer::Value(SlotValue::Fields(fields)) => Preference::Only(fields.clone()),
            _ => return None,
        };
        let formats = match self.get(SlotId::Formats)? {
            SlotAnswer::DontCare => Preference::DontCare,
            SlotAnswer::Value(SlotValue::Formats(formats)) => Preference::Only(formats.clone()),
            _ => return None,
        };
        let semester = match self.get(SlotId::Semester)? {
            SlotAnswer::Value(SlotValue::Semester(semester)) => *semester,
            _ => return None,
        };

        Some(FilledSlots { total_credits, user_schedules, fields, formats, semester })
    }
}

/// Everything the recommendation gateway needs, with each slot in its final typed form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FilledSlots {
    pub total_credits: u32,
    pub user_schedules: Preference<Vec<ScheduleConflict>>,
    pub fields: Preference<Vec<Field>>,
    pub formats: Preference<Vec<CourseFormat>>,
    pub semester: Semester,
}
