//! Slot identifiers and the typed value domain of each slot.
//!
//! Parsing helpers in this module are case-insensitive and accept the common
//! abbreviations students use ("thur", "cv", "nlp", "ws"). They never decide whether a
//! value is acceptable; that is the job of the validators in `registry`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::registry::RegistryError;

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotId {
    TotalCredits,
    UserSchedules,
    Fields,
    Formats,
    Semester,
}

impl SlotId {
    /// Elicitation order. The policy always asks for the first entry that is still unset.
    pub const PRIORITY: [SlotId; 5] =
        [Self::TotalCredits, Self::UserSchedules, Self::Fields, Self::Formats, Self::Semester];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalCredits => "total_credits",
            Self::UserSchedules => "user_schedules",
            Self::Fields => "fields",
            Self::Formats => "formats",
            Self::Semester => "semester",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::TotalCredits => 0,
            Self::UserSchedules => 1,
            Self::Fields => 2,
            Self::Formats => 3,
            Self::Semester => 4,
        }
    }

    pub fn first() -> Self {
        Self::PRIORITY[0]
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotId {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .into_iter()
            .find(|slot| slot.as_str() == value.trim())
            .ok_or_else(|| RegistryError::UnknownSlot(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
            Self::Saturday => "Saturday",
            Self::Sunday => "Sunday",
        }
    }

    pub fn parse_mention(token: &str) -> Option<Self> {
        let normalized = token.trim().trim_end_matches('.').to_ascii_lowercase();
        let day = match normalized.as_str() {
            "mon" | "monday" | "mondays" => Self::Monday,
            "tue" | "tues" | "tuesday" | "tuesdays" => Self::Tuesday,
            "wed" | "weds" | "wednesday" | "wednesdays" => Self::Wednesday,
            "thu" | "thur" | "thurs" | "thursday" | "thursdays" => Self::Thursday,
            "fri" | "friday" | "fridays" => Self::Friday,
            "sat" | "saturday" | "saturdays" => Self::Saturday,
            "sun" | "sunday" | "sundays" => Self::Sunday,
            _ => return None,
        };
        Some(day)
    }

    /// Minute of the week at which this day starts (Monday 00:00 is zero).
    pub fn week_offset(self) -> u32 {
        let position = Self::ALL.iter().position(|day| *day == self).unwrap_or_default();
        position as u32 * MINUTES_PER_DAY
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl PartOfDay {
    pub const ALL: [PartOfDay; 3] = [Self::Morning, Self::Afternoon, Self::Evening];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }

    pub fn parse_mention(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "morning" | "mornings" => Some(Self::Morning),
            "afternoon" | "afternoons" | "noon" => Some(Self::Afternoon),
            "evening" | "evenings" | "night" | "nights" => Some(Self::Evening),
            _ => None,
        }
    }

    /// Minutes since midnight, half-open `[start, end)`.
    pub fn window(&self) -> (u32, u32) {
        match self {
            Self::Morning => (8 * 60, 12 * 60),
            Self::Afternoon => (12 * 60, 17 * 60),
            Self::Evening => (17 * 60, 22 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleConflict {
    pub day: Weekday,
    pub part: PartOfDay,
}

impl ScheduleConflict {
    pub fn new(day: Weekday, part: PartOfDay) -> Self {
        Self { day, part }
    }

    pub fn week_window(&self) -> (u32, u32) {
        let offset = self.day.week_offset();
        let (start, end) = self.part.window();
        (offset + start, offset + end)
    }
}

impl fmt::Display for ScheduleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.day.as_str(), self.part.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Programming,
    GeneralAi,
    Math,
    CogSci,
    Linguistics,
    Nlp,
    ComputerVision,
    Speech,
    SoftwareEngineering,
    Database,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Self::Programming,
        Self::GeneralAi,
        Self::Math,
        Self::CogSci,
        Self::Linguistics,
        Self::Nlp,
        Self::ComputerVision,
        Self::Speech,
        Self::SoftwareEngineering,
        Self::Database,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Programming => "Programming",
            Self::GeneralAi => "general AI",
            Self::Math => "Math",
            Self::CogSci => "CogSci",
            Self::Linguistics => "Linguistics",
            Self::Nlp => "NLP",
            Self::ComputerVision => "CV",
            Self::Speech => "Speech",
            Self::SoftwareEngineering => "Software Engineering",
            Self::Database => "Database",
        }
    }

    /// Lowercase names and abbreviations accepted for this field, longest first.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Programming => &["programming", "coding", "prog"],
            Self::GeneralAi => {
                &["general artificial intelligence", "artificial intelligence", "general ai", "ai"]
            }
            Self::Math => &["mathematics", "maths", "math"],
            Self::CogSci => &["cognitive science", "cog sci", "cogsci"],
            Self::Linguistics => &["linguistics", "ling"],
            Self::Nlp => &["natural language processing", "nlp"],
            Self::ComputerVision => &["computer vision", "vision", "cv"],
            Self::Speech => &["speech processing", "speech"],
            Self::SoftwareEngineering => &["software engineering", "swe", "se"],
            Self::Database => &["databases", "database", "dbs", "db"],
        }
    }

    pub fn parse_mention(mention: &str) -> Option<Self> {
        let normalized = normalize_mention(mention);
        Self::ALL.into_iter().find(|field| field.aliases().contains(&normalized.as_str()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseFormat {
    Lecture,
    Project,
    Seminar,
}

impl CourseFormat {
    pub const ALL: [CourseFormat; 3] = [Self::Lecture, Self::Project, Self::Seminar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lecture => "lecture",
            Self::Project => "project",
            Self::Seminar => "seminar",
        }
    }

    pub fn parse_mention(mention: &str) -> Option<Self> {
        match normalize_mention(mention).as_str() {
            "lecture" | "lectures" => Some(Self::Lecture),
            "project" | "projects" => Some(Self::Project),
            "seminar" | "seminars" => Some(Self::Seminar),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Semester {
    Winter,
    Summer,
}

impl Semester {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Winter => "winter",
            Self::Summer => "summer",
        }
    }

    pub fn parse_mention(mention: &str) -> Option<Self> {
        match normalize_mention(mention).as_str() {
            "winter" | "ws" | "winter semester" | "wintersemester" => Some(Self::Winter),
            "summer" | "ss" | "summer semester" | "sommersemester" => Some(Self::Summer),
            _ => None,
        }
    }
}

/// Structured value for one slot, as produced by an extractor and before validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "slot", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    TotalCredits(i64),
    UserSchedules(Vec<ScheduleConflict>),
    Fields(Vec<Field>),
    Formats(Vec<CourseFormat>),
    Semester(Semester),
}

impl SlotValue {
    pub fn slot(&self) -> SlotId {
        match self {
            Self::TotalCredits(_) => SlotId::TotalCredits,
            Self::UserSchedules(_) => SlotId::UserSchedules,
            Self::Fields(_) => SlotId::Fields,
            Self::Formats(_) => SlotId::Formats,
            Self::Semester(_) => SlotId::Semester,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotAnswer {
    DontCare,
    Value(SlotValue),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference<T> {
    DontCare,
    Only(T),
}

impl<T> Preference<T> {
    pub fn is_dont_care(&self) -> bool {
        matches!(self, Self::DontCare)
    }

    pub fn as_only(&self) -> Option<&T> {
        match self {
            Self::DontCare => None,
            Self::Only(value) => Some(value),
        }
    }
}

fn normalize_mention(mention: &str) -> String {
    mention
        .split(|character: char| character.is_whitespace() || character == '-' || character == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}
