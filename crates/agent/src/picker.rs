//! Course picker: the recommendation gateway shipped with the adviser.
//!
//! A plan is built in three stages. Courses matching both the field and the format
//! preference seed the plan up to half of the requested credits, courses matching either
//! preference fill it further, and a bounded depth-first search completes it to the exact
//! credit total. Every attempt uses its own seeded shuffle so repeated requests with the
//! same seed return the same plans.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use adviser_core::config::CatalogConfig;
use adviser_core::{
    CourseFormat, CoursePlan, CourseRecord, Field, FilledSlots, GatewayError, Preference,
    RecommendationGateway, RecommendationResult, ScheduleConflict, Semester, Weekday,
};

const EMBEDDED_CATALOG: &str = include_str!("../data/courses.json");
const SEED_STAGE_MIN_CREDITS: u32 = 3;
const SEED_STAGE_SHUFFLES: usize = 10;
const DEFAULT_NODE_BUDGET: usize = 20_000;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read course catalog `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse course catalog: {0}")]
    Parse(String),
    #[error("invalid course catalog: {0}")]
    Invalid(String),
}

/// Minutes since midnight, written as `HH:MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u32);

impl ClockTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self(hour * 60 + minute))
    }

    pub fn minutes(self) -> u32 {
        self.0
    }
}

impl TryFrom<String> for ClockTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let invalid = || format!("invalid clock time `{value}`, expected HH:MM");
        let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse::<u32>().map_err(|_| invalid())?;
        let minute = minute.parse::<u32>().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub day: Weekday,
    pub start: ClockTime,
    pub end: ClockTime,
}

impl Meeting {
    fn week_window(&self) -> (u32, u32) {
        let offset = self.day.week_offset();
        (offset + self.start.minutes(), offset + self.end.minutes())
    }

    pub fn overlaps(&self, other: &Meeting) -> bool {
        windows_overlap(self.week_window(), other.week_window())
    }

    pub fn collides_with(&self, conflict: &ScheduleConflict) -> bool {
        windows_overlap(self.week_window(), conflict.week_window())
    }
}

impl fmt::Display for Meeting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = self.day.label();
        write!(f, "{} {}-{}", day.get(..3).unwrap_or(day), self.start, self.end)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub name: String,
    pub credits: u32,
    pub semester: Semester,
    pub fields: Vec<Field>,
    pub format: CourseFormat,
    pub meetings: Vec<Meeting>,
}

impl Course {
    pub fn conflicts_with(&self, other: &Course) -> bool {
        self.meetings
            .iter()
            .any(|meeting| other.meetings.iter().any(|theirs| meeting.overlaps(theirs)))
    }

    fn blocked_by(&self, schedules: &Preference<Vec<ScheduleConflict>>) -> bool {
        let Preference::Only(conflicts) = schedules else {
            return false;
        };
        self.meetings
            .iter()
            .any(|meeting| conflicts.iter().any(|conflict| meeting.collides_with(conflict)))
    }

    fn matches_field(&self, fields: &Preference<Vec<Field>>) -> bool {
        match fields {
            Preference::DontCare => false,
            Preference::Only(fields) => self.fields.iter().any(|field| fields.contains(field)),
        }
    }

    fn matches_format(&self, formats: &Preference<Vec<CourseFormat>>) -> bool {
        match formats {
            Preference::DontCare => false,
            Preference::Only(formats) => formats.contains(&self.format),
        }
    }

    pub fn to_record(&self) -> CourseRecord {
        CourseRecord {
            name: self.name.clone(),
            credits: self.credits,
            meetings: self.meetings.iter().map(Meeting::to_string).collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseCatalog {
    courses: Vec<Course>,
}

impl CourseCatalog {
    pub fn new(courses: Vec<Course>) -> Result<Self, CatalogError> {
        let catalog = Self { courses };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Self =
            serde_json::from_str(raw).map_err(|error| CatalogError::Parse(error.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| CatalogError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&raw)
    }

    /// The sample catalog compiled into the binary.
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_json_str(EMBEDDED_CATALOG)
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        match &config.courses_path {
            Some(path) => Self::load(path),
            None => Self::embedded(),
        }
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    pub fn count_for(&self, semester: Semester) -> usize {
        self.courses.iter().filter(|course| course.semester == semester).count()
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut names = BTreeSet::new();
        for course in &self.courses {
            let name = course.name.trim();
            if name.is_empty() {
                return Err(CatalogError::Invalid("course name must not be empty".to_string()));
            }
            if !names.insert(name.to_ascii_lowercase()) {
                return Err(CatalogError::Invalid(format!("duplicate course `{name}`")));
            }
            if course.credits == 0 {
                return Err(CatalogError::Invalid(format!("course `{name}` has zero credits")));
            }
            if course.fields.is_empty() {
                return Err(CatalogError::Invalid(format!("course `{name}` lists no field")));
            }
            if course.meetings.is_empty() {
                return Err(CatalogError::Invalid(format!("course `{name}` has no meetings")));
            }
            if let Some(meeting) = course.meetings.iter().find(|meeting| meeting.start >= meeting.end)
            {
                return Err(CatalogError::Invalid(format!(
                    "course `{name}` has a meeting ending before it starts ({meeting})"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PickerSettings {
    pub max_plans: usize,
    pub search_attempts: u32,
    pub seed: u64,
    /// Upper bound on nodes visited by the exact-credit search of one attempt.
    pub node_budget: usize,
}

impl Default for PickerSettings {
    fn default() -> Self {
        Self { max_plans: 3, search_attempts: 3, seed: 2020, node_budget: DEFAULT_NODE_BUDGET }
    }
}

impl PickerSettings {
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            max_plans: config.max_plans,
            search_attempts: config.search_attempts,
            seed: config.seed,
            node_budget: DEFAULT_NODE_BUDGET,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CoursePicker {
    catalog: CourseCatalog,
    settings: PickerSettings,
}

impl CoursePicker {
    pub fn new(catalog: CourseCatalog, settings: PickerSettings) -> Self {
        Self { catalog, settings }
    }

    pub fn catalog(&self) -> &CourseCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> PickerSettings {
        self.settings
    }

    pub fn pick(&self, slots: &FilledSlots) -> RecommendationResult {
        if slots.total_credits == 0 {
            return RecommendationResult::empty();
        }

        let candidates: Vec<&Course> = self
            .catalog
            .courses
            .iter()
            .filter(|course| course.semester == slots.semester)
            .filter(|course| course.credits <= slots.total_credits)
            .filter(|course| !course.blocked_by(&slots.user_schedules))
            .collect();

        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let mut seen = BTreeSet::new();
        let mut plans = Vec::new();
        for _ in 0..self.settings.search_attempts {
            if plans.len() >= self.settings.max_plans {
                break;
            }
            let Some(plan) = self.attempt(&candidates, slots, &mut rng) else {
                continue;
            };
            let mut names: Vec<&str> = plan.iter().map(|course| course.name.as_str()).collect();
            names.sort_unstable();
            if seen.insert(names) {
                plans.push(CoursePlan::new(plan.iter().map(|course| course.to_record()).collect()));
            }
        }

        tracing::debug!(
            event_name = "picker.plans_built",
            semester = slots.semester.as_str(),
            total_credits = slots.total_credits,
            candidates = candidates.len(),
            plans = plans.len(),
            "course picker finished"
        );
        RecommendationResult::new(plans)
    }

    fn attempt<'a>(
        &self,
        candidates: &[&'a Course],
        slots: &FilledSlots,
        rng: &mut StdRng,
    ) -> Option<Vec<&'a Course>> {
        let total = slots.total_credits;
        let matching_both: Vec<&Course> = candidates
            .iter()
            .copied()
            .filter(|course| {
                course.matches_field(&slots.fields) && course.matches_format(&slots.formats)
            })
            .collect();

        let seed_target = SEED_STAGE_MIN_CREDITS.max(total / 2).min(total);
        let mut chosen = best_greedy(&matching_both, seed_target, rng);

        let mut matching_either: Vec<&Course> = candidates
            .iter()
            .copied()
            .filter(|course| {
                course.matches_field(&slots.fields) || course.matches_format(&slots.formats)
            })
            .filter(|course| !contains(&chosen, course))
            .collect();
        matching_either.shuffle(rng);
        let remaining = total.saturating_sub(credits_of(&chosen));
        let extension = greedy(&matching_either, remaining, &chosen);
        chosen.extend(extension);

        let mut rest: Vec<&Course> =
            candidates.iter().copied().filter(|course| !contains(&chosen, course)).collect();
        rest.shuffle(rng);
        let remaining = total.saturating_sub(credits_of(&chosen));
        let mut budget = self.settings.node_budget;
        complete_exactly(&rest, 0, remaining, &mut chosen, &mut budget).then_some(chosen)
    }
}

#[async_trait]
impl RecommendationGateway for CoursePicker {
    async fn recommend(&self, slots: &FilledSlots) -> Result<RecommendationResult, GatewayError> {
        if self.catalog.is_empty() {
            return Err(GatewayError::Unavailable("course catalog is empty".to_string()));
        }
        Ok(self.pick(slots))
    }
}

fn windows_overlap(left: (u32, u32), right: (u32, u32)) -> bool {
    left.0 < right.1 && right.0 < left.1
}

fn contains(chosen: &[&Course], course: &Course) -> bool {
    chosen.iter().any(|picked| picked.name == course.name)
}

fn credits_of(courses: &[&Course]) -> u32 {
    courses.iter().map(|course| course.credits).sum()
}

/// Takes courses in pool order while they fit the remaining credits and the timetable.
fn greedy<'a>(pool: &[&'a Course], target: u32, fixed: &[&Course]) -> Vec<&'a Course> {
    let mut picked: Vec<&'a Course> = Vec::new();
    let mut remaining = target;
    for course in pool {
        if course.credits > remaining {
            continue;
        }
        let clashes = fixed.iter().chain(picked.iter()).any(|other| other.conflicts_with(course));
        if clashes {
            continue;
        }
        remaining -= course.credits;
        picked.push(*course);
        if remaining == 0 {
            break;
        }
    }
    picked
}

fn best_greedy<'a>(pool: &[&'a Course], target: u32, rng: &mut StdRng) -> Vec<&'a Course> {
    if pool.is_empty() {
        return Vec::new();
    }
    let mut shuffled = pool.to_vec();
    let mut best: Vec<&'a Course> = Vec::new();
    for _ in 0..SEED_STAGE_SHUFFLES {
        shuffled.shuffle(rng);
        let picked = greedy(&shuffled, target, &[]);
        if credits_of(&picked) > credits_of(&best) {
            best = picked;
        }
        if credits_of(&best) == target {
            break;
        }
    }
    best
}

fn complete_exactly<'a>(
    pool: &[&'a Course],
    start: usize,
    target: u32,
    chosen: &mut Vec<&'a Course>,
    budget: &mut usize,
) -> bool {
    if target == 0 {
        return true;
    }
    for index in start..pool.len() {
        if *budget == 0 {
            return false;
        }
        *budget -= 1;

        let course = pool[index];
        if course.credits > target || chosen.iter().any(|picked| picked.conflicts_with(course)) {
            continue;
        }
        chosen.push(course);
        if complete_exactly(pool, index + 1, target - course.credits, chosen, budget) {
            return true;
        }
        chosen.pop();
    }
    false
}
