use std::collections::BTreeSet;

use adviser_core::ports::{ExtractionFailure, Extractor, UserAct};
use adviser_core::session::ConversationId;
use adviser_core::slots::{
    CourseFormat, Field, PartOfDay, ScheduleConflict, Semester, SlotAnswer, SlotId, SlotValue,
    Weekday,
};
use async_trait::async_trait;

const WILDCARD_PHRASES: &[&str] = &[
    "dont care",
    "do not care",
    "doesnt matter",
    "does not matter",
    "no preference",
    "no preferences",
    "whatever",
    "anything",
    "any",
    "none",
    "nothing",
    "no",
    "either",
];

const GOODBYE_PHRASES: &[&str] = &["bye", "goodbye", "good bye", "quit", "exit", "ciao"];
const DENY_PHRASES: &[&str] =
    &["no", "nope", "nah", "no thanks", "thats all", "that is all", "im done", "stop", "enough"];
const AFFIRM_PHRASES: &[&str] = &[
    "yes", "yeah", "yep", "sure", "ok", "okay", "another", "again", "more", "continue", "please",
];

const FILLER_WORDS: &[&str] =
    &["hello", "hi", "hey", "there", "thanks", "thank", "you", "thx", "cheers", "much", "very"];

const UNITS: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];
const TENS: [(&str, i64); 5] =
    [("twenty", 20), ("thirty", 30), ("forty", 40), ("fifty", 50), ("sixty", 60)];
/// Number words past sixty. Their presence makes a spelled-out total unreadable.
const OUT_OF_RANGE_WORDS: &[&str] =
    &["seventy", "eighty", "ninety", "hundred", "hundreds", "thousand", "thousands", "million"];

/// Rule-based extractor for the five course-planning slots.
///
/// Matching works on lowercase, punctuation-free tokens. A recognised value always wins
/// over a wildcard phrase, so "any nlp course" reads as NLP rather than "don't care".
#[derive(Clone, Debug, Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, text: &str) -> UserAct {
        let tokens = tokenize(text);
        if contains_any_phrase(&tokens, GOODBYE_PHRASES) {
            UserAct::Goodbye
        } else if is_filler(&tokens) {
            UserAct::Filler
        } else if contains_any_phrase(&tokens, DENY_PHRASES) {
            UserAct::Deny
        } else if contains_any_phrase(&tokens, AFFIRM_PHRASES) {
            UserAct::Affirm
        } else {
            UserAct::Inform
        }
    }

    pub fn extract_text(&self, slot: SlotId, text: &str) -> Result<SlotAnswer, ExtractionFailure> {
        let tokens = tokenize(text);
        let value = match slot {
            SlotId::TotalCredits => extract_credits(text, &tokens),
            SlotId::UserSchedules => Ok(extract_schedules(&tokens).map(SlotValue::UserSchedules)),
            SlotId::Fields => Ok(extract_fields(&tokens).map(SlotValue::Fields)),
            SlotId::Formats => Ok(extract_formats(&tokens).map(SlotValue::Formats)),
            SlotId::Semester => extract_semester(&tokens),
        }
        .map_err(|reason| ExtractionFailure::new(slot, text, reason))?;

        match value {
            Some(value) => Ok(SlotAnswer::Value(value)),
            None if contains_any_phrase(&tokens, WILDCARD_PHRASES) => Ok(SlotAnswer::DontCare),
            None => Err(ExtractionFailure::new(slot, text, "no recognisable value")),
        }
    }
}

#[async_trait]
impl Extractor for KeywordExtractor {
    async fn classify(&self, _session: &ConversationId, raw: &str) -> UserAct {
        self.classify_text(raw)
    }

    async fn extract(
        &self,
        _session: &ConversationId,
        slot: SlotId,
        raw: &str,
    ) -> Result<SlotAnswer, ExtractionFailure> {
        self.extract_text(slot, raw)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.to_lowercase().chars() {
        if character.is_alphanumeric() {
            sanitized.push(character);
        } else if matches!(character, '\'' | '\u{2019}') {
            continue;
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(str::to_string).collect()
}

/// Only greeting or thanks words, e.g. "hello there" or "thank you very much".
fn is_filler(tokens: &[String]) -> bool {
    !tokens.is_empty() && tokens.iter().all(|token| FILLER_WORDS.contains(&token.as_str()))
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words = phrase.split(' ').collect::<Vec<_>>();
    tokens.windows(words.len()).any(|window| window.iter().zip(&words).all(|(a, b)| a == b))
}

fn contains_any_phrase(tokens: &[String], phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| contains_phrase(tokens, phrase))
}

fn extract_credits(raw: &str, tokens: &[String]) -> Result<Option<SlotValue>, String> {
    let numerals = scan_numerals(raw);
    match numerals.as_slice() {
        [] => Ok(parse_number_words(tokens)?.map(SlotValue::TotalCredits)),
        [Numeral::Integer(value)] => Ok(Some(SlotValue::TotalCredits(*value))),
        [Numeral::Fraction] => Err("credits must be a whole number".to_string()),
        _ => Err("more than one number given".to_string()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Numeral {
    Integer(i64),
    Fraction,
}

fn scan_numerals(raw: &str) -> Vec<Numeral> {
    let characters = raw.chars().collect::<Vec<_>>();
    let mut numerals = Vec::new();
    let mut index = 0;

    while index < characters.len() {
        if !characters[index].is_ascii_digit() {
            index += 1;
            continue;
        }

        let negative = index > 0
            && characters[index - 1] == '-'
            && (index < 2 || !characters[index - 2].is_alphanumeric());
        let start = index;
        while index < characters.len() && characters[index].is_ascii_digit() {
            index += 1;
        }
        let digits = characters[start..index].iter().collect::<String>();

        let has_fraction = index + 1 < characters.len()
            && matches!(characters[index], '.' | ',')
            && characters[index + 1].is_ascii_digit();
        if has_fraction {
            index += 1;
            while index < characters.len() && characters[index].is_ascii_digit() {
                index += 1;
            }
            numerals.push(Numeral::Fraction);
            continue;
        }

        let magnitude = digits.parse::<i64>().unwrap_or(i64::MAX);
        numerals.push(Numeral::Integer(if negative { -magnitude } else { magnitude }));
    }

    numerals
}

fn parse_number_words(tokens: &[String]) -> Result<Option<i64>, String> {
    if let Some(word) = tokens.iter().find(|token| OUT_OF_RANGE_WORDS.contains(&token.as_str())) {
        return Err(format!("number word `{word}` is beyond sixty"));
    }

    let unit = |token: &str| UNITS.iter().position(|word| *word == token).map(|value| value as i64);
    let tens = |token: &str| TENS.iter().find(|(word, _)| *word == token).map(|(_, value)| *value);

    for (index, token) in tokens.iter().enumerate() {
        if let Some(base) = tens(token.as_str()) {
            let ones = tokens
                .get(index + 1)
                .and_then(|next| unit(next.as_str()))
                .filter(|value| (1..=9).contains(value))
                .unwrap_or(0);
            return Ok(Some(base + ones));
        }
        if let Some(value) = unit(token.as_str()) {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MentionKind {
    Day,
    Part,
}

#[derive(Default)]
struct ScheduleGroup {
    leading: Option<MentionKind>,
    last: Option<MentionKind>,
    days: Vec<Weekday>,
    parts: Vec<PartOfDay>,
}

impl ScheduleGroup {
    fn closes_on(&self, kind: MentionKind) -> bool {
        self.leading == Some(kind) && self.last.is_some_and(|last| last != kind)
    }

    fn push(&mut self, kind: MentionKind, days: &[Weekday], parts: &[PartOfDay]) {
        self.leading.get_or_insert(kind);
        self.last = Some(kind);
        self.days.extend_from_slice(days);
        self.parts.extend_from_slice(parts);
    }

    fn flush_into(&mut self, conflicts: &mut BTreeSet<ScheduleConflict>) {
        let days = if self.days.is_empty() { Weekday::ALL.to_vec() } else { self.days.clone() };
        let parts =
            if self.parts.is_empty() { PartOfDay::ALL.to_vec() } else { self.parts.clone() };
        if !self.days.is_empty() || !self.parts.is_empty() {
            for day in &days {
                for part in &parts {
                    conflicts.insert(ScheduleConflict::new(*day, *part));
                }
            }
        }
        *self = Self::default();
    }
}

/// Groups day and part-of-day mentions: "monday and tuesday mornings" is two
/// conflicts, "monday morning and friday evening" is two different ones. A bare day
/// blocks the whole day; a bare part of day blocks it on every day.
fn extract_schedules(tokens: &[String]) -> Option<Vec<ScheduleConflict>> {
    let mut conflicts = BTreeSet::new();
    let mut group = ScheduleGroup::default();
    let mut index = 0;

    while index < tokens.len() {
        let (kind, days, parts, consumed) = match schedule_mention(tokens, index) {
            Some(mention) => mention,
            None => {
                index += 1;
                continue;
            }
        };
        if group.closes_on(kind) {
            group.flush_into(&mut conflicts);
        }
        group.push(kind, &days, &parts);
        index += consumed;
    }
    group.flush_into(&mut conflicts);

    (!conflicts.is_empty()).then(|| conflicts.into_iter().collect())
}

fn schedule_mention(
    tokens: &[String],
    index: usize,
) -> Option<(MentionKind, Vec<Weekday>, Vec<PartOfDay>, usize)> {
    let token = tokens[index].as_str();
    let next = tokens.get(index + 1).map(String::as_str);

    if let Some(day) = Weekday::parse_mention(token) {
        return Some((MentionKind::Day, vec![day], Vec::new(), 1));
    }
    if let Some(part) = PartOfDay::parse_mention(token) {
        return Some((MentionKind::Part, Vec::new(), vec![part], 1));
    }

    match (token, next) {
        ("weekend" | "weekends", _) => {
            Some((MentionKind::Day, vec![Weekday::Saturday, Weekday::Sunday], Vec::new(), 1))
        }
        ("weekday" | "weekdays", _) => {
            Some((MentionKind::Day, Weekday::ALL[..5].to_vec(), Vec::new(), 1))
        }
        ("every", Some("day")) => Some((MentionKind::Day, Weekday::ALL.to_vec(), Vec::new(), 2)),
        ("everyday" | "daily", _) => Some((MentionKind::Day, Weekday::ALL.to_vec(), Vec::new(), 1)),
        _ => None,
    }
}

fn extract_fields(tokens: &[String]) -> Option<Vec<Field>> {
    let mut aliases = Field::ALL
        .iter()
        .flat_map(|field| field.aliases().iter().map(move |alias| (*field, *alias)))
        .map(|(field, alias)| (field, alias.split(' ').collect::<Vec<_>>()))
        .collect::<Vec<_>>();
    aliases.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut fields = BTreeSet::new();
    let mut index = 0;
    while index < tokens.len() {
        let matched = aliases.iter().find(|(_, words)| {
            tokens.len() >= index + words.len()
                && tokens[index..index + words.len()].iter().zip(words).all(|(a, b)| a == b)
        });
        match matched {
            Some((field, words)) => {
                fields.insert(*field);
                index += words.len();
            }
            None => index += 1,
        }
    }

    (!fields.is_empty()).then(|| fields.into_iter().collect())
}

fn extract_formats(tokens: &[String]) -> Option<Vec<CourseFormat>> {
    let formats =
        tokens.iter().filter_map(|token| CourseFormat::parse_mention(token)).collect::<BTreeSet<_>>();
    (!formats.is_empty()).then(|| formats.into_iter().collect())
}

fn extract_semester(tokens: &[String]) -> Result<Option<SlotValue>, String> {
    let semesters =
        tokens.iter().filter_map(|token| Semester::parse_mention(token)).collect::<BTreeSet<_>>();
    match semesters.len() {
        0 => Ok(None),
        1 => Ok(semesters.into_iter().next().map(SlotValue::Semester)),
        _ => Err("both winter and summer mentioned".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use adviser_core::ports::UserAct;
    use adviser_core::slots::{
        CourseFormat, Field, PartOfDay, ScheduleConflict, Semester, SlotAnswer, SlotId, SlotValue,
        Weekday,
    };

    use super::KeywordExtractor;

    fn value(slot: SlotId, text: &str) -> SlotValue {
        match KeywordExtractor::new().extract_text(slot, text) {
            Ok(SlotAnswer::Value(value)) => value,
            other => panic!("expected a value for `{text}`, got {other:?}"),
        }
    }

    #[test]
    fn reads_credits_from_digits_and_words() {
        struct Case {
            text: &'static str,
            expected: i64,
        }

        let cases = [
            Case { text: "9", expected: 9 },
            Case { text: "I want 12 credits", expected: 12 },
            Case { text: "10", expected: 10 },
            Case { text: "-3", expected: -3 },
            Case { text: "eighteen please", expected: 18 },
            Case { text: "twenty-one credits", expected: 21 },
            Case { text: "sixty", expected: 60 },
        ];

        for case in cases {
            assert_eq!(
                value(SlotId::TotalCredits, case.text),
                SlotValue::TotalCredits(case.expected),
                "{}",
                case.text
            );
        }
    }

    #[test]
    fn unreadable_credit_answers_fail_extraction() {
        let extractor = KeywordExtractor::new();
        for text in [
            "7.5",
            "between 9 and 12",
            "lots",
            "",
            "ninety-nine",
            "eighty three credits",
            "three hundred",
            "a hundred and twenty",
            "seventy",
            "two thousand",
        ] {
            let failure = extractor
                .extract_text(SlotId::TotalCredits, text)
                .expect_err("credits should not be extracted");
            assert_eq!(failure.slot, SlotId::TotalCredits);
            assert_eq!(failure.raw, text);
        }
    }

    #[test]
    fn wildcard_phrases_become_dont_care() {
        let extractor = KeywordExtractor::new();
        for text in ["I don't care", "Doesn’t matter", "no preference", "any", "none"] {
            assert_eq!(
                extractor.extract_text(SlotId::Formats, text),
                Ok(SlotAnswer::DontCare),
                "{text}"
            );
        }
        assert_eq!(extractor.extract_text(SlotId::Semester, "don't care"), Ok(SlotAnswer::DontCare));
    }

    #[test]
    fn recognised_values_win_over_wildcards() {
        assert_eq!(value(SlotId::Fields, "any NLP course"), SlotValue::Fields(vec![Field::Nlp]));
    }

    #[test]
    fn schedules_pair_days_with_parts_of_day() {
        assert_eq!(
            value(SlotId::UserSchedules, "Monday morning and Thur. evening"),
            SlotValue::UserSchedules(vec![
                ScheduleConflict::new(Weekday::Monday, PartOfDay::Morning),
                ScheduleConflict::new(Weekday::Thursday, PartOfDay::Evening),
            ])
        );
        assert_eq!(
            value(SlotId::UserSchedules, "tue and fri afternoons"),
            SlotValue::UserSchedules(vec![
                ScheduleConflict::new(Weekday::Tuesday, PartOfDay::Afternoon),
                ScheduleConflict::new(Weekday::Friday, PartOfDay::Afternoon),
            ])
        );
        assert_eq!(
            value(SlotId::UserSchedules, "mornings on monday, evenings on wednesday"),
            SlotValue::UserSchedules(vec![
                ScheduleConflict::new(Weekday::Monday, PartOfDay::Morning),
                ScheduleConflict::new(Weekday::Wednesday, PartOfDay::Evening),
            ])
        );
    }

    #[test]
    fn bare_days_and_parts_expand() {
        let SlotValue::UserSchedules(whole_day) = value(SlotId::UserSchedules, "busy on friday")
        else {
            panic!("expected schedules");
        };
        assert_eq!(whole_day.len(), 3);
        assert!(whole_day.iter().all(|conflict| conflict.day == Weekday::Friday));

        let SlotValue::UserSchedules(evenings) = value(SlotId::UserSchedules, "evenings") else {
            panic!("expected schedules");
        };
        assert_eq!(evenings.len(), 7);

        let SlotValue::UserSchedules(weekend) = value(SlotId::UserSchedules, "the weekend")
        else {
            panic!("expected schedules");
        };
        assert_eq!(weekend.len(), 6);
    }

    #[test]
    fn no_schedule_reads_as_dont_care() {
        assert_eq!(
            KeywordExtractor::new().extract_text(SlotId::UserSchedules, "No, I'm free"),
            Ok(SlotAnswer::DontCare)
        );
    }

    #[test]
    fn fields_accept_names_and_abbreviations() {
        assert_eq!(
            value(SlotId::Fields, "Computer Vision, NLP and some cog sci"),
            SlotValue::Fields(vec![Field::CogSci, Field::Nlp, Field::ComputerVision])
        );
        assert_eq!(
            value(SlotId::Fields, "general AI"),
            SlotValue::Fields(vec![Field::GeneralAi])
        );
        assert!(KeywordExtractor::new().extract_text(SlotId::Fields, "astrology").is_err());
    }

    #[test]
    fn formats_and_semesters() {
        assert_eq!(
            value(SlotId::Formats, "Seminars or a project"),
            SlotValue::Formats(vec![CourseFormat::Project, CourseFormat::Seminar])
        );
        assert_eq!(value(SlotId::Semester, "the WS please"), SlotValue::Semester(Semester::Winter));
        assert_eq!(value(SlotId::Semester, "Summer"), SlotValue::Semester(Semester::Summer));
        assert!(KeywordExtractor::new()
            .extract_text(SlotId::Semester, "winter or summer")
            .is_err());
        assert!(KeywordExtractor::new().extract_text(SlotId::Semester, "spring").is_err());
    }

    #[test]
    fn classifies_dialogue_acts() {
        let extractor = KeywordExtractor::new();
        assert_eq!(extractor.classify_text("ok bye"), UserAct::Goodbye);
        assert_eq!(extractor.classify_text("No thanks, that's all"), UserAct::Deny);
        assert_eq!(extractor.classify_text("no more"), UserAct::Deny);
        assert_eq!(extractor.classify_text("Yes, another round"), UserAct::Affirm);
        assert_eq!(extractor.classify_text("9 credits"), UserAct::Inform);
        assert_eq!(extractor.classify_text("Hello!"), UserAct::Filler);
        assert_eq!(extractor.classify_text("thank you very much"), UserAct::Filler);
        assert_eq!(extractor.classify_text("thanks, bye"), UserAct::Goodbye);
        assert_eq!(extractor.classify_text("hi, nlp please"), UserAct::Affirm);
    }
}
