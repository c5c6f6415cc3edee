//! Question snapshot and submitted answer types
//!
//! Questions are captured at submission time and never change afterwards, so
//! the queue can score a task long after the exam itself was edited.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Section used when a question does not declare one
pub const DEFAULT_SECTION: &str = "technical";

fn default_section() -> String {
    DEFAULT_SECTION.to_string()
}

/// Kind of question, which decides how it is scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Multiple choice, scored locally
    Mcq,
    /// Short free-text answer, scored by the evaluator
    Short,
    /// Long free-text answer, scored by the evaluator
    Essay,
}

impl QuestionType {
    /// Returns true for question types that need the external evaluator
    pub fn is_free_text(&self) -> bool {
        matches!(self, QuestionType::Short | QuestionType::Essay)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Mcq => "mcq",
            QuestionType::Short => "short",
            QuestionType::Essay => "essay",
        }
    }
}

/// A read-only question record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,

    #[serde(rename = "type")]
    pub question_type: QuestionType,

    /// Question text shown to the candidate
    #[serde(rename = "question", default)]
    pub text: String,

    #[serde(default)]
    pub options: Vec<String>,

    /// Correct option index for single-select MCQs
    #[serde(default)]
    pub correct_answer: Option<usize>,

    /// Correct option indices for multi-select MCQs
    #[serde(default)]
    pub correct_answers: Vec<usize>,

    #[serde(default)]
    pub is_multi_select: bool,

    pub marks: f64,

    /// Section key used for negative marking lookup
    #[serde(default = "default_section")]
    pub section_type: String,

    #[serde(default)]
    pub explanation: Option<String>,

    #[serde(default)]
    pub expected_answer: Option<String>,

    #[serde(default)]
    pub evaluation_criteria: Option<String>,
}

impl Question {
    fn base(id: &str, question_type: QuestionType, marks: f64) -> Self {
        Self {
            id: id.to_string(),
            question_type,
            text: String::new(),
            options: Vec::new(),
            correct_answer: None,
            correct_answers: Vec::new(),
            is_multi_select: false,
            marks,
            section_type: default_section(),
            explanation: None,
            expected_answer: None,
            evaluation_criteria: None,
        }
    }

    /// Create a single-select multiple choice question
    pub fn mcq(id: &str, marks: f64, correct_answer: usize) -> Self {
        Self {
            correct_answer: Some(correct_answer),
            ..Self::base(id, QuestionType::Mcq, marks)
        }
    }

    /// Create a multi-select multiple choice question
    pub fn multi_select(id: &str, marks: f64, correct_answers: Vec<usize>) -> Self {
        Self {
            correct_answers,
            is_multi_select: true,
            ..Self::base(id, QuestionType::Mcq, marks)
        }
    }

    /// Create a short-answer question
    pub fn short(id: &str, marks: f64) -> Self {
        Self::base(id, QuestionType::Short, marks)
    }

    /// Create an essay question
    pub fn essay(id: &str, marks: f64) -> Self {
        Self::base(id, QuestionType::Essay, marks)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section_type = section.into();
        self
    }

    pub fn with_expected_answer(mut self, expected: impl Into<String>) -> Self {
        self.expected_answer = Some(expected.into());
        self
    }
}

/// A submitted answer: free text / single index, or a list of selections
///
/// Numeric JSON answers (`2`, `[0, 2]`) are accepted and kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Choices(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAnswer {
    Text(String),
    Number(serde_json::Number),
    Choices(Vec<RawChoice>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChoice {
    Text(String),
    Number(serde_json::Number),
}

impl RawChoice {
    fn into_text(self) -> String {
        match self {
            RawChoice::Text(s) => s,
            RawChoice::Number(n) => n.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for AnswerValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawAnswer::deserialize(deserializer)? {
            RawAnswer::Text(s) => AnswerValue::Text(s),
            RawAnswer::Number(n) => AnswerValue::Text(n.to_string()),
            RawAnswer::Choices(items) => AnswerValue::Choices(items.into_iter().map(RawChoice::into_text).collect()),
        })
    }
}

impl AnswerValue {
    /// Answer as free text (choices are joined with ", ")
    pub fn as_text(&self) -> String {
        match self {
            AnswerValue::Text(s) => s.clone(),
            AnswerValue::Choices(items) => items.join(", "),
        }
    }

    /// True when nothing meaningful was submitted
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(s) => s.trim().is_empty(),
            AnswerValue::Choices(items) => items.iter().all(|i| i.trim().is_empty()),
        }
    }

    /// Single-select index; anything that is not a plain number counts as unanswered
    pub fn single_index(&self) -> Option<usize> {
        match self {
            AnswerValue::Text(s) if is_digits(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Multi-select indices from a list or a comma-separated string
    pub fn selections(&self) -> BTreeSet<usize> {
        match self {
            AnswerValue::Choices(items) => items.iter().filter_map(|i| parse_index(i)).collect(),
            AnswerValue::Text(s) => s.split(',').filter_map(parse_index).collect(),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<Vec<&str>> for AnswerValue {
    fn from(value: Vec<&str>) -> Self {
        AnswerValue::Choices(value.into_iter().map(str::to_string).collect())
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn parse_index(raw: &str) -> Option<usize> {
    let trimmed = raw.trim();
    if is_digits(trimmed) { trimmed.parse().ok() } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_type_free_text() {
        assert!(!QuestionType::Mcq.is_free_text());
        assert!(QuestionType::Short.is_free_text());
        assert!(QuestionType::Essay.is_free_text());
    }

    #[test]
    fn test_question_deserialize_defaults() {
        let json = r#"{"id": "q1", "type": "mcq", "question": "2+2?", "marks": 4, "correct_answer": 2}"#;
        let q: Question = serde_json::from_str(json).unwrap();
        assert_eq!(q.question_type, QuestionType::Mcq);
        assert_eq!(q.text, "2+2?");
        assert_eq!(q.correct_answer, Some(2));
        assert_eq!(q.section_type, DEFAULT_SECTION);
        assert!(!q.is_multi_select);
    }

    #[test]
    fn test_answer_value_untagged() {
        let single: AnswerValue = serde_json::from_str(r#""2""#).unwrap();
        assert_eq!(single, AnswerValue::Text("2".to_string()));

        let multi: AnswerValue = serde_json::from_str(r#"["0", "2"]"#).unwrap();
        assert_eq!(multi, AnswerValue::Choices(vec!["0".to_string(), "2".to_string()]));
    }

    #[test]
    fn test_answer_value_accepts_numbers() {
        let single: AnswerValue = serde_json::from_str("2").unwrap();
        assert_eq!(single, AnswerValue::Text("2".to_string()));
        assert_eq!(single.single_index(), Some(2));

        let multi: AnswerValue = serde_json::from_str(r#"[0, "2"]"#).unwrap();
        assert_eq!(multi.selections(), BTreeSet::from([0, 2]));

        let fractional: AnswerValue = serde_json::from_str("1.5").unwrap();
        assert_eq!(fractional.single_index(), None);

        assert!(serde_json::from_str::<AnswerValue>("true").is_err());
    }

    #[test]
    fn test_single_index() {
        assert_eq!(AnswerValue::from("3").single_index(), Some(3));
        assert_eq!(AnswerValue::from("").single_index(), None);
        assert_eq!(AnswerValue::from("abc").single_index(), None);
        assert_eq!(AnswerValue::from("-1").single_index(), None);
    }

    #[test]
    fn test_selections_from_list_and_csv() {
        let list = AnswerValue::from(vec!["0", "2", "x"]);
        assert_eq!(list.selections(), BTreeSet::from([0, 2]));

        let csv = AnswerValue::from("1, 3");
        assert_eq!(csv.selections(), BTreeSet::from([1, 3]));

        let single = AnswerValue::from("2");
        assert_eq!(single.selections(), BTreeSet::from([2]));

        assert!(AnswerValue::from("").selections().is_empty());
    }

    #[test]
    fn test_is_blank() {
        assert!(AnswerValue::from("   ").is_blank());
        assert!(AnswerValue::Choices(vec![]).is_blank());
        assert!(!AnswerValue::from("an answer").is_blank());
    }
}
