//! Score breakdown types produced by a finished evaluation.

use serde::{Deserialize, Serialize};

/// Overall performance band derived from the percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Average,
    Poor,
}

impl PerformanceLevel {
    /// Bands at 85, 70 and 50 percent
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 85.0 {
            PerformanceLevel::Excellent
        } else if percentage >= 70.0 {
            PerformanceLevel::Good
        } else if percentage >= 50.0 {
            PerformanceLevel::Average
        } else {
            PerformanceLevel::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceLevel::Excellent => "Excellent",
            PerformanceLevel::Good => "Good",
            PerformanceLevel::Average => "Average",
            PerformanceLevel::Poor => "Poor",
        }
    }
}

/// Scoring result for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub question_type: String,
    pub marks_total: f64,
    pub marks_obtained: f64,
    pub negative_marks_applied: f64,
    /// Only meaningful for MCQs
    pub is_correct: Option<bool>,
    pub feedback: String,
    /// Option text(s) the candidate picked, MCQ only
    pub selected_option: Option<String>,
    pub ai_evaluated: bool,
    pub needs_manual_review: bool,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl QuestionResult {
    /// Empty result for a question, zero marks obtained
    pub fn new(question_id: &str, question_type: &str, marks_total: f64) -> Self {
        Self {
            question_id: question_id.to_string(),
            question_type: question_type.to_string(),
            marks_total,
            marks_obtained: 0.0,
            negative_marks_applied: 0.0,
            is_correct: None,
            feedback: String::new(),
            selected_option: None,
            ai_evaluated: false,
            needs_manual_review: false,
            strengths: Vec::new(),
            improvements: Vec::new(),
        }
    }
}

/// Full result of one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total_marks: f64,
    /// After negative marks
    pub obtained_marks: f64,
    pub negative_marks: f64,
    pub percentage: f64,
    pub question_results: Vec<QuestionResult>,
    pub overall_feedback: String,
    pub performance_level: PerformanceLevel,
}

impl ScoreBreakdown {
    /// True when any question was routed to manual review
    pub fn needs_manual_review(&self) -> bool {
        self.question_results.iter().any(|r| r.needs_manual_review)
    }

    pub fn ai_evaluated_count(&self) -> usize {
        self.question_results.iter().filter(|r| r.ai_evaluated).count()
    }
}
