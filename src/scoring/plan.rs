//! Per-task dispatch plan

use crate::domain::Question;

/// How a task's questions get scored, decided once per task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringPlan {
    /// Every question is an MCQ; no evaluator or rate limiter involved
    ObjectiveOnly,
    /// At least one free-text question; holds their indices in question order
    Mixed { free_text: Vec<usize> },
}

impl ScoringPlan {
    pub fn for_questions(questions: &[Question]) -> Self {
        let free_text: Vec<usize> = questions
            .iter()
            .enumerate()
            .filter(|(_, q)| q.question_type.is_free_text())
            .map(|(i, _)| i)
            .collect();

        if free_text.is_empty() {
            ScoringPlan::ObjectiveOnly
        } else {
            ScoringPlan::Mixed { free_text }
        }
    }

    pub fn needs_evaluator(&self) -> bool {
        matches!(self, ScoringPlan::Mixed { .. })
    }

    pub fn free_text_count(&self) -> usize {
        match self {
            ScoringPlan::ObjectiveOnly => 0,
            ScoringPlan::Mixed { free_text } => free_text.len(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScoringPlan::ObjectiveOnly => "objective_only",
            ScoringPlan::Mixed { .. } => "mixed",
        }
    }
}
