//! Scoring: local MCQ marking, per-question results for free-text answers,
//! and assembly of the final breakdown.

pub mod mcq;
pub mod plan;

pub use mcq::score_mcq;
pub use plan::ScoringPlan;

use crate::domain::{PerformanceLevel, Question, QuestionResult, ScoreBreakdown, Submission};
use crate::evaluator::FreeTextScore;

/// Result for a free-text question left blank; the evaluator is never called
pub fn blank_free_text(question: &Question) -> QuestionResult {
    let mut result = QuestionResult::new(&question.id, question.question_type.as_str(), question.marks);
    result.feedback = "No answer provided.".to_string();
    result.improvements = vec!["Answer was not provided by the candidate.".to_string()];
    result
}

/// Result for a free-text question scored by the evaluator
pub fn free_text_result(question: &Question, score: FreeTextScore) -> QuestionResult {
    let mut result = QuestionResult::new(&question.id, question.question_type.as_str(), question.marks);
    result.marks_obtained = score.marks_awarded.clamp(0.0, question.marks.max(0.0));
    result.feedback = score.feedback;
    result.strengths = score.strengths;
    result.improvements = score.improvements;
    result.ai_evaluated = true;
    result
}

/// Result for a free-text question whose evaluation came back unusable
pub fn manual_review_result(question: &Question) -> QuestionResult {
    let mut result = QuestionResult::new(&question.id, question.question_type.as_str(), question.marks);
    result.feedback =
        "AI evaluation failed (invalid response format). This answer needs manual review by admin.".to_string();
    result.improvements = vec!["Automatic evaluation failed due to a parsing error.".to_string()];
    result.needs_manual_review = true;
    result
}

/// Score every MCQ of a submission locally, in question order
///
/// Free-text questions are skipped; use with `ScoringPlan::ObjectiveOnly`.
pub fn score_objective(submission: &Submission) -> Vec<QuestionResult> {
    submission
        .questions
        .iter()
        .filter(|q| !q.question_type.is_free_text())
        .map(|q| score_local(submission, q))
        .collect()
}

/// Score one MCQ from a submission
pub fn score_local(submission: &Submission, question: &Question) -> QuestionResult {
    score_mcq(
        question,
        submission.answer_for(&question.id),
        &submission.negative_marking_config,
        submission.multi_select_scoring_mode,
    )
}

/// Sum per-question results into the final breakdown
pub fn assemble(question_results: Vec<QuestionResult>) -> ScoreBreakdown {
    let total_marks: f64 = question_results.iter().map(|r| r.marks_total).sum();
    let raw_marks: f64 = question_results.iter().map(|r| r.marks_obtained).sum();
    let negative_marks: f64 = question_results.iter().map(|r| r.negative_marks_applied).sum();

    let obtained_marks = raw_marks - negative_marks;
    let percentage = if total_marks > 0.0 {
        obtained_marks / total_marks * 100.0
    } else {
        0.0
    };

    let overall_feedback = overall_feedback(percentage, &question_results, negative_marks);

    ScoreBreakdown {
        total_marks,
        obtained_marks,
        negative_marks,
        percentage,
        question_results,
        overall_feedback,
        performance_level: PerformanceLevel::from_percentage(percentage),
    }
}

/// Candidate-facing summary sentence(s) for a result
pub fn overall_feedback(percentage: f64, results: &[QuestionResult], negative_marks: f64) -> String {
    let mut feedback = match PerformanceLevel::from_percentage(percentage) {
        PerformanceLevel::Excellent => {
            "Excellent performance! You have demonstrated strong knowledge and understanding.".to_string()
        }
        PerformanceLevel::Good => {
            "Good performance overall. You have shown solid understanding with room for improvement.".to_string()
        }
        PerformanceLevel::Average => {
            "Average performance. You have basic understanding but need to strengthen your knowledge.".to_string()
        }
        PerformanceLevel::Poor => {
            "Below average performance. Significant improvement needed in your preparation.".to_string()
        }
    };

    let mcqs: Vec<&QuestionResult> = results.iter().filter(|r| r.question_type == "mcq").collect();
    if !mcqs.is_empty() {
        let correct = mcqs.iter().filter(|r| r.is_correct == Some(true)).count();
        if (correct as f64 / mcqs.len() as f64) * 100.0 < 60.0 {
            feedback.push_str(" Focus on improving your theoretical knowledge for multiple choice questions.");
        }
    }

    if negative_marks > 0.0 {
        feedback.push_str(&format!(
            " Note: {} marks were deducted due to incorrect answers in sections with negative marking. \
             Be more careful with your responses in future exams.",
            mcq::round2(negative_marks)
        ));
    }

    feedback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ScoringMode, SectionPenalty};

    fn submission(questions: Vec<Question>) -> Submission {
        Submission::new("r1", "s1", "e1", "Ada", "c1", questions)
    }

    #[test]
    fn test_assemble_subtracts_negatives() {
        let sub = submission(vec![Question::mcq("q1", 4.0, 2), Question::mcq("q2", 4.0, 1)])
            .with_answer("q1", "2")
            .with_answer("q2", "0")
            .with_penalty("technical", SectionPenalty::per_wrong(1.0));

        let breakdown = assemble(score_objective(&sub));
        assert_eq!(breakdown.total_marks, 8.0);
        assert_eq!(breakdown.negative_marks, 1.0);
        assert_eq!(breakdown.obtained_marks, 3.0);
        assert_eq!(breakdown.percentage, 37.5);
        assert_eq!(breakdown.performance_level, PerformanceLevel::Poor);
        assert!(breakdown.overall_feedback.starts_with("Below average performance."));
        assert!(breakdown.overall_feedback.contains("Note: 1 marks were deducted"));
    }

    #[test]
    fn test_assemble_zero_total() {
        let breakdown = assemble(Vec::new());
        assert_eq!(breakdown.percentage, 0.0);
        assert_eq!(breakdown.total_marks, 0.0);
    }

    #[test]
    fn test_overall_feedback_excellent_no_hints() {
        let sub = submission(vec![Question::mcq("q1", 4.0, 2)]).with_answer("q1", "2");
        let breakdown = assemble(score_objective(&sub));
        assert_eq!(breakdown.performance_level, PerformanceLevel::Excellent);
        assert_eq!(
            breakdown.overall_feedback,
            "Excellent performance! You have demonstrated strong knowledge and understanding."
        );
    }

    #[test]
    fn test_overall_feedback_mcq_hint() {
        let mut good = QuestionResult::new("q1", "essay", 10.0);
        good.marks_obtained = 10.0;
        let wrong = QuestionResult::new("q2", "mcq", 1.0);
        let breakdown = assemble(vec![good, wrong]);
        assert_eq!(breakdown.performance_level, PerformanceLevel::Excellent);
        assert!(breakdown.overall_feedback.contains("multiple choice questions"));
    }

    #[test]
    fn test_free_text_results() {
        let q = Question::essay("q3", 10.0);

        let blank = blank_free_text(&q);
        assert_eq!(blank.marks_obtained, 0.0);
        assert_eq!(blank.feedback, "No answer provided.");
        assert!(!blank.needs_manual_review);

        let scored = free_text_result(&q, FreeTextScore::new(12.0, "over the top"));
        assert_eq!(scored.marks_obtained, 10.0);
        assert!(scored.ai_evaluated);

        let review = manual_review_result(&q);
        assert!(review.needs_manual_review);
        assert!(!review.ai_evaluated);
        assert_eq!(review.marks_obtained, 0.0);
    }

    #[test]
    fn test_score_objective_skips_free_text() {
        let sub = submission(vec![
            Question::mcq("q1", 1.0, 0),
            Question::short("q2", 2.0),
            Question::multi_select("q3", 10.0, vec![0, 2]),
        ])
        .with_answer("q1", "0")
        .with_answer("q3", vec!["0", "1"])
        .with_scoring_mode(ScoringMode::Strict);

        let results = score_objective(&sub);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].marks_obtained, 1.0);
        assert_eq!(results[1].marks_obtained, 0.0);
    }
}
