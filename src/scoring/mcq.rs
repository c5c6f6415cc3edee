//! Local multiple-choice scoring with negative marking

use std::collections::BTreeSet;

use crate::domain::{AnswerValue, NegativeMarkingConfig, Question, QuestionResult, ScoringMode, SectionPenalty};

const NO_ANSWER: &str = "No answer";
const NO_EXPLANATION: &str = "No explanation provided";

/// Score one MCQ against the submitted answer (`None` when the question was skipped)
pub fn score_mcq(
    question: &Question,
    answer: Option<&AnswerValue>,
    penalties: &NegativeMarkingConfig,
    mode: ScoringMode,
) -> QuestionResult {
    let penalty = penalties.get(&question.section_type).filter(|p| p.enabled);

    let mut result = QuestionResult::new(&question.id, question.question_type.as_str(), question.marks);
    result.feedback = question
        .explanation
        .clone()
        .unwrap_or_else(|| NO_EXPLANATION.to_string());

    if question.is_multi_select {
        let selections = answer.map(AnswerValue::selections).unwrap_or_default();
        score_multi_select(question, &selections, penalty, mode, &mut result);
        result.selected_option = Some(multi_select_text(question, &selections));
    } else {
        let selected = answer.and_then(AnswerValue::single_index);
        score_single_select(question, selected, penalty, &mut result);
        result.selected_option = Some(
            selected
                .and_then(|idx| question.options.get(idx).cloned())
                .unwrap_or_else(|| NO_ANSWER.to_string()),
        );
    }

    result
}

fn score_single_select(
    question: &Question,
    selected: Option<usize>,
    penalty: Option<&SectionPenalty>,
    result: &mut QuestionResult,
) {
    match selected {
        Some(idx) => {
            let correct = question.correct_answer == Some(idx);
            result.is_correct = Some(correct);
            if correct {
                result.marks_obtained = question.marks;
            } else if let Some(p) = penalty {
                result.negative_marks_applied = p.penalty_per_wrong;
            }
        }
        None => {
            result.is_correct = Some(false);
            result.negative_marks_applied = unanswered_penalty(penalty);
        }
    }
}

fn score_multi_select(
    question: &Question,
    selections: &BTreeSet<usize>,
    penalty: Option<&SectionPenalty>,
    mode: ScoringMode,
    result: &mut QuestionResult,
) {
    let correct: BTreeSet<usize> = question.correct_answers.iter().copied().collect();
    result.is_correct = Some(false);

    if selections.is_empty() {
        result.negative_marks_applied = unanswered_penalty(penalty);
        return;
    }

    if *selections == correct {
        result.is_correct = Some(true);
        result.marks_obtained = question.marks;
        return;
    }

    let hits = selections.intersection(&correct).count();
    let misses = selections.difference(&correct).count();

    if mode == ScoringMode::Partial && hits > misses {
        let ratio = (hits - misses) as f64 / correct.len() as f64;
        result.marks_obtained = round2(question.marks * ratio).max(0.0);
    }

    if misses > 0
        && let Some(p) = penalty
    {
        result.negative_marks_applied = p.penalty_per_wrong * misses as f64;
    }
}

fn unanswered_penalty(penalty: Option<&SectionPenalty>) -> f64 {
    match penalty {
        Some(p) if p.apply_to_unanswered => p.penalty_per_wrong,
        _ => 0.0,
    }
}

/// "A) first; C) third" for the options the candidate picked
fn multi_select_text(question: &Question, selections: &BTreeSet<usize>) -> String {
    let picked: Vec<String> = selections
        .iter()
        .filter_map(|&idx| {
            let option = question.options.get(idx)?;
            let letter = char::from(b'A' + (idx % 26) as u8);
            Some(format!("{}) {}", letter, option))
        })
        .collect();

    if picked.is_empty() {
        NO_ANSWER.to_string()
    } else {
        picked.join("; ")
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
