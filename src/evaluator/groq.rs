//! OpenAI-compatible chat completions evaluator (Groq by default)
//!
//! Supports a backup API key: when the active key reports a quota or rate-limit
//! error, the client switches to the backup key once and retries the call.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Evaluator, EvaluatorError, FreeTextScore, is_quota_message};
use crate::domain::Question;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default model
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Configuration for the Groq client
#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub timeout: Duration,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(60),
        }
    }
}

impl GroqConfig {
    /// Create a new config with a specific model
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Groq API client with primary/backup key failover
pub struct GroqEvaluator {
    client: Client,
    primary_key: String,
    backup_key: Option<String>,
    using_backup: AtomicBool,
    config: GroqConfig,
}

impl GroqEvaluator {
    /// Create a client reading keys from the named environment variables
    pub fn from_env(
        primary_env: &str,
        backup_env: Option<&str>,
        config: GroqConfig,
    ) -> Result<Self, EvaluatorError> {
        let primary = std::env::var(primary_env).map_err(|_| EvaluatorError::MissingApiKey {
            env_var: primary_env.to_string(),
        })?;
        let backup = backup_env
            .and_then(|name| std::env::var(name).ok())
            .filter(|k| !k.is_empty());

        Self::with_api_keys(primary, backup, config)
    }

    /// Create a client with explicit keys
    pub fn with_api_keys(
        primary_key: String,
        backup_key: Option<String>,
        config: GroqConfig,
    ) -> Result<Self, EvaluatorError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        if backup_key.is_some() {
            tracing::info!(model = %config.model, "Evaluator configured with backup API key");
        } else {
            tracing::info!(model = %config.model, "Evaluator configured with a single API key");
        }

        Ok(Self {
            client,
            primary_key,
            backup_key,
            using_backup: AtomicBool::new(false),
            config,
        })
    }

    pub fn is_using_backup(&self) -> bool {
        self.using_backup.load(Ordering::SeqCst)
    }

    fn active_key(&self) -> &str {
        match (&self.backup_key, self.is_using_backup()) {
            (Some(backup), true) => backup,
            _ => &self.primary_key,
        }
    }

    /// Switch to the backup key; false if there is none or it is already active
    fn switch_to_backup(&self) -> bool {
        if self.backup_key.is_none() {
            tracing::warn!("No backup API key configured, cannot fail over");
            return false;
        }
        let switched = !self.using_backup.swap(true, Ordering::SeqCst);
        if switched {
            tracing::warn!("Switched evaluator to backup API key");
        }
        switched
    }

    fn build_request(&self, prompt: &str) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [{ "role": "user", "content": prompt }]
        })
    }

    async fn send_request(&self, body: &Value) -> Result<String, EvaluatorError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.active_key())
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            let message = response.text().await.unwrap_or_default();
            return Err(EvaluatorError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
                message,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if is_quota_message(&message) {
                return Err(EvaluatorError::RateLimited {
                    retry_after: Duration::ZERO,
                    message,
                });
            }
            return Err(EvaluatorError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        message_content(&text)
    }
}

/// Pull the assistant message out of a successful chat-completions body
fn message_content(body: &str) -> Result<String, EvaluatorError> {
    let body: Value = serde_json::from_str(body)
        .map_err(|e| EvaluatorError::MalformedResponse(format!("response body is not JSON: {}", e)))?;
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| EvaluatorError::MalformedResponse("response has no message content".to_string()))
}

#[async_trait]
impl Evaluator for GroqEvaluator {
    async fn evaluate_free_text(&self, question: &Question, answer: &str) -> Result<FreeTextScore, EvaluatorError> {
        let body = self.build_request(&build_prompt(question, answer));

        let content = match self.send_request(&body).await {
            Ok(content) => content,
            Err(e) if e.is_rate_limit() && self.switch_to_backup() => {
                tracing::info!(question_id = %question.id, "Retrying evaluation with backup API key");
                self.send_request(&body).await?
            }
            Err(e) => return Err(e),
        };

        let score = parse_score(&content, question.marks)?;
        tracing::debug!(
            question_id = %question.id,
            marks = score.marks_awarded,
            max_marks = question.marks,
            "Free-text answer evaluated"
        );
        Ok(score)
    }
}

impl std::fmt::Debug for GroqEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqEvaluator")
            .field("model", &self.config.model)
            .field("has_backup_key", &self.backup_key.is_some())
            .field("using_backup", &self.is_using_backup())
            .finish()
    }
}

/// Grading guidance for a section key
fn section_context(section: &str) -> &'static str {
    match section {
        "english" => "Focus on grammar, vocabulary, communication skills, and language proficiency.",
        "mathematics" => "Focus on mathematical accuracy, problem-solving approach, and correct calculations.",
        "bengali" => "Focus on Bengali language skills, grammar, and cultural understanding.",
        "general_knowledge" => "Focus on factual accuracy and breadth of knowledge.",
        "logical_reasoning" => "Focus on logical thinking, problem-solving approach, and reasoning skills.",
        s if s.starts_with("custom_") => {
            "Focus on accuracy, completeness, and professional knowledge relevant to this custom section."
        }
        _ => "Focus on technical accuracy and professional knowledge.",
    }
}

/// Render the grading prompt for one answer
pub fn build_prompt(question: &Question, answer: &str) -> String {
    let section = &question.section_type;
    format!(
        "You are an expert examiner evaluating a {section} question. {context}\n\n\
         QUESTION: {text}\n\
         QUESTION TYPE: {kind}\n\
         TOTAL MARKS: {marks}\n\
         SECTION: {section_upper}\n\n\
         EXPECTED ANSWER: {expected}\n\
         EVALUATION CRITERIA: {criteria}\n\n\
         CANDIDATE'S ANSWER: {answer}\n\n\
         Evaluate this answer and reply with JSON only:\n\
         {{\n  \"marks_awarded\": <number between 0 and {marks}>,\n  \
         \"feedback\": \"Detailed feedback explaining the marks awarded\",\n  \
         \"strengths\": \"What the candidate did well\",\n  \
         \"improvements\": \"Areas for improvement\"\n}}\n\n\
         Be fair but thorough. Consider accuracy, completeness, clarity, and relevance.",
        context = section_context(section),
        text = question.text,
        kind = question.question_type.as_str(),
        marks = question.marks,
        section_upper = section.to_uppercase(),
        expected = question.expected_answer.as_deref().unwrap_or("Not provided"),
        criteria = question
            .evaluation_criteria
            .as_deref()
            .unwrap_or("Standard evaluation criteria"),
    )
}

/// Strip markdown fences, trailing commas and surrounding chatter from a JSON reply
pub fn clean_json_response(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    let start = text.find('{').unwrap_or(0);
    let end = text.rfind('}').map(|i| i + 1).unwrap_or(text.len());
    let body = if start < end { &text[start..end] } else { text };

    strip_trailing_commas(body)
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']') | Some(',')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Parse a model reply into a score clamped to `[0, max_marks]`
pub fn parse_score(raw: &str, max_marks: f64) -> Result<FreeTextScore, EvaluatorError> {
    let cleaned = clean_json_response(raw);
    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| EvaluatorError::MalformedResponse(e.to_string()))?;

    if !value.is_object() {
        return Err(EvaluatorError::MalformedResponse("expected a JSON object".to_string()));
    }

    let marks = match &value["marks_awarded"] {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| EvaluatorError::MalformedResponse(format!("marks_awarded is not a number: {}", s)))?,
        Value::Null => 0.0,
        other => {
            return Err(EvaluatorError::MalformedResponse(format!(
                "marks_awarded has unexpected type: {}",
                other
            )));
        }
    };

    Ok(FreeTextScore {
        marks_awarded: marks.clamp(0.0, max_marks.max(0.0)),
        feedback: value["feedback"]
            .as_str()
            .unwrap_or("Evaluation completed")
            .to_string(),
        strengths: text_list(&value["strengths"]),
        improvements: text_list(&value["improvements"]),
    })
}

/// Accept either a string or a list of strings
fn text_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
