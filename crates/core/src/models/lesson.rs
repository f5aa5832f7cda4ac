use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Further-reading link attached to a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub title: String,
    pub href: String,
}

/// A multiple-choice question from a lesson's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    /// Unique across all lessons (e.g., "1a")
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// A lesson with its reading material and question pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: u32,
    pub title: String,
    pub content: String,
    pub links: Vec<ExternalLink>,
    pub quiz: Vec<QuizQuestion>,
}

/// Outcome of a single answered question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResult {
    pub question_id: String,
    pub correct: bool,
    pub chosen: usize,
}

/// Score of a finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizScore {
    pub correct: usize,
    pub total: usize,
    /// `round(100 * correct / total)`
    pub pct: u32,
}

impl QuizScore {
    pub fn new(correct: usize, total: usize) -> Self {
        let pct = if total == 0 {
            0
        } else {
            (100.0 * correct as f64 / total as f64).round() as u32
        };
        Self { correct, total, pct }
    }
}

/// Persisted per-lesson progress. Stored as a camelCase JSON array under
/// `learn_progress_v2`.
///
/// `completed_count` only moves on an explicit "mark as completed"; recording
/// an attempt updates the score fields alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub lesson_id: u32,
    #[serde(default)]
    pub completed_count: u32,
    #[serde(default)]
    pub last_score_pct: u32,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ProgressEntry {
    pub fn new(lesson_id: u32) -> Self {
        Self {
            lesson_id,
            completed_count: 0,
            last_score_pct: 0,
            attempts: 0,
            last_attempt_at: None,
        }
    }
}
