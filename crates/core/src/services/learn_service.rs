use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::info;

use crate::errors::CoreError;
use crate::models::lesson::{Lesson, ProgressEntry, QuizQuestion, QuizResult, QuizScore};
use crate::models::settings::Settings;
use crate::storage::manager::StorageManager;

use super::lesson_catalog;

/// Feedback on one answered question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFeedback {
    pub correct: bool,
    pub correct_index: usize,
    pub explanation: Option<String>,
}

impl AnswerFeedback {
    #[must_use]
    pub fn message(&self) -> String {
        if self.correct {
            "✅ Correct!".to_string()
        } else {
            format!("❌ Wrong. {}", self.explanation.as_deref().unwrap_or_default())
                .trim_end()
                .to_string()
        }
    }
}

/// One pass through a random subset of a lesson's questions.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizAttempt {
    lesson_id: u32,
    questions: Vec<QuizQuestion>,
    results: Vec<QuizResult>,
}

impl QuizAttempt {
    #[must_use]
    pub fn lesson_id(&self) -> u32 {
        self.lesson_id
    }

    #[must_use]
    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    #[must_use]
    pub fn results(&self) -> &[QuizResult] {
        &self.results
    }

    /// The question awaiting an answer, `None` once finished.
    #[must_use]
    pub fn current(&self) -> Option<&QuizQuestion> {
        self.questions.get(self.results.len())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.results.len() >= self.questions.len()
    }

    /// Answer the current question with the option at `choice`.
    pub fn answer(&mut self, choice: usize) -> Result<AnswerFeedback, CoreError> {
        let question = self.current().ok_or_else(|| {
            CoreError::ValidationError("All questions of this attempt are answered".into())
        })?;
        if choice >= question.options.len() {
            return Err(CoreError::ValidationError(format!(
                "Choice {} is out of range (question has {} options)",
                choice,
                question.options.len()
            )));
        }

        let correct = choice == question.correct_index;
        let feedback = AnswerFeedback {
            correct,
            correct_index: question.correct_index,
            explanation: question.explanation.clone(),
        };
        self.results.push(QuizResult {
            question_id: question.id.clone(),
            correct,
            chosen: choice,
        });
        Ok(feedback)
    }

    /// Score over the questions answered so far.
    #[must_use]
    pub fn score(&self) -> QuizScore {
        let correct = self.results.iter().filter(|r| r.correct).count();
        QuizScore::new(correct, self.results.len())
    }
}

/// Lessons, quizzes and locally persisted progress.
pub struct LearnService {
    storage: StorageManager,
    settings: Arc<Settings>,
}

impl LearnService {
    pub fn new(storage: StorageManager, settings: Arc<Settings>) -> Self {
        Self { storage, settings }
    }

    #[must_use]
    pub fn lessons(&self) -> &'static [Lesson] {
        lesson_catalog::lessons()
    }

    pub fn lesson(&self, lesson_id: u32) -> Result<&'static Lesson, CoreError> {
        lesson_catalog::lesson(lesson_id).ok_or(CoreError::LessonNotFound(lesson_id))
    }

    /// Shuffle the lesson's pool (Fisher–Yates) and take the first
    /// `quiz_questions_per_attempt` questions.
    pub fn start_attempt<R: Rng + ?Sized>(&self, lesson_id: u32, rng: &mut R) -> Result<QuizAttempt, CoreError> {
        let lesson = self.lesson(lesson_id)?;
        let mut pool = lesson.quiz.clone();
        pool.shuffle(rng);
        pool.truncate(self.settings.quiz_questions_per_attempt.min(lesson.quiz.len()));
        Ok(QuizAttempt {
            lesson_id,
            questions: pool,
            results: Vec::new(),
        })
    }

    pub fn progress(&self) -> Result<Vec<ProgressEntry>, CoreError> {
        self.storage.learn_progress()
    }

    pub fn progress_for(&self, lesson_id: u32) -> Result<Option<ProgressEntry>, CoreError> {
        Ok(self
            .progress()?
            .into_iter()
            .find(|p| p.lesson_id == lesson_id))
    }

    /// Record a finished attempt's score. Does not count as completing the
    /// lesson; see [`LearnService::mark_completed`].
    pub fn record_attempt(&self, attempt: &QuizAttempt) -> Result<ProgressEntry, CoreError> {
        if !attempt.is_finished() {
            return Err(CoreError::QuizIncomplete {
                answered: attempt.results.len(),
                total: attempt.questions.len(),
            });
        }
        let score = attempt.score();
        let entry = self.update_entry(attempt.lesson_id, |e| {
            e.attempts += 1;
            e.last_score_pct = score.pct;
            e.last_attempt_at = Some(Utc::now());
        })?;
        info!(lesson_id = attempt.lesson_id, pct = score.pct, "quiz attempt recorded");
        Ok(entry)
    }

    /// Explicitly mark a lesson completed once more.
    pub fn mark_completed(&self, lesson_id: u32) -> Result<ProgressEntry, CoreError> {
        self.lesson(lesson_id)?;
        let entry = self.update_entry(lesson_id, |e| {
            e.completed_count += 1;
            e.last_attempt_at = Some(Utc::now());
        })?;
        info!(lesson_id, completed = entry.completed_count, "lesson marked completed");
        Ok(entry)
    }

    /// Share of lessons completed at least once with a last score at or
    /// above the pass mark, in percent.
    pub fn overall_progress_pct(&self) -> Result<f64, CoreError> {
        let total = self.lessons().len().max(1);
        let pass = self.settings.lesson_pass_pct;
        let passed = self
            .progress()?
            .iter()
            .filter(|p| p.last_score_pct >= pass && p.completed_count > 0)
            .count();
        Ok(100.0 * passed as f64 / total as f64)
    }

    pub fn reset_progress(&self) -> Result<(), CoreError> {
        self.storage.clear_learn_progress()
    }

    fn update_entry(&self, lesson_id: u32, f: impl FnOnce(&mut ProgressEntry)) -> Result<ProgressEntry, CoreError> {
        let mut entries = self.progress()?;
        let idx = match entries.iter().position(|p| p.lesson_id == lesson_id) {
            Some(idx) => idx,
            None => {
                entries.push(ProgressEntry::new(lesson_id));
                entries.len() - 1
            }
        };
        f(&mut entries[idx]);
        let entry = entries[idx].clone();
        self.storage.save_learn_progress(&entries)?;
        Ok(entry)
    }
}
