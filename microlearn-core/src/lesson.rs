use std::fmt;

use serde::{Deserialize, Serialize};

pub type LessonId = u32;

/// A quiz must reach this percentage to count as passed.
pub const PASSING_PERCENTAGE: u8 = 70;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: LessonId,
    pub title: String,
    pub description: String,
    pub content: String,
    pub duration: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
}

impl Lesson {
    /// Case-insensitive search over title, description, topics and difficulty.
    /// `needle` must already be lowercased and trimmed.
    pub fn matches(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self
                .topics
                .iter()
                .any(|topic| topic.to_lowercase().contains(needle))
            || self.difficulty.to_string().contains(needle)
    }

    /// Grades selected option indexes against this lesson's quiz. Answers past
    /// the last question are ignored.
    pub fn grade(&self, answers: &[usize]) -> QuizOutcome {
        let results: Vec<AnswerResult> = self
            .quiz
            .iter()
            .zip(answers)
            .enumerate()
            .map(|(index, (question, &answer))| AnswerResult {
                question_index: index,
                user_answer: answer,
                correct_answer: question.correct_answer,
                is_correct: answer == question.correct_answer,
            })
            .collect();

        let score = results.iter().filter(|r| r.is_correct).count();
        let total_questions = self.quiz.len();
        let percentage = percentage_of(score, total_questions);

        QuizOutcome {
            lesson_id: self.id,
            score,
            total_questions,
            percentage,
            passed: percentage >= PASSING_PERCENTAGE,
            results,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResult {
    pub question_index: usize,
    pub user_answer: usize,
    pub correct_answer: usize,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizOutcome {
    pub lesson_id: LessonId,
    pub score: usize,
    pub total_questions: usize,
    pub percentage: u8,
    pub passed: bool,
    #[serde(default)]
    pub results: Vec<AnswerResult>,
}

/// Rounded share of `part` over `total` as a 0..=100 percentage.
pub fn percentage_of(part: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = ((part as f64 / total as f64) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

pub fn sort_by_id(lessons: &mut [Lesson]) {
    lessons.sort_by_key(|lesson| lesson.id);
}
