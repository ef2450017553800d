use crate::lesson::LessonId;

/// Accepts only ASCII digits that fit a [`LessonId`].
pub fn parse_lesson_id(raw: &str) -> Option<LessonId> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// An answer is the option number chosen for the question `question_id`.
pub fn validate_answer(question_id: &str, answer: &str) -> Option<usize> {
    if question_id.is_empty() || answer.is_empty() || !answer.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    answer.parse().ok()
}
