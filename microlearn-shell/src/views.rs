use std::fmt::Write;

use microlearn_core::{ApiError, ApplicationState, Lesson, QuizOutcome, QuizResultRecord};

/// Which screen the last resolved route asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Home,
    Lessons,
    Lesson(String),
    Quiz,
    Progress,
}

pub fn home(state: &ApplicationState) -> String {
    let total = state.lessons.len();
    let done = state.completed_lessons.len();
    let mut out = String::new();
    let _ = writeln!(out, "== Micro-Learning Portal ==");
    let _ = writeln!(out, "Welcome, {}.", state.user.name);
    let _ = writeln!(out, "Progress: {done} / {total} lessons ({}%)", state.progress);
    let _ = writeln!(out, "{}", progress_bar(state.progress));
    let _ = write!(out, "Try `lessons`, `lesson <id>`, `quiz`, `progress` or `help`.");
    out
}

pub fn lessons(state: &ApplicationState) -> String {
    if state.lessons.is_empty() {
        return "No lessons available yet. Type `refresh` to try again.".to_owned();
    }
    let mut out = String::from("== Lessons ==");
    for lesson in &state.lessons {
        let mark = if state.completed_lessons.contains(&lesson.id) {
            "✓"
        } else {
            " "
        };
        let _ = write!(
            out,
            "\n[{mark}] {:>2}. {} ({}, {})",
            lesson.id, lesson.title, lesson.duration, lesson.difficulty
        );
    }
    out
}

pub fn lesson(lesson: &Lesson, completed: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== Lesson {}: {} ==", lesson.id, lesson.title);
    let _ = writeln!(
        out,
        "{} | {} | {}",
        lesson.duration,
        lesson.difficulty,
        lesson.topics.join(", ")
    );
    let _ = writeln!(out, "{}", lesson.description);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", lesson.content);
    let _ = writeln!(out);
    if completed {
        let _ = write!(out, "Completed ✓  (`quiz` to test yourself)");
    } else {
        let _ = write!(out, "Type `complete` when done, or `quiz` to test yourself.");
    }
    out
}

pub fn lesson_error(raw_id: &str, err: &ApiError) -> String {
    if err.is_not_found() {
        format!("Lesson Not Found\nThe lesson `{raw_id}` does not exist. Type `home` to go back.")
    } else {
        format!("Could not load lesson `{raw_id}`: {err}\nType `lesson {raw_id}` to retry.")
    }
}

pub fn quiz(lesson: Option<&Lesson>) -> String {
    let Some(lesson) = lesson else {
        return "No quiz available. Open a lesson first.".to_owned();
    };
    if lesson.quiz.is_empty() {
        return format!("Lesson {} has no quiz.", lesson.id);
    }

    let mut out = String::new();
    let _ = write!(out, "== Quiz: {} ==", lesson.title);
    for (index, question) in lesson.quiz.iter().enumerate() {
        let _ = write!(out, "\n{}. {}", index + 1, question.question);
        for (option_index, option) in question.options.iter().enumerate() {
            let _ = write!(out, "\n   {option_index}) {option}");
        }
    }
    let _ = write!(out, "\nAnswer with `answer {} <option> <option> ...`", lesson.id);
    out
}

pub fn quiz_outcome(outcome: &QuizOutcome) -> String {
    let verdict = if outcome.passed { "passed" } else { "not passed" };
    format!(
        "Score: {}/{} ({}%), {verdict}",
        outcome.score, outcome.total_questions, outcome.percentage
    )
}

/// Score line followed by a per-question breakdown.
pub fn quiz_review(outcome: &QuizOutcome) -> String {
    let mut out = quiz_outcome(outcome);
    for result in &outcome.results {
        let mark = if result.is_correct { "✓" } else { "✗" };
        let _ = write!(
            out,
            "\n  {mark} Q{}: answered {}, correct {}",
            result.question_index + 1,
            result.user_answer,
            result.correct_answer
        );
    }
    out
}

pub fn quiz_history(lesson_id: u32, results: &[QuizResultRecord]) -> String {
    if results.is_empty() {
        return format!("No quiz attempts recorded for lesson {lesson_id}.");
    }
    let mut out = format!("== Quiz history for lesson {lesson_id} ==");
    for record in results {
        let _ = write!(
            out,
            "\n{}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            quiz_outcome(&record.result)
        );
    }
    out
}

pub fn progress(state: &ApplicationState) -> String {
    let total = state.lessons.len();
    let done = state.completed_lessons.len();
    let mut out = String::new();
    let _ = writeln!(out, "== Progress ==");
    let _ = writeln!(out, "{} ({}%)", progress_bar(state.progress), state.progress);
    let _ = write!(out, "{done} of {total} lessons completed");
    for id in &state.completed_lessons {
        let title = state
            .lessons
            .iter()
            .find(|lesson| lesson.id == *id)
            .map(|lesson| lesson.title.as_str())
            .unwrap_or("(not in current catalogue)");
        let _ = write!(out, "\n  ✓ {id}. {title}");
    }
    out
}

fn progress_bar(progress: u8) -> String {
    const WIDTH: usize = 20;
    let filled = (usize::from(progress.min(100)) * WIDTH) / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(WIDTH - filled))
}

pub fn search_results(query: &str, lessons: &[Lesson]) -> String {
    if lessons.is_empty() {
        return format!("No lessons match `{query}`.");
    }
    let mut out = format!("{} result(s) for `{query}`:", lessons.len());
    for lesson in lessons {
        let _ = write!(out, "\n  {:>2}. {}", lesson.id, lesson.title);
    }
    out
}
