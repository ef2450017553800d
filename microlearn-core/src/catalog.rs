use crate::lesson::{Difficulty, Lesson, QuizQuestion};

fn question(text: &str, options: [&str; 4], correct_answer: usize) -> QuizQuestion {
    QuizQuestion {
        question: text.to_owned(),
        options: options.iter().map(|o| (*o).to_owned()).collect(),
        correct_answer,
    }
}

#[allow(clippy::too_many_arguments)]
fn lesson(
    id: u32,
    title: &str,
    description: &str,
    content: &str,
    duration: &str,
    difficulty: Difficulty,
    topics: &[&str],
    quiz: Vec<QuizQuestion>,
) -> Lesson {
    Lesson {
        id,
        title: title.to_owned(),
        description: description.to_owned(),
        content: content.to_owned(),
        duration: duration.to_owned(),
        difficulty,
        topics: topics.iter().map(|t| (*t).to_owned()).collect(),
        quiz,
    }
}

pub fn builtin_lessons() -> Vec<Lesson> {
    vec![
        lesson(
            1,
            "Introduction to JavaScript",
            "Fundamentals: variables, control flow, and functions.",
            "Declaring variables, using functions, and control flow statements (if, switch, loops).",
            "12 min",
            Difficulty::Beginner,
            &["javascript", "basics", "syntax"],
            vec![
                question(
                    "What keyword declares a block-scoped variable?",
                    ["var", "let", "const", "function"],
                    1,
                ),
                question(
                    "Which structure repeats code while a condition is true?",
                    ["if", "for", "switch", "try"],
                    1,
                ),
            ],
        ),
        lesson(
            2,
            "ES Modules & Imports",
            "Organize code using import/export and default exports.",
            "Named and default exports, and importing functions, objects and classes across files.",
            "18 min",
            Difficulty::Intermediate,
            &["modules", "import", "export"],
            vec![
                question(
                    "How do you export a named function?",
                    [
                        "export function f(){}",
                        "module.exports = f",
                        "export default function f(){}",
                        "include f",
                    ],
                    0,
                ),
                question(
                    "How do you import a default export?",
                    [
                        "import {x} from './x'",
                        "import x from './x'",
                        "require('./x')",
                        "include './x'",
                    ],
                    1,
                ),
            ],
        ),
        lesson(
            3,
            "Asynchronous JavaScript",
            "Promises, async/await and handling network requests.",
            "Fetching data, handling errors, and running parallel requests with Promise.all.",
            "22 min",
            Difficulty::Intermediate,
            &["promises", "async/await", "fetch"],
            vec![
                question(
                    "Which method turns a callback into a Promise?",
                    ["Promise.resolve", "new Promise", "async function", "setTimeout"],
                    1,
                ),
                question(
                    "What does Promise.all do?",
                    [
                        "Runs functions in sequence",
                        "Runs promises in parallel and waits for all",
                        "Cancels promises",
                        "Retries promises",
                    ],
                    1,
                ),
            ],
        ),
        lesson(
            4,
            "DOM Manipulation Basics",
            "Selecting and updating elements, event listeners.",
            "Selecting elements, updating text and attributes, and attaching event listeners.",
            "15 min",
            Difficulty::Beginner,
            &["dom", "events", "selectors"],
            vec![
                question(
                    "Which method selects an element by CSS selector?",
                    ["getElementById", "querySelector", "getElementsByClassName", "select"],
                    1,
                ),
                question(
                    "Which event fires when a user clicks an element?",
                    ["keydown", "submit", "click", "focus"],
                    2,
                ),
            ],
        ),
        lesson(
            5,
            "Performance Fundamentals",
            "Minimize render time and reduce layout thrashing.",
            "Batching DOM updates, using requestAnimationFrame, and avoiding layout thrashing.",
            "20 min",
            Difficulty::Intermediate,
            &["performance", "rendering", "optimization"],
            vec![
                question(
                    "What helps avoid layout thrashing?",
                    [
                        "Frequent DOM reads/writes",
                        "Batching reads and writes",
                        "Multiple synchronous style changes",
                        "Using inline styles",
                    ],
                    1,
                ),
                question(
                    "Which API schedules visual updates before paint?",
                    ["setTimeout", "requestAnimationFrame", "Promise", "fetch"],
                    1,
                ),
            ],
        ),
        lesson(
            6,
            "Accessibility Basics",
            "Improve UX with semantic HTML and ARIA.",
            "Semantic elements, ARIA labels, keyboard navigability and sufficient contrast.",
            "14 min",
            Difficulty::Beginner,
            &["a11y", "semantic-html", "aria"],
            vec![
                question(
                    "What improves screen reader support?",
                    [
                        "Non-semantic divs",
                        "Aria-labels and semantic tags",
                        "Only CSS",
                        "Inline scripts",
                    ],
                    1,
                ),
                question(
                    "Which key should move keyboard focus?",
                    ["Tab", "Space", "Enter", "Alt"],
                    0,
                ),
            ],
        ),
        lesson(
            7,
            "Testing JavaScript",
            "Unit tests with simple frameworks and testable design.",
            "Writing unit tests, organizing small testable functions, and running them with minimal tooling.",
            "18 min",
            Difficulty::Intermediate,
            &["testing", "unit-tests", "vitest"],
            vec![
                question(
                    "Why write unit tests?",
                    [
                        "To slow development",
                        "To verify behavior and prevent regressions",
                        "To obfuscate code",
                        "To avoid reviews",
                    ],
                    1,
                ),
                question(
                    "Which is a unit testing tool used here?",
                    ["Vitest", "Lighthouse", "Webpack", "ESLint"],
                    0,
                ),
            ],
        ),
        lesson(
            8,
            "Basic Web Security",
            "Defend against common client-side issues like XSS.",
            "Sanitizing untrusted HTML, Content Security Policy, and avoiding unsafe inline scripts.",
            "16 min",
            Difficulty::Intermediate,
            &["security", "xss", "csp"],
            vec![
                question(
                    "What reduces XSS risk?",
                    [
                        "Using innerHTML with user input",
                        "Sanitizing/safe APIs",
                        "Allowing all scripts",
                        "Disabling CSP",
                    ],
                    1,
                ),
                question(
                    "What does CSP stand for?",
                    [
                        "Client-side Policy",
                        "Content Security Policy",
                        "Content Styling Practice",
                        "Cross Site Policy",
                    ],
                    1,
                ),
            ],
        ),
    ]
}
