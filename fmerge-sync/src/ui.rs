//! The terminal seam
//!
//! The session talks to the user exclusively through this trait so the
//! interactive terminal stays outside the core. Prompts are cancellable
//! from other tasks: a peer message that makes a pending question moot
//! (first-resolver-wins, forced sync start) calls `cancel_prompt` and the
//! waiting prompt returns `Cancelled`.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

/// Result of a prompt: the chosen option, or cancellation by another task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Choice(char),
    Cancelled,
}

#[async_trait]
pub trait UserInterface: Send + Sync + 'static {
    /// Print one line of user-facing output.
    fn log(&self, line: &str);

    /// Ask the user to pick one of `options`. Blocks until an option is
    /// chosen or `cancel_prompt` is called.
    async fn prompt_choice(&self, prompt: &str, options: &[char]) -> PromptOutcome;

    /// Cancel the active prompt (or the next one, if none is active yet).
    fn cancel_prompt(&self);

    fn start_progress(&self, label: &str);
    fn update_progress(&self, fraction: f64);
    fn complete_progress(&self);
}

/// Non-interactive implementation for unattended sessions and tests.
///
/// Every prompt is answered immediately: with the configured answer if it
/// is among the offered options, with the first offered option otherwise.
pub struct HeadlessUi {
    answers: Mutex<Vec<char>>,
}

impl HeadlessUi {
    /// Answer every prompt with its first offered option.
    pub fn new() -> Self {
        Self {
            answers: Mutex::new(Vec::new()),
        }
    }

    /// Answer prompts from a fixed script, first element first; once the
    /// script is exhausted, fall back to the first offered option.
    pub fn scripted(answers: impl IntoIterator<Item = char>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
        }
    }
}

impl Default for HeadlessUi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserInterface for HeadlessUi {
    fn log(&self, line: &str) {
        info!("{}", line);
    }

    async fn prompt_choice(&self, prompt: &str, options: &[char]) -> PromptOutcome {
        let mut answers = self.answers.lock().expect("answer script poisoned");
        let answer = if answers.is_empty() {
            options.first().copied().unwrap_or('y')
        } else {
            answers.remove(0)
        };
        info!("{} -> {} (headless)", prompt, answer);
        PromptOutcome::Choice(answer)
    }

    fn cancel_prompt(&self) {}

    fn start_progress(&self, label: &str) {
        info!("{}...", label);
    }

    fn update_progress(&self, _fraction: f64) {}

    fn complete_progress(&self) {}
}
