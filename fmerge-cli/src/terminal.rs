//! Interactive terminal
//!
//! Prompts read from stdin and race against a cancel notification, so a
//! peer message that makes a pending question moot unblocks the waiting
//! prompt instead of leaving it hanging. Progress is rendered with
//! indicatif; log lines are routed through the active bar so they do not
//! tear it.

use std::sync::Mutex;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Notify;

use fmerge_sync::{PromptOutcome, UserInterface};

const PROGRESS_RESOLUTION: u64 = 1000;

pub struct InteractiveUi {
    stdin: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
    cancel: Notify,
    progress: Mutex<Option<ProgressBar>>,
}

impl InteractiveUi {
    pub fn new() -> Self {
        Self {
            stdin: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            cancel: Notify::new(),
            progress: Mutex::new(None),
        }
    }
}

impl Default for InteractiveUi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserInterface for InteractiveUi {
    fn log(&self, line: &str) {
        let progress = self.progress.lock().expect("progress bar poisoned");
        match progress.as_ref() {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }

    async fn prompt_choice(&self, prompt: &str, options: &[char]) -> PromptOutcome {
        let rendered: String = options
            .iter()
            .map(char::to_string)
            .collect::<Vec<_>>()
            .join("/");
        self.log(&format!("{} [{}]", prompt, rendered));

        let mut stdin = self.stdin.lock().await;
        loop {
            tokio::select! {
                _ = self.cancel.notified() => return PromptOutcome::Cancelled,
                line = stdin.next_line() => {
                    match line {
                        Ok(Some(input)) => {
                            match input.trim().chars().next() {
                                Some(choice) if options.contains(&choice) => {
                                    return PromptOutcome::Choice(choice);
                                }
                                _ => self.log(&format!("Please answer one of [{}]", rendered)),
                            }
                        }
                        // Stdin closed; nothing further can be asked.
                        Ok(None) | Err(_) => return PromptOutcome::Cancelled,
                    }
                }
            }
        }
    }

    fn cancel_prompt(&self) {
        // Stores a permit, so a cancel that races ahead of the prompt still
        // lands; the session re-prompts when a cancellation was stale.
        self.cancel.notify_one();
    }

    fn start_progress(&self, label: &str) {
        let bar = ProgressBar::new(PROGRESS_RESOLUTION);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {percent}%")
                .expect("invalid progress template")
                .progress_chars("=> "),
        );
        bar.set_message(label.to_string());
        *self.progress.lock().expect("progress bar poisoned") = Some(bar);
    }

    fn update_progress(&self, fraction: f64) {
        if let Some(bar) = self.progress.lock().expect("progress bar poisoned").as_ref() {
            bar.set_position((fraction.clamp(0.0, 1.0) * PROGRESS_RESOLUTION as f64) as u64);
        }
    }

    fn complete_progress(&self) {
        if let Some(bar) = self
            .progress
            .lock()
            .expect("progress bar poisoned")
            .take()
        {
            bar.finish_and_clear();
        }
    }
}
