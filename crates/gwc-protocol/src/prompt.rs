//! Desktop collaborators: confirmation prompts and notifications.
//!
//! Prompts can keep a human busy for seconds, so they never run on the
//! reactor. The runtime emits a prompt request, [`spawn_prompt`] asks the
//! [`Prompter`] on its own task under a timeout, and the answer comes back
//! to the loop as a [`PromptAnswer`] on a channel.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromptId(pub u64);

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prompt#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Accept,
    Reject,
    /// Nobody answered in time. Treated as a rejection.
    TimedOut,
}

impl PromptOutcome {
    pub fn accepted(self) -> bool {
        self == PromptOutcome::Accept
    }
}

/// Result delivered back into the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptAnswer {
    pub id: PromptId,
    pub outcome: PromptOutcome,
}

/// Asks the local user to accept or reject something.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// `true` to accept. Implementations may take as long as they like;
    /// the caller enforces the timeout.
    async fn ask(&self, title: &str, text: &str) -> bool;
}

/// Fire-and-forget desktop notification.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, text: &str);
}

// ── Prompters ─────────────────────────────────────────────────────────

/// Answers every prompt the same way. Headless daemons reject.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPrompter {
    pub accept: bool,
}

impl AutoPrompter {
    pub fn new(accept: bool) -> Self {
        Self { accept }
    }
}

#[async_trait]
impl Prompter for AutoPrompter {
    async fn ask(&self, title: &str, _text: &str) -> bool {
        debug!(accept = self.accept, "auto-answering prompt '{title}'");
        self.accept
    }
}

/// Runs `<program> <title> <text>`; exit status 0 means accept.
#[derive(Debug, Clone)]
pub struct CommandPrompter {
    program: String,
}

impl CommandPrompter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Prompter for CommandPrompter {
    async fn ask(&self, title: &str, text: &str) -> bool {
        let status = Command::new(&self.program)
            .arg(title)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                warn!("prompt command '{}' failed: {e}", self.program);
                false
            }
        }
    }
}

// ── Notifiers ─────────────────────────────────────────────────────────

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, text: &str) {
        info!("[notify] {title}: {text}");
    }
}

/// Spawns `<program> <title> <text>` without waiting for it.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, title: &str, text: &str) {
        let spawned = Command::new(&self.program)
            .arg(title)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn();
        match spawned {
            // Reap in the background.
            Ok(mut child) => {
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(e) => warn!("notify command '{}' failed: {e}", self.program),
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────

/// Ask `prompter` on a separate task and post the answer to `answers`.
pub fn spawn_prompt(
    prompter: Arc<dyn Prompter>,
    timeout: Duration,
    id: PromptId,
    title: String,
    text: String,
    answers: mpsc::Sender<PromptAnswer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(timeout, prompter.ask(&title, &text)).await {
            Ok(true) => PromptOutcome::Accept,
            Ok(false) => PromptOutcome::Reject,
            Err(_) => {
                debug!("{id} timed out after {}s", timeout.as_secs());
                PromptOutcome::TimedOut
            }
        };
        let _ = answers.send(PromptAnswer { id, outcome }).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowPrompter;

    #[async_trait]
    impl Prompter for SlowPrompter {
        async fn ask(&self, _title: &str, _text: &str) -> bool {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            true
        }
    }

    #[tokio::test]
    async fn auto_prompter_answer_reaches_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        spawn_prompt(
            Arc::new(AutoPrompter::new(true)),
            Duration::from_secs(5),
            PromptId(7),
            "Chat".into(),
            "bob wants to chat".into(),
            tx,
        );
        let answer = rx.recv().await.unwrap();
        assert_eq!(answer.id, PromptId(7));
        assert!(answer.outcome.accepted());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_prompt_times_out_as_reject() {
        let (tx, mut rx) = mpsc::channel(4);
        spawn_prompt(
            Arc::new(SlowPrompter),
            Duration::from_secs(20),
            PromptId(1),
            "Invite".into(),
            "join?".into(),
            tx,
        );
        let answer = rx.recv().await.unwrap();
        assert_eq!(answer.outcome, PromptOutcome::TimedOut);
        assert!(!answer.outcome.accepted());
    }

    #[tokio::test]
    async fn command_prompter_uses_exit_status() {
        assert!(CommandPrompter::new("true").ask("t", "x").await);
        assert!(!CommandPrompter::new("false").ask("t", "x").await);
        assert!(
            !CommandPrompter::new("/nonexistent/gwc-prompt")
                .ask("t", "x")
                .await
        );
    }
}
