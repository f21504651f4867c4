//! Ordered command chaining with pause-on-async semantics.
//!
//! A [`CommandSequence`] runs its steps in order. Consecutive synchronous
//! steps execute back-to-back within a single advance pass; the pass stops at
//! the first asynchronous step, which becomes the active command until
//! [`CommandSequence::check_progress`] observes its completion and advances
//! again. The advance pass is an explicit loop, so an arbitrarily long run of
//! synchronous steps costs no stack.
//!
//! There is no failed state. When a step's `execute` errors, the error
//! propagates to the caller and the step stays parked as the active command
//! with the sequence mid-advance, so a stuck sequence is observable rather
//! than silently skipped over.
//!
//! A sequence itself implements [`AsyncCommand`], so sequences nest as steps
//! of outer sequences.

use std::collections::VecDeque;

use async_trait::async_trait;

use super::{AsyncCommand, Command};
use crate::error::AppResult;

/// Where a sequence is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Built but not yet executed.
    Idle,
    /// Inside an advance pass. Observed from outside only when a step's
    /// `execute` failed mid-pass.
    Advancing,
    /// Parked on an asynchronous step, waiting for completion polls.
    AwaitingAsync,
    /// All steps ran; the active slot is clear.
    Completed,
}

/// An ordered FIFO of commands executed with pause-on-async chaining.
pub struct CommandSequence {
    name: String,
    queue: VecDeque<Command>,
    active: Option<Command>,
    state: SequenceState,
}

impl CommandSequence {
    /// Builds a sequence over `commands`, first step at the front.
    pub fn new(name: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            name: name.into(),
            queue: commands.into(),
            active: None,
            state: SequenceState::Idle,
        }
    }

    /// Appends a step at the back.
    pub fn push(&mut self, command: Command) {
        self.queue.push_back(command);
    }

    /// The sequence name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Description of the active command, if one is parked or stuck.
    pub fn active_text(&self) -> Option<String> {
        self.active.as_ref().map(Command::text)
    }

    /// Steps not yet started.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Status line composing the sequence name with the active step.
    pub fn text(&self) -> String {
        match &self.active {
            Some(active) => format!("{}: {}", self.name, active.text()),
            None => self.name.clone(),
        }
    }

    /// Starts the sequence: runs steps until the first asynchronous one is
    /// initiated or the queue drains.
    pub async fn execute(&mut self) -> AppResult<()> {
        self.advance().await
    }

    /// Polls the active step. With no active command the sequence is complete
    /// and this reports `true`. When the active step completes, the sequence
    /// advances in the same call but still reports `false`; completion is
    /// observed on the next poll. One poll of latency is part of the
    /// contract and keeps "advanced" distinct from "finished".
    pub async fn check_progress(&mut self) -> AppResult<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(true);
        };
        if active.check_progress().await? {
            self.advance().await?;
        }
        Ok(false)
    }

    /// Pops and executes steps until one is asynchronous or the queue is
    /// empty. On error the failing step remains active and the state remains
    /// `Advancing`.
    async fn advance(&mut self) -> AppResult<()> {
        self.state = SequenceState::Advancing;
        loop {
            let Some(command) = self.queue.pop_front() else {
                self.active = None;
                self.state = SequenceState::Completed;
                return Ok(());
            };
            let synchronous = command.is_synchronous();
            let active = self.active.insert(command);
            active.execute().await?;
            if !synchronous {
                self.state = SequenceState::AwaitingAsync;
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl AsyncCommand for CommandSequence {
    fn text(&self) -> String {
        CommandSequence::text(self)
    }

    async fn execute(&mut self) -> AppResult<()> {
        CommandSequence::execute(self).await
    }

    async fn poll_complete(&mut self) -> AppResult<bool> {
        self.check_progress().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::SyncCommand;
    use crate::error::BenchError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Appends its label to a shared journal when executed.
    struct Step {
        label: &'static str,
        journal: Arc<std::sync::Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl SyncCommand for Step {
        fn text(&self) -> String {
            self.label.to_string()
        }

        async fn execute(&mut self) -> AppResult<()> {
            if self.fail {
                return Err(BenchError::Transport("step failed".into()));
            }
            self.journal.lock().unwrap().push(self.label);
            Ok(())
        }
    }

    struct PolledStep {
        label: &'static str,
        journal: Arc<std::sync::Mutex<Vec<&'static str>>>,
        polls_needed: u32,
        polls_seen: Arc<AtomicU32>,
    }

    #[async_trait]
    impl AsyncCommand for PolledStep {
        fn text(&self) -> String {
            self.label.to_string()
        }

        async fn execute(&mut self) -> AppResult<()> {
            self.journal.lock().unwrap().push(self.label);
            Ok(())
        }

        async fn poll_complete(&mut self) -> AppResult<bool> {
            let seen = self.polls_seen.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(seen >= self.polls_needed)
        }
    }

    fn journal() -> Arc<std::sync::Mutex<Vec<&'static str>>> {
        Arc::new(std::sync::Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_all_sync_sequence_completes_in_one_execute() {
        let j = journal();
        let mut seq = CommandSequence::new(
            "setup",
            vec![
                Command::sync(Step {
                    label: "a",
                    journal: j.clone(),
                    fail: false,
                }),
                Command::sync(Step {
                    label: "b",
                    journal: j.clone(),
                    fail: false,
                }),
                Command::sync(Step {
                    label: "c",
                    journal: j.clone(),
                    fail: false,
                }),
            ],
        );

        assert_eq!(seq.state(), SequenceState::Idle);
        seq.execute().await.unwrap();

        assert_eq!(*j.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(seq.state(), SequenceState::Completed);
        assert!(seq.active_text().is_none());
        assert!(seq.check_progress().await.unwrap());
    }

    #[tokio::test]
    async fn test_sequence_parks_on_async_step() {
        let j = journal();
        let polls = Arc::new(AtomicU32::new(0));
        let mut seq = CommandSequence::new(
            "scan",
            vec![
                Command::sync(Step {
                    label: "pre",
                    journal: j.clone(),
                    fail: false,
                }),
                Command::asynchronous(PolledStep {
                    label: "move",
                    journal: j.clone(),
                    polls_needed: 2,
                    polls_seen: polls.clone(),
                }),
                Command::sync(Step {
                    label: "post",
                    journal: j.clone(),
                    fail: false,
                }),
            ],
        );

        seq.execute().await.unwrap();
        // The sync step ran, the async step was initiated, then the pass stopped.
        assert_eq!(*j.lock().unwrap(), vec!["pre", "move"]);
        assert_eq!(seq.state(), SequenceState::AwaitingAsync);
        assert_eq!(seq.text(), "scan: move");

        // Still moving.
        assert!(!seq.check_progress().await.unwrap());
        assert_eq!(*j.lock().unwrap(), vec!["pre", "move"]);

        // Move completes; the trailing sync step runs in the same poll, which
        // still reports false.
        assert!(!seq.check_progress().await.unwrap());
        assert_eq!(*j.lock().unwrap(), vec!["pre", "move", "post"]);
        assert_eq!(seq.state(), SequenceState::Completed);

        // Completion is observed one poll later.
        assert!(seq.check_progress().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_step_leaves_sequence_stuck_and_observable() {
        let j = journal();
        let mut seq = CommandSequence::new(
            "setup",
            vec![
                Command::sync(Step {
                    label: "ok",
                    journal: j.clone(),
                    fail: false,
                }),
                Command::sync(Step {
                    label: "boom",
                    journal: j.clone(),
                    fail: true,
                }),
                Command::sync(Step {
                    label: "never",
                    journal: j.clone(),
                    fail: false,
                }),
            ],
        );

        let err = seq.execute().await.unwrap_err();
        assert!(err.is_transient());
        // The failing step stays active mid-advance; nothing after it ran.
        assert_eq!(*j.lock().unwrap(), vec!["ok"]);
        assert_eq!(seq.state(), SequenceState::Advancing);
        assert_eq!(seq.active_text().as_deref(), Some("boom"));
        assert_eq!(seq.remaining(), 1);
    }

    #[tokio::test]
    async fn test_sequences_nest() {
        let j = journal();
        let polls = Arc::new(AtomicU32::new(0));
        let inner = CommandSequence::new(
            "inner",
            vec![
                Command::asynchronous(PolledStep {
                    label: "inner-move",
                    journal: j.clone(),
                    polls_needed: 1,
                    polls_seen: polls.clone(),
                }),
                Command::sync(Step {
                    label: "inner-post",
                    journal: j.clone(),
                    fail: false,
                }),
            ],
        );
        let mut outer = CommandSequence::new(
            "outer",
            vec![
                Command::asynchronous(inner),
                Command::sync(Step {
                    label: "outer-post",
                    journal: j.clone(),
                    fail: false,
                }),
            ],
        );

        outer.execute().await.unwrap();
        assert_eq!(outer.text(), "outer: inner: inner-move");

        // Poll 1: inner move completes, inner tail runs, inner reports false.
        assert!(!outer.check_progress().await.unwrap());
        assert_eq!(*j.lock().unwrap(), vec!["inner-move", "inner-post"]);

        // Poll 2: inner reports complete, outer tail runs.
        assert!(!outer.check_progress().await.unwrap());
        assert_eq!(
            *j.lock().unwrap(),
            vec!["inner-move", "inner-post", "outer-post"]
        );

        // Poll 3: outer observed complete.
        assert!(outer.check_progress().await.unwrap());
        assert_eq!(outer.state(), SequenceState::Completed);
    }

    #[tokio::test]
    async fn test_deep_sync_chain_does_not_recurse() {
        // A long all-sync sequence advances iteratively; this would overflow
        // the stack if each step recursed into the next.
        let j = journal();
        let steps: Vec<Command> = (0..10_000)
            .map(|_| {
                Command::sync(Step {
                    label: "s",
                    journal: j.clone(),
                    fail: false,
                })
            })
            .collect();
        let mut seq = CommandSequence::new("bulk", steps);
        seq.execute().await.unwrap();
        assert_eq!(j.lock().unwrap().len(), 10_000);
        assert_eq!(seq.state(), SequenceState::Completed);
    }

    #[tokio::test]
    async fn test_push_after_construction() {
        let j = journal();
        let mut seq = CommandSequence::new("grow", vec![]);
        seq.push(Command::sync(Step {
            label: "late",
            journal: j.clone(),
            fail: false,
        }));
        assert_eq!(seq.remaining(), 1);
        seq.execute().await.unwrap();
        assert_eq!(*j.lock().unwrap(), vec!["late"]);
    }
}
