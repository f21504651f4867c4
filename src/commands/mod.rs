//! Bench operations as command objects.
//!
//! Every operation a user or script can trigger on the bench is a command.
//! A command either finishes within [`Command::execute`] (synchronous, e.g.
//! flipping the recording flag) or merely *initiates* something physical whose
//! completion must be polled (asynchronous, e.g. a delay-line move). The two
//! kinds are separate traits joined by the [`Command`] tagged variant, so
//! "does this need polling" is a tag inspection and synchronous commands
//! cannot even express a poll.
//!
//! [`sequence::CommandSequence`] chains commands; [`scan`] holds the canned
//! recording commands and composite sequences built from them;
//! [`slot::CommandSlot`] enforces the one-command-at-a-time rule.

pub mod scan;
pub mod sequence;
pub mod slot;

pub use sequence::{CommandSequence, SequenceState};
pub use slot::CommandSlot;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppResult, BenchError};

/// Sleep between completion polls in the blocking wait path.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An operation that completes within `execute`.
#[async_trait]
pub trait SyncCommand: Send {
    /// Short human-readable description for status display.
    fn text(&self) -> String;

    /// Performs the operation.
    async fn execute(&mut self) -> AppResult<()>;
}

/// An operation that initiates something physical and is polled to completion.
#[async_trait]
pub trait AsyncCommand: Send {
    /// Short human-readable description for status display.
    fn text(&self) -> String;

    /// Issues the request. Must not wait for physical completion.
    async fn execute(&mut self) -> AppResult<()>;

    /// Whether the operation has physically completed.
    async fn poll_complete(&mut self) -> AppResult<bool>;
}

/// A bench operation, tagged by completion kind.
pub enum Command {
    /// Completes within `execute`.
    Sync(Box<dyn SyncCommand>),
    /// Initiated by `execute`, polled to completion.
    Async(Box<dyn AsyncCommand>),
}

impl Command {
    /// Wraps a synchronous command.
    pub fn sync(command: impl SyncCommand + 'static) -> Self {
        Command::Sync(Box::new(command))
    }

    /// Wraps an asynchronous command.
    pub fn asynchronous(command: impl AsyncCommand + 'static) -> Self {
        Command::Async(Box::new(command))
    }

    /// Short human-readable description for status display.
    pub fn text(&self) -> String {
        match self {
            Command::Sync(c) => c.text(),
            Command::Async(c) => c.text(),
        }
    }

    /// Whether the command completes within `execute`.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Command::Sync(_))
    }

    /// Performs or initiates the operation.
    pub async fn execute(&mut self) -> AppResult<()> {
        match self {
            Command::Sync(c) => c.execute().await,
            Command::Async(c) => c.execute().await,
        }
    }

    /// Whether the operation has physically completed. Synchronous commands
    /// always report `false`: they are done by definition after `execute` and
    /// are never parked for polling in the non-error path.
    pub async fn check_progress(&mut self) -> AppResult<bool> {
        match self {
            Command::Sync(_) => Ok(false),
            Command::Async(c) => c.poll_complete().await,
        }
    }

    /// Executes, then polls until completion or until `timeout` of wall-clock
    /// time has passed, sleeping [`POLL_INTERVAL`] between polls.
    ///
    /// On deadline overrun this returns [`BenchError::Timeout`] but does not
    /// retract the motion already in flight; callers that need an abort must
    /// issue a stop themselves.
    pub async fn execute_and_wait(&mut self, timeout: Duration) -> AppResult<()> {
        self.execute().await?;
        if self.is_synchronous() {
            return Ok(());
        }
        let start = std::time::Instant::now();
        loop {
            if self.check_progress().await? {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(BenchError::Timeout {
                    after: timeout,
                    operation: self.text(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlagCommand {
        executed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SyncCommand for FlagCommand {
        fn text(&self) -> String {
            "Set flag".to_string()
        }

        async fn execute(&mut self) -> AppResult<()> {
            self.executed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Completes after `polls_needed` progress checks.
    struct CountdownCommand {
        polls_needed: u32,
        polls_seen: Arc<AtomicU32>,
    }

    #[async_trait]
    impl AsyncCommand for CountdownCommand {
        fn text(&self) -> String {
            "Countdown".to_string()
        }

        async fn execute(&mut self) -> AppResult<()> {
            Ok(())
        }

        async fn poll_complete(&mut self) -> AppResult<bool> {
            let seen = self.polls_seen.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(seen >= self.polls_needed)
        }
    }

    #[tokio::test]
    async fn test_sync_command_never_reports_progress() {
        let executed = Arc::new(AtomicBool::new(false));
        let mut cmd = Command::sync(FlagCommand {
            executed: executed.clone(),
        });
        assert!(cmd.is_synchronous());
        cmd.execute().await.unwrap();
        assert!(executed.load(Ordering::SeqCst));
        assert!(!cmd.check_progress().await.unwrap());
    }

    #[tokio::test]
    async fn test_async_command_polls_to_completion() {
        let polls = Arc::new(AtomicU32::new(0));
        let mut cmd = Command::asynchronous(CountdownCommand {
            polls_needed: 3,
            polls_seen: polls.clone(),
        });
        assert!(!cmd.is_synchronous());
        cmd.execute().await.unwrap();
        assert!(!cmd.check_progress().await.unwrap());
        assert!(!cmd.check_progress().await.unwrap());
        assert!(cmd.check_progress().await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_and_wait_returns_for_sync() {
        let executed = Arc::new(AtomicBool::new(false));
        let mut cmd = Command::sync(FlagCommand {
            executed: executed.clone(),
        });
        cmd.execute_and_wait(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_execute_and_wait_polls_until_complete() {
        let polls = Arc::new(AtomicU32::new(0));
        let mut cmd = Command::asynchronous(CountdownCommand {
            polls_needed: 2,
            polls_seen: polls.clone(),
        });
        cmd.execute_and_wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_execute_and_wait_times_out() {
        struct NeverDone;

        #[async_trait]
        impl AsyncCommand for NeverDone {
            fn text(&self) -> String {
                "Never done".to_string()
            }

            async fn execute(&mut self) -> AppResult<()> {
                Ok(())
            }

            async fn poll_complete(&mut self) -> AppResult<bool> {
                Ok(false)
            }
        }

        let mut cmd = Command::asynchronous(NeverDone);
        let err = cmd
            .execute_and_wait(Duration::from_millis(120))
            .await
            .unwrap_err();
        match err {
            BenchError::Timeout { operation, .. } => assert_eq!(operation, "Never done"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
