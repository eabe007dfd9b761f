use model::execution::report::SyncReport;
use std::{
    io,
    sync::{Arc, OnceLock},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

/// Resolves with the first SIGINT or SIGTERM the process receives.
async fn next_signal() -> io::Result<Signal> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => res.map(|()| Signal::Interrupt),
            _ = terminate.recv() => Ok(Signal::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|()| Signal::Interrupt)
    }
}

/// Turns the first shutdown signal into cancellation of every running sync
/// job. Jobs stop at their next suspension point and keep what they staged,
/// so the next run resumes from there.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
    received: Arc<OnceLock<Signal>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the signal listener. Without handlers the jobs still run, they
    /// just cannot be interrupted gracefully.
    pub fn listen(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            match next_signal().await {
                Ok(signal) => coordinator.trigger(signal),
                Err(error) => warn!(%error, "Could not install shutdown signal handlers"),
            }
        });
    }

    /// Cancels running jobs. Only the first signal is recorded.
    pub fn trigger(&self, signal: Signal) {
        if self.received.set(signal).is_ok() {
            info!(?signal, "Shutdown requested, cancelling running sync jobs");
        }
        self.cancel_token.cancel();
    }

    pub fn received(&self) -> Option<Signal> {
        self.received.get().copied()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Exit status for a finished `sync`. An interrupted run reports the
    /// signal even when every job happened to finish.
    pub fn exit_code(&self, reports: &[SyncReport]) -> ExitCode {
        match self.received() {
            Some(Signal::Interrupt) => ExitCode::Interrupted,
            Some(Signal::Terminate) => ExitCode::Terminated,
            None if reports.iter().all(SyncReport::is_success) => ExitCode::Success,
            None => ExitCode::JobsFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// At least one sync job did not succeed.
    JobsFailed = 2,
    Interrupted = 130,
    Terminated = 143,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{core::identifiers::EntityId, execution::sync_job::SyncStatus};

    fn report(status: SyncStatus) -> SyncReport {
        SyncReport {
            job_id: "job-1".into(),
            entity: EntityId::new("fb.campaigns"),
            status,
            rows_written: 0,
            quarantine_count: 0,
            batches_committed: 0,
            batches_recovered: 0,
            watermark_start: None,
            watermark_end: None,
            requests: 0,
            retries: 0,
            duration_ms: 0,
            cause: None,
        }
    }

    #[test]
    fn trigger_cancels_jobs_and_keeps_the_first_signal() {
        let shutdown = ShutdownCoordinator::new();
        let token = shutdown.cancel_token();
        assert_eq!(shutdown.received(), None);

        shutdown.trigger(Signal::Terminate);
        shutdown.trigger(Signal::Interrupt);

        assert!(token.is_cancelled());
        assert_eq!(shutdown.received(), Some(Signal::Terminate));
    }

    #[test]
    fn exit_code_reflects_jobs_and_signals() {
        let ok = [report(SyncStatus::Succeeded), report(SyncStatus::Succeeded)];
        let mixed = [report(SyncStatus::Succeeded), report(SyncStatus::PartiallyFailed)];

        let shutdown = ShutdownCoordinator::new();
        assert_eq!(shutdown.exit_code(&ok), ExitCode::Success);
        assert_eq!(shutdown.exit_code(&[]), ExitCode::Success);
        assert_eq!(shutdown.exit_code(&mixed), ExitCode::JobsFailed);

        shutdown.trigger(Signal::Interrupt);
        assert_eq!(shutdown.exit_code(&ok), ExitCode::Interrupted);
        assert_eq!(ExitCode::Interrupted as u8, 130);
    }
}
