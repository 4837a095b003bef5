//! Pipeline run state: at most one active run, observed through snapshots.
//!
//! Every mutation is keyed by `run_id`, so a worker that was stopped and is
//! still unwinding cannot touch the state of a later run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::types::Stage;

/// Progress share of each of the four stages.
const STAGE_WEIGHT: usize = 25;

/// Stage label shown once a run has finished successfully.
pub const COMPLETE_LABEL: &str = "Complete";

/// Read-only view of the current (or last) run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    pub run_id: Option<Uuid>,
    pub running: bool,
    pub current_stage: Option<String>,
    /// 0–100, never decreases within a run.
    pub progress: u8,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Owner of the run snapshot.
#[derive(Debug, Default)]
pub struct RunState {
    inner: RwLock<RunSnapshot>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        self.inner.read().await.clone()
    }

    /// Claim the running flag for a new run.
    ///
    /// Check and set happen under one write lock; a second caller sees
    /// `Conflict` and the active run is left untouched.
    pub async fn try_begin(&self) -> Result<Uuid, PipelineError> {
        let mut state = self.inner.write().await;
        if state.running {
            if let Some(active) = state.run_id {
                return Err(PipelineError::Conflict { active });
            }
        }

        let run_id = Uuid::new_v4();
        *state = RunSnapshot {
            run_id: Some(run_id),
            running: true,
            current_stage: None,
            progress: 0,
            error: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        };
        Ok(run_id)
    }

    /// Whether `run_id` is the current run and has not been stopped.
    pub async fn is_active(&self, run_id: Uuid) -> bool {
        let state = self.inner.read().await;
        state.running && state.run_id == Some(run_id)
    }

    pub async fn set_stage(&self, run_id: Uuid, stage: Stage) {
        self.update_active(run_id, |state| {
            state.current_stage = Some(stage.label().to_string());
        })
        .await;
    }

    /// Raise progress to `progress`. Lower values are ignored.
    pub async fn set_progress(&self, run_id: Uuid, progress: u8) {
        self.update_active(run_id, |state| {
            state.progress = state.progress.max(progress.min(100));
        })
        .await;
    }

    /// Stop the active run. Returns `false` when nothing was running.
    pub async fn stop(&self) -> bool {
        let mut state = self.inner.write().await;
        if !state.running {
            return false;
        }
        state.running = false;
        state.current_stage = None;
        state.finished_at = Some(Utc::now());
        true
    }

    /// Mark `run_id` as finished successfully. No-op if it was stopped.
    pub async fn finish_ok(&self, run_id: Uuid) {
        self.update_active(run_id, |state| {
            state.running = false;
            state.current_stage = Some(COMPLETE_LABEL.to_string());
            state.progress = 100;
            state.finished_at = Some(Utc::now());
        })
        .await;
    }

    /// Mark `run_id` as aborted with `error`.
    pub async fn finish_err(&self, run_id: Uuid, error: impl Into<String>) {
        let mut state = self.inner.write().await;
        if state.run_id != Some(run_id) {
            return;
        }
        state.running = false;
        state.current_stage = None;
        state.error = Some(error.into());
        state.finished_at.get_or_insert_with(Utc::now);
    }

    async fn update_active(&self, run_id: Uuid, f: impl FnOnce(&mut RunSnapshot)) {
        let mut state = self.inner.write().await;
        if state.running && state.run_id == Some(run_id) {
            f(&mut state);
        }
    }
}

/// Overall progress after `done` of `total` leads finished `stage`.
pub fn stage_progress(stage: Stage, done: usize, total: usize) -> u8 {
    let base = STAGE_WEIGHT * stage.index() as usize;
    let within = if total == 0 {
        STAGE_WEIGHT
    } else {
        STAGE_WEIGHT * done.min(total) / total
    };
    (base + within) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_begin_conflicts_without_touching_active_run() {
        let state = RunState::new();
        let run_id = state.try_begin().await.unwrap();
        state.set_progress(run_id, 30).await;

        let err = state.try_begin().await.unwrap_err();
        assert!(matches!(err, PipelineError::Conflict { active } if active == run_id));

        let snap = state.snapshot().await;
        assert_eq!(snap.run_id, Some(run_id));
        assert!(snap.running);
        assert_eq!(snap.progress, 30);
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let state = RunState::new();
        let run_id = state.try_begin().await.unwrap();
        state.set_progress(run_id, 40).await;
        state.set_progress(run_id, 10).await;
        assert_eq!(state.snapshot().await.progress, 40);
        state.set_progress(run_id, 250).await;
        assert_eq!(state.snapshot().await.progress, 100);
    }

    #[tokio::test]
    async fn stop_twice_is_noop() {
        let state = RunState::new();
        assert!(!state.stop().await);

        let run_id = state.try_begin().await.unwrap();
        state.set_stage(run_id, Stage::Enrich).await;
        assert!(state.stop().await);
        assert!(!state.stop().await);

        let snap = state.snapshot().await;
        assert!(!snap.running);
        assert!(snap.current_stage.is_none());
        assert!(snap.error.is_none());
    }

    #[tokio::test]
    async fn stale_run_cannot_touch_new_run() {
        let state = RunState::new();
        let old = state.try_begin().await.unwrap();
        state.stop().await;
        let new = state.try_begin().await.unwrap();

        state.set_stage(old, Stage::Dispatch).await;
        state.set_progress(old, 90).await;
        state.finish_ok(old).await;
        state.finish_err(old, "late failure").await;

        let snap = state.snapshot().await;
        assert_eq!(snap.run_id, Some(new));
        assert!(snap.running);
        assert_eq!(snap.progress, 0);
        assert!(snap.current_stage.is_none());
        assert!(snap.error.is_none());
    }

    #[tokio::test]
    async fn finish_ok_and_err() {
        let state = RunState::new();
        let run_id = state.try_begin().await.unwrap();
        state.finish_ok(run_id).await;
        let snap = state.snapshot().await;
        assert!(!snap.running);
        assert_eq!(snap.current_stage.as_deref(), Some(COMPLETE_LABEL));
        assert_eq!(snap.progress, 100);

        let run_id = state.try_begin().await.unwrap();
        state.set_stage(run_id, Stage::Personalize).await;
        state.finish_err(run_id, "database is locked").await;
        let snap = state.snapshot().await;
        assert!(!snap.running);
        assert!(snap.current_stage.is_none());
        assert_eq!(snap.error.as_deref(), Some("database is locked"));
    }

    #[test]
    fn stage_progress_accounting() {
        assert_eq!(stage_progress(Stage::Intake, 0, 4), 0);
        assert_eq!(stage_progress(Stage::Enrich, 2, 4), 37);
        assert_eq!(stage_progress(Stage::Dispatch, 3, 3), 100);
        // empty stage jumps to its end
        assert_eq!(stage_progress(Stage::Personalize, 0, 0), 75);
    }
}
