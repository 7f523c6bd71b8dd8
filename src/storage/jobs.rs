//! In-memory batch jobs
//!
//! A submitted playlist runs in the background under a batch id. Its progress
//! table and final result stay queryable until the job has been finished for
//! longer than the configured TTL.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::orchestrator::Orchestrator;
use crate::core::progress::{ProgressReporter, ProgressSnapshot};
use crate::error::{DownloadError, ErrorCode};
use crate::types::{BatchResult, PlaylistRequest};

/// How a finished job ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { message: String, result: BatchResult },
    Failed { message: String, code: ErrorCode },
}

impl JobOutcome {
    fn from_run(run: Result<BatchResult, DownloadError>) -> Self {
        match run {
            Ok(result) => Self::Completed {
                message: result.summary(),
                result,
            },
            Err(e) => Self::Failed {
                message: e.to_string(),
                code: e.code(),
            },
        }
    }
}

struct Finished {
    at: DateTime<Utc>,
    outcome: JobOutcome,
}

pub struct Job {
    id: Uuid,
    request_url: String,
    created_at: DateTime<Utc>,
    progress: ProgressReporter,
    cancel: CancellationToken,
    finished: Mutex<Option<Finished>>,
}

impl Job {
    fn finish(&self, outcome: JobOutcome) {
        if let Ok(mut finished) = self.finished.lock() {
            *finished = Some(Finished {
                at: Utc::now(),
                outcome,
            });
        }
    }

    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished
            .lock()
            .ok()
            .and_then(|f| f.as_ref().map(|f| f.at))
    }

    pub fn view(&self) -> JobView {
        let (finished_at, outcome) = match self.finished.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(f) => (Some(f.at), Some(f.outcome.clone())),
                None => (None, None),
            },
            Err(_) => (None, None),
        };

        JobView {
            batch_id: self.id,
            request_url: self.request_url.clone(),
            created_at: self.created_at,
            finished_at,
            cancel_requested: self.cancel.is_cancelled(),
            progress: self.progress.snapshot(),
            outcome,
        }
    }
}

/// What `GET /jobs/{id}` returns
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub batch_id: Uuid,
    pub request_url: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub progress: ProgressSnapshot,
    pub outcome: Option<JobOutcome>,
}

pub struct JobRegistry {
    jobs: DashMap<Uuid, Arc<Job>>,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            ttl,
        }
    }

    /// Start `request` in the background and return its batch id
    pub fn submit(&self, orchestrator: Arc<Orchestrator>, request: PlaylistRequest) -> Uuid {
        self.sweep();

        let job = Arc::new(Job {
            id: Uuid::new_v4(),
            request_url: request.url.clone(),
            created_at: Utc::now(),
            progress: ProgressReporter::new(),
            cancel: CancellationToken::new(),
            finished: Mutex::new(None),
        });
        let id = job.id;
        self.jobs.insert(id, Arc::clone(&job));

        info!(batch_id = %id, url = %request.url, "job submitted");
        tokio::spawn(async move {
            let run = orchestrator.run(&request, &job.progress, &job.cancel).await;
            job.finish(JobOutcome::from_run(run));
            info!(batch_id = %job.id, "job finished");
        });

        id
    }

    pub fn get(&self, id: &Uuid) -> Option<JobView> {
        self.jobs.get(id).map(|job| job.view())
    }

    /// Request cancellation; false if the id is unknown
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.jobs.get(id) {
            Some(job) => {
                info!(batch_id = %id, "job cancel requested");
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every job still running
    pub fn cancel_all(&self) {
        for job in self.jobs.iter() {
            job.cancel.cancel();
        }
    }

    /// Drop jobs finished longer ago than the TTL; returns how many went
    pub fn sweep(&self) -> usize {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let before = self.jobs.len();

        self.jobs.retain(|_, job| match job.finished_at() {
            Some(at) => now - at < ttl,
            None => true,
        });

        let removed = before.saturating_sub(self.jobs.len());
        if removed > 0 {
            debug!(removed, "swept finished jobs");
        }
        removed
    }

    /// Sweep on a fixed tick until `shutdown` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        registry.sweep();
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::namer::OutputNamer;
    use crate::core::testing::ScriptedExtractor;
    use crate::types::{BatchState, FormatSpec, OverallStatus};
    use std::collections::HashSet;

    fn orchestrator(extractor: ScriptedExtractor, root: &std::path::Path) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            Arc::new(extractor),
            OutputNamer::new(root),
            FormatSpec::default(),
        ))
    }

    fn request() -> PlaylistRequest {
        PlaylistRequest {
            url: "https://example.com/playlist?list=PL1".into(),
        }
    }

    async fn wait_for_outcome(registry: &JobRegistry, id: &Uuid) -> JobView {
        for _ in 0..200 {
            let view = registry.get(id).unwrap();
            if view.outcome.is_some() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", id);
    }

    #[tokio::test]
    async fn submitted_job_runs_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(Duration::from_secs(60));

        let id = registry.submit(
            orchestrator(ScriptedExtractor::with_items(2), tmp.path()),
            request(),
        );
        let view = wait_for_outcome(&registry, &id).await;

        assert_eq!(view.batch_id, id);
        assert_eq!(view.progress.state, BatchState::Done);
        assert_eq!(view.progress.total_items, 2);
        match view.outcome {
            Some(JobOutcome::Completed { result, .. }) => {
                assert_eq!(result.overall_status, OverallStatus::AllSucceeded)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolution_failure_is_reported_with_code() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(Duration::from_secs(60));
        let extractor = ScriptedExtractor {
            unresolvable: true,
            ..Default::default()
        };

        let id = registry.submit(orchestrator(extractor, tmp.path()), request());
        let view = wait_for_outcome(&registry, &id).await;

        match view.outcome {
            Some(JobOutcome::Failed { code, .. }) => assert_eq!(code, ErrorCode::ResolutionError),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_stops_a_running_job() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(Duration::from_secs(60));
        let extractor = ScriptedExtractor {
            hanging: HashSet::from([1]),
            ..ScriptedExtractor::with_items(1)
        };

        let id = registry.submit(orchestrator(extractor, tmp.path()), request());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.cancel(&id));

        let view = wait_for_outcome(&registry, &id).await;
        assert!(view.cancel_requested);
        match view.outcome {
            Some(JobOutcome::Completed { result, .. }) => {
                assert_eq!(result.outcomes[0].error_code, Some(ErrorCode::Cancelled))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        assert!(registry.get(&id).is_none());
        assert!(!registry.cancel(&id));
    }

    #[tokio::test]
    async fn finished_jobs_expire_but_running_ones_stay() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(Duration::ZERO);

        let done = registry.submit(
            orchestrator(ScriptedExtractor::with_items(1), tmp.path()),
            request(),
        );
        wait_for_outcome(&registry, &done).await;

        let running = registry.submit(
            orchestrator(
                ScriptedExtractor {
                    hanging: HashSet::from([1]),
                    ..ScriptedExtractor::with_items(1)
                },
                tmp.path(),
            ),
            request(),
        );

        // The second submit already swept the finished job
        assert!(registry.get(&done).is_none());
        assert!(registry.get(&running).is_some());
        assert_eq!(registry.sweep(), 0);
        assert_eq!(registry.len(), 1);

        registry.cancel_all();
    }
}
