//! Cache population job.
//!
//! Recomputes and stores summary documents for every organisation over the
//! cached windows. Organisations are processed concurrently; one failing
//! organisation is logged and recorded in the report without stopping the
//! others. A run started while one is already in progress in this process is
//! skipped. Separate processes may still overlap, which is safe because every
//! write replaces a whole document.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::compute::SummaryComputer;
use crate::error::SummaryError;
use crate::models::{DateWindow, ScopeType};
use crate::provider::{FeedbackSource, Registry};
use crate::store::{SummaryKey, SummaryStore};
use crate::windows;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub concurrency: usize,
    pub all_time_since: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganisationFailure {
    pub organisation_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub windows: Vec<DateWindow>,
    pub organisations: usize,
    pub documents_written: usize,
    pub failures: Vec<OrganisationFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RunOutcome {
    Completed(RunReport),
    Skipped,
}

pub struct CachePopulationJob<S, R, F> {
    registry: Arc<R>,
    computer: Arc<SummaryComputer<S, F>>,
    settings: JobSettings,
    running: Mutex<()>,
}

impl<S, R, F> CachePopulationJob<S, R, F>
where
    S: SummaryStore,
    R: Registry,
    F: FeedbackSource,
{
    pub fn new(registry: Arc<R>, computer: Arc<SummaryComputer<S, F>>, settings: JobSettings) -> Self {
        Self {
            registry,
            computer,
            settings,
            running: Mutex::new(()),
        }
    }

    pub fn state(&self) -> JobState {
        match self.running.try_lock() {
            Ok(_) => JobState::Idle,
            Err(_) => JobState::Running,
        }
    }

    pub async fn run(&self) -> Result<RunOutcome, SummaryError> {
        self.run_on(windows::today()).await
    }

    /// Runs with windows derived from `today`.
    pub async fn run_on(&self, today: NaiveDate) -> Result<RunOutcome, SummaryError> {
        let Ok(_guard) = self.running.try_lock() else {
            info!("cache population already running, skipping");
            return Ok(RunOutcome::Skipped);
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("populate_cache", %run_id);
        self.populate(run_id, today).instrument(span).await.map(RunOutcome::Completed)
    }

    async fn populate(&self, run_id: Uuid, today: NaiveDate) -> Result<RunReport, SummaryError> {
        let windows = windows::cached_windows(today, self.settings.all_time_since)?;
        let organisation_ids = self.registry.organisation_ids().await?;
        info!(organisations = organisation_ids.len(), windows = windows.len(), "populating summary cache");

        let permits = Semaphore::new(self.settings.concurrency.max(1));
        let cached_windows = windows.as_slice();
        let tasks = organisation_ids.iter().map(|id| {
            let permits = &permits;
            async move {
                let result = match permits.acquire().await {
                    Ok(_permit) => self.populate_organisation(id, cached_windows).await,
                    Err(_) => Ok(0),
                };
                (id.clone(), result)
            }
        });
        let results: Vec<(String, Result<usize, SummaryError>)> = join_all(tasks).await;

        let mut documents_written = 0;
        let mut failures = Vec::new();
        for (organisation_id, result) in results {
            match result {
                Ok(written) => documents_written += written,
                Err(err) => {
                    error!(organisation_id = %organisation_id, error = %err, "failed to cache organisation summaries");
                    failures.push(OrganisationFailure {
                        organisation_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(documents_written, failures = failures.len(), "summary cache populated");

        Ok(RunReport {
            run_id,
            windows,
            organisations: organisation_ids.len(),
            documents_written,
            failures,
        })
    }

    /// Organisation, owned course unit and attached realisation documents.
    async fn populate_organisation(&self, id: &str, windows: &[DateWindow]) -> Result<usize, SummaryError> {
        let course_units = self.registry.course_units_by_organisation(id).await?;
        let mut written = 0;

        for window in windows {
            let realisations = self.registry.course_realisations_by_organisation(id, *window).await?;

            let mut keys = vec![SummaryKey::new(id, ScopeType::Organisation, *window)];
            keys.extend(
                course_units
                    .iter()
                    .map(|cu| SummaryKey::new(&cu.id, ScopeType::CourseUnit, *window)),
            );
            keys.extend(
                realisations
                    .iter()
                    .map(|cur| SummaryKey::new(&cur.id, ScopeType::CourseRealisation, *window)),
            );

            for key in &keys {
                self.computer.compute(key).await?;
                written += 1;
            }
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuestionAnswer, TargetFeedback};
    use crate::testing::{course_unit, MemoryRegistry, MemoryStore, StaticFeedback};
    use std::time::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 3, 15).unwrap()
    }

    fn registry() -> MemoryRegistry {
        MemoryRegistry::default()
            .with_organisation("x", &[], &["cu-x"])
            .with_organisation("y", &[], &["cu-y"])
            .with_organisation("z", &[], &[])
            .with_course_unit("cu-x", "X1")
            .with_course_unit("cu-y", "Y1")
            .with_realisation("z", "cr-z", &[course_unit("cu-y", "Y1")])
    }

    fn job(
        store: Arc<MemoryStore>,
        source: StaticFeedback,
        all_time_since: Option<NaiveDate>,
    ) -> CachePopulationJob<MemoryStore, MemoryRegistry, StaticFeedback> {
        let computer = Arc::new(SummaryComputer::new(store, Arc::new(source), Duration::from_secs(1), 1));
        CachePopulationJob::new(
            Arc::new(registry()),
            computer,
            JobSettings {
                concurrency: 2,
                all_time_since,
            },
        )
    }

    fn completed(outcome: RunOutcome) -> RunReport {
        match outcome {
            RunOutcome::Completed(report) => report,
            RunOutcome::Skipped => panic!("run was skipped"),
        }
    }

    #[tokio::test]
    async fn failing_organisation_does_not_stop_the_run() {
        let store = Arc::new(MemoryStore::default());
        let source = StaticFeedback::default().with_failure("x");

        let report = completed(job(store.clone(), source, None).run_on(today()).await.unwrap());

        assert_eq!(report.organisations, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].organisation_id, "x");
        let year = windows::year_window(today()).unwrap();
        for (id, scope_type) in [
            ("y", ScopeType::Organisation),
            ("cu-y", ScopeType::CourseUnit),
            ("z", ScopeType::Organisation),
            ("cr-z", ScopeType::CourseRealisation),
        ] {
            let key = SummaryKey::new(id, scope_type, year);
            assert!(store.get(&key).await.unwrap().is_some(), "{id} not cached");
        }
        assert!(store
            .get(&SummaryKey::new("x", ScopeType::Organisation, year))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn every_window_is_written() {
        let store = Arc::new(MemoryStore::default());
        let since = NaiveDate::from_ymd_opt(2017, 1, 1);

        let report = completed(job(store.clone(), StaticFeedback::default(), since).run_on(today()).await.unwrap());

        // x: org + cu, y: org + cu, z: org + realisation; three windows each
        assert_eq!(report.windows.len(), 3);
        assert_eq!(report.documents_written, 18);
        assert!(report.failures.is_empty());
        assert_eq!(store.len().await, 18);
    }

    #[tokio::test]
    async fn reruns_overwrite_documents() {
        let store = Arc::new(MemoryStore::default());
        let source = StaticFeedback::default().with_targets(
            "cu-y",
            vec![TargetFeedback {
                feedback_target_id: 1,
                student_count: 3,
                feedbacks: vec![vec![QuestionAnswer {
                    question_id: "1".to_string(),
                    value: "4".to_string(),
                }]],
            }],
        );
        let job = job(store.clone(), source, None);

        completed(job.run_on(today()).await.unwrap());
        completed(job.run_on(today()).await.unwrap());

        assert_eq!(store.len().await, 12);
        assert_eq!(store.put_count(), 24);
        let doc = store
            .get(&SummaryKey::new("cu-y", ScopeType::CourseUnit, windows::year_window(today()).unwrap()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.data.feedback_count, 1);
        assert_eq!(job.state(), JobState::Idle);
    }

    #[tokio::test]
    async fn overlapping_runs_are_skipped() {
        let store = Arc::new(MemoryStore::default());
        let source = StaticFeedback::default().with_delay(Duration::from_millis(20));
        let job = job(store, source, None);

        let (first, second) = tokio::join!(job.run_on(today()), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_eq!(job.state(), JobState::Running);
            job.run_on(today()).await
        });

        assert!(matches!(first.unwrap(), RunOutcome::Completed(_)));
        assert!(matches!(second.unwrap(), RunOutcome::Skipped));
    }
}
