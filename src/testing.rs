//! In-memory stand-ins for the store and providers, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::SummaryError;
use crate::models::{
    CourseRealisation, CourseUnit, DateWindow, FeedbackTargetRef, Organisation, ScopeType,
    SummaryData, SummaryDocument, TargetFeedback,
};
use crate::provider::{FeedbackSource, Registry};
use crate::store::{SummaryKey, SummaryStore};

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<SummaryKey, SummaryDocument>>,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub async fn insert(&self, doc: SummaryDocument) {
        self.documents.write().await.insert(SummaryKey::of(&doc), doc);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

impl SummaryStore for MemoryStore {
    async fn get(&self, key: &SummaryKey) -> Result<Option<SummaryDocument>, SummaryError> {
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn put(&self, doc: &SummaryDocument) -> Result<(), SummaryError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.documents
            .write()
            .await
            .insert(SummaryKey::of(doc), doc.clone());
        Ok(())
    }

    async fn get_many(&self, keys: &[SummaryKey]) -> Result<Vec<SummaryDocument>, SummaryError> {
        let documents = self.documents.read().await;
        Ok(keys.iter().filter_map(|key| documents.get(key).cloned()).collect())
    }
}

#[derive(Default)]
pub struct StaticFeedback {
    targets: HashMap<String, Vec<TargetFeedback>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StaticFeedback {
    pub fn with_targets(mut self, scope_id: &str, targets: Vec<TargetFeedback>) -> Self {
        self.targets.insert(scope_id.to_string(), targets);
        self
    }

    pub fn with_failure(mut self, scope_id: &str) -> Self {
        self.failing.insert(scope_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Most `target_feedback` calls observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl FeedbackSource for StaticFeedback {
    async fn summary_question_ids(&self) -> Result<Vec<String>, SummaryError> {
        Ok(vec!["1".to_string()])
    }

    async fn target_feedback(
        &self,
        scope_id: &str,
        _scope_type: ScopeType,
        _window: DateWindow,
    ) -> Result<Vec<TargetFeedback>, SummaryError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(scope_id) {
            return Err(SummaryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.targets.get(scope_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryRegistry {
    organisations: Vec<Organisation>,
    course_units: Vec<CourseUnit>,
    realisations: HashMap<String, Vec<CourseRealisation>>,
}

impl MemoryRegistry {
    pub fn with_organisation(
        mut self,
        id: &str,
        children: &[&str],
        course_units: &[&str],
    ) -> Self {
        self.organisations.push(Organisation {
            id: id.to_string(),
            code: id.to_uppercase(),
            name: format!("Organisation {id}"),
            child_organisation_ids: children.iter().map(|c| c.to_string()).collect(),
            course_unit_ids: course_units.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn with_course_unit(mut self, id: &str, course_code: &str) -> Self {
        self.course_units.push(course_unit(id, course_code));
        self
    }

    /// Attaches a realisation whose feedback targets point at `target_course_units`.
    pub fn with_realisation(
        mut self,
        organisation_id: &str,
        id: &str,
        target_course_units: &[CourseUnit],
    ) -> Self {
        let feedback_targets = target_course_units
            .iter()
            .enumerate()
            .map(|(index, course_unit)| FeedbackTargetRef {
                id: index as i64 + 1,
                course_unit: course_unit.clone(),
            })
            .collect();
        self.realisations
            .entry(organisation_id.to_string())
            .or_default()
            .push(CourseRealisation {
                id: id.to_string(),
                name: format!("Realisation {id}"),
                start_date: chrono::NaiveDate::from_ymd_opt(2023, 2, 1).unwrap_or_default(),
                feedback_targets,
            });
        self
    }
}

pub fn course_unit(id: &str, course_code: &str) -> CourseUnit {
    CourseUnit {
        id: id.to_string(),
        name: format!("Course {course_code}"),
        course_code: course_code.to_string(),
    }
}

pub fn summary(feedback_count: u64, student_count: u64) -> SummaryData {
    SummaryData {
        student_count,
        feedback_count,
        feedback_response_percentage: if student_count == 0 {
            0.0
        } else {
            feedback_count as f64 / student_count as f64 * 100.0
        },
        ..SummaryData::default()
    }
}

impl Registry for MemoryRegistry {
    async fn organisation_ids(&self) -> Result<Vec<String>, SummaryError> {
        Ok(self.organisations.iter().map(|o| o.id.clone()).collect())
    }

    async fn organisation(&self, id: &str) -> Result<Option<Organisation>, SummaryError> {
        Ok(self.organisations.iter().find(|o| o.id == id).cloned())
    }

    async fn course_unit(&self, id: &str) -> Result<Option<CourseUnit>, SummaryError> {
        Ok(self.course_units.iter().find(|c| c.id == id).cloned())
    }

    async fn course_units_by_organisation(&self, id: &str) -> Result<Vec<CourseUnit>, SummaryError> {
        let Some(organisation) = self.organisations.iter().find(|o| o.id == id) else {
            return Ok(Vec::new());
        };
        Ok(self
            .course_units
            .iter()
            .filter(|c| organisation.course_unit_ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn course_realisations_by_organisation(
        &self,
        id: &str,
        window: DateWindow,
    ) -> Result<Vec<CourseRealisation>, SummaryError> {
        Ok(self
            .realisations
            .get(id)
            .map(|realisations| {
                realisations
                    .iter()
                    .filter(|r| window.contains(r.start_date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
