//! On-demand computation of a summary document from raw feedback.
//!
//! Used when the store has no document for a key. The result is written back
//! so the next read for the same key is served from the store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::aggregate::likert_mean;
use crate::error::SummaryError;
use crate::models::{LikertResult, SummaryData, SummaryDocument, TargetFeedback};
use crate::provider::FeedbackSource;
use crate::store::{SummaryKey, SummaryStore};

/// Builds summary data for a set of feedback targets.
///
/// Targets with fewer than `min_feedback_count` feedbacks (but at least one)
/// are hidden: they count toward `hidden_count` and `feedback_count`, while
/// their answers stay out of the distributions.
pub fn summarize_targets(
    targets: &[TargetFeedback],
    question_ids: &[String],
    min_feedback_count: u64,
) -> SummaryData {
    let questions: HashSet<&str> = question_ids.iter().map(String::as_str).collect();
    let mut distributions: BTreeMap<String, BTreeMap<String, u64>> = question_ids
        .iter()
        .map(|id| (id.clone(), BTreeMap::new()))
        .collect();
    let mut data = SummaryData::default();
    let mut seen = HashSet::new();

    for target in targets {
        if !seen.insert(target.feedback_target_id) {
            continue;
        }

        let feedback_count = target.feedbacks.len() as u64;
        data.student_count += target.student_count;
        data.feedback_count += feedback_count;

        if feedback_count > 0 && feedback_count < min_feedback_count {
            data.hidden_count += feedback_count;
            continue;
        }

        for answer in target.feedbacks.iter().flatten() {
            if !questions.contains(answer.question_id.as_str()) {
                continue;
            }
            let Ok(value) = answer.value.trim().parse::<i64>() else {
                continue;
            };
            if let Some(distribution) = distributions.get_mut(&answer.question_id) {
                *distribution.entry(value.to_string()).or_insert(0) += 1;
            }
        }
    }

    data.feedback_response_percentage = if data.student_count == 0 {
        0.0
    } else {
        data.feedback_count as f64 / data.student_count as f64 * 100.0
    };
    data.result = distributions
        .into_iter()
        .map(|(question_id, distribution)| {
            let mean = likert_mean(&distribution);
            (question_id, LikertResult { mean, distribution })
        })
        .collect();

    data
}

pub struct SummaryComputer<S, F> {
    store: Arc<S>,
    source: Arc<F>,
    timeout: Duration,
    min_feedback_count: u64,
}

impl<S: SummaryStore, F: FeedbackSource> SummaryComputer<S, F> {
    pub fn new(store: Arc<S>, source: Arc<F>, timeout: Duration, min_feedback_count: u64) -> Self {
        Self {
            store,
            source,
            timeout,
            min_feedback_count,
        }
    }

    /// Computes and stores the document for `key`. Reading raw feedback is
    /// bounded by the configured timeout.
    pub async fn compute(&self, key: &SummaryKey) -> Result<SummaryDocument, SummaryError> {
        let fetch = async {
            let question_ids = self.source.summary_question_ids().await?;
            let targets = self
                .source
                .target_feedback(&key.scope_id, key.scope_type, key.window)
                .await?;
            Ok::<_, SummaryError>((question_ids, targets))
        };

        let (question_ids, targets) = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| SummaryError::UpstreamTimeout {
                scope: format!("{} {}", key.scope_type, key.scope_id),
                after: self.timeout,
            })??;

        let doc = SummaryDocument {
            scope_id: key.scope_id.clone(),
            scope_type: key.scope_type,
            start_date: key.window.start_date,
            end_date: key.window.end_date,
            data: summarize_targets(&targets, &question_ids, self.min_feedback_count),
        };
        self.store.put(&doc).await?;

        debug!(
            scope_id = %key.scope_id,
            scope_type = %key.scope_type,
            window = %key.window,
            targets = targets.len(),
            "computed summary"
        );

        Ok(doc)
    }

    /// Stored document for `key`, computing it when missing.
    pub async fn resolve(&self, key: &SummaryKey) -> Result<SummaryDocument, SummaryError> {
        match self.store.get(key).await? {
            Some(doc) => Ok(doc),
            None => self.compute(key).await,
        }
    }
}
