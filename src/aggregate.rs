//! Combining Likert distributions and summary data from several scopes.
//!
//! Means are always recomputed from the merged distribution, so combining is
//! associative and commutative. `feedbackResponsePercentage` is the plain mean
//! of the inputs' percentages, not weighted by student count.

use std::collections::BTreeMap;

use crate::error::SummaryError;
use crate::models::{LikertResult, SummaryData, SummaryDocument};

/// Mean over numeric option keys, skipping `"0"` and keys that are not numbers.
pub fn likert_mean(distribution: &BTreeMap<String, u64>) -> f64 {
    let mut total_value = 0.0;
    let mut answered = 0u64;

    for (option, count) in distribution {
        let Ok(value) = option.trim().parse::<f64>() else {
            continue;
        };
        if value == 0.0 {
            continue;
        }
        total_value += value * *count as f64;
        answered += count;
    }

    if answered == 0 {
        0.0
    } else {
        total_value / answered as f64
    }
}

pub fn combine_likert<'a, I>(results: I) -> LikertResult
where
    I: IntoIterator<Item = &'a LikertResult>,
{
    let mut distribution: BTreeMap<String, u64> = BTreeMap::new();

    for result in results {
        for (option, count) in &result.distribution {
            *distribution.entry(option.clone()).or_insert(0) += count;
        }
    }

    LikertResult {
        mean: likert_mean(&distribution),
        distribution,
    }
}

/// Empty input yields `SummaryData::default()`.
pub fn combine_summary_data(list: &[SummaryData]) -> SummaryData {
    if list.is_empty() {
        return SummaryData::default();
    }

    let mut data = SummaryData::default();
    let mut per_question: BTreeMap<&str, Vec<&LikertResult>> = BTreeMap::new();
    let mut percentage_total = 0.0;

    for summary in list {
        data.student_count += summary.student_count;
        data.hidden_count += summary.hidden_count;
        data.feedback_count += summary.feedback_count;
        percentage_total += summary.feedback_response_percentage;

        for (question_id, result) in &summary.result {
            per_question.entry(question_id.as_str()).or_default().push(result);
        }
    }

    data.feedback_response_percentage = percentage_total / list.len() as f64;
    data.result = per_question
        .into_iter()
        .map(|(question_id, results)| (question_id.to_string(), combine_likert(results)))
        .collect();

    data
}

/// The first document's scope id is kept; the window spans all inputs.
pub fn combine_summary_documents(docs: &[SummaryDocument]) -> Result<SummaryDocument, SummaryError> {
    let first = docs.first().ok_or(SummaryError::EmptyInput)?;

    if let Some(other) = docs.iter().find(|doc| doc.scope_type != first.scope_type) {
        return Err(SummaryError::ScopeTypeMismatch {
            expected: first.scope_type,
            found: other.scope_type,
        });
    }

    let start_date = docs.iter().map(|doc| doc.start_date).min().unwrap_or(first.start_date);
    let end_date = docs.iter().map(|doc| doc.end_date).max().unwrap_or(first.end_date);
    let datas: Vec<SummaryData> = docs.iter().map(|doc| doc.data.clone()).collect();

    Ok(SummaryDocument {
        scope_id: first.scope_id.clone(),
        scope_type: first.scope_type,
        start_date,
        end_date,
        data: combine_summary_data(&datas),
    })
}
