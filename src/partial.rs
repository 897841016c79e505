//! Partial course units.
//!
//! Realisations attached to an organisation are not shown on their own. Those
//! whose course unit the organisation does not own are grouped per course unit
//! into a partial course unit that carries only those realisations' data.
//! Realisations of owned course units are dropped, the owned unit already
//! covers them.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::aggregate::combine_summary_documents;
use crate::error::SummaryError;
use crate::models::{CourseRealisation, CourseUnit, CourseUnitNode, SummaryDocument};

/// A realisation counted under a course unit the organisation does not own.
#[derive(Debug, Clone)]
pub struct OrphanRealisation {
    pub realisation: CourseRealisation,
    pub course_unit: CourseUnit,
}

#[derive(Debug, Clone)]
pub struct RealisationSummary {
    pub orphan: OrphanRealisation,
    pub document: SummaryDocument,
    pub degraded: bool,
}

/// Course unit a realisation is counted under: the first feedback target's.
/// Targets disagreeing with it are logged and otherwise ignored.
pub fn attributed_course_unit(realisation: &CourseRealisation) -> Option<&CourseUnit> {
    let first = &realisation.feedback_targets.first()?.course_unit;

    for target in realisation.feedback_targets.iter().skip(1) {
        if target.course_unit.id != first.id {
            let err = SummaryError::InconsistentData(format!(
                "realisation {} ({}) has feedback target {} in course unit {}, using {}",
                realisation.id, realisation.name, target.id, target.course_unit.id, first.id
            ));
            warn!(error = %err, "conflicting course unit attribution");
        }
    }

    Some(first)
}

/// Drops realisations of owned course units and realisations without targets.
pub fn orphan_realisations(
    owned_course_unit_ids: &[String],
    realisations: Vec<CourseRealisation>,
) -> Vec<OrphanRealisation> {
    let owned: HashSet<&str> = owned_course_unit_ids.iter().map(String::as_str).collect();

    realisations
        .into_iter()
        .filter_map(|realisation| {
            let course_unit = attributed_course_unit(&realisation)?.clone();
            if owned.contains(course_unit.id.as_str()) {
                return None;
            }
            Some(OrphanRealisation {
                realisation,
                course_unit,
            })
        })
        .collect()
}

/// One partial course unit per course unit, in first-seen order.
pub fn partial_course_units(orphans: &[RealisationSummary]) -> Vec<CourseUnitNode> {
    let mut groups: Vec<(&CourseUnit, Vec<&RealisationSummary>)> = Vec::new();
    let mut group_index: HashMap<&str, usize> = HashMap::new();

    for entry in orphans {
        let course_unit = &entry.orphan.course_unit;

        match group_index.get(course_unit.id.as_str()) {
            Some(&index) => groups[index].1.push(entry),
            None => {
                group_index.insert(course_unit.id.as_str(), groups.len());
                groups.push((course_unit, vec![entry]));
            }
        }
    }

    groups
        .into_iter()
        .filter_map(|(course_unit, entries)| {
            let docs: Vec<SummaryDocument> = entries.iter().map(|e| e.document.clone()).collect();
            let combined = match combine_summary_documents(&docs) {
                Ok(combined) => combined,
                Err(err) => {
                    warn!(course_unit_id = %course_unit.id, error = %err, "skipping partial course unit");
                    return None;
                }
            };

            Some(CourseUnitNode {
                id: course_unit.id.clone(),
                name: course_unit.name.clone(),
                course_code: course_unit.course_code.clone(),
                summary: combined.data,
                partial: true,
                degraded: entries.iter().any(|e| e.degraded),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedbackTargetRef, LikertResult, ScopeType, SummaryData};
    use crate::testing::{course_unit, summary};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn realisation(id: &str, course_units: &[CourseUnit]) -> CourseRealisation {
        CourseRealisation {
            id: id.to_string(),
            name: format!("Realisation {id}"),
            start_date: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
            feedback_targets: course_units
                .iter()
                .enumerate()
                .map(|(i, cu)| FeedbackTargetRef {
                    id: i as i64,
                    course_unit: cu.clone(),
                })
                .collect(),
        }
    }

    fn orphan(id: &str, cu: &CourseUnit, data: SummaryData) -> RealisationSummary {
        RealisationSummary {
            orphan: OrphanRealisation {
                realisation: realisation(id, std::slice::from_ref(cu)),
                course_unit: cu.clone(),
            },
            document: SummaryDocument {
                scope_id: id.to_string(),
                scope_type: ScopeType::CourseRealisation,
                start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
                data,
            },
            degraded: false,
        }
    }

    fn with_question(mut data: SummaryData, pairs: &[(&str, u64)]) -> SummaryData {
        let distribution: BTreeMap<String, u64> =
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        data.result.insert(
            "1".to_string(),
            LikertResult {
                mean: crate::aggregate::likert_mean(&distribution),
                distribution,
            },
        );
        data
    }

    #[test]
    fn realisations_of_owned_units_are_dropped() {
        let cu1 = course_unit("cu-1", "TKT10001");
        let cu2 = course_unit("cu-2", "MAT11002");
        let realisations = vec![realisation("cur-1", &[cu1]), realisation("cur-2", &[cu2])];

        let orphans = orphan_realisations(&["cu-1".to_string()], realisations);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].realisation.id, "cur-2");
        assert_eq!(orphans[0].course_unit.id, "cu-2");
    }

    #[test]
    fn realisations_without_targets_are_skipped() {
        let orphans = orphan_realisations(&[], vec![realisation("cur-1", &[])]);
        assert!(orphans.is_empty());
    }

    #[test]
    fn conflicting_targets_use_the_first_course_unit() {
        let first = course_unit("cu-1", "A1");
        let second = course_unit("cu-2", "B1");
        let conflicting = realisation("cur-1", &[first, second]);

        assert_eq!(
            attributed_course_unit(&conflicting).map(|cu| cu.id.as_str()),
            Some("cu-1")
        );
        let orphans = orphan_realisations(&["cu-2".to_string()], vec![conflicting]);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].course_unit.id, "cu-1");
    }

    #[test]
    fn shared_course_unit_combines_distributions() {
        let cu3 = course_unit("cu-3", "FYS1001");
        let entries = vec![
            orphan("cur-1", &cu3, with_question(summary(2, 4), &[("5", 2)])),
            orphan("cur-2", &cu3, with_question(summary(4, 8), &[("2", 4)])),
        ];

        let partials = partial_course_units(&entries);
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].summary.feedback_count, 6);
        assert_eq!(partials[0].summary.result["1"].mean, 3.0);
        assert_eq!(partials[0].course_code, "FYS1001");
        assert!(partials[0].partial);
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let a = course_unit("cu-a", "A1");
        let b = course_unit("cu-b", "B1");
        let entries = vec![
            orphan("cur-1", &b, summary(1, 1)),
            orphan("cur-2", &a, summary(1, 1)),
            orphan("cur-3", &b, summary(1, 1)),
        ];

        let ids: Vec<String> = partial_course_units(&entries)
            .into_iter()
            .map(|node| node.id)
            .collect();
        assert_eq!(ids, vec!["cu-b", "cu-a"]);
    }

    #[test]
    fn degraded_realisations_mark_the_partial_unit() {
        let cu = course_unit("cu-1", "A1");
        let mut degraded = orphan("cur-2", &cu, summary(0, 0));
        degraded.degraded = true;
        let partials = partial_course_units(&[orphan("cur-1", &cu, summary(1, 2)), degraded]);
        assert!(partials[0].degraded);
        assert_eq!(partials[0].summary.feedback_count, 1);
    }
}
