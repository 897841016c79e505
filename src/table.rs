//! Filtering and ordering of organisation summary tables.

use std::cmp::Ordering;
use std::str::FromStr;

use crate::models::{CourseUnitNode, OrganisationNode, SummaryData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    CodeAsc,
    FeedbackCount(Direction),
    QuestionMean {
        question_id: String,
        direction: Direction,
    },
}

impl FromStr for OrderBy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CODE_ASC" => Ok(OrderBy::CodeAsc),
            "FEEDBACK_COUNT_ASC" => Ok(OrderBy::FeedbackCount(Direction::Asc)),
            "FEEDBACK_COUNT_DESC" => Ok(OrderBy::FeedbackCount(Direction::Desc)),
            other => {
                let rest = other
                    .strip_prefix("QUESTION_MEAN_")
                    .ok_or_else(|| format!("unknown ordering {other}"))?;
                let (question_id, direction) = rest
                    .rsplit_once('_')
                    .ok_or_else(|| format!("unknown ordering {other}"))?;
                let direction = match direction {
                    "ASC" => Direction::Asc,
                    "DESC" => Direction::Desc,
                    _ => return Err(format!("unknown ordering {other}")),
                };
                if question_id.is_empty() {
                    return Err(format!("unknown ordering {other}"));
                }
                Ok(OrderBy::QuestionMean {
                    question_id: question_id.to_string(),
                    direction,
                })
            }
        }
    }
}

fn course_code_matches(course_code: &str, keyword: &str) -> bool {
    course_code.to_lowercase().contains(keyword)
}

/// Keeps course units whose code contains `keyword`; organisations left
/// without course units are dropped. A blank keyword keeps everything.
pub fn filter_by_course_code(organisations: Vec<OrganisationNode>, keyword: &str) -> Vec<OrganisationNode> {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return organisations;
    }

    organisations
        .into_iter()
        .filter_map(|mut organisation| {
            organisation
                .course_units
                .retain(|cu| course_code_matches(&cu.course_code, &keyword));
            (!organisation.course_units.is_empty()).then_some(organisation)
        })
        .collect()
}

/// Orders organisations and their course units. Organisations without any
/// feedback always end up last, keeping their relative order.
pub fn order_by(mut organisations: Vec<OrganisationNode>, order: &OrderBy) -> Vec<OrganisationNode> {
    for organisation in &mut organisations {
        sort_course_units(&mut organisation.course_units, order);
    }

    match order {
        OrderBy::CodeAsc => organisations.sort_by(|a, b| a.code.cmp(&b.code)),
        OrderBy::FeedbackCount(direction) => organisations.sort_by(|a, b| {
            directed(compare_f64(percentage(&a.summary), percentage(&b.summary)), *direction)
        }),
        OrderBy::QuestionMean {
            question_id,
            direction,
        } => organisations.sort_by(|a, b| {
            directed(
                compare_f64(mean(&a.summary, question_id), mean(&b.summary, question_id)),
                *direction,
            )
        }),
    }

    organisations.sort_by_key(|organisation| organisation.summary.feedback_count == 0);
    organisations
}

fn sort_course_units(course_units: &mut [CourseUnitNode], order: &OrderBy) {
    match order {
        OrderBy::CodeAsc => course_units.sort_by(|a, b| a.course_code.cmp(&b.course_code)),
        OrderBy::FeedbackCount(direction) => course_units.sort_by(|a, b| {
            directed(compare_f64(percentage(&a.summary), percentage(&b.summary)), *direction)
        }),
        OrderBy::QuestionMean {
            question_id,
            direction,
        } => course_units.sort_by(|a, b| {
            directed(
                compare_f64(mean(&a.summary, question_id), mean(&b.summary, question_id)),
                *direction,
            )
        }),
    }
}

fn percentage(summary: &SummaryData) -> f64 {
    summary.feedback_response_percentage
}

fn mean(summary: &SummaryData, question_id: &str) -> f64 {
    summary.result.get(question_id).map(|r| r.mean).unwrap_or(0.0)
}

fn compare_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn directed(ordering: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Asc => ordering,
        Direction::Desc => ordering.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LikertResult;
    use crate::testing::summary;
    use std::collections::BTreeMap;

    fn unit(code: &str, feedback: u64, students: u64) -> CourseUnitNode {
        CourseUnitNode {
            id: code.to_lowercase(),
            name: code.to_string(),
            course_code: code.to_string(),
            summary: summary(feedback, students),
            partial: false,
            degraded: false,
        }
    }

    fn organisation(code: &str, data: SummaryData, course_units: Vec<CourseUnitNode>) -> OrganisationNode {
        OrganisationNode {
            id: code.to_lowercase(),
            code: code.to_string(),
            name: code.to_string(),
            summary: data,
            child_organisations: Vec::new(),
            course_units,
            degraded: false,
        }
    }

    fn with_mean(mut data: SummaryData, question_id: &str, mean: f64) -> SummaryData {
        data.result.insert(
            question_id.to_string(),
            LikertResult {
                mean,
                distribution: BTreeMap::new(),
            },
        );
        data
    }

    #[test]
    fn parses_orderings() {
        assert_eq!("CODE_ASC".parse::<OrderBy>(), Ok(OrderBy::CodeAsc));
        assert_eq!(
            "FEEDBACK_COUNT_DESC".parse::<OrderBy>(),
            Ok(OrderBy::FeedbackCount(Direction::Desc))
        );
        assert_eq!(
            "QUESTION_MEAN_1042_ASC".parse::<OrderBy>(),
            Ok(OrderBy::QuestionMean {
                question_id: "1042".to_string(),
                direction: Direction::Asc,
            })
        );
        assert!("QUESTION_MEAN_ASC".parse::<OrderBy>().is_err());
        assert!("SIDEWAYS".parse::<OrderBy>().is_err());
    }

    #[test]
    fn keyword_filters_course_units_and_drops_empty_organisations() {
        let organisations = vec![
            organisation("H50", summary(1, 2), vec![unit("TKT10001", 1, 2), unit("MAT11002", 1, 2)]),
            organisation("H40", summary(1, 2), vec![unit("KIE101", 1, 2)]),
        ];

        let filtered = filter_by_course_code(organisations.clone(), "  tkt ");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].course_units.len(), 1);
        assert_eq!(filtered[0].course_units[0].course_code, "TKT10001");

        assert_eq!(filter_by_course_code(organisations, " ").len(), 2);
    }

    #[test]
    fn organisations_without_feedback_sort_last() {
        let organisations = vec![
            organisation("A", summary(0, 10), Vec::new()),
            organisation("C", summary(9, 10), Vec::new()),
            organisation("B", summary(2, 10), Vec::new()),
        ];

        let codes: Vec<String> = order_by(organisations, &OrderBy::FeedbackCount(Direction::Desc))
            .into_iter()
            .map(|o| o.code)
            .collect();
        assert_eq!(codes, vec!["C", "B", "A"]);
    }

    #[test]
    fn course_units_follow_the_same_ordering() {
        let organisations = vec![organisation(
            "A",
            summary(5, 10),
            vec![unit("B2", 1, 10), unit("A1", 5, 10), unit("C3", 3, 10)],
        )];

        let ordered = order_by(organisations.clone(), &OrderBy::FeedbackCount(Direction::Asc));
        let codes: Vec<&str> = ordered[0].course_units.iter().map(|cu| cu.course_code.as_str()).collect();
        assert_eq!(codes, vec!["B2", "C3", "A1"]);

        let ordered = order_by(organisations, &OrderBy::CodeAsc);
        let codes: Vec<&str> = ordered[0].course_units.iter().map(|cu| cu.course_code.as_str()).collect();
        assert_eq!(codes, vec!["A1", "B2", "C3"]);
    }

    #[test]
    fn question_means_order_organisations() {
        let organisations = vec![
            organisation("A", with_mean(summary(1, 2), "1", 2.5), Vec::new()),
            organisation("B", with_mean(summary(1, 2), "1", 4.1), Vec::new()),
            organisation("C", summary(1, 2), Vec::new()),
        ];
        let order = OrderBy::QuestionMean {
            question_id: "1".to_string(),
            direction: Direction::Desc,
        };

        let codes: Vec<String> = order_by(organisations, &order).into_iter().map(|o| o.code).collect();
        assert_eq!(codes, vec!["B", "A", "C"]);
    }
}
