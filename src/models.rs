use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Answer distribution for one Likert question. Option `"0"` means "no answer".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LikertResult {
    pub mean: f64,
    pub distribution: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryData {
    pub result: BTreeMap<String, LikertResult>,
    pub student_count: u64,
    pub hidden_count: u64,
    pub feedback_count: u64,
    pub feedback_response_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeType {
    Organisation,
    CourseUnit,
    CourseRealisation,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Organisation => "organisation",
            ScopeType::CourseUnit => "courseUnit",
            ScopeType::CourseRealisation => "courseRealisation",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "organisation" => Ok(ScopeType::Organisation),
            "courseUnit" => Ok(ScopeType::CourseUnit),
            "courseRealisation" => Ok(ScopeType::CourseRealisation),
            other => Err(format!("unknown scope type {other}")),
        }
    }
}

/// Inclusive date range a summary covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateWindow {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDocument {
    pub scope_id: String,
    pub scope_type: ScopeType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub data: SummaryData,
}

impl SummaryDocument {
    pub fn window(&self) -> DateWindow {
        DateWindow::new(self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone)]
pub struct Organisation {
    pub id: String,
    pub code: String,
    pub name: String,
    pub child_organisation_ids: Vec<String>,
    pub course_unit_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseUnit {
    pub id: String,
    pub name: String,
    pub course_code: String,
}

#[derive(Debug, Clone)]
pub struct FeedbackTargetRef {
    pub id: i64,
    pub course_unit: CourseUnit,
}

#[derive(Debug, Clone)]
pub struct CourseRealisation {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub feedback_targets: Vec<FeedbackTargetRef>,
}

#[derive(Debug, Clone)]
pub struct QuestionAnswer {
    pub question_id: String,
    pub value: String,
}

/// Raw feedback gathered for one feedback target.
#[derive(Debug, Clone, Default)]
pub struct TargetFeedback {
    pub feedback_target_id: i64,
    pub student_count: u64,
    pub feedbacks: Vec<Vec<QuestionAnswer>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseUnitNode {
    pub id: String,
    pub name: String,
    pub course_code: String,
    pub summary: SummaryData,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganisationNode {
    pub id: String,
    pub code: String,
    pub name: String,
    pub summary: SummaryData,
    pub child_organisations: Vec<OrganisationNode>,
    pub course_units: Vec<CourseUnitNode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}
