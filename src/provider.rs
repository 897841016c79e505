use std::future::Future;

use crate::error::SummaryError;
use crate::models::{
    CourseRealisation, CourseUnit, DateWindow, Organisation, ScopeType, TargetFeedback,
};

/// Structural data about organisations, course units and realisations.
pub trait Registry: Send + Sync {
    fn organisation_ids(&self) -> impl Future<Output = Result<Vec<String>, SummaryError>> + Send;

    fn organisation(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Organisation>, SummaryError>> + Send;

    fn course_unit(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<CourseUnit>, SummaryError>> + Send;

    fn course_units_by_organisation(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Vec<CourseUnit>, SummaryError>> + Send;

    /// Realisations attached to the organisation that start inside the window,
    /// each with its feedback targets and their course units.
    fn course_realisations_by_organisation(
        &self,
        id: &str,
        window: DateWindow,
    ) -> impl Future<Output = Result<Vec<CourseRealisation>, SummaryError>> + Send;
}

/// Raw answers, read only when a summary has to be computed on demand.
pub trait FeedbackSource: Send + Sync {
    fn summary_question_ids(&self) -> impl Future<Output = Result<Vec<String>, SummaryError>> + Send;

    fn target_feedback(
        &self,
        scope_id: &str,
        scope_type: ScopeType,
        window: DateWindow,
    ) -> impl Future<Output = Result<Vec<TargetFeedback>, SummaryError>> + Send;
}
