//! Organisation summary trees.
//!
//! Every node gets a summary: stored documents are used when present, missing
//! ones are computed on the spot. A node whose computation fails or times out
//! is still returned, with zero data and `degraded` set. Nodes are read
//! independently, so siblings may come from documents written at different
//! times by the cache job.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::compute::SummaryComputer;
use crate::error::SummaryError;
use crate::models::{
    CourseUnit, CourseUnitNode, DateWindow, Organisation, OrganisationNode, ScopeType, SummaryData,
    SummaryDocument,
};
use crate::partial::{orphan_realisations, partial_course_units, RealisationSummary};
use crate::provider::{FeedbackSource, Registry};
use crate::store::{SummaryKey, SummaryStore};

#[derive(Debug, Default)]
struct Resolved {
    data: SummaryData,
    degraded: bool,
}

const DEFAULT_FALLBACK_CONCURRENCY: usize = 4;

pub struct TreeComposer<S, R, F> {
    store: Arc<S>,
    registry: Arc<R>,
    computer: Arc<SummaryComputer<S, F>>,
    /// Bounds concurrent on-demand computations so they do not queue on the
    /// connection pool inside their timeout.
    fallback_permits: Semaphore,
}

impl<S, R, F> TreeComposer<S, R, F>
where
    S: SummaryStore,
    R: Registry,
    F: FeedbackSource,
{
    pub fn new(store: Arc<S>, registry: Arc<R>, computer: Arc<SummaryComputer<S, F>>) -> Self {
        Self {
            store,
            registry,
            computer,
            fallback_permits: Semaphore::new(DEFAULT_FALLBACK_CONCURRENCY),
        }
    }

    pub fn with_fallback_concurrency(mut self, concurrency: usize) -> Self {
        self.fallback_permits = Semaphore::new(concurrency.max(1));
        self
    }

    pub async fn compose_organisation_summary(
        &self,
        organisation_id: &str,
        window: DateWindow,
    ) -> Result<OrganisationNode, SummaryError> {
        let organisation = self.organisation(organisation_id).await?;
        let children = self.child_organisations(&organisation).await?;
        let course_units = self.registry.course_units_by_organisation(organisation_id).await?;

        let mut keys = vec![SummaryKey::new(&organisation.id, ScopeType::Organisation, window)];
        keys.extend(
            children
                .iter()
                .map(|child| SummaryKey::new(&child.id, ScopeType::Organisation, window)),
        );
        keys.extend(
            course_units
                .iter()
                .map(|cu| SummaryKey::new(&cu.id, ScopeType::CourseUnit, window)),
        );
        let mut resolved = self.resolve_all(&keys).await?.into_iter();

        let own = resolved.next().unwrap_or_default();
        let child_nodes: Vec<OrganisationNode> = children
            .into_iter()
            .zip(resolved.by_ref())
            .map(|(child, summary)| leaf_organisation(child, summary))
            .collect();
        let mut course_unit_nodes: Vec<CourseUnitNode> = course_units
            .iter()
            .cloned()
            .zip(resolved)
            .map(|(course_unit, summary)| course_unit_node(course_unit, summary))
            .collect();

        let mut owned_ids = organisation.course_unit_ids.clone();
        owned_ids.extend(course_units.iter().map(|cu| cu.id.clone()));
        course_unit_nodes.extend(self.partial_course_units(&organisation.id, &owned_ids, window).await?);

        debug!(
            organisation_id = %organisation.id,
            window = %window,
            child_organisations = child_nodes.len(),
            course_units = course_unit_nodes.len(),
            "composed organisation summary"
        );

        Ok(OrganisationNode {
            id: organisation.id,
            code: organisation.code,
            name: organisation.name,
            summary: own.data,
            child_organisations: child_nodes,
            course_units: course_unit_nodes,
            degraded: own.degraded,
        })
    }

    pub async fn compose_course_unit_summary(
        &self,
        course_unit_id: &str,
        window: DateWindow,
    ) -> Result<CourseUnitNode, SummaryError> {
        let course_unit = self
            .registry
            .course_unit(course_unit_id)
            .await?
            .ok_or_else(|| SummaryError::not_found(ScopeType::CourseUnit, course_unit_id))?;
        let key = SummaryKey::new(&course_unit.id, ScopeType::CourseUnit, window);
        let summary = self.resolve_all(std::slice::from_ref(&key)).await?.pop().unwrap_or_default();

        Ok(course_unit_node(course_unit, summary))
    }

    /// Fully composed trees for each child organisation, or for the
    /// organisation itself when it has none.
    pub async fn compose_children(
        &self,
        organisation_id: &str,
        window: DateWindow,
    ) -> Result<Vec<OrganisationNode>, SummaryError> {
        let organisation = self.organisation(organisation_id).await?;
        if organisation.child_organisation_ids.is_empty() {
            return Ok(vec![self.compose_organisation_summary(organisation_id, window).await?]);
        }

        let children = self.child_organisations(&organisation).await?;
        try_join_all(
            children
                .iter()
                .map(|child| self.compose_organisation_summary(&child.id, window)),
        )
        .await
    }

    async fn organisation(&self, id: &str) -> Result<Organisation, SummaryError> {
        self.registry
            .organisation(id)
            .await?
            .ok_or_else(|| SummaryError::not_found(ScopeType::Organisation, id))
    }

    async fn child_organisations(&self, organisation: &Organisation) -> Result<Vec<Organisation>, SummaryError> {
        let children = try_join_all(
            organisation
                .child_organisation_ids
                .iter()
                .map(|id| self.registry.organisation(id)),
        )
        .await?;

        Ok(organisation
            .child_organisation_ids
            .iter()
            .zip(children)
            .filter_map(|(id, child)| {
                if child.is_none() {
                    warn!(organisation_id = %organisation.id, child_id = %id, "unknown child organisation");
                }
                child
            })
            .collect())
    }

    async fn partial_course_units(
        &self,
        organisation_id: &str,
        owned_ids: &[String],
        window: DateWindow,
    ) -> Result<Vec<CourseUnitNode>, SummaryError> {
        let realisations = self
            .registry
            .course_realisations_by_organisation(organisation_id, window)
            .await?;
        let orphans = orphan_realisations(owned_ids, realisations);
        if orphans.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<SummaryKey> = orphans
            .iter()
            .map(|orphan| SummaryKey::new(&orphan.realisation.id, ScopeType::CourseRealisation, window))
            .collect();
        let resolved = self.resolve_all(&keys).await?;

        let summaries: Vec<RealisationSummary> = orphans
            .into_iter()
            .zip(keys)
            .zip(resolved)
            .map(|((orphan, key), summary)| RealisationSummary {
                orphan,
                document: SummaryDocument {
                    scope_id: key.scope_id,
                    scope_type: key.scope_type,
                    start_date: key.window.start_date,
                    end_date: key.window.end_date,
                    data: summary.data,
                },
                degraded: summary.degraded,
            })
            .collect();

        Ok(partial_course_units(&summaries))
    }

    /// Summaries in the order of `keys`, falling back to computation for
    /// keys the store does not have.
    async fn resolve_all(&self, keys: &[SummaryKey]) -> Result<Vec<Resolved>, SummaryError> {
        let mut stored: HashMap<SummaryKey, SummaryDocument> = self
            .store
            .get_many(keys)
            .await?
            .into_iter()
            .map(|doc| (SummaryKey::of(&doc), doc))
            .collect();

        let lookups = keys.iter().map(|key| {
            let cached = stored.remove(key);
            async move {
                match cached {
                    Some(doc) => Resolved {
                        data: doc.data,
                        degraded: false,
                    },
                    None => self.fallback(key).await,
                }
            }
        });

        Ok(join_all(lookups).await)
    }

    async fn fallback(&self, key: &SummaryKey) -> Resolved {
        let _permit = self.fallback_permits.acquire().await.ok();
        match self.computer.compute(key).await {
            Ok(doc) => Resolved {
                data: doc.data,
                degraded: false,
            },
            Err(err) => {
                warn!(
                    scope_id = %key.scope_id,
                    scope_type = %key.scope_type,
                    window = %key.window,
                    error = %err,
                    "summary unavailable, returning empty data"
                );
                Resolved {
                    data: SummaryData::default(),
                    degraded: true,
                }
            }
        }
    }
}

fn leaf_organisation(organisation: Organisation, summary: Resolved) -> OrganisationNode {
    OrganisationNode {
        id: organisation.id,
        code: organisation.code,
        name: organisation.name,
        summary: summary.data,
        child_organisations: Vec::new(),
        course_units: Vec::new(),
        degraded: summary.degraded,
    }
}

fn course_unit_node(course_unit: CourseUnit, summary: Resolved) -> CourseUnitNode {
    CourseUnitNode {
        id: course_unit.id,
        name: course_unit.name,
        course_code: course_unit.course_code,
        summary: summary.data,
        partial: false,
        degraded: summary.degraded,
    }
}
