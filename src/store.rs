//! Summary document storage.
//!
//! A document is addressed by scope and window together. Readers never filter a
//! stored document by date: a different window is a different key. Writes
//! replace the whole document, which makes concurrent writers last-write-wins
//! per key. Nothing is consistent across keys, so a composed tree may mix
//! documents written at slightly different times.

use std::future::Future;

use crate::error::SummaryError;
use crate::models::{DateWindow, ScopeType, SummaryDocument};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryKey {
    pub scope_id: String,
    pub scope_type: ScopeType,
    pub window: DateWindow,
}

impl SummaryKey {
    pub fn new(scope_id: impl Into<String>, scope_type: ScopeType, window: DateWindow) -> Self {
        Self {
            scope_id: scope_id.into(),
            scope_type,
            window,
        }
    }

    pub fn of(doc: &SummaryDocument) -> Self {
        Self::new(doc.scope_id.clone(), doc.scope_type, doc.window())
    }
}

pub trait SummaryStore: Send + Sync {
    fn get(
        &self,
        key: &SummaryKey,
    ) -> impl Future<Output = Result<Option<SummaryDocument>, SummaryError>> + Send;

    fn put(&self, doc: &SummaryDocument) -> impl Future<Output = Result<(), SummaryError>> + Send;

    /// Keys without a document are left out of the result.
    fn get_many(
        &self,
        keys: &[SummaryKey],
    ) -> impl Future<Output = Result<Vec<SummaryDocument>, SummaryError>> + Send;
}
