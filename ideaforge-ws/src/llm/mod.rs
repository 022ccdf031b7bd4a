//! External collaborator seams
//!
//! The coordinator's three suspension points are behind these traits:
//! idea contribution for AI surrogates, semantic grouping of the idea
//! set, and impact/effort labelling of the selected cluster's ideas.
//! Implementations may perform network I/O; every call goes through
//! [`with_timeout`] so a hung collaborator cannot stall a session, and
//! a cancelled call leaves session state untouched.

pub mod chat;

use async_trait::async_trait;
use ideaforge_common::model::{Idea, IdeaLabel, IDEAS_PER_BATCH};
use ideaforge_common::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::session::clusters::ClusterDraft;

/// Default per-call timeout for collaborator I/O
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

/// Everything the idea contributor sees: the surrogate's identity, the
/// round, all ideas already on the currently-held sheet, and the
/// session's company context
#[derive(Debug, Clone)]
pub struct ContributionRequest {
    pub participant_name: String,
    pub round: u8,
    pub sheet_ideas: Vec<String>,
    pub company_context: Option<String>,
}

/// Produces three ideas for an AI surrogate's currently-held sheet
#[async_trait]
pub trait IdeaContributor: Send + Sync {
    async fn generate(&self, request: &ContributionRequest)
        -> Result<[String; IDEAS_PER_BATCH]>;
}

/// Groups the full idea set into named, rationale-carrying clusters.
/// Output is untrusted; the cluster builder validates it.
#[async_trait]
pub trait SemanticGrouper: Send + Sync {
    async fn group(
        &self,
        ideas: &[Idea],
        company_context: Option<&str>,
    ) -> Result<Vec<ClusterDraft>>;
}

/// Labels the ideas of the selected cluster with impact/effort attributes
#[async_trait]
pub trait IdeaAssessor: Send + Sync {
    async fn assess(
        &self,
        ideas: &[Idea],
        company_context: Option<&str>,
    ) -> Result<Vec<IdeaLabel>>;
}

/// Bundle of configured collaborators. Any of the three may be absent:
/// idea generation then reports unavailability, clustering always takes
/// the deterministic fallback, and assessment soft-fails.
#[derive(Clone)]
pub struct Collaborators {
    pub contributor: Option<Arc<dyn IdeaContributor>>,
    pub grouper: Option<Arc<dyn SemanticGrouper>>,
    pub assessor: Option<Arc<dyn IdeaAssessor>>,
    pub call_timeout: Duration,
}

impl Collaborators {
    /// No collaborators configured
    pub fn disabled() -> Self {
        Self {
            contributor: None,
            grouper: None,
            assessor: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Bound a collaborator call. Timeout maps to `ExternalUnavailable`;
/// the underlying future is dropped, so no half-finished work is
/// observed by the caller.
pub async fn with_timeout<T, F>(timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::ExternalUnavailable(format!(
            "collaborator call timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let out = with_timeout(Duration::from_secs(1), async { Ok(7u32) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed_to_external_unavailable() {
        let out: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(out.unwrap_err(), Error::ExternalUnavailable(_)));
    }
}
