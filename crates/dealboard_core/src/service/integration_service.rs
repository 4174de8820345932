//! Integration listing and dashboard aggregation service.
//!
//! # Responsibility
//! - Validate filters and paging before the repository is queried.
//! - Expose grouped counts (`total`, kind, brand, channel, tag).
//!
//! # Invariants
//! - Unknown kind filters are rejected, never silently widened.
//! - An empty collection yields zero total and empty buckets.

use crate::clock::{Clock, SystemClock};
use crate::model::integration::{
    Integration, IntegrationFilter, IntegrationId, IntegrationKind, IntegrationValidationError,
    NewIntegration,
};
use crate::repo::integration_repo::{IntegrationCounts, IntegrationRepository};
use crate::repo::RepoError;
use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const DEFAULT_PER_PAGE: u32 = 20;
const MAX_PER_PAGE: u32 = 100;

pub type IntegrationServiceResult<T> = Result<T, IntegrationServiceError>;

/// Errors from integration use-cases.
#[derive(Debug)]
pub enum IntegrationServiceError {
    Validation(IntegrationValidationError),
    IntegrationNotFound(IntegrationId),
    Repo(RepoError),
}

impl Display for IntegrationServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::IntegrationNotFound(id) => write!(f, "integration not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IntegrationServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::IntegrationNotFound(_) => None,
        }
    }
}

impl From<IntegrationValidationError> for IntegrationServiceError {
    fn from(value: IntegrationValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for IntegrationServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::IntegrationNotFound(id),
            RepoError::IntegrationValidation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

/// One entry of the "kinds in use" listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedKind {
    pub kind: IntegrationKind,
    pub name: &'static str,
}

/// Integration service facade.
pub struct IntegrationService<R: IntegrationRepository, C: Clock = SystemClock> {
    repo: R,
    clock: C,
}

impl<R: IntegrationRepository> IntegrationService<R> {
    pub fn new(repo: R) -> Self {
        Self::with_clock(repo, SystemClock)
    }
}

impl<R: IntegrationRepository, C: Clock> IntegrationService<R, C> {
    pub fn with_clock(repo: R, clock: C) -> Self {
        Self { repo, clock }
    }

    pub fn create_integration(
        &self,
        request: NewIntegration,
    ) -> IntegrationServiceResult<Integration> {
        request.validate()?;
        let integration = Integration {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            kind: request.kind,
            brand_id: request.brand_id,
            tag_ids: request.tag_ids,
            created_at: self.clock.now_ms(),
        };
        self.repo.create_integration(&integration)?;
        info!(
            "event=integration_create module=integration_service status=ok integration_id={} kind={}",
            integration.id,
            integration.kind.as_str()
        );
        Ok(integration)
    }

    pub fn get_integration(&self, id: IntegrationId) -> IntegrationServiceResult<Integration> {
        self.repo
            .get_integration(id)?
            .ok_or(IntegrationServiceError::IntegrationNotFound(id))
    }

    /// Lists one page of integrations matching `filter`.
    ///
    /// `page` is 1-based and defaults to 1; `per_page` defaults to 20 and
    /// clamps to 100.
    pub fn list_integrations(
        &self,
        filter: &IntegrationFilter,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> IntegrationServiceResult<Vec<Integration>> {
        filter.resolved_kinds()?;
        let (limit, offset) = page_window(page, per_page)?;
        Ok(self.repo.list_integrations(filter, limit, offset)?)
    }

    /// Grouped counts over integrations matching `filter`.
    pub fn aggregate_counts(
        &self,
        filter: &IntegrationFilter,
    ) -> IntegrationServiceResult<IntegrationCounts> {
        filter.resolved_kinds()?;
        let counts = self.repo.count_integrations(filter)?;
        debug!(
            "event=integration_counts module=integration_service status=ok total={} kinds={} channels={}",
            counts.total,
            counts.by_kind.len(),
            counts.by_channel.len()
        );
        Ok(counts)
    }

    /// Replaces the integrations that belong to `channel_id`.
    pub fn set_channel_integrations(
        &self,
        channel_id: &str,
        integration_ids: &[IntegrationId],
    ) -> IntegrationServiceResult<()> {
        if channel_id.trim().is_empty() {
            return Err(IntegrationValidationError::BlankReference("channel_id").into());
        }
        self.repo.set_channel_integrations(channel_id, integration_ids)?;
        info!(
            "event=channel_members_set module=integration_service status=ok members={}",
            integration_ids.len()
        );
        Ok(())
    }

    pub fn channel_integrations(
        &self,
        channel_id: &str,
    ) -> IntegrationServiceResult<Vec<IntegrationId>> {
        Ok(self.repo.channel_integrations(channel_id)?)
    }

    /// Kinds that currently have at least one integration, with labels.
    pub fn used_kinds(&self) -> IntegrationServiceResult<Vec<UsedKind>> {
        Ok(self
            .repo
            .used_kinds()?
            .into_iter()
            .map(|kind| UsedKind {
                kind,
                name: kind.display_name(),
            })
            .collect())
    }
}

fn page_window(
    page: Option<u32>,
    per_page: Option<u32>,
) -> Result<(u32, u32), IntegrationValidationError> {
    let page = page.unwrap_or(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);
    if page == 0 || per_page == 0 {
        return Err(IntegrationValidationError::InvalidPage { page, per_page });
    }
    let limit = per_page.min(MAX_PER_PAGE);
    let offset = (page - 1).saturating_mul(limit);
    Ok((limit, offset))
}
