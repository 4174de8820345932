//! Deal use-case service.
//!
//! # Responsibility
//! - Guard conversions: one deal per source conversation.
//! - Move deals between stages and persist caller-supplied stage orders.
//! - Toggle watcher membership idempotently.
//!
//! # Invariants
//! - Validation errors are raised before any repository call.
//! - `update_order` never renumbers; it writes exactly the pairs it is given.
//! - Leaving a stage does not compact the orders left behind.

use crate::clock::{Clock, SystemClock};
use crate::model::deal::{
    validate_stage_id, Deal, DealId, DealPatch, DealValidationError, NewDeal, OrderItem, StageId,
    UserId,
};
use crate::repo::deal_repo::{DealListQuery, DealRepository, DealTotalAmounts};
use crate::repo::RepoError;
use log::{info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DealServiceResult<T> = Result<T, DealServiceError>;

/// Errors from deal use-cases.
#[derive(Debug)]
pub enum DealServiceError {
    /// Request rejected before touching the store.
    Validation(DealValidationError),
    /// Same deal listed twice in one reorder request.
    DuplicateOrderEntry(DealId),
    DealNotFound(DealId),
    /// Source conversation already produced a deal.
    AlreadyConverted(String),
    Repo(RepoError),
}

impl Display for DealServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::DuplicateOrderEntry(id) => {
                write!(f, "deal {id} appears more than once in order request")
            }
            Self::DealNotFound(id) => write!(f, "deal not found: {id}"),
            Self::AlreadyConverted(source) => {
                write!(f, "already converted a deal from conversation {source}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DealServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DealValidationError> for DealServiceError {
    fn from(value: DealValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for DealServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::DealNotFound(id),
            RepoError::AlreadyConverted(source) => Self::AlreadyConverted(source),
            RepoError::DealValidation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

/// Reorder entry that could not be applied.
#[derive(Debug)]
pub struct OrderUpdateFailure {
    pub id: DealId,
    pub error: DealServiceError,
}

/// Result of one reorder request.
#[derive(Debug, Default)]
pub struct OrderUpdateOutcome {
    /// Updated deals sorted by `order ASC, created_at ASC`.
    pub updated: Vec<Deal>,
    /// Entries that failed, in request order. Siblings are unaffected.
    pub failed: Vec<OrderUpdateFailure>,
}

impl OrderUpdateOutcome {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.failed.is_empty()
    }
}

/// Deal service facade.
pub struct DealService<R: DealRepository, C: Clock = SystemClock> {
    repo: R,
    clock: C,
}

impl<R: DealRepository> DealService<R> {
    /// Creates a service on wall-clock time.
    pub fn new(repo: R) -> Self {
        Self::with_clock(repo, SystemClock)
    }
}

impl<R: DealRepository, C: Clock> DealService<R, C> {
    /// Creates a service with an explicit time source.
    pub fn with_clock(repo: R, clock: C) -> Self {
        Self { repo, clock }
    }

    /// Loads one deal or fails with `DealNotFound`.
    pub fn get_deal(&self, id: DealId) -> DealServiceResult<Deal> {
        self.repo
            .get_deal(id)?
            .ok_or(DealServiceError::DealNotFound(id))
    }

    /// Creates a deal, converting at most once per source conversation.
    ///
    /// # Contract
    /// - Fails with `AlreadyConverted` and writes nothing when another deal
    ///   already holds `source_conversation_id`.
    /// - Appends to the end of the stage when `order` is absent.
    pub fn create_deal(&self, request: NewDeal) -> DealServiceResult<Deal> {
        request.validate()?;

        if let Some(source) = request.source_conversation_id.as_deref() {
            if self.repo.find_by_source_conversation(source)?.is_some() {
                warn!(
                    "event=deal_create module=deal_service status=rejected reason=already_converted"
                );
                return Err(DealServiceError::AlreadyConverted(source.to_string()));
            }
        }

        let order = match request.order {
            Some(order) => order,
            None => self.repo.next_order(&request.stage_id)?,
        };
        let deal = Deal::from_new(request, order, self.clock.now_ms());
        self.repo.create_deal(&deal)?;

        info!(
            "event=deal_create module=deal_service status=ok deal_id={} converted={}",
            deal.id,
            deal.source_conversation_id.is_some()
        );
        Ok(deal)
    }

    /// Applies a partial patch. Fields absent from `patch` keep their values.
    pub fn update_deal(&self, id: DealId, patch: DealPatch) -> DealServiceResult<Deal> {
        patch.validate()?;
        let deal = self.repo.update_deal(id, &patch, self.clock.now_ms())?;
        info!(
            "event=deal_update module=deal_service status=ok deal_id={} stage_changed={}",
            deal.id,
            patch.stage_id.is_some()
        );
        Ok(deal)
    }

    /// Moves one deal to `destination_stage_id`.
    ///
    /// Keeps the current order unless `order` is supplied; the source stage
    /// is not renumbered.
    pub fn change_stage(
        &self,
        id: DealId,
        destination_stage_id: impl Into<StageId>,
        order: Option<i64>,
        modified_by: Option<UserId>,
    ) -> DealServiceResult<Deal> {
        let patch = DealPatch {
            stage_id: Some(destination_stage_id.into()),
            order,
            modified_by,
            ..DealPatch::default()
        };
        self.update_deal(id, patch)
    }

    /// Persists caller-supplied orders for deals in `stage_id`.
    ///
    /// # Contract
    /// - Empty `orders` returns an empty outcome without store access.
    /// - Every entry is force-moved into `stage_id`.
    /// - Entries are applied independently; failures are reported per entry.
    pub fn update_order(
        &self,
        stage_id: &str,
        orders: &[OrderItem],
    ) -> DealServiceResult<OrderUpdateOutcome> {
        if orders.is_empty() {
            return Ok(OrderUpdateOutcome::default());
        }
        validate_stage_id(stage_id)?;

        let mut seen = HashSet::with_capacity(orders.len());
        for item in orders {
            if !seen.insert(item.id) {
                return Err(DealServiceError::DuplicateOrderEntry(item.id));
            }
        }

        let updates: Vec<(DealId, DealPatch)> = orders
            .iter()
            .map(|item| (item.id, DealPatch::place(stage_id, item.order)))
            .collect();
        let results = self.repo.batch_update(&updates, self.clock.now_ms());

        let mut outcome = OrderUpdateOutcome::default();
        for ((id, _), result) in updates.iter().zip(results) {
            match result {
                Ok(deal) => outcome.updated.push(deal),
                Err(err) => outcome.failed.push(OrderUpdateFailure {
                    id: *id,
                    error: err.into(),
                }),
            }
        }
        outcome
            .updated
            .sort_by(|a, b| a.order.cmp(&b.order).then(a.created_at.cmp(&b.created_at)));

        if outcome.failed.is_empty() {
            info!(
                "event=deal_reorder module=deal_service status=ok updated={}",
                outcome.updated.len()
            );
        } else {
            warn!(
                "event=deal_reorder module=deal_service status=partial updated={} failed={}",
                outcome.updated.len(),
                outcome.failed.len()
            );
        }
        Ok(outcome)
    }

    /// Adds (`is_add = true`) or removes a watcher.
    ///
    /// Repeating the same call is a successful no-op and emits no event.
    pub fn set_watch(&self, id: DealId, is_add: bool, user_id: &str) -> DealServiceResult<Deal> {
        if user_id.trim().is_empty() {
            return Err(DealValidationError::BlankReference("user_id").into());
        }
        let changed = self.repo.set_watcher(id, user_id, is_add)?;
        if changed {
            info!(
                "event=deal_watch module=deal_service status=ok deal_id={id} watching={is_add}"
            );
        }
        self.get_deal(id)
    }

    /// Lists deals by `query.sort`, then `order ASC, created_at ASC`.
    pub fn list_deals(&self, query: &DealListQuery) -> DealServiceResult<Vec<Deal>> {
        Ok(self.repo.list_deals(query)?)
    }

    /// Deal count and per-currency totals for one filter.
    pub fn total_amounts(&self, query: &DealListQuery) -> DealServiceResult<DealTotalAmounts> {
        Ok(self.repo.total_amounts(query)?)
    }
}
