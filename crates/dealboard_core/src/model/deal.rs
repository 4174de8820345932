//! Deal domain model.
//!
//! # Responsibility
//! - Define the canonical stage-owned record moved through a pipeline.
//! - Define the explicit partial-update shape (`DealPatch`) and its checks.
//!
//! # Invariants
//! - `id` is stable and never reused for another deal.
//! - `initial_stage_id` is fixed at creation and never patched.
//! - `order` is only meaningful relative to other deals of the same stage.
//! - Membership collections are sets: a user watches a deal at most once.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static CURRENCY_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3}$").expect("valid currency regex"));

/// Stable deal identifier.
pub type DealId = Uuid;
/// Reference to a stage owned by the board/pipeline collaborator.
pub type StageId = String;
/// Reference to a user owned by the account collaborator.
pub type UserId = String;
/// Order-irrelevant set of external references.
pub type IdSet = BTreeSet<String>;

/// Deal validation errors raised before any storage access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DealValidationError {
    /// Name is blank after trim.
    BlankName,
    /// Stage reference is blank after trim.
    BlankStageId,
    /// A set member (user/label id) is blank.
    BlankReference(&'static str),
    /// Source conversation reference is present but blank.
    BlankSourceConversation,
    /// Currency key is not a three-letter upper-case code.
    InvalidCurrency(String),
    /// Amount is negative, NaN or infinite.
    InvalidAmount { currency: String },
    /// Reminder offset is negative.
    NegativeReminder(i64),
    /// Stage already holds `i64::MAX`; nothing can be appended after it.
    StageOrderExhausted(StageId),
}

impl Display for DealValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "deal name must not be blank"),
            Self::BlankStageId => write!(f, "stage id must not be blank"),
            Self::BlankReference(field) => write!(f, "`{field}` must not contain blank ids"),
            Self::BlankSourceConversation => {
                write!(f, "source conversation id must not be blank")
            }
            Self::InvalidCurrency(code) => write!(f, "invalid currency code `{code}`"),
            Self::InvalidAmount { currency } => {
                write!(f, "amount for `{currency}` must be a finite non-negative number")
            }
            Self::NegativeReminder(value) => {
                write!(f, "reminder minute must not be negative, got {value}")
            }
            Self::StageOrderExhausted(stage_id) => write!(
                f,
                "stage `{stage_id}` has no order left to append to; pass an explicit order"
            ),
        }
    }
}

impl Error for DealValidationError {}

/// Canonical deal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub name: String,
    /// Current stage. Changes only through stage/order updates.
    pub stage_id: StageId,
    /// Stage at creation time, kept for provenance reporting.
    pub initial_stage_id: StageId,
    /// Rank within `stage_id`. Ties are broken by `created_at`.
    pub order: i64,
    /// Conversation this deal was converted from, unique when set.
    pub source_conversation_id: Option<String>,
    pub assigned_user_ids: IdSet,
    pub watched_user_ids: IdSet,
    pub label_ids: IdSet,
    pub description: Option<String>,
    pub priority: Option<String>,
    /// Amount per currency code.
    pub amounts: BTreeMap<String, f64>,
    /// Unix epoch milliseconds.
    pub close_date: Option<i64>,
    pub reminder_minute: Option<i64>,
    pub is_complete: bool,
    /// Creator.
    pub user_id: Option<UserId>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub modified_at: i64,
    pub modified_by: Option<UserId>,
}

impl Deal {
    /// Builds a new deal from a create request with a generated stable ID.
    ///
    /// # Invariants
    /// - `initial_stage_id` falls back to `stage_id`.
    /// - `created_at == modified_at == now_ms`.
    pub fn from_new(request: NewDeal, order: i64, now_ms: i64) -> Self {
        let initial_stage_id = request
            .initial_stage_id
            .unwrap_or_else(|| request.stage_id.clone());
        Self {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            stage_id: request.stage_id,
            initial_stage_id,
            order,
            source_conversation_id: request.source_conversation_id,
            assigned_user_ids: request.assigned_user_ids,
            watched_user_ids: request.watched_user_ids,
            label_ids: request.label_ids,
            description: request.description,
            priority: request.priority,
            amounts: request.amounts,
            close_date: request.close_date,
            reminder_minute: request.reminder_minute,
            is_complete: false,
            modified_by: request.user_id.clone(),
            user_id: request.user_id,
            created_at: now_ms,
            modified_at: now_ms,
        }
    }

    /// Checks the full record before it is written.
    pub fn validate(&self) -> Result<(), DealValidationError> {
        if self.name.trim().is_empty() {
            return Err(DealValidationError::BlankName);
        }
        validate_stage_id(&self.stage_id)?;
        validate_stage_id(&self.initial_stage_id)?;
        if let Some(source) = self.source_conversation_id.as_deref() {
            if source.trim().is_empty() {
                return Err(DealValidationError::BlankSourceConversation);
            }
        }
        validate_id_set(&self.assigned_user_ids, "assigned_user_ids")?;
        validate_id_set(&self.watched_user_ids, "watched_user_ids")?;
        validate_id_set(&self.label_ids, "label_ids")?;
        validate_amounts(&self.amounts)?;
        validate_priority(self.priority.as_deref())?;
        validate_reminder(self.reminder_minute)
    }

    /// Returns whether `user_id` currently watches this deal.
    pub fn is_watched_by(&self, user_id: &str) -> bool {
        self.watched_user_ids.contains(user_id)
    }

    /// Applies a validated patch in memory.
    ///
    /// Fields absent from the patch are left untouched.
    pub fn apply_patch(&mut self, patch: &DealPatch, now_ms: i64) {
        if let Some(name) = patch.name.as_ref() {
            self.name = name.trim().to_string();
        }
        if let Some(stage_id) = patch.stage_id.as_ref() {
            self.stage_id = stage_id.clone();
        }
        if let Some(order) = patch.order {
            self.order = order;
        }
        if let Some(ids) = patch.assigned_user_ids.as_ref() {
            self.assigned_user_ids = ids.clone();
        }
        if let Some(ids) = patch.label_ids.as_ref() {
            self.label_ids = ids.clone();
        }
        if let Some(description) = patch.description.as_ref() {
            self.description = description.clone();
        }
        if let Some(priority) = patch.priority.as_ref() {
            self.priority = priority.clone();
        }
        if let Some(amounts) = patch.amounts.as_ref() {
            self.amounts = amounts.clone();
        }
        if let Some(close_date) = patch.close_date {
            self.close_date = close_date;
        }
        if let Some(reminder_minute) = patch.reminder_minute {
            self.reminder_minute = reminder_minute;
        }
        if let Some(is_complete) = patch.is_complete {
            self.is_complete = is_complete;
        }
        if patch.modified_by.is_some() {
            self.modified_by = patch.modified_by.clone();
        }
        self.modified_at = now_ms;
    }
}

/// Create request for one deal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDeal {
    pub name: String,
    pub stage_id: StageId,
    /// Defaults to `stage_id` when absent.
    pub initial_stage_id: Option<StageId>,
    /// Defaults to the end of the stage when absent.
    pub order: Option<i64>,
    pub source_conversation_id: Option<String>,
    pub assigned_user_ids: IdSet,
    pub watched_user_ids: IdSet,
    pub label_ids: IdSet,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub amounts: BTreeMap<String, f64>,
    pub close_date: Option<i64>,
    pub reminder_minute: Option<i64>,
    pub user_id: Option<UserId>,
}

impl NewDeal {
    /// Shorthand for the two required fields.
    pub fn new(name: impl Into<String>, stage_id: impl Into<StageId>) -> Self {
        Self {
            name: name.into(),
            stage_id: stage_id.into(),
            ..Self::default()
        }
    }

    /// Validates create input.
    pub fn validate(&self) -> Result<(), DealValidationError> {
        if self.name.trim().is_empty() {
            return Err(DealValidationError::BlankName);
        }
        validate_stage_id(&self.stage_id)?;
        if let Some(initial) = self.initial_stage_id.as_deref() {
            validate_stage_id(initial)?;
        }
        if let Some(source) = self.source_conversation_id.as_deref() {
            if source.trim().is_empty() {
                return Err(DealValidationError::BlankSourceConversation);
            }
        }
        validate_id_set(&self.assigned_user_ids, "assigned_user_ids")?;
        validate_id_set(&self.watched_user_ids, "watched_user_ids")?;
        validate_id_set(&self.label_ids, "label_ids")?;
        validate_amounts(&self.amounts)?;
        validate_priority(self.priority.as_deref())?;
        validate_reminder(self.reminder_minute)
    }
}

/// Explicit partial update for one deal.
///
/// `None` means "leave unchanged". Nullable columns use `Option<Option<_>>`
/// so callers can distinguish "clear" from "keep".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealPatch {
    pub name: Option<String>,
    pub stage_id: Option<StageId>,
    pub order: Option<i64>,
    pub assigned_user_ids: Option<IdSet>,
    pub label_ids: Option<IdSet>,
    pub description: Option<Option<String>>,
    pub priority: Option<Option<String>>,
    pub amounts: Option<BTreeMap<String, f64>>,
    pub close_date: Option<Option<i64>>,
    pub reminder_minute: Option<Option<i64>>,
    pub is_complete: Option<bool>,
    pub modified_by: Option<UserId>,
}

impl DealPatch {
    /// Patch that only moves a deal to `stage_id`.
    pub fn move_to(stage_id: impl Into<StageId>) -> Self {
        Self {
            stage_id: Some(stage_id.into()),
            ..Self::default()
        }
    }

    /// Patch that places a deal at `order` inside `stage_id`.
    pub fn place(stage_id: impl Into<StageId>, order: i64) -> Self {
        Self {
            stage_id: Some(stage_id.into()),
            order: Some(order),
            ..Self::default()
        }
    }

    /// Validates patch fields that are present.
    pub fn validate(&self) -> Result<(), DealValidationError> {
        if let Some(name) = self.name.as_deref() {
            if name.trim().is_empty() {
                return Err(DealValidationError::BlankName);
            }
        }
        if let Some(stage_id) = self.stage_id.as_deref() {
            validate_stage_id(stage_id)?;
        }
        if let Some(ids) = self.assigned_user_ids.as_ref() {
            validate_id_set(ids, "assigned_user_ids")?;
        }
        if let Some(ids) = self.label_ids.as_ref() {
            validate_id_set(ids, "label_ids")?;
        }
        if let Some(amounts) = self.amounts.as_ref() {
            validate_amounts(amounts)?;
        }
        if let Some(reminder) = self.reminder_minute {
            validate_reminder(reminder)?;
        }
        if let Some(priority) = self.priority.as_ref() {
            validate_priority(priority.as_deref())?;
        }
        Ok(())
    }
}

/// One `(deal, order)` pair of a reorder request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: DealId,
    pub order: i64,
}

pub(crate) fn validate_stage_id(stage_id: &str) -> Result<(), DealValidationError> {
    if stage_id.trim().is_empty() {
        return Err(DealValidationError::BlankStageId);
    }
    Ok(())
}

fn validate_id_set(ids: &IdSet, field: &'static str) -> Result<(), DealValidationError> {
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(DealValidationError::BlankReference(field));
    }
    Ok(())
}

fn validate_amounts(amounts: &BTreeMap<String, f64>) -> Result<(), DealValidationError> {
    for (currency, amount) in amounts {
        if !CURRENCY_CODE_RE.is_match(currency) {
            return Err(DealValidationError::InvalidCurrency(currency.clone()));
        }
        if !amount.is_finite() || *amount < 0.0 {
            return Err(DealValidationError::InvalidAmount {
                currency: currency.clone(),
            });
        }
    }
    Ok(())
}

fn validate_priority(priority: Option<&str>) -> Result<(), DealValidationError> {
    match priority {
        Some(value) if value.trim().is_empty() => {
            Err(DealValidationError::BlankReference("priority"))
        }
        _ => Ok(()),
    }
}

fn validate_reminder(reminder_minute: Option<i64>) -> Result<(), DealValidationError> {
    match reminder_minute {
        Some(value) if value < 0 => Err(DealValidationError::NegativeReminder(value)),
        _ => Ok(()),
    }
}
