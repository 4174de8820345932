//! Integration domain model and kind alias mapping.
//!
//! # Responsibility
//! - Define the messaging integration record counted by dashboards.
//! - Own the logical-kind expansion shared by list and count queries.
//!
//! # Invariants
//! - `kind` always holds a raw stored kind, never a logical group name.
//! - `expand_kind_filter` is the only place that knows alias groups.

use crate::model::deal::IdSet;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable integration identifier.
pub type IntegrationId = Uuid;
/// Reference to a brand (organization unit).
pub type BrandId = String;
/// Reference to a channel owned by the channel collaborator.
pub type ChannelId = String;

/// Logical kind that folds every mailbox provider into one bucket.
pub const MAIL_KIND_GROUP: &str = "mail";

/// Raw stored integration kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationKind {
    Messenger,
    Lead,
    FacebookMessenger,
    FacebookPost,
    TwitterDm,
    Callpro,
    Chatfuel,
    Whatsapp,
    Gmail,
    NylasGmail,
    NylasImap,
    NylasOffice365,
    NylasOutlook,
    NylasYahoo,
    NylasExchange,
}

impl IntegrationKind {
    /// Every stored kind, in display order.
    pub const ALL: [IntegrationKind; 15] = [
        Self::Messenger,
        Self::Lead,
        Self::FacebookMessenger,
        Self::FacebookPost,
        Self::TwitterDm,
        Self::Callpro,
        Self::Chatfuel,
        Self::Whatsapp,
        Self::Gmail,
        Self::NylasGmail,
        Self::NylasImap,
        Self::NylasOffice365,
        Self::NylasOutlook,
        Self::NylasYahoo,
        Self::NylasExchange,
    ];

    /// Members of the `mail` logical group.
    pub const MAIL: [IntegrationKind; 7] = [
        Self::Gmail,
        Self::NylasGmail,
        Self::NylasImap,
        Self::NylasOffice365,
        Self::NylasOutlook,
        Self::NylasYahoo,
        Self::NylasExchange,
    ];

    /// Storage/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messenger => "messenger",
            Self::Lead => "lead",
            Self::FacebookMessenger => "facebook-messenger",
            Self::FacebookPost => "facebook-post",
            Self::TwitterDm => "twitter-dm",
            Self::Callpro => "callpro",
            Self::Chatfuel => "chatfuel",
            Self::Whatsapp => "whatsapp",
            Self::Gmail => "gmail",
            Self::NylasGmail => "nylas-gmail",
            Self::NylasImap => "nylas-imap",
            Self::NylasOffice365 => "nylas-office365",
            Self::NylasOutlook => "nylas-outlook",
            Self::NylasYahoo => "nylas-yahoo",
            Self::NylasExchange => "nylas-exchange",
        }
    }

    /// Parses a raw stored kind.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Human-readable label for "used types" listings.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Messenger => "Web messenger",
            Self::Lead => "Pop ups",
            Self::FacebookMessenger => "Facebook messenger",
            Self::FacebookPost => "Facebook post",
            Self::TwitterDm => "Twitter direct message",
            Self::Callpro => "Call pro",
            Self::Chatfuel => "Chatfuel",
            Self::Whatsapp => "WhatsApp",
            Self::Gmail => "Gmail",
            Self::NylasGmail => "Gmail",
            Self::NylasImap => "IMAP",
            Self::NylasOffice365 => "Office 365",
            Self::NylasOutlook => "Outlook",
            Self::NylasYahoo => "Yahoo",
            Self::NylasExchange => "Exchange",
        }
    }

    /// Logical group this kind folds into, if any.
    pub fn logical_group(self) -> Option<&'static str> {
        if Self::MAIL.contains(&self) {
            Some(MAIL_KIND_GROUP)
        } else {
            None
        }
    }
}

/// Expands a kind filter value into the raw kinds it matches.
///
/// `mail` expands to every mailbox provider kind; a raw kind expands to
/// itself. Returns `None` for unknown values.
pub fn expand_kind_filter(value: &str) -> Option<Vec<IntegrationKind>> {
    let trimmed = value.trim();
    if trimmed == MAIL_KIND_GROUP {
        return Some(IntegrationKind::MAIL.to_vec());
    }
    IntegrationKind::parse(trimmed).map(|kind| vec![kind])
}

/// Integration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationValidationError {
    BlankName,
    UnknownKind(String),
    BlankReference(&'static str),
    InvalidPage { page: u32, per_page: u32 },
}

impl Display for IntegrationValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "integration name must not be blank"),
            Self::UnknownKind(kind) => write!(f, "unknown integration kind `{kind}`"),
            Self::BlankReference(field) => write!(f, "`{field}` must not be blank"),
            Self::InvalidPage { page, per_page } => {
                write!(f, "invalid page request page={page} per_page={per_page}")
            }
        }
    }
}

impl Error for IntegrationValidationError {}

/// Messaging integration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub id: IntegrationId,
    pub name: String,
    pub kind: IntegrationKind,
    pub brand_id: Option<BrandId>,
    pub tag_ids: IdSet,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

/// Create request for one integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIntegration {
    pub name: String,
    pub kind: IntegrationKind,
    pub brand_id: Option<BrandId>,
    #[serde(default)]
    pub tag_ids: IdSet,
}

impl NewIntegration {
    pub fn new(name: impl Into<String>, kind: IntegrationKind) -> Self {
        Self {
            name: name.into(),
            kind,
            brand_id: None,
            tag_ids: IdSet::new(),
        }
    }

    pub fn validate(&self) -> Result<(), IntegrationValidationError> {
        if self.name.trim().is_empty() {
            return Err(IntegrationValidationError::BlankName);
        }
        if let Some(brand_id) = self.brand_id.as_deref() {
            if brand_id.trim().is_empty() {
                return Err(IntegrationValidationError::BlankReference("brand_id"));
            }
        }
        if self.tag_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(IntegrationValidationError::BlankReference("tag_ids"));
        }
        Ok(())
    }
}

/// Filter shared by integration listing and aggregate counting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationFilter {
    /// Raw kind or logical group (`mail`).
    pub kind: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub brand_id: Option<BrandId>,
    pub tag_id: Option<String>,
    /// Case-insensitive substring match on name.
    pub search_value: Option<String>,
}

impl IntegrationFilter {
    /// Resolves the kind filter to raw kinds.
    pub fn resolved_kinds(
        &self,
    ) -> Result<Option<Vec<IntegrationKind>>, IntegrationValidationError> {
        match self.kind.as_deref() {
            None => Ok(None),
            Some(value) => expand_kind_filter(value)
                .map(Some)
                .ok_or_else(|| IntegrationValidationError::UnknownKind(value.to_string())),
        }
    }
}
