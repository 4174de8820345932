//! Core domain logic for Dealboard.
//! Stage ordering, conversion uniqueness, watchers and dashboard counts.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, CoreConfig};
pub use logging::{
    default_log_level, init_from_config, init_logging, logging_status, LoggingError,
};
pub use model::deal::{
    Deal, DealId, DealPatch, DealValidationError, IdSet, NewDeal, OrderItem, StageId, UserId,
};
pub use model::integration::{
    expand_kind_filter, BrandId, ChannelId, Integration, IntegrationFilter, IntegrationId,
    IntegrationKind, IntegrationValidationError, NewIntegration, MAIL_KIND_GROUP,
};
pub use repo::deal_repo::{
    CloseDateFilter, CurrencyTotal, DealListQuery, DealRepository, DealSort, DealSortField,
    DealTotalAmounts, SortDirection, SqliteDealRepository,
};
pub use repo::integration_repo::{
    IntegrationCounts, IntegrationRepository, SqliteIntegrationRepository,
};
pub use repo::{RepoError, RepoResult};
pub use service::deal_service::{
    DealService, DealServiceError, DealServiceResult, OrderUpdateFailure, OrderUpdateOutcome,
};
pub use service::integration_service::{
    IntegrationService, IntegrationServiceError, IntegrationServiceResult, UsedKind,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
