//! Deal repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the item store over `deals` and its membership tables.
//! - Keep stage/order SQL and set-table replacement inside the store.
//!
//! # Invariants
//! - A single-deal write (row + sets) runs in one `IMMEDIATE` transaction.
//! - Batch updates are best-effort: one transaction per entry, no rollback
//!   of siblings.
//! - Listing is deterministic: the requested sort key first, then
//!   `sort_order ASC, created_at ASC, uuid ASC`.
//! - `source_conversation_id` is unique; the partial unique index backs the
//!   service-level check.

use super::{
    bool_to_int, ensure_connection_ready, like_contains_pattern, parse_bool, parse_uuid,
    RepoError, RepoResult,
};
use crate::db::is_unique_violation;
use crate::model::deal::{Deal, DealId, DealPatch, DealValidationError, IdSet, StageId, UserId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeMap;

const DEAL_SELECT_SQL: &str = "SELECT
    d.uuid AS uuid,
    d.name AS name,
    d.stage_id AS stage_id,
    d.initial_stage_id AS initial_stage_id,
    d.sort_order AS sort_order,
    d.source_conversation_id AS source_conversation_id,
    d.description AS description,
    d.priority AS priority,
    d.close_date AS close_date,
    d.reminder_minute AS reminder_minute,
    d.is_complete AS is_complete,
    d.user_id AS user_id,
    d.modified_by AS modified_by,
    d.created_at AS created_at,
    d.modified_at AS modified_at
FROM deals d";

const DEALS_DEFAULT_LIMIT: u32 = 50;
const DEALS_LIMIT_MAX: u32 = 200;

/// Query options for deal listing and amount totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealListQuery {
    pub stage_id: Option<StageId>,
    pub initial_stage_id: Option<StageId>,
    /// Deals assigned to this user.
    pub assigned_user_id: Option<UserId>,
    /// Deals carrying every one of these labels.
    pub label_ids: IdSet,
    pub priority: Option<String>,
    /// Case-insensitive substring match on name.
    pub search: Option<String>,
    pub close_date: Option<CloseDateFilter>,
    pub sort: DealSort,
    /// Defaults to 50 and clamps to 200.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Close-date constraint for listing and totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDateFilter {
    /// `from <= close_date < to`. An absent bound is open.
    Between { from: Option<i64>, to: Option<i64> },
    /// Deals without a close date.
    Missing,
}

/// Primary sort key for listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DealSortField {
    #[default]
    Order,
    CreatedAt,
    ModifiedAt,
    /// Deals without a close date sort last in both directions.
    CloseDate,
    Name,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Listing sort. Ties always fall back to `sort_order, created_at, uuid`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DealSort {
    pub field: DealSortField,
    pub direction: SortDirection,
}

impl DealSort {
    pub fn new(field: DealSortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    fn order_by_sql(self) -> String {
        let direction = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let primary = match self.field {
            DealSortField::Order => {
                return format!(" ORDER BY d.sort_order {direction}, d.created_at ASC, d.uuid ASC");
            }
            DealSortField::CreatedAt => format!("d.created_at {direction}"),
            DealSortField::ModifiedAt => format!("d.modified_at {direction}"),
            DealSortField::CloseDate => {
                format!("d.close_date IS NULL ASC, d.close_date {direction}")
            }
            DealSortField::Name => format!("d.name COLLATE NOCASE {direction}"),
        };
        format!(" ORDER BY {primary}, d.sort_order ASC, d.created_at ASC, d.uuid ASC")
    }
}

/// Per-currency amount total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyTotal {
    pub currency: String,
    pub amount: f64,
}

/// Deal count and amount totals for one filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DealTotalAmounts {
    pub deal_count: usize,
    /// Sorted by currency code.
    pub currencies: Vec<CurrencyTotal>,
}

/// Repository interface for the deal item store.
pub trait DealRepository {
    /// Inserts one fully-built deal.
    fn create_deal(&self, deal: &Deal) -> RepoResult<DealId>;
    /// Loads one deal by id.
    fn get_deal(&self, id: DealId) -> RepoResult<Option<Deal>>;
    /// Loads the deal converted from `source_conversation_id`, if any.
    fn find_by_source_conversation(&self, source_conversation_id: &str)
        -> RepoResult<Option<Deal>>;
    /// Applies a partial patch and returns the updated deal.
    fn update_deal(&self, id: DealId, patch: &DealPatch, now_ms: i64) -> RepoResult<Deal>;
    /// Lists deals with filter and pagination.
    fn list_deals(&self, query: &DealListQuery) -> RepoResult<Vec<Deal>>;
    /// Returns the order that appends a deal to the end of `stage_id`.
    fn next_order(&self, stage_id: &str) -> RepoResult<i64>;
    /// Adds or removes one watcher. Returns whether membership changed.
    fn set_watcher(&self, id: DealId, user_id: &str, watching: bool) -> RepoResult<bool>;
    /// Counts deals and sums amounts per currency for one filter.
    fn total_amounts(&self, query: &DealListQuery) -> RepoResult<DealTotalAmounts>;

    /// Applies each patch independently, one result slot per entry.
    ///
    /// A failing entry does not roll back or abort the others.
    fn batch_update(
        &self,
        updates: &[(DealId, DealPatch)],
        now_ms: i64,
    ) -> Vec<RepoResult<Deal>> {
        updates
            .iter()
            .map(|(id, patch)| self.update_deal(*id, patch, now_ms))
            .collect()
    }
}

/// SQLite-backed deal repository.
pub struct SqliteDealRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDealRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &["deals", "deal_assignees", "deal_watchers", "deal_labels", "deal_amounts"],
        )?;
        Ok(Self { conn })
    }
}

impl DealRepository for SqliteDealRepository<'_> {
    fn create_deal(&self, deal: &Deal) -> RepoResult<DealId> {
        deal.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO deals (
                uuid,
                name,
                stage_id,
                initial_stage_id,
                sort_order,
                source_conversation_id,
                description,
                priority,
                close_date,
                reminder_minute,
                is_complete,
                user_id,
                modified_by,
                created_at,
                modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15);",
            params![
                deal.id.to_string(),
                deal.name.as_str(),
                deal.stage_id.as_str(),
                deal.initial_stage_id.as_str(),
                deal.order,
                deal.source_conversation_id.as_deref(),
                deal.description.as_deref(),
                deal.priority.as_deref(),
                deal.close_date,
                deal.reminder_minute,
                bool_to_int(deal.is_complete),
                deal.user_id.as_deref(),
                deal.modified_by.as_deref(),
                deal.created_at,
                deal.modified_at,
            ],
        );
        if let Err(err) = inserted {
            return Err(match deal.source_conversation_id.as_ref() {
                Some(source) if is_unique_violation(&err) => {
                    RepoError::AlreadyConverted(source.clone())
                }
                _ => err.into(),
            });
        }

        let uuid = deal.id.to_string();
        replace_id_set(&tx, "deal_assignees", "user_id", &uuid, &deal.assigned_user_ids)?;
        replace_id_set(&tx, "deal_watchers", "user_id", &uuid, &deal.watched_user_ids)?;
        replace_id_set(&tx, "deal_labels", "label_id", &uuid, &deal.label_ids)?;
        replace_amounts(&tx, &uuid, &deal.amounts)?;
        tx.commit()?;

        Ok(deal.id)
    }

    fn get_deal(&self, id: DealId) -> RepoResult<Option<Deal>> {
        load_deal(self.conn, "d.uuid = ?1", &id.to_string())
    }

    fn find_by_source_conversation(
        &self,
        source_conversation_id: &str,
    ) -> RepoResult<Option<Deal>> {
        load_deal(
            self.conn,
            "d.source_conversation_id = ?1",
            source_conversation_id,
        )
    }

    fn update_deal(&self, id: DealId, patch: &DealPatch, now_ms: i64) -> RepoResult<Deal> {
        patch.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut deal = load_deal(&tx, "d.uuid = ?1", &id.to_string())?
            .ok_or(RepoError::NotFound(id))?;
        deal.apply_patch(patch, now_ms);
        deal.validate()?;

        let uuid = deal.id.to_string();
        tx.execute(
            "UPDATE deals
             SET
                name = ?2,
                stage_id = ?3,
                sort_order = ?4,
                description = ?5,
                priority = ?6,
                close_date = ?7,
                reminder_minute = ?8,
                is_complete = ?9,
                modified_by = ?10,
                modified_at = ?11
             WHERE uuid = ?1;",
            params![
                uuid,
                deal.name.as_str(),
                deal.stage_id.as_str(),
                deal.order,
                deal.description.as_deref(),
                deal.priority.as_deref(),
                deal.close_date,
                deal.reminder_minute,
                bool_to_int(deal.is_complete),
                deal.modified_by.as_deref(),
                deal.modified_at,
            ],
        )?;

        if patch.assigned_user_ids.is_some() {
            replace_id_set(&tx, "deal_assignees", "user_id", &uuid, &deal.assigned_user_ids)?;
        }
        if patch.label_ids.is_some() {
            replace_id_set(&tx, "deal_labels", "label_id", &uuid, &deal.label_ids)?;
        }
        if patch.amounts.is_some() {
            replace_amounts(&tx, &uuid, &deal.amounts)?;
        }
        tx.commit()?;

        Ok(deal)
    }

    fn list_deals(&self, query: &DealListQuery) -> RepoResult<Vec<Deal>> {
        let mut sql = format!("{DEAL_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();
        push_deal_filters(query, &mut sql, &mut bind_values);

        sql.push_str(&query.sort.order_by_sql());
        sql.push_str(" LIMIT ?");
        bind_values.push(Value::Integer(i64::from(normalize_deal_limit(query.limit))));
        if query.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut deals = Vec::new();
        while let Some(row) = rows.next()? {
            deals.push(hydrate_deal(self.conn, row)?);
        }
        Ok(deals)
    }

    fn next_order(&self, stage_id: &str) -> RepoResult<i64> {
        let max_order: Option<i64> = self.conn.query_row(
            "SELECT MAX(sort_order) FROM deals WHERE stage_id = ?1;",
            [stage_id],
            |row| row.get(0),
        )?;
        match max_order {
            None => Ok(0),
            Some(max_order) => max_order.checked_add(1).ok_or_else(|| {
                DealValidationError::StageOrderExhausted(stage_id.to_string()).into()
            }),
        }
    }

    fn set_watcher(&self, id: DealId, user_id: &str, watching: bool) -> RepoResult<bool> {
        let uuid = id.to_string();
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM deals WHERE uuid = ?1);",
            [uuid.as_str()],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::NotFound(id));
        }

        let changed = if watching {
            self.conn.execute(
                "INSERT OR IGNORE INTO deal_watchers (deal_uuid, user_id) VALUES (?1, ?2);",
                params![uuid, user_id],
            )?
        } else {
            self.conn.execute(
                "DELETE FROM deal_watchers WHERE deal_uuid = ?1 AND user_id = ?2;",
                params![uuid, user_id],
            )?
        };
        Ok(changed > 0)
    }

    fn total_amounts(&self, query: &DealListQuery) -> RepoResult<DealTotalAmounts> {
        let mut where_sql = String::from(" WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();
        push_deal_filters(query, &mut where_sql, &mut bind_values);

        let deal_count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM deals d{where_sql};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT a.currency, SUM(a.amount)
             FROM deal_amounts a
             INNER JOIN deals d ON d.uuid = a.deal_uuid{where_sql}
             GROUP BY a.currency
             ORDER BY a.currency ASC;"
        ))?;
        let rows = stmt.query_map(params_from_iter(bind_values.iter()), |row| {
            Ok(CurrencyTotal {
                currency: row.get(0)?,
                amount: row.get(1)?,
            })
        })?;
        let mut currencies = Vec::new();
        for row in rows {
            currencies.push(row?);
        }

        Ok(DealTotalAmounts {
            deal_count: usize::try_from(deal_count).unwrap_or(usize::MAX),
            currencies,
        })
    }
}

/// Clamps list limit into `1..=200`, defaulting to 50.
pub fn normalize_deal_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEALS_DEFAULT_LIMIT)
        .clamp(1, DEALS_LIMIT_MAX)
}

fn push_deal_filters(query: &DealListQuery, sql: &mut String, bind_values: &mut Vec<Value>) {
    if let Some(stage_id) = query.stage_id.as_ref() {
        sql.push_str(" AND d.stage_id = ?");
        bind_values.push(Value::Text(stage_id.clone()));
    }
    if let Some(initial_stage_id) = query.initial_stage_id.as_ref() {
        sql.push_str(" AND d.initial_stage_id = ?");
        bind_values.push(Value::Text(initial_stage_id.clone()));
    }
    if let Some(user_id) = query.assigned_user_id.as_ref() {
        sql.push_str(
            " AND EXISTS (
                SELECT 1 FROM deal_assignees da
                WHERE da.deal_uuid = d.uuid AND da.user_id = ?
            )",
        );
        bind_values.push(Value::Text(user_id.clone()));
    }
    for label_id in &query.label_ids {
        sql.push_str(
            " AND EXISTS (
                SELECT 1 FROM deal_labels dl
                WHERE dl.deal_uuid = d.uuid AND dl.label_id = ?
            )",
        );
        bind_values.push(Value::Text(label_id.clone()));
    }
    if let Some(priority) = query.priority.as_ref() {
        sql.push_str(" AND d.priority = ?");
        bind_values.push(Value::Text(priority.clone()));
    }
    if let Some(search) = query.search.as_deref().map(str::trim) {
        if !search.is_empty() {
            sql.push_str(" AND d.name LIKE ? ESCAPE '\\'");
            bind_values.push(Value::Text(like_contains_pattern(search)));
        }
    }
    match query.close_date {
        Some(CloseDateFilter::Between { from, to }) => {
            if let Some(from) = from {
                sql.push_str(" AND d.close_date >= ?");
                bind_values.push(Value::Integer(from));
            }
            if let Some(to) = to {
                sql.push_str(" AND d.close_date < ?");
                bind_values.push(Value::Integer(to));
            }
            if from.is_none() && to.is_none() {
                sql.push_str(" AND d.close_date IS NOT NULL");
            }
        }
        Some(CloseDateFilter::Missing) => sql.push_str(" AND d.close_date IS NULL"),
        None => {}
    }
}

fn load_deal(conn: &Connection, predicate: &str, value: &str) -> RepoResult<Option<Deal>> {
    let mut stmt = conn.prepare(&format!("{DEAL_SELECT_SQL} WHERE {predicate};"))?;
    let mut rows = stmt.query([value])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(hydrate_deal(conn, row)?));
    }
    Ok(None)
}

fn hydrate_deal(conn: &Connection, row: &Row<'_>) -> RepoResult<Deal> {
    let uuid_text: String = row.get("uuid")?;
    let id = parse_uuid(&uuid_text, "deals.uuid")?;

    Ok(Deal {
        id,
        name: row.get("name")?,
        stage_id: row.get("stage_id")?,
        initial_stage_id: row.get("initial_stage_id")?,
        order: row.get("sort_order")?,
        source_conversation_id: row.get("source_conversation_id")?,
        assigned_user_ids: load_id_set(conn, "deal_assignees", "user_id", &uuid_text)?,
        watched_user_ids: load_id_set(conn, "deal_watchers", "user_id", &uuid_text)?,
        label_ids: load_id_set(conn, "deal_labels", "label_id", &uuid_text)?,
        description: row.get("description")?,
        priority: row.get("priority")?,
        amounts: load_amounts(conn, &uuid_text)?,
        close_date: row.get("close_date")?,
        reminder_minute: row.get("reminder_minute")?,
        is_complete: parse_bool(row.get("is_complete")?, "deals.is_complete")?,
        user_id: row.get("user_id")?,
        created_at: row.get("created_at")?,
        modified_at: row.get("modified_at")?,
        modified_by: row.get("modified_by")?,
    })
}

fn load_id_set(
    conn: &Connection,
    table: &'static str,
    column: &'static str,
    deal_uuid: &str,
) -> RepoResult<IdSet> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {column} FROM {table} WHERE deal_uuid = ?1 ORDER BY {column} ASC;"
    ))?;
    let rows = stmt.query_map([deal_uuid], |row| row.get::<_, String>(0))?;
    let mut ids = IdSet::new();
    for row in rows {
        ids.insert(row?);
    }
    Ok(ids)
}

fn load_amounts(conn: &Connection, deal_uuid: &str) -> RepoResult<BTreeMap<String, f64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT currency, amount FROM deal_amounts WHERE deal_uuid = ?1;",
    )?;
    let rows = stmt.query_map([deal_uuid], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut amounts = BTreeMap::new();
    for row in rows {
        let (currency, amount) = row?;
        amounts.insert(currency, amount);
    }
    Ok(amounts)
}

fn replace_id_set(
    conn: &Connection,
    table: &'static str,
    column: &'static str,
    deal_uuid: &str,
    ids: &IdSet,
) -> RepoResult<()> {
    conn.execute(
        &format!("DELETE FROM {table} WHERE deal_uuid = ?1;"),
        [deal_uuid],
    )?;
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {table} (deal_uuid, {column}) VALUES (?1, ?2);"
    ))?;
    for id in ids {
        stmt.execute(params![deal_uuid, id])?;
    }
    Ok(())
}

fn replace_amounts(
    conn: &Connection,
    deal_uuid: &str,
    amounts: &BTreeMap<String, f64>,
) -> RepoResult<()> {
    conn.execute("DELETE FROM deal_amounts WHERE deal_uuid = ?1;", [deal_uuid])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO deal_amounts (deal_uuid, currency, amount) VALUES (?1, ?2, ?3);",
    )?;
    for (currency, amount) in amounts {
        stmt.execute(params![deal_uuid, currency, amount])?;
    }
    Ok(())
}
