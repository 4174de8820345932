//! Integration repository: storage, channel membership and dashboard counts.
//!
//! # Responsibility
//! - Persist integrations with tag references.
//! - Own channel membership (`channel_integrations`).
//! - Compute exact grouped counts along kind, brand, channel and tag.
//!
//! # Invariants
//! - Listing and counting build their WHERE clause with the same function,
//!   so a kind alias (`mail`) selects the same rows in both paths.
//! - Channel and tag buckets come from join tables; an integration may sit
//!   in several buckets of the same dimension.

use super::{ensure_connection_ready, like_contains_pattern, parse_uuid, RepoError, RepoResult};
use crate::model::deal::IdSet;
use crate::model::integration::{Integration, IntegrationFilter, IntegrationId, IntegrationKind};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeMap;

const INTEGRATION_SELECT_SQL: &str = "SELECT
    i.uuid AS uuid,
    i.name AS name,
    i.kind AS kind,
    i.brand_id AS brand_id,
    i.created_at AS created_at
FROM integrations i";

/// Grouped integration counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationCounts {
    pub total: usize,
    /// Raw kinds plus logical groups (`mail`) that have members.
    pub by_kind: BTreeMap<String, usize>,
    pub by_brand: BTreeMap<String, usize>,
    pub by_channel: BTreeMap<String, usize>,
    pub by_tag: BTreeMap<String, usize>,
}

/// Repository interface for integrations and their aggregates.
pub trait IntegrationRepository {
    fn create_integration(&self, integration: &Integration) -> RepoResult<IntegrationId>;
    fn get_integration(&self, id: IntegrationId) -> RepoResult<Option<Integration>>;
    /// Lists integrations matching `filter`, oldest first.
    fn list_integrations(
        &self,
        filter: &IntegrationFilter,
        limit: u32,
        offset: u32,
    ) -> RepoResult<Vec<Integration>>;
    /// Counts integrations matching `filter` along every dimension.
    fn count_integrations(&self, filter: &IntegrationFilter) -> RepoResult<IntegrationCounts>;
    /// Replaces the member set of one channel.
    fn set_channel_integrations(
        &self,
        channel_id: &str,
        integration_ids: &[IntegrationId],
    ) -> RepoResult<()>;
    /// Returns the member ids of one channel.
    fn channel_integrations(&self, channel_id: &str) -> RepoResult<Vec<IntegrationId>>;
    /// Returns distinct stored kinds, in `IntegrationKind::ALL` order.
    fn used_kinds(&self) -> RepoResult<Vec<IntegrationKind>>;
}

/// SQLite-backed integration repository.
pub struct SqliteIntegrationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteIntegrationRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &["integrations", "integration_tags", "channel_integrations"],
        )?;
        Ok(Self { conn })
    }
}

impl IntegrationRepository for SqliteIntegrationRepository<'_> {
    fn create_integration(&self, integration: &Integration) -> RepoResult<IntegrationId> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let uuid = integration.id.to_string();
        tx.execute(
            "INSERT INTO integrations (uuid, name, kind, brand_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                uuid,
                integration.name.as_str(),
                integration.kind.as_str(),
                integration.brand_id.as_deref(),
                integration.created_at,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO integration_tags (integration_uuid, tag_id) VALUES (?1, ?2);",
            )?;
            for tag_id in &integration.tag_ids {
                stmt.execute(params![uuid, tag_id])?;
            }
        }
        tx.commit()?;
        Ok(integration.id)
    }

    fn get_integration(&self, id: IntegrationId) -> RepoResult<Option<Integration>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{INTEGRATION_SELECT_SQL} WHERE i.uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(hydrate_integration(self.conn, row)?));
        }
        Ok(None)
    }

    fn list_integrations(
        &self,
        filter: &IntegrationFilter,
        limit: u32,
        offset: u32,
    ) -> RepoResult<Vec<Integration>> {
        let mut sql = format!("{INTEGRATION_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values = Vec::new();
        push_integration_filters(filter, &mut sql, &mut bind_values)?;
        sql.push_str(" ORDER BY i.created_at ASC, i.uuid ASC LIMIT ? OFFSET ?");
        bind_values.push(Value::Integer(i64::from(limit)));
        bind_values.push(Value::Integer(i64::from(offset)));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut integrations = Vec::new();
        while let Some(row) = rows.next()? {
            integrations.push(hydrate_integration(self.conn, row)?);
        }
        Ok(integrations)
    }

    fn count_integrations(&self, filter: &IntegrationFilter) -> RepoResult<IntegrationCounts> {
        let mut where_sql = String::from(" WHERE 1 = 1");
        let mut bind_values = Vec::new();
        push_integration_filters(filter, &mut where_sql, &mut bind_values)?;

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM integrations i{where_sql};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let raw_kinds = count_grouped(
            self.conn,
            &format!("SELECT i.kind, COUNT(*) FROM integrations i{where_sql} GROUP BY i.kind;"),
            &bind_values,
        )?;
        let by_kind = fold_kind_groups(raw_kinds);

        let by_brand = count_grouped(
            self.conn,
            &format!(
                "SELECT i.brand_id, COUNT(*)
                 FROM integrations i{where_sql} AND i.brand_id IS NOT NULL
                 GROUP BY i.brand_id;"
            ),
            &bind_values,
        )?;

        let by_channel = count_grouped(
            self.conn,
            &format!(
                "SELECT ci.channel_id, COUNT(DISTINCT i.uuid)
                 FROM channel_integrations ci
                 INNER JOIN integrations i ON i.uuid = ci.integration_uuid{where_sql}
                 GROUP BY ci.channel_id;"
            ),
            &bind_values,
        )?;

        let by_tag = count_grouped(
            self.conn,
            &format!(
                "SELECT it.tag_id, COUNT(DISTINCT i.uuid)
                 FROM integration_tags it
                 INNER JOIN integrations i ON i.uuid = it.integration_uuid{where_sql}
                 GROUP BY it.tag_id;"
            ),
            &bind_values,
        )?;

        Ok(IntegrationCounts {
            total: usize::try_from(total).unwrap_or(usize::MAX),
            by_kind,
            by_brand,
            by_channel,
            by_tag,
        })
    }

    fn set_channel_integrations(
        &self,
        channel_id: &str,
        integration_ids: &[IntegrationId],
    ) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM channel_integrations WHERE channel_id = ?1;",
            [channel_id],
        )?;
        {
            let mut exists_stmt =
                tx.prepare("SELECT EXISTS(SELECT 1 FROM integrations WHERE uuid = ?1);")?;
            let mut insert_stmt = tx.prepare(
                "INSERT OR IGNORE INTO channel_integrations (channel_id, integration_uuid)
                 VALUES (?1, ?2);",
            )?;
            for id in integration_ids {
                let uuid = id.to_string();
                let exists: i64 = exists_stmt.query_row([uuid.as_str()], |row| row.get(0))?;
                if exists != 1 {
                    return Err(RepoError::NotFound(*id));
                }
                insert_stmt.execute(params![channel_id, uuid])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn channel_integrations(&self, channel_id: &str) -> RepoResult<Vec<IntegrationId>> {
        let mut stmt = self.conn.prepare(
            "SELECT integration_uuid FROM channel_integrations
             WHERE channel_id = ?1
             ORDER BY integration_uuid ASC;",
        )?;
        let rows = stmt.query_map([channel_id], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(parse_uuid(&row?, "channel_integrations.integration_uuid")?);
        }
        Ok(ids)
    }

    fn used_kinds(&self) -> RepoResult<Vec<IntegrationKind>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT kind FROM integrations;")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut used = Vec::new();
        for row in rows {
            used.push(parse_kind(&row?)?);
        }
        used.sort_by_key(|kind| {
            IntegrationKind::ALL
                .iter()
                .position(|candidate| candidate == kind)
        });
        Ok(used)
    }
}

/// Appends the shared filter clause for integrations aliased as `i`.
fn push_integration_filters(
    filter: &IntegrationFilter,
    sql: &mut String,
    bind_values: &mut Vec<Value>,
) -> RepoResult<()> {
    if let Some(kinds) = filter.resolved_kinds()? {
        let placeholders = vec!["?"; kinds.len()].join(", ");
        sql.push_str(&format!(" AND i.kind IN ({placeholders})"));
        bind_values.extend(
            kinds
                .into_iter()
                .map(|kind| Value::Text(kind.as_str().to_string())),
        );
    }
    if let Some(channel_id) = filter.channel_id.as_ref() {
        sql.push_str(
            " AND EXISTS (
                SELECT 1 FROM channel_integrations cf
                WHERE cf.integration_uuid = i.uuid AND cf.channel_id = ?
            )",
        );
        bind_values.push(Value::Text(channel_id.clone()));
    }
    if let Some(brand_id) = filter.brand_id.as_ref() {
        sql.push_str(" AND i.brand_id = ?");
        bind_values.push(Value::Text(brand_id.clone()));
    }
    if let Some(tag_id) = filter.tag_id.as_ref() {
        sql.push_str(
            " AND EXISTS (
                SELECT 1 FROM integration_tags tf
                WHERE tf.integration_uuid = i.uuid AND tf.tag_id = ?
            )",
        );
        bind_values.push(Value::Text(tag_id.clone()));
    }
    if let Some(search) = filter.search_value.as_deref().map(str::trim) {
        if !search.is_empty() {
            sql.push_str(" AND i.name LIKE ? ESCAPE '\\'");
            bind_values.push(Value::Text(like_contains_pattern(search)));
        }
    }
    Ok(())
}

fn count_grouped(
    conn: &Connection,
    sql: &str,
    bind_values: &[Value],
) -> RepoResult<BTreeMap<String, usize>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(bind_values.iter()), |row| {
        let key: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        Ok((key, usize::try_from(count).unwrap_or(usize::MAX)))
    })?;

    let mut counts = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        counts.insert(key, count);
    }
    Ok(counts)
}

/// Adds logical group buckets on top of raw kind buckets.
fn fold_kind_groups(raw: BTreeMap<String, usize>) -> BTreeMap<String, usize> {
    let mut folded = raw.clone();
    for (kind, count) in raw {
        let group = IntegrationKind::parse(&kind).and_then(IntegrationKind::logical_group);
        if let Some(group) = group {
            *folded.entry(group.to_string()).or_insert(0) += count;
        }
    }
    folded
}

fn hydrate_integration(conn: &Connection, row: &Row<'_>) -> RepoResult<Integration> {
    let uuid_text: String = row.get("uuid")?;
    let id = parse_uuid(&uuid_text, "integrations.uuid")?;
    let kind_text: String = row.get("kind")?;

    let mut stmt = conn.prepare_cached(
        "SELECT tag_id FROM integration_tags WHERE integration_uuid = ?1 ORDER BY tag_id ASC;",
    )?;
    let rows = stmt.query_map([uuid_text.as_str()], |row| row.get::<_, String>(0))?;
    let mut tag_ids = IdSet::new();
    for row in rows {
        tag_ids.insert(row?);
    }

    Ok(Integration {
        id,
        name: row.get("name")?,
        kind: parse_kind(&kind_text)?,
        brand_id: row.get("brand_id")?,
        tag_ids,
        created_at: row.get("created_at")?,
    })
}

fn parse_kind(value: &str) -> RepoResult<IntegrationKind> {
    IntegrationKind::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid integration kind `{value}` in integrations.kind"))
    })
}
