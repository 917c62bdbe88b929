use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vellum_core::types::{timestamp, wire};
use vellum_core::{
    AccessToken, BackendAdapter, BackendKind, HealthStatus, Page, QueryRequest, Result,
    TokenSource, VellumError, WriteIntent, WriteKind,
};

use crate::config::SqliteConfig;
use crate::error::map_sqlite_error;
use crate::filter::render;
use crate::schema::{check_location, create_tables, events_table, records_table, verify_tables};

/// Relational adapter over SQLite
///
/// Opens a fresh connection for every operation. When a [`TokenSource`] is
/// configured a new token is minted and checked immediately before each
/// connection is opened; tokens are never reused.
pub struct SqliteStore {
    config: SqliteConfig,
    tokens: Option<Arc<dyn TokenSource>>,
}

enum Applied {
    Written,
    Rejected(VellumError),
}

fn open_connection(config: &SqliteConfig) -> Result<Connection> {
    if let Some(parent) = config.path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            VellumError::Unavailable(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let conn = Connection::open_with_flags(
        &config.path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )
    .map_err(map_sqlite_error)?;

    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(map_sqlite_error)?;
    if config.wal_mode {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_sqlite_error)?;
    }
    conn.pragma_update(None, "synchronous", config.synchronous.pragma_value())
        .map_err(map_sqlite_error)?;
    Ok(conn)
}

fn str_field<'a>(document: &'a Value, name: &str) -> Result<&'a str> {
    document.get(name).and_then(Value::as_str).ok_or_else(|| {
        VellumError::Serialization(format!("stored document is missing {name}"))
    })
}

fn encode_continuation(partition_key: &str, id: &str) -> Result<String> {
    Ok(serde_json::to_string(&(partition_key, id))?)
}

fn decode_continuation(token: &str) -> Result<(String, String)> {
    serde_json::from_str(token)
        .map_err(|e| VellumError::Serialization(format!("invalid continuation token: {e}")))
}

fn parse_body(body: &str) -> Result<Value> {
    Ok(serde_json::from_str(body)?)
}

/// Why a guarded update touched no row
fn diagnose_update(conn: &Connection, table: &str, partition_key: &str, id: &str) -> Result<VellumError> {
    let deleted: Option<bool> = conn
        .query_row(
            &format!("SELECT is_deleted FROM {table} WHERE partition_key = ?1 AND id = ?2"),
            params![partition_key, id],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite_error)?;
    Ok(match deleted {
        None => VellumError::NotFound(format!("record {id}")),
        Some(true) => VellumError::NotFound(format!("record {id} is deleted")),
        Some(false) => VellumError::etag_mismatch(format!("record {id} was modified concurrently")),
    })
}

fn apply_intent(
    conn: &Connection,
    location: &str,
    partition_key: &str,
    intent: &WriteIntent,
) -> Result<Applied> {
    let records = records_table(location);
    let record = &intent.record;
    let type_name = str_field(record, wire::TYPE_NAME)?;
    let etag = str_field(record, wire::ETAG)?;
    let is_deleted = record
        .get(wire::IS_DELETED)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let version = record.get(wire::VERSION).and_then(Value::as_i64).unwrap_or(0);
    let body = record.to_string();

    let changed = match intent.kind {
        WriteKind::Create => conn.execute(
            &format!(
                "INSERT INTO {records} (partition_key, id, type_name, etag, is_deleted, version, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (partition_key, id) DO NOTHING"
            ),
            params![partition_key, intent.id, type_name, etag, is_deleted, version, body],
        ),
        WriteKind::Update | WriteKind::Delete => conn.execute(
            &format!(
                "UPDATE {records}
                 SET type_name = ?1, etag = ?2, is_deleted = ?3, version = ?4, body = ?5
                 WHERE partition_key = ?6 AND id = ?7 AND etag = ?8 AND is_deleted = 0"
            ),
            params![
                type_name,
                etag,
                is_deleted,
                version,
                body,
                partition_key,
                intent.id,
                intent.expected_etag
            ],
        ),
    }
    .map_err(map_sqlite_error)?;

    if changed == 0 {
        let reason = match intent.kind {
            WriteKind::Create => VellumError::duplicate(format!("record {} already exists", intent.id)),
            _ => diagnose_update(conn, &records, partition_key, &intent.id)?,
        };
        return Ok(Applied::Rejected(reason));
    }

    if let Some(event) = &intent.event {
        let event_id = str_field(event, wire::ID)?;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO {} (partition_key, id, related_id, sequence, expires_at, body)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (partition_key, id) DO NOTHING",
                    events_table(location)
                ),
                params![
                    partition_key,
                    event_id,
                    str_field(event, "relatedId")?,
                    event.get("sequence").and_then(Value::as_i64).unwrap_or(0),
                    event.get("expiresAt").and_then(Value::as_str),
                    event.to_string()
                ],
            )
            .map_err(map_sqlite_error)?;
        if inserted == 0 {
            return Ok(Applied::Rejected(VellumError::duplicate(format!(
                "event {event_id} already exists"
            ))));
        }
    }
    Ok(Applied::Written)
}

/// One immediate transaction; each intent runs in its own savepoint so a
/// rejected intent leaves no trace while its siblings commit
fn write_partition(
    conn: &mut Connection,
    location: &str,
    partition_key: &str,
    intents: &[WriteIntent],
) -> Result<Vec<Result<()>>> {
    let mut tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(map_sqlite_error)?;
    let mut outcomes = Vec::with_capacity(intents.len());
    for intent in intents {
        let savepoint = tx.savepoint().map_err(map_sqlite_error)?;
        match apply_intent(&savepoint, location, partition_key, intent)? {
            Applied::Written => {
                savepoint.commit().map_err(map_sqlite_error)?;
                outcomes.push(Ok(()));
            }
            // dropping the savepoint rolls it back
            Applied::Rejected(reason) => outcomes.push(Err(reason)),
        }
    }
    tx.commit().map_err(map_sqlite_error)?;
    Ok(outcomes)
}

impl SqliteStore {
    pub fn new(config: SqliteConfig, tokens: Option<Arc<dyn TokenSource>>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, tokens })
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    async fn token(&self) -> Result<Option<AccessToken>> {
        let Some(source) = &self.tokens else {
            return Ok(None);
        };
        let token = source.token().await?;
        token.ensure_valid()?;
        Ok(Some(token))
    }

    /// Run `f` on a freshly opened, freshly authenticated connection
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let token = self.token().await?;
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&config)?;
            debug!(
                authenticated = token.is_some(),
                expires_at = ?token.as_ref().map(|t| t.expires_at),
                "opened sqlite connection"
            );
            f(&mut conn)
        })
        .await?
    }

    pub async fn create_tables(&self, locations: Vec<String>) -> Result<()> {
        self.with_connection(move |conn| {
            for location in &locations {
                create_tables(conn, location)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn verify_tables(&self, locations: Vec<String>) -> Result<()> {
        self.with_connection(move |conn| {
            for location in &locations {
                verify_tables(conn, location)?;
            }
            Ok(())
        })
        .await
    }

    /// Delete events of `location` whose expiry has passed; returns how many
    pub async fn purge_expired_events(&self, location: &str) -> Result<usize> {
        check_location(location)?;
        let table = events_table(location);
        let now = timestamp::format(&Utc::now());
        let purged = self
            .with_connection(move |conn| {
                conn.execute(
                    &format!("DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= ?1"),
                    [now],
                )
                .map_err(map_sqlite_error)
            })
            .await?;
        if purged > 0 {
            info!(location, purged, "purged expired events");
        }
        Ok(purged)
    }
}

#[async_trait]
impl BackendAdapter for SqliteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn read(&self, location: &str, partition_key: &str, id: &str) -> Result<Option<Value>> {
        check_location(location)?;
        let sql = format!(
            "SELECT body FROM {} WHERE partition_key = ?1 AND id = ?2",
            records_table(location)
        );
        let key = (partition_key.to_string(), id.to_string());
        let body: Option<String> = self
            .with_connection(move |conn| {
                conn.query_row(&sql, params![key.0, key.1], |row| row.get(0))
                    .optional()
                    .map_err(map_sqlite_error)
            })
            .await?;
        body.as_deref().map(parse_body).transpose()
    }

    async fn write_batch(
        &self,
        location: &str,
        partition_key: &str,
        intents: Vec<WriteIntent>,
    ) -> Result<Vec<Result<()>>> {
        check_location(location)?;
        debug!(location, partition_key, items = intents.len(), "sqlite write batch");
        let location_owned = location.to_string();
        let partition_owned = partition_key.to_string();
        let result = self
            .with_connection(move |conn| {
                write_partition(conn, &location_owned, &partition_owned, &intents)
            })
            .await;
        if let Err(e) = &result {
            warn!(location, partition_key, error = %e, "sqlite transaction failed");
        }
        result
    }

    async fn query_page(
        &self,
        location: &str,
        request: &QueryRequest,
        continuation: Option<String>,
    ) -> Result<Page> {
        check_location(location)?;
        let rendered = render(&request.native);
        let mut sql = format!(
            "SELECT partition_key, id, body FROM {} WHERE {}",
            records_table(location),
            rendered.sql
        );
        let mut params = rendered.params;
        if let Some(token) = continuation {
            let (partition_key, id) = decode_continuation(&token)?;
            sql.push_str(" AND (partition_key, id) > (?, ?)");
            params.push(partition_key.into());
            params.push(id.into());
        }
        sql.push_str(" ORDER BY partition_key, id LIMIT ?");
        let page_size = self.config.page_size;
        params.push(rusqlite::types::Value::Integer((page_size + 1) as i64));

        let mut rows: Vec<(String, String, String)> = self
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })
                    .map_err(map_sqlite_error)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(map_sqlite_error)?;
                Ok(rows)
            })
            .await?;

        let continuation = if rows.len() > page_size {
            rows.truncate(page_size);
            match rows.last() {
                Some((partition_key, id, _)) => Some(encode_continuation(partition_key, id)?),
                None => None,
            }
        } else {
            None
        };

        let mut documents = Vec::with_capacity(rows.len());
        for (_, _, body) in &rows {
            let document = parse_body(body)?;
            // rows from a widened condition are dropped here
            if request.native.matches(&document) {
                documents.push(document);
            }
        }
        Ok(Page {
            documents,
            continuation,
        })
    }

    async fn read_events(
        &self,
        location: &str,
        partition_key: &str,
        related_id: &str,
    ) -> Result<Vec<Value>> {
        check_location(location)?;
        let sql = format!(
            "SELECT body FROM {} WHERE partition_key = ?1 AND related_id = ?2
             AND (expires_at IS NULL OR expires_at > ?3) ORDER BY sequence",
            events_table(location)
        );
        let args = (
            partition_key.to_string(),
            related_id.to_string(),
            timestamp::format(&Utc::now()),
        );
        let bodies: Vec<String> = self
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
                let bodies = stmt
                    .query_map(params![args.0, args.1, args.2], |row| row.get(0))
                    .map_err(map_sqlite_error)?
                    .collect::<rusqlite::Result<Vec<String>>>()
                    .map_err(map_sqlite_error)?;
                Ok(bodies)
            })
            .await?;
        bodies.iter().map(|b| parse_body(b)).collect()
    }

    async fn status(&self) -> HealthStatus {
        let reachable = self
            .with_connection(|conn| {
                conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
                    .map_err(map_sqlite_error)
            })
            .await;
        let status = HealthStatus::healthy()
            .with("backend", BackendKind::Relational)
            .with("path", self.config.path.display());
        match reachable {
            Ok(version) => status.with("sqlite_version", version),
            Err(e) => status.with_unhealthy(e.to_string()),
        }
    }
}
