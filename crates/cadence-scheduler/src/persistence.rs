//! SQLite-backed feed and schedule stores.
//! Survives restarts; every write is a narrow column or JSON-path update.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::RegexBuilder;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use cadence_core::error::{CadenceError, Result};
use cadence_core::filter::FeedFilter;
use cadence_core::traits::{FeedCursor, FeedStore, FieldUpdate, RateMatch, ScheduleStore};
use cadence_core::types::{CustomSchedule, DisabledCode, Feed, FeedConnections, HealthStatus};

use crate::store::{PageRequest, Snapshot, paged_cursor};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const FEED_COLUMNS: &str =
    "id, url, user_id, disabled_code, health_status, connections, passing_comparisons, blocking_comparisons";

fn db_err(e: rusqlite::Error) -> CadenceError {
    CadenceError::Store(e.to_string())
}

/// SQLite persistence for feeds and custom schedules.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl SqliteStore {
    /// Open or create the database.
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn, page_size)
    }

    pub fn open_in_memory(page_size: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, page_size)
    }

    fn init(conn: Connection, page_size: usize) -> Result<Self> {
        register_regexp(&conn).map_err(db_err)?;
        migrate(&conn).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: page_size.max(1),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| CadenceError::Store("sqlite connection lock poisoned".into()))?;
            f(&conn)
        })
        .await
        .map_err(|e| CadenceError::Store(format!("sqlite task: {e}")))?
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CadenceError::Store("sqlite connection lock poisoned".into()))
    }

    // ─── Seeding ──────────────────────────────────────────────

    /// Insert or fully replace a feed. Used for imports, not by the scheduler.
    pub fn upsert_feed(&self, feed: &Feed) -> Result<()> {
        let connections = serde_json::to_string(&feed.connections)?;
        let passing = serde_json::to_string(&feed.passing_comparisons)?;
        let blocking = serde_json::to_string(&feed.blocking_comparisons)?;
        self.lock()?
            .execute(
                &format!("INSERT OR REPLACE INTO feeds ({FEED_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    feed.id,
                    feed.url,
                    feed.user_id,
                    feed.disabled_code.map(|c| c.as_str()),
                    feed.health_status.as_str(),
                    connections,
                    passing,
                    blocking,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn insert_schedule(&self, schedule: &CustomSchedule) -> Result<()> {
        let keywords = serde_json::to_string(&schedule.keywords)?;
        let feed_ids = serde_json::to_string(&schedule.feed_ids)?;
        self.lock()?
            .execute(
                "INSERT INTO feed_schedules (name, refresh_rate_seconds, keywords, feed_ids)
                 VALUES (?1, ?2, ?3, ?4)",
                params![schedule.name, schedule.refresh_rate_seconds as i64, keywords, feed_ids],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Load a JSON snapshot into the database.
    pub fn import(&self, snapshot: &Snapshot) -> Result<()> {
        for feed in &snapshot.feeds {
            self.upsert_feed(feed)?;
        }
        for schedule in &snapshot.schedules {
            self.insert_schedule(schedule)?;
        }
        tracing::info!(
            "📥 Imported {} feeds and {} schedules",
            snapshot.feeds.len(),
            snapshot.schedules.len()
        );
        Ok(())
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS feeds (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            user_id TEXT NOT NULL,
            disabled_code TEXT,                      -- NULL while enabled
            health_status TEXT NOT NULL DEFAULT 'ok',
            connections TEXT NOT NULL DEFAULT '{\"channels\":[],\"webhooks\":[]}',
            passing_comparisons TEXT NOT NULL DEFAULT '[]',
            blocking_comparisons TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_feeds_url ON feeds(url);
        CREATE INDEX IF NOT EXISTS idx_feeds_user ON feeds(user_id);

        CREATE TABLE IF NOT EXISTS feed_schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            refresh_rate_seconds INTEGER NOT NULL,
            keywords TEXT NOT NULL DEFAULT '[]',     -- JSON array of patterns
            feed_ids TEXT NOT NULL DEFAULT '[]'      -- JSON array of feed ids
        );
        CREATE INDEX IF NOT EXISTS idx_schedules_rate ON feed_schedules(refresh_rate_seconds);
        ",
    )
}

/// `x REGEXP y` calls `regexp(y, x)`. Patterns are compiled once per statement.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let regex: Arc<regex::Regex> = ctx.get_or_create_aux(0, |vr| -> std::result::Result<_, BoxError> {
                Ok(RegexBuilder::new(vr.as_str()?).case_insensitive(true).build()?)
            })?;
            let text = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(regex.is_match(text))
        },
    )
}

/// Push a parameter and return its numbered placeholder.
fn bind(params: &mut Vec<Value>, value: impl Into<Value>) -> String {
    params.push(value.into());
    format!("?{}", params.len())
}

/// Compile a filter to a SQL boolean expression over the `feeds` table.
pub fn compile_filter(filter: &FeedFilter, params: &mut Vec<Value>) -> String {
    match filter {
        FeedFilter::All(children) if children.is_empty() => "1".into(),
        FeedFilter::Any(children) if children.is_empty() => "0".into(),
        FeedFilter::All(children) => join(children, " AND ", params),
        FeedFilter::Any(children) => join(children, " OR ", params),
        FeedFilter::Not(inner) => format!("NOT ({})", compile_filter(inner, params)),
        FeedFilter::UrlMatches(pattern) => {
            format!("url REGEXP {}", bind(params, pattern.as_str().to_string()))
        }
        FeedFilter::UrlEquals(url) => format!("url = {}", bind(params, url.clone())),
        FeedFilter::IdIn(ids) => in_list("id", ids.iter(), params),
        FeedFilter::UserIn(users) => in_list("user_id", users.iter(), params),
        FeedFilter::Enabled => "disabled_code IS NULL".into(),
        FeedFilter::HealthOk => format!(
            "health_status != {}",
            bind(params, HealthStatus::Failed.as_str().to_string())
        ),
        FeedFilter::HasConnection => "(COALESCE(json_array_length(connections, '$.channels'), 0) \
             + COALESCE(json_array_length(connections, '$.webhooks'), 0)) > 0"
            .into(),
    }
}

fn join(children: &[FeedFilter], op: &str, params: &mut Vec<Value>) -> String {
    let parts: Vec<String> = children
        .iter()
        .map(|c| format!("({})", compile_filter(c, params)))
        .collect();
    parts.join(op)
}

/// Membership test bound as a single JSON array parameter, so list length is
/// not limited by SQLite's bound-parameter cap.
fn in_list<'a>(
    column: &str,
    values: impl Iterator<Item = &'a String>,
    params: &mut Vec<Value>,
) -> String {
    let values: Vec<serde_json::Value> = values.cloned().map(serde_json::Value::String).collect();
    if values.is_empty() {
        return "0".into();
    }
    let list = bind(params, serde_json::Value::Array(values).to_string());
    format!("{column} IN (SELECT value FROM json_each({list}))")
}

/// SET clause for a batch of field updates, or None if there is nothing to set.
fn compile_updates(updates: &[FieldUpdate], params: &mut Vec<Value>) -> Option<String> {
    let mut sets = Vec::new();
    let mut connections = String::from("connections");
    let mut touches_connections = false;

    for update in updates {
        match update {
            FieldUpdate::DisabledCode(code) => {
                sets.push(format!("disabled_code = {}", bind(params, code.as_str().to_string())));
            }
            FieldUpdate::HealthStatus(status) => {
                sets.push(format!("health_status = {}", bind(params, status.as_str().to_string())));
            }
            FieldUpdate::ConnectionDisabledCode { kind, index, code } => {
                let slot = bind(params, format!("$.{}[{}]", kind.group_key(), index));
                let field = bind(params, format!("$.{}[{}].disabledCode", kind.group_key(), index));
                let value = bind(params, code.as_str().to_string());
                // Missing positions are left untouched.
                connections = format!(
                    "CASE WHEN json_type({connections}, {slot}) = 'object' \
                     THEN json_set({connections}, {field}, {value}) ELSE {connections} END"
                );
                touches_connections = true;
            }
        }
    }
    if touches_connections {
        sets.push(format!("connections = {connections}"));
    }
    if sets.is_empty() { None } else { Some(sets.join(", ")) }
}

struct FeedRow {
    id: String,
    url: String,
    user_id: String,
    disabled_code: Option<String>,
    health_status: String,
    connections: String,
    passing: String,
    blocking: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedRow> {
    Ok(FeedRow {
        id: row.get(0)?,
        url: row.get(1)?,
        user_id: row.get(2)?,
        disabled_code: row.get(3)?,
        health_status: row.get(4)?,
        connections: row.get(5)?,
        passing: row.get(6)?,
        blocking: row.get(7)?,
    })
}

fn feed_from_row(row: FeedRow) -> Result<Feed> {
    let disabled_code = match &row.disabled_code {
        Some(code) => Some(DisabledCode::parse(code).ok_or_else(|| {
            CadenceError::Store(format!("feed {}: unknown disabled code {code}", row.id))
        })?),
        None => None,
    };
    let health_status = HealthStatus::parse(&row.health_status).ok_or_else(|| {
        CadenceError::Store(format!("feed {}: unknown health status {}", row.id, row.health_status))
    })?;
    let connections: FeedConnections = serde_json::from_str(&row.connections)?;
    Ok(Feed {
        id: row.id,
        url: row.url,
        user_id: row.user_id,
        connections,
        disabled_code,
        health_status,
        passing_comparisons: serde_json::from_str(&row.passing)?,
        blocking_comparisons: serde_json::from_str(&row.blocking)?,
    })
}

fn query_feeds(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Feed>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), read_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    rows.into_iter().map(feed_from_row).collect()
}

fn fetch_page(conn: &Connection, filter: &FeedFilter, req: &PageRequest) -> Result<Vec<Feed>> {
    let mut params = Vec::new();
    let mut clause = compile_filter(filter, &mut params);
    if let Some(after) = &req.after {
        clause = format!("({clause}) AND id > {}", bind(&mut params, after.clone()));
    }
    let limit = bind(&mut params, req.limit as i64);
    let offset = bind(&mut params, req.skip as i64);
    let sql = format!(
        "SELECT {FEED_COLUMNS} FROM feeds WHERE {clause} ORDER BY id LIMIT {limit} OFFSET {offset}"
    );
    query_feeds(conn, &sql, &params)
}

#[async_trait]
impl FeedStore for SqliteStore {
    async fn distinct_urls(&self, filter: &FeedFilter) -> Result<Vec<String>> {
        let mut params = Vec::new();
        let clause = compile_filter(filter, &mut params);
        self.with_conn(move |conn| {
            let sql = format!("SELECT DISTINCT url FROM feeds WHERE {clause} ORDER BY url");
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let urls = stmt
                .query_map(params_from_iter(params.iter()), |row| row.get(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(db_err)?;
            Ok(urls)
        })
        .await
    }

    async fn find(&self, filter: &FeedFilter, offset: usize) -> Result<FeedCursor> {
        let store = self.clone();
        let filter = Arc::new(filter.clone());
        Ok(paged_cursor(
            move |req| {
                let store = store.clone();
                let filter = filter.clone();
                async move { store.with_conn(move |conn| fetch_page(conn, &filter, &req)).await }
            },
            offset,
            self.page_size,
        ))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Feed>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                    params![id],
                    read_row,
                )
                .optional()
                .map_err(db_err)?;
            row.map(feed_from_row).transpose()
        })
        .await
    }

    async fn update_by_id(&self, id: &str, updates: &[FieldUpdate]) -> Result<bool> {
        let filter = FeedFilter::id_in([id]);
        Ok(self.update_many(&filter, updates).await? > 0)
    }

    async fn update_many(&self, filter: &FeedFilter, updates: &[FieldUpdate]) -> Result<u64> {
        let mut params = Vec::new();
        let sets = compile_updates(updates, &mut params);
        let clause = compile_filter(filter, &mut params);
        self.with_conn(move |conn| {
            let changed = match sets {
                Some(sets) => conn
                    .execute(
                        &format!("UPDATE feeds SET {sets} WHERE {clause}"),
                        params_from_iter(params.iter()),
                    )
                    .map_err(db_err)? as u64,
                None => conn
                    .query_row(
                        &format!("SELECT COUNT(*) FROM feeds WHERE {clause}"),
                        params_from_iter(params.iter()),
                        |row| row.get::<_, i64>(0),
                    )
                    .map_err(db_err)? as u64,
            };
            Ok(changed)
        })
        .await
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn find_schedules(&self, rate: RateMatch) -> Result<Vec<CustomSchedule>> {
        let (op, value) = match rate {
            RateMatch::Equal(r) => ("=", r),
            RateMatch::NotEqual(r) => ("!=", r),
        };
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT name, refresh_rate_seconds, keywords, feed_ids FROM feed_schedules
                 WHERE refresh_rate_seconds {op} ?1 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params![value as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;

            rows.into_iter()
                .map(|(name, rate, keywords, feed_ids)| -> Result<CustomSchedule> {
                    Ok(CustomSchedule {
                        name,
                        refresh_rate_seconds: rate as u64,
                        keywords: serde_json::from_str(&keywords)?,
                        feed_ids: serde_json::from_str(&feed_ids)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn list_rates(&self) -> Result<Vec<u64>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT refresh_rate_seconds FROM feed_schedules ORDER BY 1")
                .map_err(db_err)?;
            let rates = stmt
                .query_map([], |row| row.get::<_, i64>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            Ok(rates.into_iter().map(|r| r as u64).collect())
        })
        .await
    }
}
