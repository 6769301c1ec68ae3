use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{Action, Decision};

use super::schema::{
    feed_index_ddl, feed_table_ddl, table_name, REQUIRED_COLUMNS, SCHEMA, SCHEMA_VERSION,
};

/// Upper bound on bound parameters in one `IN (...)` lookup.
const MAX_IN_CLAUSE: usize = 500;

/// A feed table that exists with a compatible schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTable {
    name: String,
}

impl FeedTable {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct Repository {
    conn: Connection,
    ensured: Mutex<HashSet<String>>,
}

impl Repository {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            ensured: Mutex::new(HashSet::new()),
        })
    }

    // Schema operations

    /// Creates the table for `feed_key` if absent and checks that an existing
    /// one is usable. Runs against the database once per table per process.
    pub async fn ensure_table(&self, feed_key: &str) -> Result<FeedTable> {
        let name = table_name(feed_key);
        let already_ensured = self
            .ensured
            .lock()
            .map(|set| set.contains(&name))
            .unwrap_or(false);
        if already_ensured {
            return Ok(FeedTable { name });
        }

        let table_ddl = feed_table_ddl(&name);
        let index_ddl = feed_index_ddl(&name);
        let table = name.clone();
        let (missing, version) = self
            .conn
            .call(move |conn| {
                conn.execute_batch(&table_ddl)?;
                conn.execute(
                    r#"INSERT INTO feed_schema_versions (table_name, version) VALUES (?1, ?2)
                       ON CONFLICT(table_name) DO NOTHING"#,
                    params![table, SCHEMA_VERSION],
                )?;
                let version: i64 = conn.query_row(
                    "SELECT version FROM feed_schema_versions WHERE table_name = ?1",
                    params![table],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare(&format!(r#"PRAGMA table_info("{}")"#, table))?;
                let columns = stmt
                    .query_map([], |row| row.get::<_, String>(1))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let missing: Vec<&'static str> = REQUIRED_COLUMNS
                    .iter()
                    .copied()
                    .filter(|required| !columns.iter().any(|c| c.eq_ignore_ascii_case(required)))
                    .collect();
                if missing.is_empty() {
                    conn.execute_batch(&index_ddl)?;
                }
                Ok((missing, version))
            })
            .await?;

        if !missing.is_empty() {
            return Err(AppError::Storage(format!(
                "table {} is missing columns: {}",
                name,
                missing.join(", ")
            )));
        }
        if version > SCHEMA_VERSION {
            return Err(AppError::Storage(format!(
                "table {} has schema version {}, newest supported is {}",
                name, version, SCHEMA_VERSION
            )));
        }

        debug!("Table {} ready (schema version {})", name, version);
        if let Ok(mut set) = self.ensured.lock() {
            set.insert(name.clone());
        }
        Ok(FeedTable { name })
    }

    // Entry operations

    /// Publish times of the stored rows among `links`. Rows outside the given
    /// links are never read.
    pub async fn load_existing_publish_times(
        &self,
        table: &FeedTable,
        links: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>> {
        if links.is_empty() {
            return Ok(HashMap::new());
        }

        let name = table.name.clone();
        let links = links.to_vec();
        let rows = self
            .conn
            .call(move |conn| {
                let mut rows: Vec<(String, String)> = Vec::new();
                for chunk in links.chunks(MAX_IN_CLAUSE) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let mut stmt = conn.prepare(&format!(
                        r#"SELECT link, published_at FROM "{}" WHERE link IN ({})"#,
                        name, placeholders
                    ))?;
                    let found = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?;
                    for row in found {
                        rows.push(row?);
                    }
                }
                Ok(rows)
            })
            .await?;

        let existing = rows
            .into_iter()
            .map(|(link, published_at)| {
                let parsed = parse_datetime(&published_at).unwrap_or_else(|| {
                    warn!(
                        "Unreadable publish time {:?} for {} in {}, treating as oldest",
                        published_at, link, table.name
                    );
                    DateTime::<Utc>::MIN_UTC
                });
                (link, parsed)
            })
            .collect();
        Ok(existing)
    }

    /// Writes all decisions in one transaction. Either every decision is
    /// applied or, on any failure, none is and `StorageWrite` is returned.
    pub async fn apply_decisions(&self, table: &FeedTable, decisions: Vec<Decision>) -> Result<usize> {
        if decisions.is_empty() {
            return Ok(0);
        }

        let insert_sql = format!(
            r#"INSERT INTO "{}" (link, published_at, title, summary, tags, read_flag)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            table.name
        );
        // read_flag belongs to readers once the row exists
        let replace_sql = format!(
            r#"INSERT INTO "{}" (link, published_at, title, summary, tags, read_flag)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               ON CONFLICT(link) DO UPDATE SET
                   published_at = excluded.published_at,
                   title = excluded.title,
                   summary = excluded.summary,
                   tags = excluded.tags"#,
            table.name
        );

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut applied = 0;
                {
                    let mut insert = tx.prepare(&insert_sql)?;
                    let mut replace = tx.prepare(&replace_sql)?;
                    for decision in &decisions {
                        let entry = &decision.entry;
                        let published_at = format_datetime(&entry.published_at);
                        let values = params![
                            entry.link,
                            published_at,
                            entry.title,
                            entry.summary,
                            entry.tags,
                            entry.read_flag,
                        ];
                        applied += match decision.action {
                            Action::Insert => insert.execute(values)?,
                            Action::Replace => replace.execute(values)?,
                        };
                    }
                }
                tx.commit()?;
                Ok(applied)
            })
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::ConnectionClosed => AppError::Database(e),
                e => AppError::StorageWrite {
                    table: table.name.clone(),
                    message: e.to_string(),
                },
            })
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

#[cfg(test)]
impl Repository {
    pub(crate) async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Every row of `table` as `(link, published_at, title, read_flag)`, by link.
    pub(crate) async fn rows(&self, table: &str) -> Result<Vec<(String, String, String, bool)>> {
        let sql = format!(
            r#"SELECT link, published_at, title, read_flag FROM "{}" ORDER BY link"#,
            table
        );
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)? != 0,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entry;
    use crate::reconcile::{candidate_links, reconcile};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn entry(link: &str, secs: i64) -> Entry {
        Entry::new(link, ts(secs), &format!("{} @ {}", link, secs))
    }

    async fn sync(repo: &Repository, table: &FeedTable, candidates: Vec<Entry>) -> Result<usize> {
        let links = candidate_links(&candidates);
        let existing = repo.load_existing_publish_times(table, &links).await?;
        let decisions = reconcile(&existing, candidates);
        repo.apply_decisions(table, decisions).await
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let repo = Repository::open_in_memory().await.unwrap();
        let first = repo.ensure_table("news").await.unwrap();
        let second = repo.ensure_table("NEWS").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name(), "NEWS");

        // Forget the cache so the DDL runs against the existing table.
        repo.ensured.lock().unwrap().clear();
        repo.ensure_table("news").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_table_accepts_existing_compatible_table() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.execute_batch(
            r#"CREATE TABLE "NEWS" (
                   link TEXT PRIMARY KEY, published_at TEXT NOT NULL, title TEXT NOT NULL,
                   summary TEXT, tags TEXT, read_flag INTEGER NOT NULL DEFAULT 0,
                   extra TEXT
               );"#,
        )
        .await
        .unwrap();
        assert!(repo.ensure_table("news").await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_table_rejects_incompatible_table() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.execute_batch(r#"CREATE TABLE "NEWS" (link TEXT PRIMARY KEY, title TEXT);"#)
            .await
            .unwrap();
        let err = repo.ensure_table("news").await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(err.to_string().contains("published_at"));
    }

    #[tokio::test]
    async fn test_ensure_table_rejects_newer_schema_version() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.execute_batch(
            "INSERT INTO feed_schema_versions (table_name, version) VALUES ('NEWS', 99);",
        )
        .await
        .unwrap();
        let err = repo.ensure_table("news").await.unwrap_err();
        assert!(err.to_string().contains("schema version 99"));
    }

    #[tokio::test]
    async fn test_load_existing_only_returns_requested_links() {
        let repo = Repository::open_in_memory().await.unwrap();
        let table = repo.ensure_table("news").await.unwrap();
        repo.apply_decisions(
            &table,
            vec![
                Decision::new(entry("a", 10), Action::Insert),
                Decision::new(entry("b", 20), Action::Insert),
            ],
        )
        .await
        .unwrap();

        let existing = repo
            .load_existing_publish_times(&table, &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(existing.len(), 1);
        assert_eq!(existing["a"], ts(10));

        let none = repo.load_existing_publish_times(&table, &[]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_load_existing_spans_many_chunks() {
        let repo = Repository::open_in_memory().await.unwrap();
        let table = repo.ensure_table("news").await.unwrap();
        let decisions: Vec<Decision> = (0..1200)
            .map(|i| Decision::new(entry(&format!("link-{}", i), i), Action::Insert))
            .collect();
        assert_eq!(repo.apply_decisions(&table, decisions).await.unwrap(), 1200);

        let links: Vec<String> = (0..1300).map(|i| format!("link-{}", i)).collect();
        let existing = repo.load_existing_publish_times(&table, &links).await.unwrap();
        assert_eq!(existing.len(), 1200);
        assert_eq!(existing["link-1199"], ts(1199));
    }

    #[tokio::test]
    async fn test_unreadable_publish_time_is_oldest() {
        let repo = Repository::open_in_memory().await.unwrap();
        let table = repo.ensure_table("news").await.unwrap();
        repo.execute_batch(
            r#"INSERT INTO "NEWS" (link, published_at, title) VALUES ('a', 'yesterday', 't');"#,
        )
        .await
        .unwrap();

        let existing = repo
            .load_existing_publish_times(&table, &["a".to_string()])
            .await
            .unwrap();
        assert_eq!(existing["a"], DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_sync_twice_is_idempotent() {
        let repo = Repository::open_in_memory().await.unwrap();
        let table = repo.ensure_table("news").await.unwrap();
        let candidates = vec![entry("a", 100), entry("b", 50), entry("a", 90)];

        assert_eq!(sync(&repo, &table, candidates.clone()).await.unwrap(), 2);
        let before = repo.rows("NEWS").await.unwrap();

        assert_eq!(sync(&repo, &table, candidates).await.unwrap(), 0);
        assert_eq!(repo.rows("NEWS").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_replace_keeps_one_row_and_read_flag() {
        let repo = Repository::open_in_memory().await.unwrap();
        let table = repo.ensure_table("news").await.unwrap();
        sync(&repo, &table, vec![entry("a", 100)]).await.unwrap();
        repo.execute_batch(r#"UPDATE "NEWS" SET read_flag = 1 WHERE link = 'a';"#)
            .await
            .unwrap();

        assert_eq!(sync(&repo, &table, vec![entry("a", 150)]).await.unwrap(), 1);

        let rows = repo.rows("NEWS").await.unwrap();
        assert_eq!(rows.len(), 1);
        let (link, published_at, title, read_flag) = &rows[0];
        assert_eq!(link, "a");
        assert_eq!(parse_datetime(published_at), Some(ts(150)));
        assert_eq!(title, "a @ 150");
        assert!(read_flag);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_entirely() {
        let repo = Repository::open_in_memory().await.unwrap();
        let table = repo.ensure_table("news").await.unwrap();
        sync(&repo, &table, vec![entry("a", 100)]).await.unwrap();

        // Second insert hits the primary key after the first one succeeded.
        let err = repo
            .apply_decisions(
                &table,
                vec![
                    Decision::new(entry("b", 10), Action::Insert),
                    Decision::new(entry("a", 200), Action::Insert),
                ],
            )
            .await
            .unwrap_err();

        match err {
            AppError::StorageWrite { table, .. } => assert_eq!(table, "NEWS"),
            other => panic!("unexpected error: {other}"),
        }
        let rows = repo.rows("NEWS").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(parse_datetime(&rows[0].1), Some(ts(100)));
    }

    #[tokio::test]
    async fn test_oversized_title_is_rejected_by_schema() {
        let repo = Repository::open_in_memory().await.unwrap();
        let table = repo.ensure_table("news").await.unwrap();
        let mut long = entry("a", 1);
        long.title = "x".repeat(101);

        let result = repo
            .apply_decisions(&table, vec![Decision::new(long, Action::Insert)])
            .await;
        assert!(matches!(result, Err(AppError::StorageWrite { .. })));
        assert!(repo.rows("NEWS").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_on_disk_database_persists_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.db");

        {
            let repo = Repository::new(&path).await.unwrap();
            let table = repo.ensure_table("news").await.unwrap();
            sync(&repo, &table, vec![entry("a", 1), entry("b", 2)]).await.unwrap();
        }

        let repo = Repository::new(&path).await.unwrap();
        let table = repo.ensure_table("news").await.unwrap();
        let existing = repo
            .load_existing_publish_times(&table, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(existing.len(), 2);
    }

    #[test]
    fn test_datetime_round_trips_through_text() {
        let dt = DateTime::from_timestamp(1_700_000_000, 123_000_000).unwrap();
        assert_eq!(parse_datetime(&format_datetime(&dt)), Some(dt));
        assert_eq!(
            parse_datetime("2026-01-11 12:34:56"),
            Some(DateTime::parse_from_rfc3339("2026-01-11T12:34:56Z")
                .unwrap()
                .with_timezone(&Utc))
        );
        assert_eq!(parse_datetime("not a date"), None);
    }
}
