/// Version of the per-feed table layout created by [`feed_table_ddl`].
pub const SCHEMA_VERSION: i64 = 1;

/// Columns every feed table must have for this binary to use it.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "link",
    "published_at",
    "title",
    "summary",
    "tags",
    "read_flag",
];

pub const SCHEMA: &str = r#"
-- schema version of each feed table
CREATE TABLE IF NOT EXISTS feed_schema_versions (
    table_name TEXT PRIMARY KEY NOT NULL,
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Bookkeeping table created by [`SCHEMA`].
const SCHEMA_VERSIONS_TABLE: &str = "feed_schema_versions";

/// Whether `table` is a name no feed table may take: the bookkeeping table,
/// or the `sqlite_` prefix SQLite keeps for itself.
pub fn is_reserved_table(table: &str) -> bool {
    table.eq_ignore_ascii_case(SCHEMA_VERSIONS_TABLE)
        || table
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("sqlite_"))
}

/// Table holding the articles of the feed configured under `feed_key`.
pub fn table_name(feed_key: &str) -> String {
    feed_key.to_uppercase()
}

/// DDL creating a feed table if it is absent.
///
/// `table` must come from [`table_name`] on a validated feed key.
pub fn feed_table_ddl(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS "{table}" (
    link TEXT PRIMARY KEY NOT NULL,
    published_at TEXT NOT NULL,
    title TEXT NOT NULL CHECK (length(title) <= 100),
    summary TEXT CHECK (summary IS NULL OR length(summary) <= 100),
    tags TEXT CHECK (tags IS NULL OR length(tags) <= 100),
    read_flag INTEGER NOT NULL DEFAULT 0
);
"#
    )
}

/// Index on the publish time; only valid once the table has the required columns.
pub fn feed_index_ddl(table: &str) -> String {
    format!(r#"CREATE INDEX IF NOT EXISTS "idx_{table}_published_at" ON "{table}"(published_at DESC);"#)
}
