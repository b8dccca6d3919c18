use std::path::Path;
use std::time::Duration;

use mailindex_core::config::{sqlite, SCHEMA_VERSION};
use rusqlite::{Connection, OpenFlags};

use crate::{Collection, StoreResult};

/// Table layout of one collection.
#[derive(Debug)]
pub(crate) struct CollectionSchema {
    pub fts_table: &'static str,
    pub meta_table: &'static str,
    pub ids_table: &'static str,
    pub vec_table: &'static str,
    pub id_column: &'static str,
    /// FTS5 column definitions in declaration order.
    pub fts_columns: &'static [&'static str],
    /// Column weights passed to `bm25()`, aligned with `fts_columns`.
    pub bm25_weights: &'static [f64],
    /// FTS5 column index used by `snippet()`; -1 picks the best column.
    pub snippet_column: i32,
    pub meta_columns: &'static str,
    /// Meta columns added after the first release; created by `ALTER TABLE` on
    /// databases that predate them.
    pub added_meta_columns: &'static [(&'static str, &'static str)],
}

static EMAIL_SCHEMA: CollectionSchema = CollectionSchema {
    fts_table: "messages_fts",
    meta_table: "message_meta",
    ids_table: "message_ids",
    vec_table: "message_vec",
    id_column: "msgId",
    fts_columns: &["msgId", "subject", "from_", "to_", "cc", "bcc", "body"],
    bm25_weights: &[0.0, 5.0, 3.0, 2.0, 1.0, 1.0, 1.0],
    snippet_column: -1,
    meta_columns: "dateMs INTEGER NOT NULL DEFAULT 0, hasAttachments INTEGER NOT NULL DEFAULT 0",
    added_meta_columns: &[("parsedIcsAttachments", "TEXT")],
};

static MEMORY_SCHEMA: CollectionSchema = CollectionSchema {
    fts_table: "memory_fts",
    meta_table: "memory_meta",
    ids_table: "memory_ids",
    vec_table: "memory_vec",
    id_column: "memId",
    fts_columns: &["memId", "role", "content", "sessionId"],
    bm25_weights: &[0.0, 1.0, 5.0, 0.0],
    snippet_column: 2,
    meta_columns: "dateMs INTEGER NOT NULL DEFAULT 0, sessionId TEXT, turnIndex INTEGER",
    added_meta_columns: &[],
};

impl Collection {
    pub(crate) fn schema(self) -> &'static CollectionSchema {
        match self {
            Collection::Email => &EMAIL_SCHEMA,
            Collection::Memory => &MEMORY_SCHEMA,
        }
    }
}

impl CollectionSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.fts_columns.contains(&column)
    }

    pub fn bm25_expression(&self) -> String {
        let weights = self
            .bm25_weights
            .iter()
            .map(|weight| format!("{weight:.1}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("bm25({}, {weights})", self.fts_table)
    }

    pub fn snippet_expression(&self, tokens: i64) -> String {
        format!(
            "snippet({}, {}, '[', ']', '…', {tokens})",
            self.fts_table, self.snippet_column
        )
    }

    fn create_statements(&self) -> String {
        format!(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5(
                {columns},
                tokenize = "{tokenize}",
                prefix = '{prefixes}'
            );

            CREATE TABLE IF NOT EXISTS {meta} (
                rowid INTEGER PRIMARY KEY,
                {meta_columns}
            );

            CREATE TABLE IF NOT EXISTS {ids} (
                rowid INTEGER PRIMARY KEY,
                {id_column} TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS {vec} (
                rowid INTEGER PRIMARY KEY,
                embedding BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_{meta}_date ON {meta}(dateMs);

            CREATE TABLE IF NOT EXISTS schema_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
            fts = self.fts_table,
            columns = self.fts_columns.join(", "),
            tokenize = sqlite::FTS_TOKENIZE,
            prefixes = sqlite::FTS_PREFIXES,
            meta = self.meta_table,
            meta_columns = self.meta_columns,
            ids = self.ids_table,
            id_column = self.id_column,
            vec = self.vec_table,
        )
    }
}

pub(crate) fn open_read_write(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    connection.busy_timeout(Duration::from_millis(sqlite::PRAGMA_BUSY_TIMEOUT_MS))?;
    connection.execute_batch(&format!(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = {};
        "#,
        sqlite::PRAGMA_CACHE_SIZE_KIB_NEG
    ))?;
    Ok(connection)
}

/// Opens a connection that can never write; used by the reader lane.
pub(crate) fn open_read_only(path: &Path) -> StoreResult<Connection> {
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    connection.busy_timeout(Duration::from_millis(sqlite::PRAGMA_BUSY_TIMEOUT_MS))?;
    Ok(connection)
}

/// Ensure the collection schema exists before reads/writes.
pub(crate) fn initialize_schema(connection: &Connection, collection: Collection) -> StoreResult<()> {
    let schema = collection.schema();
    connection.execute_batch(&schema.create_statements())?;
    add_missing_meta_columns(connection, schema)?;
    connection.execute(
        &format!(
            "INSERT INTO {fts}({fts}, rank) VALUES('automerge', 2)",
            fts = schema.fts_table
        ),
        [],
    )?;
    connection.execute(
        "INSERT INTO schema_meta (key, value) VALUES ('schemaVersion', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn add_missing_meta_columns(connection: &Connection, schema: &CollectionSchema) -> StoreResult<()> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info({})", schema.meta_table))?;
    let existing = statement
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    for (column, definition) in schema.added_meta_columns {
        if !existing.iter().any(|name| name == column) {
            connection.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {column} {definition}",
                schema.meta_table
            ))?;
        }
    }
    Ok(())
}

pub(crate) fn count_rows(connection: &Connection, table: &str) -> StoreResult<i64> {
    Ok(connection.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?)
}

/// Size of the database file plus its write-ahead log.
pub(crate) fn database_bytes(path: &Path) -> u64 {
    let wal = path.with_extension("db-wal");
    [path.to_path_buf(), wal]
        .iter()
        .filter_map(|file| std::fs::metadata(file).ok())
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_bm25_expression_lists_weights_in_column_order() {
        assert_eq!(
            Collection::Email.schema().bm25_expression(),
            "bm25(messages_fts, 0.0, 5.0, 3.0, 2.0, 1.0, 1.0, 1.0)"
        );
        assert_eq!(
            Collection::Memory.schema().bm25_expression(),
            "bm25(memory_fts, 0.0, 1.0, 5.0, 0.0)"
        );
    }

    #[test]
    fn functional_initialize_schema_is_idempotent_and_records_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("email.db");
        let connection = open_read_write(&path).expect("open");
        initialize_schema(&connection, Collection::Email).expect("first init");
        initialize_schema(&connection, Collection::Email).expect("second init");

        let version: String = connection
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'schemaVersion'",
                [],
                |row| row.get(0),
            )
            .expect("schema version");
        assert_eq!(version, SCHEMA_VERSION.to_string());
        assert_eq!(count_rows(&connection, "messages_fts").expect("count"), 0);
    }

    #[test]
    fn regression_older_meta_table_gains_parsed_ics_column() {
        let temp = tempfile::tempdir().expect("tempdir");
        let connection = open_read_write(&temp.path().join("email.db")).expect("open");
        connection
            .execute_batch(
                "CREATE TABLE message_meta (rowid INTEGER PRIMARY KEY,
                     dateMs INTEGER NOT NULL DEFAULT 0, hasAttachments INTEGER NOT NULL DEFAULT 0);
                 INSERT INTO message_meta (rowid, dateMs) VALUES (1, 5);",
            )
            .expect("legacy table");

        initialize_schema(&connection, Collection::Email).expect("init");
        initialize_schema(&connection, Collection::Email).expect("second init");
        let parsed: Option<String> = connection
            .query_row("SELECT parsedIcsAttachments FROM message_meta WHERE rowid = 1", [], |row| row.get(0))
            .expect("migrated column");
        assert_eq!(parsed, None);
    }

    #[test]
    fn regression_read_only_connection_rejects_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("memory.db");
        let writer = open_read_write(&path).expect("open");
        initialize_schema(&writer, Collection::Memory).expect("init");

        let reader = open_read_only(&path).expect("open read-only");
        let error = reader
            .execute("INSERT INTO memory_ids (memId) VALUES ('x')", [])
            .expect_err("read-only write must fail");
        assert!(error.to_string().to_ascii_lowercase().contains("readonly"));
    }
}
