//! Resumable re-embedding of stored documents, driven by the client in batches.

use mailindex_core::config::rebuild;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::embedding::Embedder;
use crate::params::{int_field, string_field};
use crate::schema::count_rows;
use crate::text_prep::{prepare_email_text, prepare_memory_text};
use crate::vectors::upsert_vector;
use crate::{Collection, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildStartReport {
    pub ok: bool,
    pub email_total: i64,
    pub memory_total: i64,
}

/// Parameters of `rebuildEmbeddingsBatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildBatchRequest {
    pub target: Collection,
    pub last_rowid: i64,
    pub batch_size: i64,
}

impl Default for RebuildBatchRequest {
    fn default() -> Self {
        Self {
            target: Collection::Email,
            last_rowid: 0,
            batch_size: rebuild::DEFAULT_BATCH_SIZE,
        }
    }
}

impl RebuildBatchRequest {
    pub fn from_params(params: &Value) -> StoreResult<Self> {
        let target = string_field(params, &["target"])
            .unwrap_or(rebuild::DEFAULT_TARGET)
            .parse::<Collection>()?;
        let batch_size = int_field(params, "batchSize")
            .unwrap_or(rebuild::DEFAULT_BATCH_SIZE)
            .clamp(1, rebuild::MAX_BATCH_SIZE);
        Ok(Self {
            target,
            last_rowid: int_field(params, "lastRowid").unwrap_or(0).max(0),
            batch_size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildBatchReport {
    pub ok: bool,
    pub target: String,
    pub last_rowid: i64,
    pub processed: i64,
    pub embedded: i64,
    pub done: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<i64>,
}

/// Drops every stored vector of `collection` and returns its document count.
pub(crate) fn reset_vectors(connection: &mut Connection, collection: Collection) -> StoreResult<i64> {
    let schema = collection.schema();
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    transaction.execute(&format!("DELETE FROM {}", schema.vec_table), [])?;
    let total = count_rows(&transaction, schema.fts_table)?;
    transaction.commit()?;
    info!(%collection, total, "reset embeddings for rebuild");
    Ok(total)
}

/// Embeds the next `batch_size` documents after `last_rowid`.
pub(crate) fn embed_batch(
    connection: &mut Connection,
    embedder: Option<&dyn Embedder>,
    request: RebuildBatchRequest,
) -> StoreResult<RebuildBatchReport> {
    let embedder = embedder.ok_or(StoreError::EmbeddingsDisabled)?;
    let schema = request.target.schema();
    let rows = load_batch(connection, request)?;

    let mut report = RebuildBatchReport {
        ok: true,
        target: request.target.to_string(),
        last_rowid: request.last_rowid,
        processed: rows.len() as i64,
        embedded: 0,
        done: (rows.len() as i64) < request.batch_size,
        failed: Vec::new(),
    };

    let mut vectors = Vec::with_capacity(rows.len());
    for (rowid, text) in &rows {
        match embedder.embed(text) {
            Ok(vector) => vectors.push((*rowid, vector)),
            Err(error) => {
                warn!(collection = %request.target, rowid, %error, "failed to embed document during rebuild");
                report.failed.push(*rowid);
            }
        }
    }

    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (rowid, vector) in &vectors {
        upsert_vector(&transaction, schema, *rowid, vector)?;
        report.embedded += 1;
    }
    transaction.commit()?;

    if let Some((rowid, _)) = rows.last() {
        report.last_rowid = *rowid;
    }
    info!(
        collection = %request.target,
        last_rowid = report.last_rowid,
        processed = report.processed,
        embedded = report.embedded,
        done = report.done,
        "rebuild batch complete"
    );
    Ok(report)
}

fn load_batch(connection: &Connection, request: RebuildBatchRequest) -> StoreResult<Vec<(i64, String)>> {
    match request.target {
        Collection::Email => {
            let mut statement = connection.prepare(
                "SELECT rowid, subject, from_, to_, body FROM messages_fts
                 WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            )?;
            let rows = statement.query_map(params![request.last_rowid, request.batch_size], |row| {
                let text = |index: usize| -> rusqlite::Result<String> {
                    Ok(row.get::<_, Option<String>>(index)?.unwrap_or_default())
                };
                Ok((
                    row.get::<_, i64>(0)?,
                    prepare_email_text(&text(1)?, &text(2)?, &text(3)?, &text(4)?),
                ))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        }
        Collection::Memory => {
            let mut statement = connection.prepare(
                "SELECT rowid, role, content FROM memory_fts
                 WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            )?;
            let rows = statement.query_map(params![request.last_rowid, request.batch_size], |row| {
                let role = row.get::<_, Option<String>>(1)?.unwrap_or_default();
                let content = row.get::<_, Option<String>>(2)?.unwrap_or_default();
                Ok((row.get::<_, i64>(0)?, prepare_memory_text(&role, &content)))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        }
    }
}
