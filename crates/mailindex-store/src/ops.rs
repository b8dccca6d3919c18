//! Collection-agnostic operations shared by the email and memory collections.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::params::{id_entries, DateFilter};
use crate::query::QueryTerms;
use crate::schema::{count_rows, database_bytes, CollectionSchema};
use crate::vectors::nearest;
use crate::{Collection, CollectionStats, FilterReport, RemoveReport, StoreResult};

pub(crate) fn lookup_rowid(
    connection: &Connection,
    schema: &CollectionSchema,
    id: &str,
) -> StoreResult<Option<i64>> {
    Ok(connection
        .query_row(
            &format!(
                "SELECT rowid FROM {ids} WHERE {id_column} = ?1",
                ids = schema.ids_table,
                id_column = schema.id_column
            ),
            params![id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Returns the rowid for `id`, clearing its previous FTS/meta/vector rows when it
/// already exists. The boolean is true for a replacement.
pub(crate) fn claim_rowid(
    connection: &Connection,
    schema: &CollectionSchema,
    id: &str,
) -> StoreResult<(i64, bool)> {
    if let Some(rowid) = lookup_rowid(connection, schema, id)? {
        delete_row_content(connection, schema, rowid)?;
        return Ok((rowid, true));
    }
    connection.execute(
        &format!(
            "INSERT INTO {ids} ({id_column}) VALUES (?1)",
            ids = schema.ids_table,
            id_column = schema.id_column
        ),
        params![id],
    )?;
    Ok((connection.last_insert_rowid(), false))
}

fn delete_row_content(connection: &Connection, schema: &CollectionSchema, rowid: i64) -> StoreResult<()> {
    for table in [schema.fts_table, schema.meta_table, schema.vec_table] {
        connection.execute(&format!("DELETE FROM {table} WHERE rowid = ?1"), params![rowid])?;
    }
    Ok(())
}

pub(crate) fn remove_batch(
    connection: &mut Connection,
    collection: Collection,
    ids: &[Value],
) -> StoreResult<RemoveReport> {
    let schema = collection.schema();
    let entries = id_entries(ids, schema.id_column);
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut removed = 0_i64;
    for id in entries.iter().flatten() {
        let Some(rowid) = lookup_rowid(&transaction, schema, id)? else {
            continue;
        };
        delete_row_content(&transaction, schema, rowid)?;
        transaction.execute(
            &format!("DELETE FROM {ids} WHERE rowid = ?1", ids = schema.ids_table),
            params![rowid],
        )?;
        removed += 1;
    }
    transaction.commit()?;
    info!(%collection, requested = ids.len(), removed, "removed documents");
    Ok(RemoveReport {
        ok: true,
        count: removed,
    })
}

/// Partitions ids into "not indexed" and "already indexed" without mutating state.
///
/// Entries with no usable id cannot be present, so they are reported as new;
/// `newCount + skippedCount` always equals the input length.
pub(crate) fn filter_new(
    connection: &Connection,
    collection: Collection,
    entries: &[Value],
) -> StoreResult<FilterReport> {
    let schema = collection.schema();
    let mut new_msg_ids = Vec::new();
    let mut new_count = 0_i64;
    let mut skipped_count = 0_i64;
    for id in id_entries(entries, schema.id_column) {
        match id {
            Some(id) if lookup_rowid(connection, schema, &id)?.is_some() => skipped_count += 1,
            Some(id) => {
                new_msg_ids.push(id);
                new_count += 1;
            }
            None => new_count += 1,
        }
    }
    debug!(%collection, total = entries.len(), new_count, skipped_count, "filtered new ids");
    Ok(FilterReport {
        ok: true,
        new_msg_ids,
        total_checked: entries.len() as i64,
        new_count,
        skipped_count,
    })
}

/// True when a `field:value` qualifier of `terms` is held by that column of `rowid`.
///
/// Qualified columns come from [`QueryTerms::parse`], which only keeps names of
/// real FTS columns.
pub(crate) fn matches_qualifier(
    connection: &Connection,
    collection: Collection,
    rowid: i64,
    terms: &QueryTerms,
) -> StoreResult<bool> {
    let fts_table = collection.schema().fts_table;
    terms.matches_qualified(|column| {
        connection
            .query_row(
                &format!("SELECT {column} FROM {fts_table} WHERE rowid = ?1"),
                params![rowid],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
    })
    .map_err(Into::into)
}

pub(crate) fn stats(connection: &Connection, collection: Collection, path: &Path) -> StoreResult<CollectionStats> {
    let schema = collection.schema();
    Ok(CollectionStats {
        ok: true,
        docs: count_rows(connection, schema.fts_table)?,
        vec_docs: count_rows(connection, schema.vec_table)?,
        db_bytes: database_bytes(path),
    })
}

/// Deletes every row of the collection in one transaction.
pub(crate) fn clear(connection: &mut Connection, collection: Collection) -> StoreResult<i64> {
    let schema = collection.schema();
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let docs = count_rows(&transaction, schema.fts_table)?;
    for table in [schema.fts_table, schema.meta_table, schema.vec_table, schema.ids_table] {
        transaction.execute(&format!("DELETE FROM {table}"), [])?;
    }
    transaction.commit()?;
    info!(%collection, docs, "cleared collection");
    Ok(docs)
}

pub(crate) fn optimize(connection: &Connection, collection: Collection) -> StoreResult<()> {
    let fts = collection.schema().fts_table;
    connection.execute(&format!("INSERT INTO {fts}({fts}) VALUES('optimize')"), [])?;
    info!(%collection, "optimized full-text index");
    Ok(())
}

/// Vector candidates for `query`, or none when embeddings are off or not yet built.
pub(crate) fn vector_candidates(
    connection: &Connection,
    collection: Collection,
    embedder: Option<&dyn Embedder>,
    query: &str,
    dates: DateFilter,
    limit: i64,
) -> StoreResult<Vec<(i64, f32)>> {
    let Some(embedder) = embedder else {
        return Ok(Vec::new());
    };
    let schema = collection.schema();
    if query.trim().is_empty() || count_rows(connection, schema.vec_table)? == 0 {
        return Ok(Vec::new());
    }
    match embedder.embed(query) {
        Ok(vector) => nearest(
            connection,
            schema,
            &vector,
            dates,
            usize::try_from(limit).unwrap_or(0),
        ),
        Err(error) => {
            warn!(%collection, %error, "query embedding failed, using keyword ranking only");
            Ok(Vec::new())
        }
    }
}

/// Embeds each text, logging failures; a failed entry yields `None`.
pub(crate) fn embed_all(
    embedder: Option<&dyn Embedder>,
    collection: Collection,
    texts: impl Iterator<Item = (String, String)>,
) -> Vec<Option<Vec<f32>>> {
    let Some(embedder) = embedder else {
        return texts.map(|_| None).collect();
    };
    texts
        .map(|(id, text)| match embedder.embed(&text) {
            Ok(vector) => Some(vector),
            Err(error) => {
                warn!(%collection, id = %id, %error, "failed to embed document");
                None
            }
        })
        .collect()
}
