//! Lane-owned store handles.
//!
//! [`open_store`] splits the index into a [`StoreWriter`] (read-write
//! connections) and a [`StoreReader`] (read-only connections). Each handle owns
//! its own embedder, so nothing is shared across lanes except the
//! [`Generations`] counters.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::email::{self, DateRangeRow, EmailHit, EmailSample, MessageLookup};
use crate::embedding::{build_embedder, Embedder, EmbedderConfig};
use crate::generations::Generations;
use crate::memory::{self, MemoryEntry, MemoryHit, MemorySample};
use crate::ops;
use crate::params::{array_param, SearchRequest};
use crate::rebuild::{self, RebuildBatchReport, RebuildBatchRequest, RebuildStartReport};
use crate::schema::{count_rows, initialize_schema, open_read_only, open_read_write};
use crate::{
    Collection, CollectionStats, FilterReport, IndexReport, RemoveReport, StorePaths, StoreResult,
};

/// Result of a successful `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSummary {
    pub ok: bool,
    pub db_path: String,
    pub memory_db_path: String,
    pub docs: i64,
    pub memory_docs: i64,
    pub has_embeddings: bool,
}

/// Opens (creating if needed) both collections under `profile_dir`.
///
/// The writer creates the schema first so the read-only reader connections
/// always find the tables.
pub fn open_store(
    profile_dir: &Path,
    embedder_config: &EmbedderConfig,
) -> StoreResult<(StoreWriter, StoreReader, InitSummary)> {
    let paths = StorePaths::for_profile(profile_dir);
    let generations = Arc::new(Generations::new());

    let email_connection = open_read_write(&paths.email_db)?;
    initialize_schema(&email_connection, Collection::Email)?;
    let memory_connection = open_read_write(&paths.memory_db)?;
    initialize_schema(&memory_connection, Collection::Memory)?;

    let writer_embedder = build_embedder(embedder_config)?;
    let summary = InitSummary {
        ok: true,
        db_path: paths.email_db.display().to_string(),
        memory_db_path: paths.memory_db.display().to_string(),
        docs: count_rows(&email_connection, Collection::Email.schema().fts_table)?,
        memory_docs: count_rows(&memory_connection, Collection::Memory.schema().fts_table)?,
        has_embeddings: writer_embedder.is_some(),
    };

    let writer = StoreWriter {
        paths: paths.clone(),
        connections: [email_connection, memory_connection],
        embedder: writer_embedder,
        generations: Arc::clone(&generations),
    };
    let reader = StoreReader {
        slots: [
            ReaderSlot::open(&paths, Collection::Email, &generations)?,
            ReaderSlot::open(&paths, Collection::Memory, &generations)?,
        ],
        embedder: build_embedder(embedder_config)?,
        paths,
        generations,
    };

    info!(
        db_path = %summary.db_path,
        docs = summary.docs,
        memory_docs = summary.memory_docs,
        embedder = writer.embedder_label(),
        "store opened"
    );
    Ok((writer, reader, summary))
}

/// Mutating side of the store. Owned by the writer lane.
pub struct StoreWriter {
    paths: StorePaths,
    connections: [Connection; 2],
    embedder: Option<Box<dyn Embedder>>,
    generations: Arc<Generations>,
}

impl StoreWriter {
    fn connection(&mut self, collection: Collection) -> &mut Connection {
        &mut self.connections[collection.index()]
    }

    fn embedder_label(&self) -> &str {
        self.embedder.as_deref().map_or("none", |embedder| embedder.label())
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn generations(&self) -> Arc<Generations> {
        Arc::clone(&self.generations)
    }

    /// `indexBatch` / `memoryIndexBatch` with `{rows: [...]}`.
    pub fn index_batch(&mut self, collection: Collection, params: &Value) -> StoreResult<IndexReport> {
        let rows = array_param(params, &["rows"])?;
        let embedder = self.embedder.as_deref();
        let connection = &mut self.connections[collection.index()];
        match collection {
            Collection::Email => email::index_batch(connection, rows, embedder),
            Collection::Memory => memory::index_batch(connection, rows, embedder),
        }
    }

    /// `removeBatch` / `memoryRemoveBatch` with `{ids: [...]}`.
    pub fn remove_batch(&mut self, collection: Collection, params: &Value) -> StoreResult<RemoveReport> {
        let ids = array_param(params, &["ids", "rows"])?;
        ops::remove_batch(self.connection(collection), collection, ids)
    }

    /// Empties the collection, then invalidates reader handles.
    pub fn clear(&mut self, collection: Collection) -> StoreResult<i64> {
        let removed = ops::clear(self.connection(collection), collection)?;
        let generation = self.generations.bump(collection);
        debug!(%collection, generation, "bumped generation after clear");
        Ok(removed)
    }

    pub fn optimize(&mut self, collection: Collection) -> StoreResult<()> {
        ops::optimize(self.connection(collection), collection)
    }

    pub fn rebuild_start(&mut self) -> StoreResult<RebuildStartReport> {
        let email_total = rebuild::reset_vectors(self.connection(Collection::Email), Collection::Email)?;
        let memory_total = rebuild::reset_vectors(self.connection(Collection::Memory), Collection::Memory)?;
        for collection in Collection::ALL {
            self.generations.bump(collection);
        }
        Ok(RebuildStartReport {
            ok: true,
            email_total,
            memory_total,
        })
    }

    pub fn rebuild_batch(&mut self, params: &Value) -> StoreResult<RebuildBatchReport> {
        let request = RebuildBatchRequest::from_params(params)?;
        let embedder = self.embedder.as_deref();
        let connection = &mut self.connections[request.target.index()];
        rebuild::embed_batch(connection, embedder, request)
    }
}

struct ReaderSlot {
    connection: Connection,
    generation: u64,
}

impl ReaderSlot {
    fn open(paths: &StorePaths, collection: Collection, generations: &Generations) -> StoreResult<Self> {
        // Read the generation first: a bump racing with the open forces one extra reopen.
        let generation = generations.current(collection);
        Ok(Self {
            connection: open_read_only(paths.db_path(collection))?,
            generation,
        })
    }
}

/// Read-only side of the store. Owned by the reader lane.
pub struct StoreReader {
    paths: StorePaths,
    slots: [ReaderSlot; 2],
    embedder: Option<Box<dyn Embedder>>,
    generations: Arc<Generations>,
}

impl StoreReader {
    /// Reopens the handle for `collection` if the writer bumped its generation.
    fn refresh(&mut self, collection: Collection) -> StoreResult<()> {
        let current = self.generations.current(collection);
        let slot = &mut self.slots[collection.index()];
        if slot.generation != current {
            debug!(%collection, from = slot.generation, to = current, "reopening reader handle");
            *slot = ReaderSlot::open(&self.paths, collection, &self.generations)?;
        }
        Ok(())
    }

    /// Runs `read` inside one deferred transaction so all of its statements
    /// observe the same WAL snapshot.
    fn snapshot<T>(
        &mut self,
        collection: Collection,
        read: impl FnOnce(&Connection, Option<&dyn Embedder>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.refresh(collection)?;
        let connection = &self.slots[collection.index()].connection;
        let transaction = connection.unchecked_transaction()?;
        let outcome = read(&*transaction, self.embedder.as_deref())?;
        transaction.commit()?;
        Ok(outcome)
    }

    /// Generation the reader's handle for `collection` was opened at.
    pub fn generation(&self, collection: Collection) -> u64 {
        self.slots[collection.index()].generation
    }

    pub fn search(&mut self, params: &Value) -> StoreResult<Vec<EmailHit>> {
        let request = SearchRequest::from_params(params)?;
        self.snapshot(Collection::Email, |connection, embedder| {
            email::search(connection, embedder, &request)
        })
    }

    pub fn memory_search(&mut self, params: &Value) -> StoreResult<Vec<MemoryHit>> {
        let request = SearchRequest::from_params(params)?;
        self.snapshot(Collection::Memory, |connection, embedder| {
            memory::search(connection, embedder, &request)
        })
    }

    pub fn stats(&mut self, collection: Collection) -> StoreResult<CollectionStats> {
        let path = self.paths.db_path(collection).to_path_buf();
        self.snapshot(collection, |connection, _| ops::stats(connection, collection, &path))
    }

    /// `filterNewMessages` / `memoryFilterNewMessages` with `{rows}` or `{ids}`.
    pub fn filter_new(&mut self, collection: Collection, params: &Value) -> StoreResult<FilterReport> {
        let entries = array_param(params, &["rows", "ids"])?;
        self.snapshot(collection, |connection, _| ops::filter_new(connection, collection, entries))
    }

    pub fn get_message(&mut self, params: &Value) -> StoreResult<MessageLookup> {
        self.snapshot(Collection::Email, |connection, _| email::get_message(connection, params))
    }

    pub fn query_by_date_range(&mut self, params: &Value) -> StoreResult<Vec<DateRangeRow>> {
        self.snapshot(Collection::Email, |connection, _| {
            email::query_by_date_range(connection, params)
        })
    }

    pub fn debug_sample(&mut self) -> StoreResult<Vec<EmailSample>> {
        self.snapshot(Collection::Email, |connection, _| email::debug_sample(connection))
    }

    pub fn memory_debug_sample(&mut self) -> StoreResult<Vec<MemorySample>> {
        self.snapshot(Collection::Memory, |connection, _| memory::debug_sample(connection))
    }

    pub fn memory_read(&mut self, params: &Value) -> StoreResult<Vec<MemoryEntry>> {
        self.snapshot(Collection::Memory, |connection, _| memory::read_window(connection, params))
    }
}
