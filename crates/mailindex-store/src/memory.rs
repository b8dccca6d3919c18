//! Memory collection: conversation turns kept independently of the email index.

use std::collections::HashMap;

use mailindex_core::config::search;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::embedding::Embedder;
use crate::hybrid::{finalize, merge_candidates, Tiered};
use crate::ops::{claim_rowid, embed_all, matches_qualifier, vector_candidates};
use crate::params::{int_field, string_field, SearchRequest};
use crate::query::{build_match_expression, QueryTerms};
use crate::text_prep::prepare_memory_text;
use crate::vectors::upsert_vector;
use crate::{Collection, IndexReport, StoreError, StoreResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryDocument {
    pub mem_id: String,
    pub role: String,
    pub content: String,
    pub session_id: Option<String>,
    pub date_ms: i64,
    pub turn_index: Option<i64>,
}

impl MemoryDocument {
    pub fn from_row(row: &Value) -> Option<Self> {
        let mem_id = string_field(row, &["memId"])?.trim();
        if mem_id.is_empty() {
            return None;
        }
        Some(Self {
            mem_id: mem_id.to_string(),
            role: string_field(row, &["role"]).unwrap_or_default().to_string(),
            content: string_field(row, &["content"]).unwrap_or_default().to_string(),
            session_id: string_field(row, &["sessionId"])
                .map(str::trim)
                .filter(|session| !session.is_empty())
                .map(str::to_string),
            date_ms: int_field(row, "dateMs").unwrap_or(0),
            turn_index: int_field(row, "turnIndex"),
        })
    }
}

/// A ranked `memorySearch` hit. Listing mode (empty query) has no snippet and rank 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    pub mem_id: String,
    pub role: String,
    pub content: String,
    pub session_id: Option<String>,
    pub date_ms: i64,
    pub snippet: Option<String>,
    pub rank: f64,
}

/// A row returned by `memoryRead`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub mem_id: String,
    pub role: String,
    pub content: String,
    pub session_id: Option<String>,
    pub date_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub mem_id: String,
    pub role: String,
    pub content: String,
    pub date_ms: i64,
}

const HIT_COLUMNS: &str = "f.memId, f.role, f.content, m.sessionId, m.dateMs";

fn hit_from_row(row: &rusqlite::Row<'_>, snippet: Option<String>) -> rusqlite::Result<MemoryHit> {
    Ok(MemoryHit {
        mem_id: row.get(0)?,
        role: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        session_id: row.get(3)?,
        date_ms: row.get(4)?,
        snippet,
        rank: 0.0,
    })
}

pub(crate) fn index_batch(
    connection: &mut Connection,
    rows: &[Value],
    embedder: Option<&dyn Embedder>,
) -> StoreResult<IndexReport> {
    let mut report = IndexReport {
        ok: true,
        ..IndexReport::default()
    };
    let documents = rows
        .iter()
        .enumerate()
        .filter_map(|(position, row)| {
            let document = MemoryDocument::from_row(row);
            if document.is_none() {
                warn!(position, "skipping memory row without memId");
                report.skipped += 1;
            }
            document
        })
        .collect::<Vec<_>>();

    let vectors = embed_all(
        embedder,
        Collection::Memory,
        documents.iter().map(|document| {
            (
                document.mem_id.clone(),
                prepare_memory_text(&document.role, &document.content),
            )
        }),
    );

    let schema = Collection::Memory.schema();
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (document, vector) in documents.iter().zip(&vectors) {
        let (rowid, replaced) = claim_rowid(&transaction, schema, &document.mem_id)?;
        transaction.execute(
            "INSERT INTO memory_fts (rowid, memId, role, content, sessionId) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rowid,
                document.mem_id,
                document.role,
                document.content,
                document.session_id.as_deref().unwrap_or_default()
            ],
        )?;
        transaction.execute(
            "INSERT INTO memory_meta (rowid, dateMs, sessionId, turnIndex) VALUES (?1, ?2, ?3, ?4)",
            params![rowid, document.date_ms, document.session_id, document.turn_index],
        )?;
        if let Some(vector) = vector {
            upsert_vector(&transaction, schema, rowid, vector)?;
            report.embedded += 1;
        }
        report.replaced += i64::from(replaced);
        report.count += 1;
    }
    transaction.commit()?;

    info!(
        count = report.count,
        replaced = report.replaced,
        embedded = report.embedded,
        skipped = report.skipped,
        "indexed memory batch"
    );
    Ok(report)
}

pub(crate) fn search(
    connection: &Connection,
    embedder: Option<&dyn Embedder>,
    request: &SearchRequest,
) -> StoreResult<Vec<MemoryHit>> {
    if request.query.is_empty() {
        return list_recent(connection, request);
    }

    let schema = Collection::Memory.schema();
    let expression = build_match_expression(&request.query, Collection::Memory);
    let mut text_hits = HashMap::new();
    let mut text_scores = Vec::new();
    if !expression.is_empty() {
        let mut statement = connection.prepare(&format!(
            "SELECT {HIT_COLUMNS}, f.rowid, {snippet} AS snippet, {bm25} AS score
             FROM memory_fts f
             JOIN memory_meta m ON m.rowid = f.rowid
             WHERE memory_fts MATCH ?1
               AND (?2 IS NULL OR m.dateMs >= ?2)
               AND (?3 IS NULL OR m.dateMs <= ?3)
             ORDER BY score
             LIMIT ?4",
            snippet = schema.snippet_expression(search::SNIPPET_TOKENS),
            bm25 = schema.bm25_expression(),
        ))?;
        let rows = statement.query_map(
            params![
                expression,
                request.dates.from_ms,
                request.dates.to_ms,
                request.candidate_limit()
            ],
            |row| {
                let hit = hit_from_row(row, row.get(6)?)?;
                Ok((row.get::<_, i64>(5)?, row.get::<_, f64>(7)?, hit))
            },
        )?;
        for row in rows {
            let (rowid, score, hit) = row?;
            text_scores.push((rowid, score));
            text_hits.insert(rowid, hit);
        }
    }

    let vector = vector_candidates(
        connection,
        Collection::Memory,
        embedder,
        &request.query,
        request.dates,
        request.candidate_limit(),
    )?;

    let terms = QueryTerms::parse(&request.query, Collection::Memory);
    let mut tiered = Vec::new();
    for candidate in merge_candidates(&text_scores, &vector) {
        let hit = match text_hits.remove(&candidate.rowid) {
            Some(hit) => hit,
            None => match hit_by_rowid(connection, candidate.rowid)? {
                Some(hit) => hit,
                None => continue,
            },
        };
        let exact = terms.matches_field(&hit.role)
            || hit
                .session_id
                .as_deref()
                .is_some_and(|session| terms.matches_field(session))
            || (candidate.text_match
                && matches_qualifier(connection, Collection::Memory, candidate.rowid, &terms)?);
        tiered.push(Tiered {
            tier: if exact { 0 } else { 1 },
            hybrid: candidate.hybrid,
            date_ms: hit.date_ms,
            rowid: candidate.rowid,
            hit,
        });
    }

    Ok(finalize(tiered, usize::try_from(request.limit).unwrap_or(0))
        .into_iter()
        .map(|(rank, mut hit)| {
            hit.rank = rank;
            hit
        })
        .collect())
}

fn list_recent(connection: &Connection, request: &SearchRequest) -> StoreResult<Vec<MemoryHit>> {
    let mut statement = connection.prepare(&format!(
        "SELECT {HIT_COLUMNS}
         FROM memory_meta m
         JOIN memory_fts f ON f.rowid = m.rowid
         WHERE (?1 IS NULL OR m.dateMs >= ?1) AND (?2 IS NULL OR m.dateMs <= ?2)
         ORDER BY m.dateMs DESC, m.rowid DESC
         LIMIT ?3"
    ))?;
    let rows = statement.query_map(
        params![request.dates.from_ms, request.dates.to_ms, request.limit],
        |row| hit_from_row(row, None),
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn hit_by_rowid(connection: &Connection, rowid: i64) -> StoreResult<Option<MemoryHit>> {
    Ok(connection
        .query_row(
            &format!(
                "SELECT {HIT_COLUMNS}
                 FROM memory_fts f
                 JOIN memory_meta m ON m.rowid = f.rowid
                 WHERE f.rowid = ?1"
            ),
            params![rowid],
            |row| hit_from_row(row, None),
        )
        .optional()?)
}

/// Entries within `toleranceMs` of `timestampMs`, oldest first.
pub(crate) fn read_window(connection: &Connection, params: &Value) -> StoreResult<Vec<MemoryEntry>> {
    let timestamp_ms = int_field(params, "timestampMs")
        .ok_or_else(|| StoreError::invalid("Missing or invalid timestampMs parameter"))?;
    let tolerance_ms = int_field(params, "toleranceMs")
        .filter(|tolerance| *tolerance >= 0)
        .unwrap_or(search::MEMORY_READ_TOLERANCE_MS);

    let mut statement = connection.prepare(&format!(
        "SELECT {HIT_COLUMNS}
         FROM memory_meta m
         JOIN memory_fts f ON f.rowid = m.rowid
         WHERE m.dateMs BETWEEN ?1 AND ?2
         ORDER BY m.dateMs ASC, m.rowid ASC
         LIMIT ?3"
    ))?;
    let rows = statement.query_map(
        params![
            timestamp_ms.saturating_sub(tolerance_ms),
            timestamp_ms.saturating_add(tolerance_ms),
            search::MEMORY_READ_LIMIT
        ],
        |row| {
            let hit = hit_from_row(row, None)?;
            Ok(MemoryEntry {
                mem_id: hit.mem_id,
                role: hit.role,
                content: hit.content,
                session_id: hit.session_id,
                date_ms: hit.date_ms,
            })
        },
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn debug_sample(connection: &Connection) -> StoreResult<Vec<MemorySample>> {
    let mut statement = connection.prepare(
        "SELECT f.memId, f.role, f.content, m.dateMs
         FROM memory_meta m
         JOIN memory_fts f ON f.rowid = m.rowid
         ORDER BY m.dateMs DESC, m.rowid DESC
         LIMIT ?1",
    )?;
    let rows = statement.query_map(params![search::DEBUG_SAMPLE_LIMIT], |row| {
        Ok(MemorySample {
            mem_id: row.get(0)?,
            role: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            date_ms: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::schema::{initialize_schema, open_read_write};
    use serde_json::json;

    fn memory_connection() -> (tempfile::TempDir, Connection) {
        let temp = tempfile::tempdir().expect("tempdir");
        let connection = open_read_write(&temp.path().join("memory.db")).expect("open");
        initialize_schema(&connection, Collection::Memory).expect("schema");
        (temp, connection)
    }

    fn turns() -> Vec<Value> {
        vec![
            json!({"memId": "m1", "role": "user", "content": "Remind me about the dentist appointment",
                   "sessionId": "s-1", "dateMs": 1_000, "turnIndex": 0}),
            json!({"memId": "m2", "role": "assistant", "content": "I will remind you about the dentist",
                   "sessionId": "s-1", "dateMs": 2_000, "turnIndex": 1}),
            json!({"memId": "m3", "role": "user", "content": "What is the weather tomorrow",
                   "dateMs": 900_000}),
        ]
    }

    #[test]
    fn functional_memory_index_and_search_prefers_role_match() {
        let (_temp, mut connection) = memory_connection();
        let embedder = HashEmbedder::new(384);
        let report = index_batch(&mut connection, &turns(), Some(&embedder)).expect("index");
        assert_eq!((report.count, report.embedded), (3, 3));

        let hits = search(&connection, Some(&embedder), &SearchRequest::new("dentist", 10)).expect("search");
        let first = hits.iter().find(|hit| hit.mem_id == "m1").expect("m1 hit");
        assert!(first.snippet.as_deref().is_some_and(|snippet| snippet.contains("[dentist]")));
        assert!(hits.iter().any(|hit| hit.mem_id == "m2"));

        let hits = search(&connection, None, &SearchRequest::new("assistant dentist", 10)).expect("search");
        assert_eq!(hits[0].mem_id, "m2");
        assert!(hits[0].rank <= 0.0);
    }

    #[test]
    fn functional_empty_query_lists_newest_first_without_snippets() {
        let (_temp, mut connection) = memory_connection();
        index_batch(&mut connection, &turns(), None).expect("index");

        let hits = search(&connection, None, &SearchRequest::new("", 2)).expect("list");
        assert_eq!(hits.iter().map(|hit| hit.mem_id.as_str()).collect::<Vec<_>>(), vec!["m3", "m2"]);
        assert!(hits.iter().all(|hit| hit.snippet.is_none() && hit.rank == 0.0));
        assert_eq!(hits[0].session_id, None);
    }

    #[test]
    fn functional_read_window_is_oldest_first_and_bounded_by_tolerance() {
        let (_temp, mut connection) = memory_connection();
        index_batch(&mut connection, &turns(), None).expect("index");

        let entries = read_window(&connection, &json!({"timestampMs": 1_500, "toleranceMs": 600})).expect("read");
        assert_eq!(entries.iter().map(|entry| entry.mem_id.as_str()).collect::<Vec<_>>(), vec!["m1", "m2"]);
        assert_eq!(entries[0].session_id.as_deref(), Some("s-1"));

        let entries = read_window(&connection, &json!({"timestampMs": 500_000})).expect("default tolerance");
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn regression_read_window_requires_timestamp() {
        let (_temp, connection) = memory_connection();
        let error = read_window(&connection, &json!({"toleranceMs": 5})).expect_err("missing timestamp");
        assert!(error.to_string().contains("timestampMs"));
    }

    #[test]
    fn unit_debug_sample_returns_memory_rows() {
        let (_temp, mut connection) = memory_connection();
        index_batch(&mut connection, &turns(), None).expect("index");
        let sample = debug_sample(&connection).expect("sample");
        assert_eq!(sample.first().map(|row| row.mem_id.as_str()), Some("m3"));
    }
}
