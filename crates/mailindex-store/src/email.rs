//! Email collection: indexing, lookup and hybrid search over `messages_fts`.

use std::collections::HashMap;

use mailindex_core::config::search;
use mailindex_core::format_unix_ms_rfc3339;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::embedding::Embedder;
use crate::hybrid::{finalize, merge_candidates, Tiered};
use crate::ops::{claim_rowid, embed_all, matches_qualifier, vector_candidates};
use crate::params::{bool_field, clamp_limit, int_field, parse_date_param, string_field, SearchRequest};
use crate::query::{build_match_expression, QueryTerms};
use crate::text_prep::prepare_email_text;
use crate::vectors::upsert_vector;
use crate::{Collection, IndexReport, StoreError, StoreResult};

/// One message as accepted by `indexBatch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailDocument {
    pub msg_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub body: String,
    pub date_ms: i64,
    pub has_attachments: bool,
    /// Calendar invites already extracted by the client, stored verbatim.
    pub parsed_ics_attachments: String,
}

impl EmailDocument {
    /// Reads a row object, accepting the `from`/`author` and `to` aliases.
    ///
    /// Returns `None` when the row has no non-empty `msgId`.
    pub fn from_row(row: &Value) -> Option<Self> {
        let msg_id = string_field(row, &["msgId"])?.trim();
        if msg_id.is_empty() {
            return None;
        }
        let text = |keys: &[&str]| string_field(row, keys).unwrap_or_default().to_string();
        Some(Self {
            msg_id: msg_id.to_string(),
            subject: text(&["subject"]),
            from: text(&["from_", "from", "author"]),
            to: text(&["to_", "to"]),
            cc: text(&["cc"]),
            bcc: text(&["bcc"]),
            body: text(&["body"]),
            date_ms: int_field(row, "dateMs").unwrap_or(0),
            has_attachments: bool_field(row, "hasAttachments"),
            parsed_ics_attachments: match row.get("parsedIcsAttachments") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(structured) => structured.to_string(),
            },
        })
    }

    pub fn embedding_text(&self) -> String {
        prepare_email_text(&self.subject, &self.from, &self.to, &self.body)
    }
}

/// A ranked `search` hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailHit {
    pub unique_id: String,
    pub author: String,
    pub subject: String,
    pub date_ms: i64,
    pub has_attachments: bool,
    pub snippet: String,
    pub rank: f64,
}

/// Full stored message returned by `getMessageByMsgId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub msg_id: String,
    pub subject: String,
    #[serde(rename = "from_")]
    pub from: String,
    #[serde(rename = "to_")]
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub body: String,
    pub date_ms: i64,
    pub has_attachments: bool,
    pub parsed_ics_attachments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageLookup {
    pub ok: bool,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<EmailMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeRow {
    pub msg_id: String,
    pub subject: String,
    pub date_ms: i64,
    pub date_str: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSample {
    pub msg_id: String,
    pub subject: String,
    pub date_ms: i64,
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
    let mut documents = Vec::with_capacity(rows.len());
    for (position, row) in rows.iter().enumerate() {
        match EmailDocument::from_row(row) {
            Some(document) => documents.push(document),
            None => {
                warn!(position, "skipping email row without msgId");
                report.skipped += 1;
            }
        }
    }

    // Embeddings are computed before the write transaction opens.
    let vectors = embed_all(
        embedder,
        Collection::Email,
        documents
            .iter()
            .map(|document| (document.msg_id.clone(), document.embedding_text())),
    );

    let schema = Collection::Email.schema();
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (document, vector) in documents.iter().zip(&vectors) {
        let (rowid, replaced) = claim_rowid(&transaction, schema, &document.msg_id)?;
        transaction.execute(
            "INSERT INTO messages_fts (rowid, msgId, subject, from_, to_, cc, bcc, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                rowid,
                document.msg_id,
                document.subject,
                document.from,
                document.to,
                document.cc,
                document.bcc,
                document.body
            ],
        )?;
        transaction.execute(
            "INSERT INTO message_meta (rowid, dateMs, hasAttachments, parsedIcsAttachments)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                rowid,
                document.date_ms,
                document.has_attachments,
                document.parsed_ics_attachments
            ],
        )?;
        if let Some(vector) = vector {
            upsert_vector(&transaction, schema, rowid, vector)?;
            report.embedded += 1;
        }
        if replaced {
            report.replaced += 1;
        }
        report.count += 1;
    }
    transaction.commit()?;

    info!(
        count = report.count,
        replaced = report.replaced,
        embedded = report.embedded,
        skipped = report.skipped,
        "indexed email batch"
    );
    Ok(report)
}

struct TextCandidate {
    rowid: i64,
    bm25: f64,
    hit: EmailHit,
}

pub(crate) fn search(
    connection: &Connection,
    embedder: Option<&dyn Embedder>,
    request: &SearchRequest,
) -> StoreResult<Vec<EmailHit>> {
    if request.query.is_empty() {
        return Ok(Vec::new());
    }

    let expression = build_match_expression(&request.query, Collection::Email);
    let text = if expression.is_empty() {
        Vec::new()
    } else {
        text_candidates(connection, &expression, request)?
    };
    let vector = vector_candidates(
        connection,
        Collection::Email,
        embedder,
        &request.query,
        request.dates,
        request.candidate_limit(),
    )?;

    let text_scores = text.iter().map(|candidate| (candidate.rowid, candidate.bm25)).collect::<Vec<_>>();
    let mut text_hits = text
        .into_iter()
        .map(|candidate| (candidate.rowid, candidate.hit))
        .collect::<HashMap<_, _>>();
    let terms = QueryTerms::parse(&request.query, Collection::Email);

    let mut tiered = Vec::new();
    for candidate in merge_candidates(&text_scores, &vector) {
        let hit = match text_hits.remove(&candidate.rowid) {
            Some(hit) => hit,
            None => match hit_by_rowid(connection, candidate.rowid)? {
                Some(hit) => hit,
                None => continue,
            },
        };
        let exact = terms.matches_field(&hit.author)
            || terms.matches_field(&hit.subject)
            || (candidate.text_match
                && matches_qualifier(connection, Collection::Email, candidate.rowid, &terms)?);
        let tier = if exact { 0 } else { 1 };
        tiered.push(Tiered {
            tier,
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

fn text_candidates(
    connection: &Connection,
    expression: &str,
    request: &SearchRequest,
) -> StoreResult<Vec<TextCandidate>> {
    let schema = Collection::Email.schema();
    let mut statement = connection.prepare(&format!(
        "SELECT f.rowid, f.msgId, f.from_, f.subject, m.dateMs, m.hasAttachments,
                {snippet} AS snippet, {bm25} AS score
         FROM messages_fts f
         JOIN message_meta m ON m.rowid = f.rowid
         WHERE messages_fts MATCH ?1
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
            Ok(TextCandidate {
                rowid: row.get(0)?,
                bm25: row.get(7)?,
                hit: EmailHit {
                    unique_id: row.get(1)?,
                    author: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    subject: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    date_ms: row.get(4)?,
                    has_attachments: row.get(5)?,
                    snippet: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    rank: 0.0,
                },
            })
        },
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Metadata for a vector-only hit; such hits carry no snippet.
fn hit_by_rowid(connection: &Connection, rowid: i64) -> StoreResult<Option<EmailHit>> {
    Ok(connection
        .query_row(
            "SELECT f.msgId, f.from_, f.subject, m.dateMs, m.hasAttachments
             FROM messages_fts f
             JOIN message_meta m ON m.rowid = f.rowid
             WHERE f.rowid = ?1",
            params![rowid],
            |row| {
                Ok(EmailHit {
                    unique_id: row.get(0)?,
                    author: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    subject: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    date_ms: row.get(3)?,
                    has_attachments: row.get(4)?,
                    snippet: String::new(),
                    rank: 0.0,
                })
            },
        )
        .optional()?)
}

pub(crate) fn get_message(connection: &Connection, params: &Value) -> StoreResult<MessageLookup> {
    let msg_id = string_field(params, &["msgId"])
        .map(str::trim)
        .filter(|msg_id| !msg_id.is_empty())
        .ok_or_else(|| StoreError::invalid("Missing msgId parameter"))?;

    let message = connection
        .query_row(
            "SELECT f.msgId, f.subject, f.from_, f.to_, f.cc, f.bcc, f.body,
                    m.dateMs, m.hasAttachments, m.parsedIcsAttachments
             FROM message_ids i
             JOIN messages_fts f ON f.rowid = i.rowid
             JOIN message_meta m ON m.rowid = i.rowid
             WHERE i.msgId = ?1",
            params![msg_id],
            message_from_row,
        )
        .optional()?;
    Ok(MessageLookup {
        ok: true,
        found: message.is_some(),
        message,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<EmailMessage> {
    let text = |index: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(index)?.unwrap_or_default())
    };
    Ok(EmailMessage {
        msg_id: text(0)?,
        subject: text(1)?,
        from: text(2)?,
        to: text(3)?,
        cc: text(4)?,
        bcc: text(5)?,
        body: text(6)?,
        date_ms: row.get(7)?,
        has_attachments: row.get(8)?,
        parsed_ics_attachments: text(9)?,
    })
}

pub(crate) fn query_by_date_range(connection: &Connection, params: &Value) -> StoreResult<Vec<DateRangeRow>> {
    let from = parse_date_param(params.get("from").unwrap_or(&Value::Null))?;
    let to = parse_date_param(params.get("to").unwrap_or(&Value::Null))?;
    let (Some(from), Some(to)) = (from, to) else {
        return Err(StoreError::invalid("from and to parameters are required"));
    };
    let limit = clamp_limit(
        int_field(params, "limit").unwrap_or(search::DATE_RANGE_DEFAULT_LIMIT),
        search::DATE_RANGE_DEFAULT_LIMIT,
        search::MAX_LIMIT.max(search::DATE_RANGE_DEFAULT_LIMIT),
    );

    let mut statement = connection.prepare(
        "SELECT f.msgId, f.subject, m.dateMs
         FROM message_meta m
         JOIN messages_fts f ON f.rowid = m.rowid
         WHERE m.dateMs >= ?1 AND m.dateMs <= ?2
         ORDER BY m.dateMs DESC, m.rowid DESC
         LIMIT ?3",
    )?;
    let rows = statement.query_map(params![from, to, limit], |row| {
        let date_ms: i64 = row.get(2)?;
        Ok(DateRangeRow {
            msg_id: row.get(0)?,
            subject: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            date_ms,
            date_str: format_unix_ms_rfc3339(date_ms),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn debug_sample(connection: &Connection) -> StoreResult<Vec<EmailSample>> {
    let mut statement = connection.prepare(
        "SELECT f.msgId, f.subject, m.dateMs
         FROM message_meta m
         JOIN messages_fts f ON f.rowid = m.rowid
         ORDER BY m.dateMs DESC, m.rowid DESC
         LIMIT ?1",
    )?;
    let rows = statement.query_map(params![search::DEBUG_SAMPLE_LIMIT], |row| {
        Ok(EmailSample {
            msg_id: row.get(0)?,
            subject: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            date_ms: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
