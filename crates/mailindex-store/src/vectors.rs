use rusqlite::{params, Connection};

use crate::params::DateFilter;
use crate::schema::CollectionSchema;
use crate::StoreResult;

/// Encodes a vector as a little-endian f32 blob.
pub(crate) fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector
        .iter()
        .flat_map(|component| component.to_le_bytes())
        .collect()
}

pub(crate) fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Computes cosine similarity for equal-length vectors.
pub(crate) fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let (mut dot, mut left_norm, mut right_norm) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (left, right) in left.iter().zip(right) {
        dot += left * right;
        left_norm += left * left;
        right_norm += right * right;
    }
    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub(crate) fn upsert_vector(
    connection: &Connection,
    schema: &CollectionSchema,
    rowid: i64,
    vector: &[f32],
) -> StoreResult<()> {
    connection.execute(
        &format!(
            "INSERT INTO {vec} (rowid, embedding) VALUES (?1, ?2)
             ON CONFLICT(rowid) DO UPDATE SET embedding = excluded.embedding",
            vec = schema.vec_table
        ),
        params![rowid, vector_to_blob(vector)],
    )?;
    Ok(())
}

/// Brute-force nearest neighbours by cosine similarity, best first.
pub(crate) fn nearest(
    connection: &Connection,
    schema: &CollectionSchema,
    query: &[f32],
    dates: DateFilter,
    limit: usize,
) -> StoreResult<Vec<(i64, f32)>> {
    let mut statement = connection.prepare(&format!(
        "SELECT v.rowid, v.embedding
         FROM {vec} v
         JOIN {meta} m ON m.rowid = v.rowid
         WHERE (?1 IS NULL OR m.dateMs >= ?1) AND (?2 IS NULL OR m.dateMs <= ?2)",
        vec = schema.vec_table,
        meta = schema.meta_table,
    ))?;
    let rows = statement.query_map(params![dates.from_ms, dates.to_ms], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;

    let mut scored = Vec::new();
    for row in rows {
        let (rowid, blob) = row?;
        let similarity = cosine_similarity(query, &blob_to_vector(&blob));
        if similarity > 0.0 {
            scored.push((rowid, similarity));
        }
    }
    scored.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));
    scored.truncate(limit);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_blob_encoding_is_little_endian_f32() {
        let blob = vector_to_blob(&[1.0, -2.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0_f32.to_le_bytes());
        assert_eq!(blob_to_vector(&blob), vec![1.0, -2.5]);
    }

    #[test]
    fn unit_cosine_similarity_handles_mismatch_and_zero_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
