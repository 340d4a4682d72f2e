//! Semantic similarity search over the knowledge store
//!
//! Cosine nearest-neighbor queries scoped to one user, filtered by a
//! minimum similarity threshold, capped at a result count, ordered by
//! descending similarity. Rows without an embedding never surface.
//!
//! The `VectorStore` trait keeps the engine portable: the SQLite-backed
//! implementation ranks in-process, a pgvector/ANN-backed one can rank in
//! the database without touching any caller.

use rusqlite::params;
use uuid::Uuid;

use super::{blob_to_vec, parse_uuid, KnowledgeStore};
use crate::embedding::{cosine_similarity, ensure_dimension};
use crate::error::{Result, StoreError};

/// Which entity table a vector query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorScope {
    /// Recorded decisions
    Decisions,
    /// Learned rules (active only)
    Rules,
    /// Stored preferences
    Preferences,
}

/// One ranked match from a vector query
#[derive(Debug, Clone)]
pub struct VectorMatch {
    /// Matched row id
    pub id: Uuid,
    /// Cosine similarity to the query vector
    pub similarity: f32,
}

/// A full record paired with its similarity score
#[derive(Debug, Clone)]
pub struct Scored<T> {
    /// The matched record
    pub record: T,
    /// Cosine similarity to the query vector
    pub similarity: f32,
}

/// Minimal vector-index abstraction over the knowledge store
pub trait VectorStore {
    /// Replace the stored vector for an existing row
    fn upsert_vector(&self, scope: VectorScope, id: Uuid, vector: &[f32]) -> Result<()>;

    /// Ranked nearest-neighbor query scoped to one user
    fn search_vectors(
        &self,
        scope: VectorScope,
        user_id: &str,
        query: &[f32],
        threshold: f32,
        count: usize,
    ) -> Result<Vec<VectorMatch>>;
}

/// Rank candidate `(id, vector)` rows against a query
fn rank(
    query: &[f32],
    rows: Vec<(Uuid, Vec<f32>)>,
    threshold: f32,
    count: usize,
) -> Vec<VectorMatch> {
    let mut matches: Vec<VectorMatch> = rows
        .into_iter()
        .map(|(id, vector)| VectorMatch {
            id,
            similarity: cosine_similarity(query, &vector),
        })
        .filter(|m| m.similarity >= threshold)
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(count);
    matches
}

impl KnowledgeStore {
    fn vectors_for_scope(&self, scope: VectorScope, user_id: &str) -> Result<Vec<(Uuid, Vec<f32>)>> {
        let sql = match scope {
            VectorScope::Decisions => {
                "SELECT id, embedding FROM decisions
                 WHERE user_id = ?1 AND embedding IS NOT NULL"
            }
            VectorScope::Rules => {
                "SELECT id, embedding FROM rules WHERE user_id = ?1 AND active = 1"
            }
            VectorScope::Preferences => "SELECT id, embedding FROM preferences WHERE user_id = ?1",
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql).map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(StoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row.map_err(StoreError::from)?;
            out.push((parse_uuid(&id, "id")?, blob_to_vec(&blob)?));
        }
        Ok(out)
    }

    /// Similar past decisions for a user, most similar first
    pub fn search_similar_decisions(
        &self,
        query_embedding: &[f32],
        user_id: &str,
        threshold: f32,
        count: usize,
    ) -> Result<Vec<Scored<super::DecisionRecord>>> {
        ensure_dimension(query_embedding)?;
        let matches = self.search_vectors(VectorScope::Decisions, user_id, query_embedding, threshold, count)?;

        let mut out = Vec::with_capacity(matches.len());
        for m in matches {
            if let Some(record) = self.get_decision(user_id, m.id)? {
                out.push(Scored {
                    record,
                    similarity: m.similarity,
                });
            }
        }
        Ok(out)
    }

    /// Similar active rules for a user, most similar first
    pub fn search_similar_rules(
        &self,
        query_embedding: &[f32],
        user_id: &str,
        threshold: f32,
        count: usize,
    ) -> Result<Vec<Scored<super::RuleRecord>>> {
        ensure_dimension(query_embedding)?;
        let matches = self.search_vectors(VectorScope::Rules, user_id, query_embedding, threshold, count)?;

        let mut out = Vec::with_capacity(matches.len());
        for m in matches {
            if let Some(record) = self.get_rule(user_id, m.id)? {
                out.push(Scored {
                    record,
                    similarity: m.similarity,
                });
            }
        }
        Ok(out)
    }

    /// Similar preferences for a user, most similar first
    pub fn search_similar_preferences(
        &self,
        query_embedding: &[f32],
        user_id: &str,
        threshold: f32,
        count: usize,
    ) -> Result<Vec<Scored<super::PreferenceRecord>>> {
        ensure_dimension(query_embedding)?;
        let matches = self.search_vectors(VectorScope::Preferences, user_id, query_embedding, threshold, count)?;

        let conn = self.conn.lock().unwrap();
        let mut out = Vec::with_capacity(matches.len());
        for m in matches {
            let row = conn
                .query_row(
                    "SELECT id, user_id, category, preference_key, kind, value,
                            embedding, updated_at_ms
                     FROM preferences WHERE id = ?1",
                    params![m.id.to_string()],
                    Self::preference_row,
                )
                .map_err(StoreError::from)?;
            out.push(Scored {
                record: Self::preference_from_parts(row)?,
                similarity: m.similarity,
            });
        }
        Ok(out)
    }
}

impl VectorStore for KnowledgeStore {
    fn upsert_vector(&self, scope: VectorScope, id: Uuid, vector: &[f32]) -> Result<()> {
        ensure_dimension(vector)?;
        let sql = match scope {
            VectorScope::Decisions => "UPDATE decisions SET embedding = ?1 WHERE id = ?2",
            VectorScope::Rules => "UPDATE rules SET embedding = ?1 WHERE id = ?2",
            VectorScope::Preferences => "UPDATE preferences SET embedding = ?1 WHERE id = ?2",
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(sql, params![super::vec_to_blob(vector), id.to_string()])
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn search_vectors(
        &self,
        scope: VectorScope,
        user_id: &str,
        query: &[f32],
        threshold: f32,
        count: usize,
    ) -> Result<Vec<VectorMatch>> {
        ensure_dimension(query)?;
        let rows = self.vectors_for_scope(scope, user_id)?;
        Ok(rank(query, rows, threshold, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_and_truncates() {
        let query = vec![1.0, 0.0];
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let rows = vec![
            (a, vec![0.2, 0.98]),
            (b, vec![1.0, 0.0]),
            (c, vec![0.9, 0.1]),
        ];

        // Short vectors are fine here: rank itself is dimension-agnostic
        let matches = rank(&query, rows, 0.5, 2);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, b);
        assert_eq!(matches[1].id, c);
        assert!(matches[0].similarity >= matches[1].similarity);
    }

    #[test]
    fn test_rank_threshold_filters() {
        let query = vec![1.0, 0.0];
        let rows = vec![(Uuid::new_v4(), vec![0.0, 1.0])];
        assert!(rank(&query, rows, 0.5, 10).is_empty());
    }
}
