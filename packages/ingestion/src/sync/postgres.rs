//! Postgres sync target.
//!
//! The full delete-and-insert snapshot runs in one transaction: dependent
//! `study_plans` rows go first, then the book's existing guideline rows,
//! then one insert per shard. Any failure rolls the whole snapshot back.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{GuidelineRepository, GuidelineRow, SyncError};

pub struct PgGuidelineRepository {
    pool: PgPool,
}

impl PgGuidelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GuidelineRepository for PgGuidelineRepository {
    async fn replace_book_guidelines(
        &self,
        book_id: &str,
        rows: &[GuidelineRow],
    ) -> Result<Vec<Uuid>, SyncError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query(
            "DELETE FROM study_plans WHERE guideline_id IN \
             (SELECT id FROM teaching_guidelines WHERE book_id = $1)",
        )
        .bind(book_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query("DELETE FROM teaching_guidelines WHERE book_id = $1")
            .bind(book_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = sqlx::query_scalar(
                "INSERT INTO teaching_guidelines (
                     id, book_id, country, grade, subject, board,
                     topic_key, subtopic_key, topic_title, subtopic_title,
                     topic_summary, subtopic_summary, guidelines,
                     source_page_start, source_page_end,
                     status, version, review_status, created_at
                 )
                 VALUES (
                     $1, $2, $3, $4, $5, $6,
                     $7, $8, $9, $10,
                     $11, $12, $13,
                     $14, $15,
                     $16, $17, $18, NOW()
                 )
                 RETURNING id",
            )
            .bind(row.id)
            .bind(&row.book_id)
            .bind(&row.country)
            .bind(row.grade)
            .bind(&row.subject)
            .bind(&row.board)
            .bind(&row.topic_key)
            .bind(&row.subtopic_key)
            .bind(&row.topic_title)
            .bind(&row.subtopic_title)
            .bind(&row.topic_summary)
            .bind(&row.subtopic_summary)
            .bind(&row.guidelines)
            .bind(row.source_page_start)
            .bind(row.source_page_end)
            .bind(&row.status)
            .bind(row.version)
            .bind(&row.review_status)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
            ids.push(id);
        }

        tx.commit().await.map_err(db)?;
        tracing::info!(book_id, rows = ids.len(), "guidelines synced to database");
        Ok(ids)
    }

    async fn guidelines_for_book(&self, book_id: &str) -> Result<Vec<GuidelineRow>, SyncError> {
        sqlx::query_as::<_, GuidelineRow>(
            "SELECT id, book_id, country, grade, subject, board, \
                    topic_key, subtopic_key, topic_title, subtopic_title, \
                    topic_summary, subtopic_summary, guidelines, \
                    source_page_start, source_page_end, status, version, review_status \
             FROM teaching_guidelines \
             WHERE book_id = $1 \
             ORDER BY source_page_start, topic_key, subtopic_key",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)
    }
}

fn db(err: sqlx::Error) -> SyncError {
    SyncError::Database(err.to_string())
}
