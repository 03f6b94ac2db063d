use crate::error::Result;
use crate::models::{
    ConsolidatedImage, ConsolidatedTag, ImageRecord, ImageTags, RoundInfo, TagCandidate, TagRecord,
};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use storage::models::{ConsolidatedRow, ImageRow, RoundRow, TagRow};
use tracing::{debug, warn};

/// Round-scoped state written for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpdate<'a> {
    pub path: &'a Path,
    pub model_used: &'a str,
    pub nsfw_detected: bool,
    pub max_nsfw_confidence: f32,
}

impl<'a> ImageUpdate<'a> {
    pub fn from_tags(tags: &'a ImageTags, model_used: &'a str) -> Self {
        Self {
            path: &tags.path,
            model_used,
            nsfw_detected: tags.nsfw_detected(),
            max_nsfw_confidence: tags.max_nsfw_confidence(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchWrite {
    pub images_written: usize,
    pub tags_written: usize,
    pub failed: Vec<PathBuf>,
}

pub struct TagStore {
    pool: SqlitePool,
}

impl TagStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects and brings the schema up to date.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = storage::connect(database_url).await?;
        storage::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin_round(&self, source: &str, model_used: &str) -> Result<RoundInfo> {
        let row = sqlx::query(
            r#"
            INSERT INTO rounds (round, source, model_used, started_at)
            VALUES ((SELECT COALESCE(MAX(round), 0) + 1 FROM rounds), ?1, ?2, strftime('%s','now'))
            RETURNING round
            "#,
        )
        .bind(source)
        .bind(model_used)
        .fetch_one(&self.pool)
        .await?;
        let index: i64 = row.get(0);
        debug!(round = index, source, "round started");
        Ok(RoundInfo {
            index,
            source: source.to_string(),
        })
    }

    pub async fn finish_round(&self, round: &RoundInfo) -> Result<()> {
        sqlx::query("UPDATE rounds SET completed_at = strftime('%s','now') WHERE round = ?1")
            .bind(round.index)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert-or-update outside a batch. Returns the image id.
    pub async fn upsert_image(&self, update: &ImageUpdate<'_>) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        upsert_image(&mut *conn, update).await
    }

    pub async fn append_tags(
        &self,
        image_ref: i64,
        round: &RoundInfo,
        tags: &[TagCandidate],
    ) -> Result<usize> {
        let mut conn = self.pool.acquire().await?;
        append_tags(&mut *conn, image_ref, round, tags).await
    }

    /// Writes one batch in a single transaction. Each image gets its own
    /// savepoint; an image whose writes fail is rolled back and reported while
    /// the others commit. Images without candidates are not touched.
    pub async fn commit_batch(
        &self,
        round: &RoundInfo,
        model_used: &str,
        results: &[ImageTags],
    ) -> Result<BatchWrite> {
        let mut report = BatchWrite::default();
        let mut tx = self.pool.begin().await?;

        for image in results.iter().filter(|i| !i.candidates.is_empty()) {
            sqlx::query("SAVEPOINT image_write").execute(&mut *tx).await?;
            let update = ImageUpdate::from_tags(image, model_used);
            let written = match upsert_image(&mut *tx, &update).await {
                Ok(image_ref) => append_tags(&mut *tx, image_ref, round, &image.candidates).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(n) => {
                    sqlx::query("RELEASE image_write").execute(&mut *tx).await?;
                    report.images_written += 1;
                    report.tags_written += n;
                }
                Err(e) => {
                    warn!("store write failed for {}: {}", image.path.display(), e);
                    sqlx::query("ROLLBACK TO image_write").execute(&mut *tx).await?;
                    sqlx::query("RELEASE image_write").execute(&mut *tx).await?;
                    report.failed.push(image.path.clone());
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    pub async fn image(&self, path: &Path) -> Result<Option<ImageRecord>> {
        let row = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT id, path, name, first_seen, last_seen, model_used,
                   nsfw_detected, max_nsfw_confidence, rounds_processed
            FROM images WHERE path = ?1
            "#,
        )
        .bind(path.to_string_lossy())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ImageRecord::from))
    }

    /// Every tag row ever written for `path`, oldest round first.
    pub async fn tag_history(&self, path: &Path) -> Result<Vec<TagRecord>> {
        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT t.id, t.image_ref, t.category, t.subcategory, t.tag_name,
                   t.confidence, t.is_nsfw, t.round, t.source
            FROM tags t JOIN images i ON i.id = t.image_ref
            WHERE i.path = ?1
            ORDER BY t.round, t.id
            "#,
        )
        .bind(path.to_string_lossy())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TagRecord::from).collect())
    }

    /// Tags collapsed per (category, subcategory, tag_name) at max confidence,
    /// one entry per image, ordered by path. With `include_nsfw = false`,
    /// images flagged NSFW are dropped entirely.
    pub async fn query_consolidated(&self, include_nsfw: bool) -> Result<Vec<ConsolidatedImage>> {
        let rows = sqlx::query_as::<_, ConsolidatedRow>(
            r#"
            SELECT i.path, i.nsfw_detected, i.max_nsfw_confidence, i.rounds_processed,
                   t.category, t.subcategory, t.tag_name, MAX(t.confidence) AS confidence
            FROM images i JOIN tags t ON t.image_ref = i.id
            WHERE (?1 = 1 OR i.nsfw_detected = 0)
            GROUP BY i.id, t.category, t.subcategory, t.tag_name
            ORDER BY i.path, t.category, t.subcategory, t.tag_name
            "#,
        )
        .bind(include_nsfw)
        .fetch_all(&self.pool)
        .await?;
        Ok(fold_consolidated(rows))
    }

    pub async fn rounds(&self) -> Result<Vec<RoundRow>> {
        let rows = sqlx::query_as::<_, RoundRow>(
            r#"
            SELECT r.round, r.source, r.model_used, r.started_at, r.completed_at,
                   (SELECT COUNT(*) FROM tags t WHERE t.round = r.round) AS tag_count,
                   (SELECT COUNT(DISTINCT t.image_ref) FROM tags t WHERE t.round = r.round) AS image_count
            FROM rounds r
            ORDER BY r.round
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn upsert_image(conn: &mut SqliteConnection, update: &ImageUpdate<'_>) -> Result<i64> {
    let path = update.path.to_string_lossy().into_owned();
    let name = update
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());
    let row = sqlx::query(
        r#"
        INSERT INTO images (path, name, first_seen, last_seen, model_used,
                            nsfw_detected, max_nsfw_confidence, rounds_processed)
        VALUES (?1, ?2, strftime('%s','now'), strftime('%s','now'), ?3, ?4, ?5, 1)
        ON CONFLICT(path) DO UPDATE SET
            last_seen = strftime('%s','now'),
            model_used = excluded.model_used,
            nsfw_detected = MAX(images.nsfw_detected, excluded.nsfw_detected),
            max_nsfw_confidence = MAX(images.max_nsfw_confidence, excluded.max_nsfw_confidence),
            rounds_processed = images.rounds_processed + 1
        RETURNING id
        "#,
    )
    .bind(path)
    .bind(name)
    .bind(update.model_used)
    .bind(update.nsfw_detected)
    .bind(update.max_nsfw_confidence as f64)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.get(0))
}

async fn append_tags(
    conn: &mut SqliteConnection,
    image_ref: i64,
    round: &RoundInfo,
    tags: &[TagCandidate],
) -> Result<usize> {
    for tag in tags {
        sqlx::query(
            r#"
            INSERT INTO tags (image_ref, category, subcategory, tag_name, confidence, is_nsfw, round, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(image_ref)
        .bind(&tag.category)
        .bind(&tag.subcategory)
        .bind(&tag.tag_name)
        .bind(tag.confidence as f64)
        .bind(tag.is_nsfw)
        .bind(round.index)
        .bind(&round.source)
        .execute(&mut *conn)
        .await?;
    }
    Ok(tags.len())
}

/// Rows arrive ordered by path; consecutive rows of one path become one image.
fn fold_consolidated(rows: Vec<ConsolidatedRow>) -> Vec<ConsolidatedImage> {
    let mut images: Vec<ConsolidatedImage> = Vec::new();
    for row in rows {
        let tag = ConsolidatedTag {
            category: row.category,
            subcategory: row.subcategory,
            tag_name: row.tag_name,
            confidence: row.confidence as f32,
        };
        match images.last_mut() {
            Some(last) if last.path == row.path => last.tags.push(tag),
            _ => images.push(ConsolidatedImage {
                path: row.path,
                nsfw_detected: row.nsfw_detected,
                max_nsfw_confidence: row.max_nsfw_confidence as f32,
                rounds_processed: row.rounds_processed,
                tags: vec![tag],
            }),
        }
    }
    images
}
