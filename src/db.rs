use anyhow::Context;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{ClassId, GradeRecord, ScoreEntry};
use crate::snapshot::{self, RecordFilter};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn create_indexes(pool: &PgPool) -> anyhow::Result<()> {
    let statements = [
        "CREATE INDEX IF NOT EXISTS grade_records_class_id_idx \
         ON grade_aggregates.grade_records (class_id)",
        "CREATE INDEX IF NOT EXISTS grade_records_learner_id_idx \
         ON grade_aggregates.grade_records (learner_id)",
        "CREATE INDEX IF NOT EXISTS grade_records_learner_class_idx \
         ON grade_aggregates.grade_records (learner_id, class_id)",
        "CREATE INDEX IF NOT EXISTS score_entries_record_id_idx \
         ON grade_aggregates.score_entries (record_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(count = statements.len(), "indexes ensured");
    Ok(())
}

async fn upsert_record(pool: &PgPool, learner_id: i64, class_id: &ClassId) -> anyhow::Result<i64> {
    let record_id: i64 = sqlx::query(
        r#"
        INSERT INTO grade_aggregates.grade_records (learner_id, class_id)
        VALUES ($1, $2)
        ON CONFLICT (learner_id, class_id) DO UPDATE
        SET learner_id = EXCLUDED.learner_id
        RETURNING id
        "#,
    )
    .bind(learner_id)
    .bind(class_id.to_string())
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(record_id)
}

/// Writes a score under `source_key`. A known key has its type and score
/// replaced. Returns false when the stored entry already matched.
async fn insert_entry(
    pool: &PgPool,
    record_id: i64,
    entry: &ScoreEntry,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO grade_aggregates.score_entries
        (id, record_id, position, score_type, score, source_key)
        VALUES (
            $1, $2,
            (SELECT COALESCE(MAX(position) + 1, 0)
             FROM grade_aggregates.score_entries WHERE record_id = $2),
            $3, $4, $5
        )
        ON CONFLICT (source_key) DO UPDATE
        SET score_type = EXCLUDED.score_type, score = EXCLUDED.score
        WHERE (score_entries.score_type, score_entries.score)
            IS DISTINCT FROM (EXCLUDED.score_type, EXCLUDED.score)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(record_id)
    .bind(&entry.score_type)
    .bind(entry.score)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Key of the `position`-th score of the `document`-th record in an import.
/// Two documents for the same enrollment never share a key.
fn document_source_key(document: usize, record: &GradeRecord, position: usize) -> String {
    format!(
        "doc-{}-{}-{}-{}",
        document, record.learner_id, record.class_id, position
    )
}

async fn insert_records(pool: &PgPool, records: &[GradeRecord]) -> anyhow::Result<usize> {
    let mut inserted = 0usize;

    for (document, record) in records.iter().enumerate() {
        let record_id = upsert_record(pool, record.learner_id, &record.class_id).await?;
        for (position, entry) in record.scores.iter().enumerate() {
            let source_key = document_source_key(document, record, position);
            if insert_entry(pool, record_id, entry, &source_key).await? {
                inserted += 1;
            }
        }
    }

    Ok(inserted)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    fn scores(entries: &[(&str, f64)]) -> Vec<ScoreEntry> {
        entries
            .iter()
            .map(|(score_type, score)| ScoreEntry {
                score_type: score_type.to_string(),
                score: *score,
            })
            .collect()
    }

    let records = vec![
        GradeRecord {
            learner_id: 1,
            class_id: ClassId::Numeric(339),
            scores: scores(&[("exam", 80.0), ("exam", 90.0), ("quiz", 70.0), ("homework", 100.0)]),
        },
        GradeRecord {
            learner_id: 1,
            class_id: ClassId::Numeric(12),
            scores: scores(&[("exam", 64.5), ("quiz", 58.0), ("homework", 77.0), ("homework", 81.0)]),
        },
        GradeRecord {
            learner_id: 2,
            class_id: ClassId::Numeric(339),
            scores: scores(&[("exam", 55.0), ("quiz", 62.0), ("homework", 68.0)]),
        },
        GradeRecord {
            learner_id: 3,
            class_id: ClassId::Numeric(339),
            scores: scores(&[("exam", 91.0), ("quiz", 88.5), ("quiz", 93.0)]),
        },
        GradeRecord {
            learner_id: 3,
            class_id: ClassId::Named("lab-4".to_string()),
            scores: scores(&[("homework", 95.0), ("project", 88.0)]),
        },
    ];

    insert_records(pool, &records).await
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        learner_id: i64,
        class_id: String,
        score_type: String,
        score: f64,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let class_id: ClassId = row
            .class_id
            .parse()
            .with_context(|| format!("row {} has an invalid class_id", line + 1))?;
        let record_id = upsert_record(pool, row.learner_id, &class_id).await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let entry = ScoreEntry {
            score_type: row.score_type,
            score: row.score,
        };

        if insert_entry(pool, record_id, &entry, &source_key).await? {
            inserted += 1;
        }
    }

    tracing::info!(path = %csv_path.display(), inserted, "csv import finished");
    Ok(inserted)
}

/// Imports a snapshot file. Entries are keyed by document index, learner,
/// class and position: importing the same file again adds nothing, and a
/// corrected score at an existing position replaces the stored one.
pub async fn import_json(pool: &PgPool, json_path: &std::path::Path) -> anyhow::Result<usize> {
    let records = snapshot::load(json_path)?;
    let inserted = insert_records(pool, &records).await?;
    tracing::info!(path = %json_path.display(), inserted, "json import finished");
    Ok(inserted)
}

pub async fn fetch_records(pool: &PgPool, filter: &RecordFilter) -> anyhow::Result<Vec<GradeRecord>> {
    let mut query = String::from(
        "SELECT r.id AS record_id, r.learner_id, r.class_id, e.score_type, e.score \
         FROM grade_aggregates.grade_records r \
         LEFT JOIN grade_aggregates.score_entries e ON e.record_id = r.id",
    );

    match filter {
        RecordFilter::All => {}
        RecordFilter::Learner(_) => query.push_str(" WHERE r.learner_id = $1"),
        RecordFilter::Class(_) => query.push_str(" WHERE r.class_id = $1"),
    }
    query.push_str(" ORDER BY r.id, e.position");

    let mut rows = sqlx::query(&query);
    match filter {
        RecordFilter::All => {}
        RecordFilter::Learner(learner_id) => rows = rows.bind(*learner_id),
        RecordFilter::Class(class_id) => rows = rows.bind(class_id.to_string()),
    }

    let fetched = rows.fetch_all(pool).await?;
    let mut records: Vec<GradeRecord> = Vec::new();
    let mut current_id: Option<i64> = None;

    for row in fetched {
        let record_id: i64 = row.get("record_id");
        if current_id != Some(record_id) {
            let class_id: String = row.get("class_id");
            records.push(GradeRecord {
                learner_id: row.get("learner_id"),
                class_id: class_id
                    .parse()
                    .with_context(|| format!("record {record_id} has an invalid class_id"))?,
                scores: Vec::new(),
            });
            current_id = Some(record_id);
        }

        let score_type: Option<String> = row.get("score_type");
        let score: Option<f64> = row.get("score");
        if let (Some(score_type), Some(score), Some(record)) = (score_type, score, records.last_mut()) {
            record.scores.push(ScoreEntry { score_type, score });
        }
    }

    tracing::debug!(?filter, records = records.len(), "fetched grade records");
    Ok(records)
}
