//! Postgres document store
//!
//! Documents live in one table keyed by `(tenant_id, id)`. Embeddings use
//! pgvector, fuzzy matching uses pg_trgm `word_similarity`. Every
//! statement filters on `tenant_id`.

use super::models::{EmailDocument, ScoredCandidate};
use super::scoring::{tokenize, ScoringParams, EXACT_TERM_MAX_CHARS, FUZZY_MIN_RATIO};
use super::{DbPool, DocumentStore, SearchQuery};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, QueryResult, Statement};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// Repository for the email document table
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
    table: String,
    dimension: usize,
}

impl Repository {
    /// Create a repository over `table`; the name must be a plain identifier
    pub fn new(pool: DbPool, table: &str, dimension: usize) -> Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            dimension,
        })
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    fn schema_statements(&self) -> Vec<String> {
        let t = &self.table;
        vec![
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            "CREATE EXTENSION IF NOT EXISTS pg_trgm".to_string(),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {t} (
                    tenant_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    thread_id TEXT,
                    subject TEXT NOT NULL DEFAULT '',
                    body_text TEXT NOT NULL DEFAULT '',
                    body_html_flag BOOLEAN NOT NULL DEFAULT FALSE,
                    from_addresses JSONB NOT NULL DEFAULT '[]',
                    from_names JSONB NOT NULL DEFAULT '[]',
                    to_addresses JSONB NOT NULL DEFAULT '[]',
                    to_names JSONB NOT NULL DEFAULT '[]',
                    cc_addresses JSONB NOT NULL DEFAULT '[]',
                    cc_names JSONB NOT NULL DEFAULT '[]',
                    sent_at TIMESTAMPTZ,
                    embedding vector({dim}),
                    indexed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (tenant_id, id)
                )
                "#,
                dim = self.dimension
            ),
            format!("CREATE INDEX IF NOT EXISTS {t}_tenant_sent_idx ON {t} (tenant_id, sent_at)"),
        ]
    }
}

#[async_trait]
impl DocumentStore for Repository {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn ensure_schema(&self) -> Result<()> {
        for sql in self.schema_statements() {
            self.write_conn().execute_unprepared(&sql).await?;
        }
        info!("Document schema ready");
        Ok(())
    }

    async fn existing_ids(&self, tenant_id: &str, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "SELECT id FROM {} WHERE tenant_id = $1 AND id IN (SELECT jsonb_array_elements_text($2::jsonb))",
                self.table
            ),
            vec![tenant_id.into(), serde_json::to_value(ids)?.into()],
        );

        self.read_conn()
            .query_all(stmt)
            .await?
            .into_iter()
            .map(|row| row.try_get::<String>("", "id").map_err(Into::into))
            .collect()
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn upsert(&self, tenant_id: &str, documents: Vec<EmailDocument>) -> Result<u64> {
        let sql = format!(
            r#"
            INSERT INTO {} (
                tenant_id, id, thread_id, subject, body_text, body_html_flag,
                from_addresses, from_names, to_addresses, to_names, cc_addresses, cc_names,
                sent_at, embedding, indexed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14::vector, NOW())
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                thread_id = EXCLUDED.thread_id,
                subject = EXCLUDED.subject,
                body_text = EXCLUDED.body_text,
                body_html_flag = EXCLUDED.body_html_flag,
                from_addresses = EXCLUDED.from_addresses,
                from_names = EXCLUDED.from_names,
                to_addresses = EXCLUDED.to_addresses,
                to_names = EXCLUDED.to_names,
                cc_addresses = EXCLUDED.cc_addresses,
                cc_names = EXCLUDED.cc_names,
                sent_at = EXCLUDED.sent_at,
                embedding = EXCLUDED.embedding,
                indexed_at = NOW()
            "#,
            self.table
        );

        let mut written = 0u64;
        for doc in documents {
            let embedding = doc.embedding.as_deref().map(format_vector);
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![
                    tenant_id.into(),
                    doc.id.into(),
                    doc.thread_id.into(),
                    doc.subject.into(),
                    doc.body_text.into(),
                    doc.body_html_flag.into(),
                    serde_json::to_value(&doc.from_addresses)?.into(),
                    serde_json::to_value(&doc.from_names)?.into(),
                    serde_json::to_value(&doc.to_addresses)?.into(),
                    serde_json::to_value(&doc.to_names)?.into(),
                    serde_json::to_value(&doc.cc_addresses)?.into(),
                    serde_json::to_value(&doc.cc_names)?.into(),
                    doc.sent_at.into(),
                    embedding.into(),
                ],
            );
            written += self.write_conn().execute(stmt).await?.rows_affected();
        }

        debug!(written, "Upserted documents");
        Ok(written)
    }

    async fn count(&self, tenant_id: &str) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!("SELECT COUNT(*) AS total FROM {} WHERE tenant_id = $1", self.table),
            vec![tenant_id.into()],
        );

        let total = match self.read_conn().query_one(stmt).await? {
            Some(row) => row.try_get::<i64>("", "total")?,
            None => 0,
        };
        Ok(total.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn delete_all(&self, tenant_id: &str) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!("DELETE FROM {} WHERE tenant_id = $1", self.table),
            vec![tenant_id.into()],
        );
        Ok(self.write_conn().execute(stmt).await?.rows_affected())
    }

    #[instrument(skip(self, query, params), fields(tenant_id = %query.tenant_id, k = query.k))]
    async fn search(&self, query: &SearchQuery, params: &ScoringParams) -> Result<Vec<ScoredCandidate>> {
        if query.k == 0 {
            return Ok(Vec::new());
        }

        let stmt = search_statement(&self.table, query, params)?;
        let rows = self.read_conn().query_all(stmt).await?;
        let candidates = rows
            .iter()
            .map(row_to_candidate)
            .collect::<Result<Vec<_>>>()?;

        debug!(results = candidates.len(), "Search complete");
        Ok(candidates)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// Mean over query terms of their best match in `column`, mirroring the
/// in-memory scorer: short terms need an exact word, longer ones a
/// `word_similarity` of at least the fuzzy floor.
fn term_match_sql(terms_param: &str, column: &str) -> String {
    format!(
        r#"COALESCE((
                        SELECT AVG(CASE
                            WHEN char_length(t.term) <= {exact} THEN
                                CASE WHEN t.term = ANY(regexp_split_to_array(lower({column}), '[^[:alnum:]]+'))
                                THEN 1.0 ELSE 0.0 END
                            WHEN word_similarity(t.term, lower({column})) >= {floor}
                                THEN word_similarity(t.term, lower({column}))::float8
                            ELSE 0.0
                        END)
                        FROM jsonb_array_elements_text({terms_param}::jsonb) AS t(term)
                    ), 0)"#,
        exact = EXACT_TERM_MAX_CHARS,
        floor = FUZZY_MIN_RATIO,
    )
}

fn search_sql(table: &str) -> String {
    format!(
        r#"
            WITH scored AS (
                SELECT
                    d.*,
                    GREATEST(
                        {body},
                        {subject} * $12::float8,
                        COALESCE((
                            SELECT MAX(CASE
                                WHEN strpos(lower(p.value), h.hint) > 0 THEN 1.0
                                WHEN word_similarity(h.hint, lower(p.value)) >= {floor}
                                    THEN word_similarity(h.hint, lower(p.value))::float8
                                ELSE 0.0
                            END)
                            FROM jsonb_array_elements_text($5::jsonb) AS h(hint),
                                 jsonb_array_elements_text(
                                     d.from_names || d.from_addresses || d.to_names
                                     || d.to_addresses || d.cc_names || d.cc_addresses
                                 ) AS p(value)
                            WHERE p.value <> ''
                        ), 0) * $13::float8
                    ) AS lexical,
                    1 - (d.embedding <=> $2::vector) AS cosine,
                    CASE WHEN d.sent_at IS NULL THEN 0
                    ELSE power(
                        $8::float8,
                        abs(extract(epoch FROM ($6::timestamptz - d.sent_at)))::float8 / $7::float8
                    )
                    END AS decay
                FROM {table} d
                WHERE d.tenant_id = $1
                  AND d.embedding IS NOT NULL
                  AND ($9::timestamptz IS NULL OR d.sent_at >= $9::timestamptz)
                  AND ($10::timestamptz IS NULL OR d.sent_at <= $10::timestamptz)
            )
            SELECT *, (lexical + 1) * (GREATEST(cosine, -1) + 1) * (decay + 1) AS score
            FROM scored
            ORDER BY score DESC, id ASC
            LIMIT $11
            "#,
        body = term_match_sql("$3", "d.body_text"),
        subject = term_match_sql("$4", "d.subject"),
        floor = FUZZY_MIN_RATIO,
    )
}

/// Hybrid search statement; every bound value is a parameter, the tenant
/// filter is part of the `WHERE` clause
fn search_statement(table: &str, query: &SearchQuery, params: &ScoringParams) -> Result<Statement> {
    let hints: Vec<String> = query
        .sender_hints
        .iter()
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .collect();

    Ok(Statement::from_sql_and_values(
        DbBackend::Postgres,
        search_sql(table),
        vec![
            query.tenant_id.clone().into(),
            format_vector(&query.vector).into(),
            serde_json::to_value(query_terms(&query.body_query))?.into(),
            serde_json::to_value(query_terms(&query.subject_terms))?.into(),
            serde_json::to_value(hints)?.into(),
            query.now.into(),
            params.decay_scale_secs.into(),
            params.decay_factor.into(),
            query.date_range.start.into(),
            query.date_range.end.into(),
            (query.k as i64).into(),
            params.subject_boost.into(),
            params.sender_boost.into(),
        ],
    ))
}

/// Distinct lowercased words, as the in-memory scorer splits them
fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn decode_strings(value: serde_json::Value) -> Result<Vec<String>> {
    Ok(serde_json::from_value(value)?)
}

fn row_to_candidate(row: &QueryResult) -> Result<ScoredCandidate> {
    let strings = |col: &str| -> Result<Vec<String>> {
        decode_strings(row.try_get::<serde_json::Value>("", col)?)
    };

    let document = EmailDocument {
        id: row.try_get("", "id")?,
        tenant_id: row.try_get("", "tenant_id")?,
        thread_id: row.try_get("", "thread_id")?,
        subject: row.try_get("", "subject")?,
        body_text: row.try_get("", "body_text")?,
        body_html: None,
        body_html_flag: row.try_get("", "body_html_flag")?,
        from_addresses: strings("from_addresses")?,
        from_names: strings("from_names")?,
        to_addresses: strings("to_addresses")?,
        to_names: strings("to_names")?,
        cc_addresses: strings("cc_addresses")?,
        cc_names: strings("cc_names")?,
        sent_at: row.try_get::<Option<DateTime<Utc>>>("", "sent_at")?,
        embedding: None,
    };

    Ok(ScoredCandidate {
        document,
        score: row.try_get("", "score")?,
    })
}

/// Render an embedding in pgvector's text format, e.g. `[1,0.5]`
pub(crate) fn format_vector(values: &[f32]) -> String {
    format!(
        "[{}]",
        values
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.len() <= 63
        && table.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(AppError::Configuration {
            message: format!("invalid index table name: {:?}", table),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::models::DateRange;
    use chrono::TimeZone;
    use sea_orm::Value;

    fn query(date_range: DateRange) -> SearchQuery {
        SearchQuery {
            tenant_id: "t1".into(),
            vector: vec![1.0, 0.0, 0.0],
            k: 5,
            body_query: "What is Emilie doing for Sthack?".into(),
            subject_terms: "Sthack".into(),
            sender_hints: vec![" Emilie ".into()],
            date_range,
            now: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn values(stmt: &Statement) -> &[Value] {
        &stmt.values.as_ref().unwrap().0
    }

    #[test]
    fn test_search_statement_scopes_tenant_and_skips_unembedded() {
        let stmt = search_statement("email_documents", &query(DateRange::default()), &ScoringParams::default()).unwrap();

        assert!(stmt.sql.contains("FROM email_documents d"));
        assert!(stmt.sql.contains("WHERE d.tenant_id = $1"));
        assert!(stmt.sql.contains("AND d.embedding IS NOT NULL"));
        assert!(stmt.sql.contains("LIMIT $11"));

        let values = values(&stmt);
        assert_eq!(values.len(), 13);
        assert_eq!(values[0], Value::from("t1"));
        assert_eq!(values[1], Value::from("[1,0,0]"));
        assert_eq!(values[10], Value::from(5i64));
    }

    #[test]
    fn test_search_statement_binds_query_terms_like_memory_scorer() {
        let stmt = search_statement("email_documents", &query(DateRange::default()), &ScoringParams::default()).unwrap();
        let values = values(&stmt);

        assert_eq!(
            values[2],
            Value::from(serde_json::json!(["what", "is", "emilie", "doing", "for", "sthack"]))
        );
        assert_eq!(values[3], Value::from(serde_json::json!(["sthack"])));
        assert_eq!(values[4], Value::from(serde_json::json!(["emilie"])));
        assert!(stmt.sql.contains("char_length(t.term) <= 2"));
        assert!(stmt.sql.contains(">= 0.5"));
    }

    #[test]
    fn test_search_statement_date_bounds() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();

        let open = search_statement("email_documents", &query(DateRange::default()), &ScoringParams::default()).unwrap();
        assert!(open.sql.contains("($9::timestamptz IS NULL OR d.sent_at >= $9::timestamptz)"));
        assert!(open.sql.contains("($10::timestamptz IS NULL OR d.sent_at <= $10::timestamptz)"));
        assert_eq!(values(&open)[8], Value::from(None::<DateTime<Utc>>));
        assert_eq!(values(&open)[9], Value::from(None::<DateTime<Utc>>));

        let bounded = search_statement(
            "email_documents",
            &query(DateRange::new(Some(start), Some(end))),
            &ScoringParams::default(),
        )
        .unwrap();
        assert_eq!(values(&bounded)[8], Value::from(Some(start)));
        assert_eq!(values(&bounded)[9], Value::from(Some(end)));

        let since = search_statement(
            "email_documents",
            &query(DateRange::new(Some(start), None)),
            &ScoringParams::default(),
        )
        .unwrap();
        assert_eq!(values(&since)[8], Value::from(Some(start)));
        assert_eq!(values(&since)[9], Value::from(None::<DateTime<Utc>>));
    }

    #[test]
    fn test_corrupt_participants_column_is_an_error() {
        assert_eq!(
            decode_strings(serde_json::json!(["Emilie", "emilie@sthack.fr"])).unwrap(),
            vec!["Emilie".to_string(), "emilie@sthack.fr".to_string()]
        );
        assert!(matches!(
            decode_strings(serde_json::json!({"name": "Emilie"})),
            Err(AppError::Serialization(_))
        ));
        assert!(matches!(
            decode_strings(serde_json::json!([1, 2])),
            Err(AppError::Serialization(_))
        ));
    }

    fn stored(tenant: &str, id: &str, body: &str, sent_at: DateTime<Utc>, embedding: Option<Vec<f32>>) -> EmailDocument {
        let mut doc = EmailDocument::new(tenant, id);
        doc.subject = format!("{id} subject");
        doc.body_text = body.into();
        doc.sent_at = Some(sent_at);
        doc.embedding = embedding;
        doc
    }

    /// Needs a Postgres with pgvector and pg_trgm:
    /// `LAZYMAIL_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_postgres_search_rules() {
        let Ok(url) = std::env::var("LAZYMAIL_TEST_DATABASE_URL") else {
            return;
        };
        let pool = DbPool::new(&DatabaseConfig {
            url,
            ..Default::default()
        })
        .await
        .unwrap();
        let repo = Repository::new(pool, "lazymail_search_rules", 3).unwrap();
        repo.ensure_schema().await.unwrap();
        repo.delete_all("t1").await.unwrap();
        repo.delete_all("t2").await.unwrap();

        let may = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let march = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let v = Some(vec![1.0, 0.0, 0.0]);
        repo.upsert(
            "t1",
            vec![
                stored("t1", "m1", "Emilie is speaking at Sthack", may, v.clone()),
                stored("t1", "m2", "Emilie is speaking at Sthack", march, v.clone()),
                stored("t1", "m3", "Emilie is speaking at Sthack", may, None),
            ],
        )
        .await
        .unwrap();
        repo.upsert("t2", vec![stored("t2", "x1", "Emilie is speaking at Sthack", may, v.clone())])
            .await
            .unwrap();

        let hits = repo.search(&query(DateRange::default()), &ScoringParams::default()).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|c| c.document.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(hits[0].score > hits[1].score);

        let start = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let hits = repo
            .search(&query(DateRange::new(Some(start), None)), &ScoringParams::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "m1");

        repo.delete_all("t1").await.unwrap();
        repo.delete_all("t2").await.unwrap();
    }

    #[test]
    fn test_format_vector() {
        assert_eq!(format_vector(&[1.0, 0.5, -2.0]), "[1,0.5,-2]");
        assert_eq!(format_vector(&[]), "[]");
    }

    #[test]
    fn test_table_name_validation() {
        tokio_test::assert_ok!(validate_table_name("email_documents"));
        tokio_test::assert_err!(validate_table_name("docs; DROP TABLE x"));
        tokio_test::assert_err!(validate_table_name("1docs"));
        tokio_test::assert_err!(validate_table_name(""));
    }
}
