use crate::config::DatabaseSettings;
use crate::domain::model::{FieldValue, RecordBatch};
use crate::domain::ports::RowStore;
use crate::utils::error::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

pub struct PgRowStore {
    pool: PgPool,
}

impl PgRowStore {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let url = settings.connection_url()?;
        tracing::info!(
            host = %settings.host,
            port = settings.port,
            "🔌 Connecting to Postgres"
        );
        let pool = PgPoolOptions::new()
            .max_connections(u32::try_from(settings.max_connections).unwrap_or(u32::MAX))
            .connect(&url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Postgres pool closed");
    }
}

/// Rows per statement for a given column count.
fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

fn insert_prefix(table: &str, columns: &[&str]) -> String {
    format!("INSERT INTO {} ({}) ", table, columns.join(", "))
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn bulk_insert(&self, table: &str, batch: &RecordBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in batch.rows.chunks(rows_per_statement(batch.columns.len())) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(insert_prefix(table, &batch.columns));

            query_builder.push_values(chunk, |mut b, row| {
                for value in row {
                    match value {
                        FieldValue::Text(v) => {
                            b.push_bind(v.clone());
                        }
                        FieldValue::Int(v) => {
                            b.push_bind(*v);
                        }
                        FieldValue::Bool(v) => {
                            b.push_bind(*v);
                        }
                        FieldValue::Timestamp(v) => {
                            b.push_bind(*v);
                        }
                    }
                }
            });

            let result = query_builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        tracing::debug!(table, rows = written, "Transaction committed");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CLEANED_COLUMNS, RAW_COLUMNS};

    #[test]
    fn test_chunks_stay_under_bind_limit() {
        let rows = rows_per_statement(RAW_COLUMNS.len());
        assert!(rows * RAW_COLUMNS.len() <= MAX_BIND_PARAMS);
        assert!((rows + 1) * RAW_COLUMNS.len() > MAX_BIND_PARAMS);

        let rows = rows_per_statement(CLEANED_COLUMNS.len());
        assert!(rows * CLEANED_COLUMNS.len() <= MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMS);
    }

    #[test]
    fn test_insert_prefix() {
        assert_eq!(
            insert_prefix("raw_appointments", &["patient_id", "age"]),
            "INSERT INTO raw_appointments (patient_id, age) "
        );
    }
}
