use crate::config::{DatabaseSettings, TopologySettings};
use crate::core::engine::{ConsumerStage, StageOutput};
use crate::core::projection::project_raw;
use crate::core::table::{read_records, RawTable};
use crate::domain::model::{CleanedAppointment, Envelope, EnvelopeKind, RecordBatch};
use crate::domain::ports::RowStore;
use crate::utils::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// `RawBatch` from the raw-ingest queue (the raw queue in point-to-point
    /// mode) into the raw table.
    Raw,
    /// `CleanedBatch` from the processed queue into the processed table.
    Cleaned,
}

/// Bulk-loads one batch into the external store.
pub struct Uploader<R: RowStore> {
    store: R,
    mode: UploadMode,
    source_queue: String,
    table: String,
}

impl<R: RowStore> Uploader<R> {
    pub fn new(
        store: R,
        mode: UploadMode,
        topology: &TopologySettings,
        database: &DatabaseSettings,
    ) -> Self {
        let (source_queue, table) = match mode {
            UploadMode::Raw => (topology.raw_ingest_source(), &database.raw_table),
            UploadMode::Cleaned => (topology.processed_queue.as_str(), &database.processed_table),
        };

        Self {
            store,
            mode,
            source_queue: source_queue.to_string(),
            table: table.clone(),
        }
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    fn to_batch(&self, payload: &[u8]) -> Result<RecordBatch> {
        match self.mode {
            UploadMode::Raw => {
                let rows = project_raw(RawTable::from_csv(payload)?)?;
                Ok(RecordBatch::from_records(&rows))
            }
            UploadMode::Cleaned => {
                let rows: Vec<CleanedAppointment> = read_records(payload)?;
                Ok(RecordBatch::from_records(&rows))
            }
        }
    }
}

#[async_trait]
impl<R: RowStore> ConsumerStage for Uploader<R> {
    fn name(&self) -> &'static str {
        match self.mode {
            UploadMode::Raw => "raw_uploader",
            UploadMode::Cleaned => "uploader",
        }
    }

    fn source_queue(&self) -> &str {
        &self.source_queue
    }

    fn expected_kind(&self) -> EnvelopeKind {
        match self.mode {
            UploadMode::Raw => EnvelopeKind::RawBatch,
            UploadMode::Cleaned => EnvelopeKind::CleanedBatch,
        }
    }

    async fn handle(&self, envelope: Envelope) -> Result<StageOutput> {
        let batch = self.to_batch(&envelope.payload)?;
        tracing::info!(
            stage = self.name(),
            filename = %envelope.filename,
            rows = batch.len(),
            "Inserting {} rows…",
            batch.len()
        );

        let rows = self.store.bulk_insert(&self.table, &batch).await?;
        Ok(StageOutput::Stored {
            table: self.table.clone(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBroker, InMemoryRowStore};
    use crate::core::cleaning::clean_csv;
    use crate::core::engine::{StageEngine, StageOutcome};
    use crate::core::envelope;
    use crate::domain::model::FieldValue;
    use crate::utils::error::ErrorCategory;

    const RAW: &str = "\
PatientId,AppointmentID,Gender,ScheduledDay,AppointmentDay,Age,Neighbourhood,Scholarship,Hipertension,Diabetes,Alcoholism,Handcap,SMS_received,No-show
1,10,F,2016-04-25T08:00:00Z,2016-04-27T00:00:00Z,30,Centro,0,1,0,0,0,0,No
2,11,M,2016-05-10T08:00:00Z,2016-04-27T00:00:00Z,45,Centro,0,0,0,0,0,1,Yes
";

    fn wire(kind: EnvelopeKind, payload: Vec<u8>) -> Vec<u8> {
        envelope::encode(&Envelope::new(kind, "batch-01.csv", payload)).unwrap()
    }

    fn database() -> DatabaseSettings {
        DatabaseSettings {
            database: Some("appointments".to_string()),
            ..DatabaseSettings::default()
        }
    }

    #[tokio::test]
    async fn test_upload_raw_projects_and_inserts() {
        let broker = InMemoryBroker::new();
        broker
            .push_ready("file.raw_ingest", wire(EnvelopeKind::RawBatch, RAW.as_bytes().to_vec()))
            .await;
        let topology = TopologySettings::default();
        let uploader = Uploader::new(InMemoryRowStore::new(), UploadMode::Raw, &topology, &database());
        let engine = StageEngine::new(&broker, topology.topology());

        let outcome = engine.consume_one(&uploader).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(broker.ack_count().await, 1);

        let inserts = uploader.store().inserts().await;
        assert_eq!(inserts.len(), 1);
        let (table, batch) = &inserts[0];
        assert_eq!(table, "raw_appointments");
        // raw rows are not filtered by wait_days
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.columns[8], "hypertension");
        assert_eq!(batch.rows[0][8], FieldValue::Bool(true));
        assert_eq!(batch.rows[1][13], FieldValue::Bool(true));
    }

    #[tokio::test]
    async fn test_upload_cleaned_reads_typed_rows() {
        let cleaned = clean_csv(RAW.as_bytes()).unwrap().to_csv().unwrap();
        let broker = InMemoryBroker::new();
        broker
            .push_ready("file.proc", wire(EnvelopeKind::CleanedBatch, cleaned))
            .await;
        let topology = TopologySettings::default();
        let uploader =
            Uploader::new(InMemoryRowStore::new(), UploadMode::Cleaned, &topology, &database());
        let engine = StageEngine::new(&broker, topology.topology());

        let outcome = engine.consume_one(&uploader).await.unwrap();

        match outcome {
            StageOutcome::Completed(report) => {
                assert_eq!(report.rows, 1);
                assert_eq!(report.filename, "batch-01.csv");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let inserts = uploader.store().inserts().await;
        assert_eq!(inserts[0].0, "processed_appointments");
        assert_eq!(inserts[0].1.columns.last(), Some(&"age_group"));
    }

    #[tokio::test]
    async fn test_raw_payload_on_processed_queue_is_rejected() {
        let broker = InMemoryBroker::new();
        broker
            .push_ready("file.proc", wire(EnvelopeKind::CleanedBatch, RAW.as_bytes().to_vec()))
            .await;
        let topology = TopologySettings::default();
        let uploader =
            Uploader::new(InMemoryRowStore::new(), UploadMode::Cleaned, &topology, &database());
        let engine = StageEngine::new(&broker, topology.topology());

        let outcome = engine.consume_one(&uploader).await.unwrap();

        assert!(matches!(outcome, StageOutcome::Rejected { .. }));
        assert_eq!(broker.ack_count().await, 1);
        assert!(uploader.store().inserts().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_not_acked() {
        let broker = InMemoryBroker::new();
        broker
            .push_ready("file.raw_ingest", wire(EnvelopeKind::RawBatch, RAW.as_bytes().to_vec()))
            .await;
        let topology = TopologySettings::default();
        let store = InMemoryRowStore::new();
        store.fail_inserts(true).await;
        let uploader = Uploader::new(store, UploadMode::Raw, &topology, &database());
        let engine = StageEngine::new(&broker, topology.topology());

        assert!(engine.consume_one(&uploader).await.is_err());
        assert_eq!(broker.ack_count().await, 0);
        assert_eq!(broker.unacked_count().await, 1);
    }

    #[tokio::test]
    async fn test_rows_refused_by_database_are_dropped() {
        let broker = InMemoryBroker::new();
        broker
            .push_ready("file.raw_ingest", wire(EnvelopeKind::RawBatch, RAW.as_bytes().to_vec()))
            .await;
        let topology = TopologySettings::default();
        let store = InMemoryRowStore::new();
        // 23502: not_null_violation
        store.reject_inserts("23502").await;
        let uploader = Uploader::new(store, UploadMode::Raw, &topology, &database());
        let engine = StageEngine::new(&broker, topology.topology());

        let outcome = engine.consume_one(&uploader).await.unwrap();

        assert!(matches!(
            outcome,
            StageOutcome::Rejected {
                category: ErrorCategory::Data,
                ..
            }
        ));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(broker.ack_count().await, 1);
        assert_eq!(broker.unacked_count().await, 0);
        assert!(broker.ready_messages("file.raw_ingest").await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_processed_queue() {
        let broker = InMemoryBroker::new();
        let topology = TopologySettings::default();
        let uploader =
            Uploader::new(InMemoryRowStore::new(), UploadMode::Cleaned, &topology, &database());
        let engine = StageEngine::new(&broker, topology.topology());

        let outcome = engine.consume_one(&uploader).await.unwrap();
        assert_eq!(outcome.exit_code(), 1);
        assert!(uploader.store().inserts().await.is_empty());
    }
}
