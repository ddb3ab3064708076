use crate::config::TopologySettings;
use crate::core::cleaning;
use crate::core::engine::{ConsumerStage, StageOutput};
use crate::core::schema::SCHEMA_VERSION;
use crate::core::table::RawTable;
use crate::domain::model::{Envelope, EnvelopeKind, PublishTarget};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Cleans one `RawBatch` and forwards it as a `CleanedBatch`.
pub struct Processor {
    source_queue: String,
    target: PublishTarget,
}

impl Processor {
    pub fn new(topology: &TopologySettings) -> Self {
        Self {
            source_queue: topology.raw_queue.clone(),
            target: topology.processed_target(),
        }
    }
}

#[async_trait]
impl ConsumerStage for Processor {
    fn name(&self) -> &'static str {
        "processor"
    }

    fn source_queue(&self) -> &str {
        &self.source_queue
    }

    fn expected_kind(&self) -> EnvelopeKind {
        EnvelopeKind::RawBatch
    }

    async fn handle(&self, envelope: Envelope) -> Result<StageOutput> {
        let table = RawTable::from_csv(&envelope.payload)?;
        let rows_in = table.len();

        let cleaned = cleaning::clean(table)?;
        let rows_out = cleaned.rows.len();
        tracing::info!(
            filename = %envelope.filename,
            rows_in,
            rows_out,
            dropped = cleaned.dropped,
            schema_version = SCHEMA_VERSION,
            "✅ File loaded and cleaned successfully"
        );

        let payload = cleaned.to_csv()?;
        Ok(StageOutput::Forward {
            target: self.target.clone(),
            envelope: Envelope::new(EnvelopeKind::CleanedBatch, envelope.filename, payload),
            rows_in,
            rows_out,
        })
    }
}
