use crate::config::TopologySettings;
use crate::core::engine::{StageEngine, StageOutcome, StageReport, StageState};
use crate::core::envelope;
use crate::domain::model::{Envelope, EnvelopeKind, PublishTarget};
use crate::domain::ports::{BrokerGateway, Storage};
use crate::utils::error::Result;
use std::path::Path;

/// Reads a source file and publishes it as a `RawBatch`.
pub struct Producer<'a, S: Storage, B: BrokerGateway> {
    storage: S,
    engine: StageEngine<'a, B>,
    target: PublishTarget,
}

impl<'a, S: Storage, B: BrokerGateway> Producer<'a, S, B> {
    pub fn new(storage: S, broker: &'a B, topology: &TopologySettings) -> Self {
        Self {
            storage,
            engine: StageEngine::new(broker, topology.topology()),
            target: topology.raw_target(),
        }
    }

    pub async fn produce(&self, path: &str) -> Result<StageOutcome> {
        let payload = self.storage.read_file(path).await?;
        let filename = source_name(path);
        tracing::info!(
            stage = "producer",
            state = %StageState::Idle,
            filename = %filename,
            bytes = payload.len(),
            "📄 Read source file"
        );

        let raw = Envelope::new(EnvelopeKind::RawBatch, filename.clone(), payload);
        let body = envelope::encode(&raw)?;

        self.engine.ensure_topology().await?;
        self.engine.broker().publish(&self.target, &body).await?;
        tracing::info!(
            stage = "producer",
            state = %StageState::Published,
            filename = %filename,
            "📤 Published '{}' to {}",
            filename,
            self.target
        );

        Ok(StageOutcome::Completed(StageReport {
            stage: "producer",
            filename,
            destination: self.target.to_string(),
            rows: 0,
        }))
    }
}

/// The bare file name travels in the envelope; directories are local detail.
fn source_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBroker;
    use crate::utils::error::EtlError;

    struct FixedStorage(&'static [u8]);

    impl Storage for FixedStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            if path.ends_with("missing.csv") {
                return Err(EtlError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                )));
            }
            Ok(self.0.to_vec())
        }
    }

    #[tokio::test]
    async fn test_produce_broadcasts_to_both_raw_queues() {
        let broker = InMemoryBroker::new();
        let topology = TopologySettings::default();
        let producer = Producer::new(FixedStorage(b"a,b\n1,2\n"), &broker, &topology);

        let outcome = producer.produce("data/raw/noshow.csv").await.unwrap();
        assert_eq!(outcome.exit_code(), 0);

        for queue in ["file.raw", "file.raw_ingest"] {
            let bodies = broker.ready_messages(queue).await;
            assert_eq!(bodies.len(), 1, "queue {}", queue);
            let envelope = envelope::decode(&bodies[0]).unwrap();
            assert_eq!(envelope.kind, EnvelopeKind::RawBatch);
            assert_eq!(envelope.filename, "noshow.csv");
            assert_eq!(envelope.payload, b"a,b\n1,2\n");
        }
        assert!(broker.ready_messages("file.proc").await.is_empty());
    }

    #[tokio::test]
    async fn test_produce_point_to_point() {
        let broker = InMemoryBroker::new();
        let topology = TopologySettings {
            broadcast_exchange: String::new(),
            ..TopologySettings::default()
        };
        let producer = Producer::new(FixedStorage(b"a\n1\n"), &broker, &topology);

        producer.produce("noshow.csv").await.unwrap();

        assert_eq!(broker.ready_messages("file.raw").await.len(), 1);
        assert!(broker.ready_messages("file.raw_ingest").await.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_source_publishes_nothing() {
        let broker = InMemoryBroker::new();
        let topology = TopologySettings::default();
        let producer = Producer::new(FixedStorage(b""), &broker, &topology);

        assert!(producer.produce("missing.csv").await.is_err());
        assert_eq!(broker.publish_count().await, 0);
    }
}
