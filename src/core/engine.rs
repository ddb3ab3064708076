use crate::core::envelope;
use crate::domain::model::{Delivery, Envelope, EnvelopeKind, PublishTarget, Topology};
use crate::domain::ports::BrokerGateway;
use crate::utils::error::{ErrorCategory, EtlError, Result};
use async_trait::async_trait;
use std::fmt;

/// Per-delivery lifecycle shared by every driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Fetched,
    Decoded,
    MalformedReject,
    Transformed,
    TransformReject,
    Published,
    Acknowledged,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetched => "fetched",
            Self::Decoded => "decoded",
            Self::MalformedReject => "malformed_reject",
            Self::Transformed => "transformed",
            Self::TransformReject => "transform_reject",
            Self::Published => "published",
            Self::Acknowledged => "acknowledged",
        };
        f.write_str(name)
    }
}

/// What a consumer stage produced for one envelope.
#[derive(Debug)]
pub enum StageOutput {
    /// Publish `envelope` to `target` before the source delivery is acknowledged.
    Forward {
        target: PublishTarget,
        envelope: Envelope,
        rows_in: usize,
        rows_out: usize,
    },
    /// Rows were written to the external store.
    Stored { table: String, rows: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: &'static str,
    pub filename: String,
    pub destination: String,
    pub rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed(StageReport),
    /// No ready message; nothing was published or acknowledged.
    EmptyQueue { queue: String },
    /// Poison message: acknowledged and dropped without downstream effects.
    Rejected {
        state: StageState,
        category: ErrorCategory,
        reason: String,
    },
}

impl StageOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed(_) => 0,
            Self::EmptyQueue { .. } | Self::Rejected { .. } => 1,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// A driver that consumes one envelope from `source_queue`.
#[async_trait]
pub trait ConsumerStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn source_queue(&self) -> &str;
    fn expected_kind(&self) -> EnvelopeKind;
    async fn handle(&self, envelope: Envelope) -> Result<StageOutput>;
}

pub struct StageEngine<'a, B: BrokerGateway> {
    broker: &'a B,
    topology: Topology,
}

impl<'a, B: BrokerGateway> StageEngine<'a, B> {
    pub fn new(broker: &'a B, topology: Topology) -> Self {
        Self { broker, topology }
    }

    pub fn broker(&self) -> &B {
        self.broker
    }

    pub async fn ensure_topology(&self) -> Result<()> {
        self.broker.ensure_topology(&self.topology).await
    }

    /// One fetch → decode → transform → publish/store → acknowledge cycle.
    ///
    /// Poison messages are acknowledged and reported as `Rejected`. Any other
    /// error leaves the delivery unacknowledged so the broker redelivers it.
    pub async fn consume_one<S: ConsumerStage>(&self, stage: &S) -> Result<StageOutcome> {
        let name = stage.name();
        let queue = stage.source_queue();

        self.ensure_topology().await?;
        log_state(name, StageState::Idle, queue, None);

        let delivery = match self.broker.fetch_one(queue).await? {
            Some(delivery) => delivery,
            None => {
                tracing::warn!(stage = name, queue, "⚠️  '{}' is empty", queue);
                return Ok(StageOutcome::EmptyQueue {
                    queue: queue.to_string(),
                });
            }
        };
        if delivery.redelivered {
            tracing::info!(stage = name, queue, tag = delivery.tag, "🔁 Redelivered message");
        }
        log_state(name, StageState::Fetched, queue, None);

        let decoded = envelope::decode(&delivery.body).and_then(|message| {
            if message.kind == stage.expected_kind() {
                Ok(message)
            } else {
                Err(EtlError::malformed(format!(
                    "expected {} but received {}",
                    stage.expected_kind(),
                    message.kind
                )))
            }
        });
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                return self
                    .reject(name, delivery, StageState::MalformedReject, None, e)
                    .await;
            }
        };
        let filename = message.filename.clone();
        log_state(name, StageState::Decoded, queue, Some(filename.as_str()));

        let output = match stage.handle(message).await {
            Ok(output) => output,
            Err(e) if e.is_poison() => {
                let state = StageState::TransformReject;
                return self
                    .reject(name, delivery, state, Some(filename.as_str()), e)
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    stage = name,
                    queue,
                    filename = %filename,
                    "❌ {} (message left for redelivery)",
                    e
                );
                return Err(e);
            }
        };
        log_state(name, StageState::Transformed, queue, Some(filename.as_str()));

        let report = match output {
            StageOutput::Forward {
                target,
                envelope: outbound,
                rows_in,
                rows_out,
            } => {
                let body = envelope::encode(&outbound)?;
                self.broker.publish(&target, &body).await?;
                tracing::info!(
                    stage = name,
                    state = %StageState::Published,
                    filename = %filename,
                    rows_in,
                    rows_out,
                    "📤 Forwarded {} to {}",
                    outbound.kind,
                    target
                );
                StageReport {
                    stage: name,
                    filename: filename.clone(),
                    destination: target.to_string(),
                    rows: rows_out as u64,
                }
            }
            StageOutput::Stored { table, rows } => {
                tracing::info!(
                    stage = name,
                    filename = %filename,
                    rows,
                    "🗄️  Inserted {} rows into '{}'",
                    rows,
                    table
                );
                StageReport {
                    stage: name,
                    filename: filename.clone(),
                    destination: format!("table '{}'", table),
                    rows,
                }
            }
        };

        self.broker.acknowledge(delivery).await?;
        log_state(name, StageState::Acknowledged, queue, Some(filename.as_str()));

        Ok(StageOutcome::Completed(report))
    }

    async fn reject(
        &self,
        name: &'static str,
        delivery: Delivery,
        state: StageState,
        filename: Option<&str>,
        error: EtlError,
    ) -> Result<StageOutcome> {
        let queue = delivery.queue.clone();
        tracing::error!(
            stage = name,
            state = %state,
            queue = %queue,
            filename = filename.unwrap_or("<unknown>"),
            "❌ {}",
            error
        );

        // 毒訊息：先 ack 再回報，避免佇列被卡住
        self.broker.acknowledge(delivery).await?;
        log_state(name, StageState::Acknowledged, &queue, filename);

        Ok(StageOutcome::Rejected {
            state,
            category: error.category(),
            reason: error.to_string(),
        })
    }
}

fn log_state(stage: &str, state: StageState, queue: &str, filename: Option<&str>) {
    tracing::info!(
        stage,
        state = %state,
        queue,
        filename = filename.unwrap_or("-"),
        "stage transition"
    );
}
