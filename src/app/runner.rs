use crate::adapters::{AmqpGateway, LocalStorage, PgRowStore};
use crate::app::stages::{Processor, Producer, UploadMode, Uploader};
use crate::config::Settings;
use crate::core::engine::{StageEngine, StageOutcome};
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use std::path::PathBuf;

/// One process invocation does exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Produce { file: PathBuf },
    Process,
    UploadRaw,
    Upload,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Produce { .. } => "produce",
            Self::Process => "process-file",
            Self::UploadRaw => "upload-raw",
            Self::Upload => "upload",
        }
    }

    fn upload_mode(&self) -> Option<UploadMode> {
        match self {
            Self::UploadRaw => Some(UploadMode::Raw),
            Self::Upload => Some(UploadMode::Cleaned),
            _ => None,
        }
    }
}

/// Connects to the backing services, runs `job` once and releases every
/// connection before returning, whatever the result.
pub async fn run(job: &Job, settings: &Settings) -> Result<StageOutcome> {
    if job.upload_mode().is_some() {
        // 上傳前先確認資料庫設定，避免取出訊息後才失敗
        settings.database.validate()?;
    }

    let broker = AmqpGateway::connect(&settings.broker).await?;
    let result = match job.upload_mode() {
        Some(mode) => upload(&broker, mode, settings).await,
        None => dispatch(&broker, job, settings).await,
    };
    broker.close().await;
    result
}

async fn dispatch(broker: &AmqpGateway, job: &Job, settings: &Settings) -> Result<StageOutcome> {
    match job {
        Job::Produce { file } => {
            let producer = Producer::new(LocalStorage::default(), broker, &settings.topology);
            producer.produce(&file.to_string_lossy()).await
        }
        _ => {
            let engine = StageEngine::new(broker, settings.topology.topology());
            engine
                .consume_one(&Processor::new(&settings.topology))
                .await
        }
    }
}

async fn upload(broker: &AmqpGateway, mode: UploadMode, settings: &Settings) -> Result<StageOutcome> {
    let store = PgRowStore::connect(&settings.database).await?;
    let uploader = Uploader::new(store, mode, &settings.topology, &settings.database);
    let engine = StageEngine::new(broker, settings.topology.topology());

    let result = engine.consume_one(&uploader).await;
    uploader.store().close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorCategory;

    #[test]
    fn test_job_names_match_subcommands() {
        assert_eq!(Job::Produce { file: PathBuf::from("a.csv") }.name(), "produce");
        assert_eq!(Job::Process.name(), "process-file");
        assert_eq!(Job::UploadRaw.name(), "upload-raw");
        assert_eq!(Job::Upload.name(), "upload");
    }

    #[test]
    fn test_upload_modes() {
        assert_eq!(Job::UploadRaw.upload_mode(), Some(UploadMode::Raw));
        assert_eq!(Job::Upload.upload_mode(), Some(UploadMode::Cleaned));
        assert_eq!(Job::Process.upload_mode(), None);
    }

    #[tokio::test]
    async fn test_upload_without_database_fails_before_connecting() {
        // 沒有 POSTGRES_DB：不應嘗試連線 broker
        let settings = Settings::default();
        let err = run(&Job::Upload, &settings).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Config);
    }
}
