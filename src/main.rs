use appointment_etl::utils::{logger, validation::Validate};
use appointment_etl::{CliConfig, EtlError, Settings, StageOutcome};
use clap::Parser;

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    // 初始化日誌
    logger::init_logger(&settings.logging);

    let job = config.job();
    tracing::info!(job = job.name(), "Starting appointment-etl");
    tracing::debug!("Settings: {:?}", settings.topology);

    // 驗證配置
    if let Err(e) = config.validate().and_then(|_| settings.validate()) {
        tracing::error!("❌ Configuration validation failed: {}", e);
        report(&e);
        std::process::exit(1);
    }

    match appointment_etl::run(&job, &settings).await {
        Ok(outcome) => {
            match &outcome {
                StageOutcome::Completed(summary) => {
                    tracing::info!(
                        stage = summary.stage,
                        filename = %summary.filename,
                        rows = summary.rows,
                        "✅ {} → {}",
                        summary.filename,
                        summary.destination
                    );
                }
                StageOutcome::EmptyQueue { queue } => {
                    eprintln!("⚠️  Nothing to do: '{}' is empty", queue);
                }
                StageOutcome::Rejected { reason, .. } => {
                    eprintln!("❌ Message dropped: {}", reason);
                }
            }
            std::process::exit(outcome.exit_code());
        }
        Err(e) => {
            // 記錄詳細錯誤信息
            tracing::error!(
                "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
                job.name(),
                e,
                e.category(),
                e.severity()
            );
            report(&e);
            std::process::exit(1);
        }
    }
}

fn report(e: &EtlError) {
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
}
