use crate::app::runner::Job;
use crate::utils::error::Result;
use crate::utils::validation::{validate_path, Validate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "appointment-etl")]
#[command(about = "Message-driven ETL for medical appointment batches")]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Publish a raw CSV file as a RawBatch envelope
    Produce {
        /// Path to the raw CSV file
        #[arg(long)]
        file: PathBuf,
    },
    /// Clean one RawBatch from the raw queue and forward it to the processed queue
    ProcessFile,
    /// Load one RawBatch from the raw-ingest queue into the raw table
    UploadRaw,
    /// Load one CleanedBatch from the processed queue into the processed table
    Upload,
}

impl CliConfig {
    pub fn job(&self) -> Job {
        match &self.command {
            Command::Produce { file } => Job::Produce { file: file.clone() },
            Command::ProcessFile => Job::Process,
            Command::UploadRaw => Job::UploadRaw,
            Command::Upload => Job::Upload,
        }
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if let Command::Produce { file } = &self.command {
            validate_path("file", &file.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommand_names() {
        let cli = CliConfig::try_parse_from(["appointment-etl", "process-file"]).unwrap();
        assert_eq!(cli.job(), Job::Process);

        let cli = CliConfig::try_parse_from(["appointment-etl", "upload-raw"]).unwrap();
        assert_eq!(cli.job(), Job::UploadRaw);

        let cli = CliConfig::try_parse_from(["appointment-etl", "upload"]).unwrap();
        assert_eq!(cli.job(), Job::Upload);

        let cli =
            CliConfig::try_parse_from(["appointment-etl", "produce", "--file", "data/raw.csv"])
                .unwrap();
        assert_eq!(
            cli.job(),
            Job::Produce {
                file: PathBuf::from("data/raw.csv")
            }
        );
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_produce_requires_file() {
        assert!(CliConfig::try_parse_from(["appointment-etl", "produce"]).is_err());
        assert!(CliConfig::try_parse_from(["appointment-etl", "process-file", "--verbose"]).is_err());
    }
}
