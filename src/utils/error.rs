use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("Schema violation: {reason}")]
    SchemaViolation { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Envelope,
    Data,
    Config,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    pub fn schema(reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) if rejects_data(e) => ErrorCategory::Data,
            Self::Transport { .. } | Self::Broker(_) | Self::Store(_) => ErrorCategory::Transport,
            Self::MalformedEnvelope { .. } => ErrorCategory::Envelope,
            Self::SchemaViolation { .. } | Self::CsvError(_) | Self::SerializationError(_) => {
                ErrorCategory::Data
            }
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => ErrorCategory::Config,
            Self::IoError(_) => ErrorCategory::Io,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Envelope | ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::Transport => ErrorSeverity::Medium,
            ErrorCategory::Config | ErrorCategory::Io => ErrorSeverity::Critical,
        }
    }

    /// 重送也無法成功的訊息：必須 ack 後丟棄，不可阻塞佇列
    pub fn is_poison(&self) -> bool {
        match self {
            Self::MalformedEnvelope { .. } | Self::SchemaViolation { .. } => true,
            Self::Store(e) => rejects_data(e),
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Transport => {
                "Check that RabbitMQ and Postgres are reachable; the message stays queued and will be redelivered"
            }
            ErrorCategory::Envelope => {
                "The message was not produced by this pipeline; it has been dropped from the queue"
            }
            ErrorCategory::Data => {
                "Inspect the source file columns and flag values; the batch has been dropped"
            }
            ErrorCategory::Config => "Review the environment variables or the TOML config file",
            ErrorCategory::Io => "Check that the source file exists and is readable",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::Transport { message } => format!("Cannot reach a backing service: {}", message),
            Self::Broker(e) => format!("Message broker unavailable: {}", e),
            Self::Store(e) if rejects_data(e) => format!("Database rejected batch: {}", e),
            Self::Store(e) => format!("Database unavailable: {}", e),
            Self::MalformedEnvelope { reason } => format!("Rejected malformed message: {}", reason),
            Self::SchemaViolation { reason } => format!("Rejected batch: {}", reason),
            other => other.to_string(),
        }
    }
}

/// SQLSTATE class 22 (data exception) or 23 (integrity constraint
/// violation): the rows themselves are wrong, retrying cannot help.
fn rejects_data(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("22") || code.starts_with("23")),
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_classification() {
        assert!(EtlError::malformed("bad type").is_poison());
        assert!(EtlError::schema("missing age").is_poison());
        assert!(!EtlError::transport("connection refused").is_poison());
        assert!(!EtlError::ConfigError {
            message: "x".to_string()
        }
        .is_poison());
    }

    #[test]
    fn test_category_and_severity() {
        let err = EtlError::transport("down");
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(err.severity(), ErrorSeverity::Medium);

        let err = EtlError::schema("bad flag");
        assert_eq!(err.category(), ErrorCategory::Data);
        assert_eq!(err.severity(), ErrorSeverity::High);

        let err = EtlError::MissingConfigError {
            field: "POSTGRES_DB".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_store_data_rejection_is_poison() {
        use crate::adapters::memory::StoreRejection;

        let err = EtlError::Store(sqlx::Error::Database(Box::new(StoreRejection::new(
            "22001",
            "value too long for type character varying(1)",
        ))));
        assert!(err.is_poison());
        assert_eq!(err.category(), ErrorCategory::Data);

        let err = EtlError::Store(sqlx::Error::Database(Box::new(StoreRejection::new(
            "23502",
            "null value in column \"age\" violates not-null constraint",
        ))));
        assert!(err.is_poison());

        // 連線類錯誤仍需重送
        let err = EtlError::Store(sqlx::Error::Database(Box::new(StoreRejection::new(
            "57P01",
            "terminating connection due to administrator command",
        ))));
        assert!(!err.is_poison());
        assert_eq!(err.category(), ErrorCategory::Transport);

        let err = EtlError::Store(sqlx::Error::PoolTimedOut);
        assert!(!err.is_poison());
        assert_eq!(err.category(), ErrorCategory::Transport);
    }
}
