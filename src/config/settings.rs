use crate::domain::model::{FanoutExchange, PublishTarget, Topology};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_required_field,
    validate_sql_identifier, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use url::Url;

/// Env var naming an optional TOML settings file.
pub const CONFIG_PATH_VAR: &str = "APPOINTMENT_ETL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub database: DatabaseSettings,
    pub topology: TopologySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "rabbitmq".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
        }
    }
}

impl BrokerSettings {
    pub fn amqp_uri(&self) -> Result<String> {
        let mut url = Url::parse(&format!("amqp://{}:{}", self.host, self.port)).map_err(|e| {
            EtlError::InvalidConfigValueError {
                field: "broker.host".to_string(),
                value: self.host.clone(),
                reason: e.to_string(),
            }
        })?;
        let invalid = |field: &str| EtlError::InvalidConfigValueError {
            field: field.to_string(),
            value: String::new(),
            reason: "cannot be set on the broker URI".to_string(),
        };
        url.set_username(&self.user)
            .map_err(|_| invalid("broker.user"))?;
        url.set_password(Some(&self.password))
            .map_err(|_| invalid("broker.password"))?;

        // vhost "/" 必須編碼成 %2f
        let vhost = self.vhost.replace('%', "%25").replace('/', "%2f");
        url.set_path(&format!("/{}", vhost));
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_connections: usize,
    pub raw_table: String,
    pub processed_table: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "postgres".to_string(),
            port: 5432,
            database: None,
            user: None,
            password: None,
            max_connections: 1,
            raw_table: "raw_appointments".to_string(),
            processed_table: "processed_appointments".to_string(),
        }
    }
}

impl DatabaseSettings {
    pub fn connection_url(&self) -> Result<String> {
        let database = validate_required_field("database.database", &self.database)?;
        let mut url = Url::parse(&format!("postgres://{}:{}", self.host, self.port)).map_err(
            |e| EtlError::InvalidConfigValueError {
                field: "database.host".to_string(),
                value: self.host.clone(),
                reason: e.to_string(),
            },
        )?;
        let invalid = |field: &str| EtlError::InvalidConfigValueError {
            field: field.to_string(),
            value: String::new(),
            reason: "cannot be set on the database URL".to_string(),
        };
        if let Some(user) = &self.user {
            url.set_username(user)
                .map_err(|_| invalid("database.user"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| invalid("database.password"))?;
        }
        url.set_path(database);
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySettings {
    /// Processor input.
    pub raw_queue: String,
    /// Raw uploader input.
    pub raw_ingest_queue: String,
    pub processed_queue: String,
    /// Fanout exchange feeding both raw queues; empty means point-to-point.
    pub broadcast_exchange: String,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            raw_queue: "file.raw".to_string(),
            raw_ingest_queue: "file.raw_ingest".to_string(),
            processed_queue: "file.proc".to_string(),
            broadcast_exchange: "file.raw.broadcast".to_string(),
        }
    }
}

impl TopologySettings {
    pub fn is_broadcast(&self) -> bool {
        !self.broadcast_exchange.trim().is_empty()
    }

    pub fn topology(&self) -> Topology {
        let fanout = self.is_broadcast().then(|| FanoutExchange {
            name: self.broadcast_exchange.clone(),
            bound_queues: vec![self.raw_queue.clone(), self.raw_ingest_queue.clone()],
        });

        let mut queues = vec![self.raw_queue.clone()];
        if self.is_broadcast() {
            queues.push(self.raw_ingest_queue.clone());
        }
        queues.push(self.processed_queue.clone());

        Topology { queues, fanout }
    }

    /// Where the raw uploader reads. Without the broadcast exchange only
    /// `raw_queue` is fed, so the processor and the raw uploader compete
    /// for the same batches there.
    pub fn raw_ingest_source(&self) -> &str {
        if self.is_broadcast() {
            &self.raw_ingest_queue
        } else {
            &self.raw_queue
        }
    }

    /// Where the producer publishes raw batches.
    pub fn raw_target(&self) -> PublishTarget {
        if self.is_broadcast() {
            PublishTarget::Exchange(self.broadcast_exchange.clone())
        } else {
            PublishTarget::Queue(self.raw_queue.clone())
        }
    }

    pub fn processed_target(&self) -> PublishTarget {
        PublishTarget::Queue(self.processed_queue.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    pub verbose: bool,
}

impl Settings {
    /// `.env` first, then the TOML file named by `APPOINTMENT_ETL_CONFIG`
    /// if set, otherwise plain environment variables.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        match env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path),
            _ => Self::from_env(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        let broker = &mut settings.broker;
        override_string("RABBITMQ_HOST", &mut broker.host);
        override_parsed("RABBITMQ_PORT", &mut broker.port)?;
        override_string("RABBITMQ_USER", &mut broker.user);
        override_string("RABBITMQ_PASS", &mut broker.password);
        override_string("RABBITMQ_VHOST", &mut broker.vhost);

        let database = &mut settings.database;
        override_string("POSTGRES_HOST", &mut database.host);
        override_parsed("POSTGRES_PORT", &mut database.port)?;
        database.database = env::var("POSTGRES_DB").ok();
        database.user = env::var("POSTGRES_USER").ok();
        database.password = env::var("POSTGRES_PASS").ok();
        override_parsed("POSTGRES_MAX_CONNECTIONS", &mut database.max_connections)?;
        override_string("ETL_RAW_TABLE", &mut database.raw_table);
        override_string("ETL_PROCESSED_TABLE", &mut database.processed_table);

        let topology = &mut settings.topology;
        override_string("ETL_RAW_QUEUE", &mut topology.raw_queue);
        override_string("ETL_RAW_INGEST_QUEUE", &mut topology.raw_ingest_queue);
        override_string("ETL_PROCESSED_QUEUE", &mut topology.processed_queue);
        if let Ok(exchange) = env::var("ETL_BROADCAST_EXCHANGE") {
            topology.broadcast_exchange = exchange;
        }

        if let Ok(format) = env::var("ETL_LOG_FORMAT") {
            settings.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" | "" => LogFormat::Compact,
                other => {
                    return Err(EtlError::InvalidConfigValueError {
                        field: "ETL_LOG_FORMAT".to_string(),
                        value: other.to_string(),
                        reason: "expected 'compact' or 'json'".to_string(),
                    })
                }
            };
        }
        if let Ok(verbose) = env::var("ETL_VERBOSE") {
            settings.logging.verbose = matches!(verbose.as_str(), "1" | "true" | "yes");
        }

        Ok(settings)
    }

    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }
}

/// 替換環境變數 (例如 ${POSTGRES_PASS})；未設定的保留原樣
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
        message: format!("env substitution pattern: {}", e),
    })?;

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    });

    Ok(result.to_string())
}

fn override_string(var: &str, target: &mut String) {
    if let Ok(value) = env::var(var) {
        if !value.trim().is_empty() {
            *target = value;
        }
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) -> Result<()> {
    if let Ok(value) = env::var(var) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| EtlError::InvalidConfigValueError {
                field: var.to_string(),
                value: value.clone(),
                reason: "not a valid number".to_string(),
            })?;
    }
    Ok(())
}

impl Validate for BrokerSettings {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("broker.host", &self.host)?;
        validate_url("broker", &self.amqp_uri()?, &["amqp", "amqps"])
    }
}

impl Validate for DatabaseSettings {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("database.host", &self.host)?;
        validate_url("database", &self.connection_url()?, &["postgres", "postgresql"])?;
        validate_positive_number("database.max_connections", self.max_connections, 1)?;
        validate_sql_identifier("database.raw_table", &self.raw_table)?;
        validate_sql_identifier("database.processed_table", &self.processed_table)?;
        Ok(())
    }
}

impl Validate for TopologySettings {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("topology.raw_queue", &self.raw_queue)?;
        validate_non_empty_string("topology.raw_ingest_queue", &self.raw_ingest_queue)?;
        validate_non_empty_string("topology.processed_queue", &self.processed_queue)?;

        if self.raw_queue == self.processed_queue || self.raw_ingest_queue == self.processed_queue
        {
            return Err(EtlError::ConfigValidationError {
                field: "topology.processed_queue".to_string(),
                message: "processed queue must differ from the raw queues".to_string(),
            });
        }
        if self.is_broadcast() && self.raw_queue == self.raw_ingest_queue {
            return Err(EtlError::ConfigValidationError {
                field: "topology.raw_ingest_queue".to_string(),
                message: "broadcast mode needs distinct raw and raw-ingest queues".to_string(),
            });
        }
        Ok(())
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        self.topology.validate()?;
        Ok(())
    }
}
