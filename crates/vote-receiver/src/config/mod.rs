use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub intake: IntakeConfig,
    pub kafka: KafkaConfig,
}

impl AppConfig {
    /// Reads `.env` (when present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Blank values count as unset.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source(lookup);

        let environment = AppEnvironment::from_str(&source.text("APP_ENV", "development"));

        let host = source.text("APP_HOST", "0.0.0.0");
        let port = source
            .get("APP_PORT")
            .or_else(|| source.get("SERVER_PORT"))
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let telemetry = TelemetryConfig {
            log_level: source.text("APP_LOG_LEVEL", "info"),
            format: source.parse("APP_LOG_FORMAT", LogFormat::Compact)?,
        };

        let intake = IntakeConfig {
            request_timeout: source.millis("APP_REQUEST_TIMEOUT_MS", 2_000)?,
            publish_timeout: source.millis("APP_PUBLISH_TIMEOUT_MS", 200)?,
        };

        let brokers: Vec<String> = source
            .text("KAFKA_BROKERS", "localhost:9092")
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(str::to_string)
            .collect();
        if brokers.is_empty() {
            return Err(ConfigError::NoBrokers);
        }

        let topic = source.text("KAFKA_TOPIC", "votos");

        let kafka = KafkaConfig {
            brokers,
            topic,
            pool_size: source.positive("KAFKA_POOL_SIZE", 3)?,
            batch_size: source.positive("KAFKA_BATCH_SIZE", 1_000)?,
            batch_bytes: source.positive("KAFKA_BATCH_BYTES", 16_000_000)?,
            linger: source.millis("KAFKA_LINGER_MS", 30)?,
            io_timeout: source.millis("KAFKA_IO_TIMEOUT_MS", 1_000)?,
            max_attempts: source.positive("KAFKA_MAX_ATTEMPTS", 2)?,
            compression: source.parse("KAFKA_COMPRESSION", Compression::Lz4)?,
            partitioner: source.text("KAFKA_PARTITIONER", "murmur2_random"),
            delivery_mode: source.parse("KAFKA_DELIVERY_MODE", DeliveryMode::Async)?,
            health_policy: source.parse("KAFKA_HEALTH_POLICY", HealthPolicy::AnyBroker)?,
            broker_check_timeout: source.millis("KAFKA_BROKER_CHECK_TIMEOUT_MS", 5_000)?,
            health_check_timeout: source.millis("KAFKA_HEALTH_CHECK_TIMEOUT_MS", 30_000)?,
            close_timeout: source.millis("KAFKA_CLOSE_TIMEOUT_MS", 5_000)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry,
            intake,
            kafka,
        })
    }
}

struct Source<F>(F);

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn text(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
    {
        let value = self.parse(key, default)?;
        if value == T::default() {
            return Err(ConfigError::Zero { key });
        }
        Ok(value)
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(key, default).map(Duration::from_millis)
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing output controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Latency budgets for the vote intake path. The publish budget is the tighter of the two so a
/// slow broker is reported by the intake service instead of the request deadline.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub request_timeout: Duration,
    pub publish_timeout: Duration,
}

/// Producer pool, batching and health-check tunables.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub pool_size: usize,
    pub batch_size: usize,
    pub batch_bytes: usize,
    pub linger: Duration,
    pub io_timeout: Duration,
    pub max_attempts: u32,
    pub compression: Compression,
    pub partitioner: String,
    pub delivery_mode: DeliveryMode,
    pub health_policy: HealthPolicy,
    pub broker_check_timeout: Duration,
    pub health_check_timeout: Duration,
    pub close_timeout: Duration,
}

impl KafkaConfig {
    /// Upper bound for one record to be acknowledged, retries included.
    pub fn delivery_timeout(&self) -> Duration {
        self.io_timeout * self.max_attempts + self.linger
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

impl FromStr for Compression {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "snappy" => Ok(Self::Snappy),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            _ => Err(()),
        }
    }
}

/// How a producer reports a hand-off back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Return once the record sits in the producer's local queue; the broker acknowledgement
    /// arrives later as a delivery event.
    Async,
    /// Return only after the broker acknowledged the record.
    Sync,
}

impl FromStr for DeliveryMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "async" => Ok(Self::Async),
            "sync" => Ok(Self::Sync),
            _ => Err(()),
        }
    }
}

/// How many probed brokers must serve the topic for startup to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPolicy {
    AnyBroker,
    AllBrokers,
}

impl FromStr for HealthPolicy {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::AnyBroker),
            "all" => Ok(Self::AllBrokers),
            _ => Err(()),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str, value: String },
    Zero { key: &'static str },
    NoBrokers,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{key} has an unsupported value '{value}'")
            }
            ConfigError::Zero { key } => write!(f, "{key} must be greater than zero"),
            ConfigError::NoBrokers => {
                write!(f, "KAFKA_BROKERS must list at least one broker address")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
