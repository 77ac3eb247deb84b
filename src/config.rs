use std::{env, fmt, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid environment variable format for {0}: {1}")]
    InvalidVar(String, String),
}

/// Defaults applied when a variable is unset, printed by `--print-defaults`.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("LISTEN_ADDR", "0.0.0.0"),
    ("LISTEN_PORT", "8080"),
    ("STORAGE_TYPE", "s3"),
    ("STORAGE_BUCKET", "skalogram-posts-dev"),
    ("STORAGE_BUCKET_REGION", "eu-west-3"),
    ("STORAGE_ROOT", "./data"),
    ("METADATA_BACKEND", "postgres"),
    ("PG_HOST", "127.0.0.1"),
    ("PG_PORT", "5432"),
    ("PG_USER", "postgres"),
    ("PG_PASSWORD", "postgres"),
    ("PG_DBNAME", "skalogram"),
    ("DYNAMODB_TABLE", "posts"),
    ("CACHE_BACKEND", "redis"),
    ("REDIS_HOST", "127.0.0.1"),
    ("REDIS_PORT", "6379"),
    ("CACHE_TTL", "60s"),
    ("RENDER_CONCURRENCY", "8"),
    ("MAX_UPLOAD_BYTES", "10485760"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Gcs,
    File,
    Memory,
}

impl StorageBackend {
    /// Address scheme written into new post locations.
    pub fn scheme(self) -> &'static str {
        match self {
            StorageBackend::S3 => "s3",
            StorageBackend::Gcs => "gs",
            StorageBackend::File => "file",
            StorageBackend::Memory => "mem",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "gs" | "gcs" => Ok(StorageBackend::Gcs),
            "file" => Ok(StorageBackend::File),
            "mem" | "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage type '{}' (expected s3, gs, file or mem)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBackend {
    Postgres,
    DynamoDb,
    Memory,
}

impl FromStr for MetadataBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(MetadataBackend::Postgres),
            "dynamodb" => Ok(MetadataBackend::DynamoDb),
            "memory" => Ok(MetadataBackend::Memory),
            other => Err(format!(
                "unknown metadata backend '{}' (expected postgres, dynamodb or memory)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(format!("unknown cache backend '{}' (expected redis or memory)", other)),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub storage_backend: StorageBackend,
    pub storage_bucket: String,
    pub storage_region: String,
    /// Root directory for the `file` storage backend.
    pub storage_root: PathBuf,
    /// Optional endpoint override for LocalStack.
    pub aws_endpoint: Option<String>,
    pub metadata_backend: MetadataBackend,
    pub postgres: PostgresConfig,
    pub dynamodb_table: String,
    pub cache_backend: CacheBackend,
    pub redis_url: String,
    pub cache_ttl: Duration,
    pub render_concurrency: usize,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignores errors, relies on env vars otherwise)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source, falling back to [`DEFAULTS`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| -> String {
            lookup(key)
                .or_else(|| default_for(key).map(str::to_string))
                .unwrap_or_default()
        };

        let bind_address_str = format!("{}:{}", get("LISTEN_ADDR"), get("LISTEN_PORT"));
        let bind_address = SocketAddr::from_str(&bind_address_str)
            .map_err(|e| ConfigError::InvalidVar("LISTEN_ADDR/LISTEN_PORT".into(), e.to_string()))?;

        let cache_ttl = parse_duration(&get("CACHE_TTL"))
            .map_err(|e| ConfigError::InvalidVar("CACHE_TTL".into(), e))?;

        let render_concurrency = parse_var::<usize>("RENDER_CONCURRENCY", &get("RENDER_CONCURRENCY"))?;
        if render_concurrency == 0 {
            return Err(ConfigError::InvalidVar(
                "RENDER_CONCURRENCY".into(),
                "must be at least 1".into(),
            ));
        }

        let redis_port = parse_var::<u16>("REDIS_PORT", &get("REDIS_PORT"))?;

        Ok(Config {
            bind_address,
            storage_backend: parse_var("STORAGE_TYPE", &get("STORAGE_TYPE"))?,
            storage_bucket: get("STORAGE_BUCKET"),
            storage_region: get("STORAGE_BUCKET_REGION"),
            storage_root: PathBuf::from(get("STORAGE_ROOT")),
            aws_endpoint: lookup("AWS_ENDPOINT_URL").filter(|s| !s.is_empty()),
            metadata_backend: parse_var("METADATA_BACKEND", &get("METADATA_BACKEND"))?,
            postgres: PostgresConfig {
                host: get("PG_HOST"),
                port: parse_var("PG_PORT", &get("PG_PORT"))?,
                user: get("PG_USER"),
                password: get("PG_PASSWORD"),
                dbname: get("PG_DBNAME"),
            },
            dynamodb_table: get("DYNAMODB_TABLE"),
            cache_backend: parse_var("CACHE_BACKEND", &get("CACHE_BACKEND"))?,
            redis_url: format!("redis://{}:{}/", get("REDIS_HOST"), redis_port),
            cache_ttl,
            render_concurrency,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", &get("MAX_UPLOAD_BYTES"))?,
        })
    }

    /// Human-readable listing of [`DEFAULTS`], sorted by name.
    pub fn defaults_table() -> String {
        let mut entries = DEFAULTS.to_vec();
        entries.sort_by_key(|(key, _)| *key);
        let mut out = String::from("Default configurations:\n");
        for (key, value) in entries {
            out.push_str(&format!("\t{}=\"{}\"\n", key, value));
        }
        out
    }
}

fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidVar(key.to_string(), e.to_string()))
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parses durations such as `60s`, `1m30s`, `1.5h` or `250ms`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`, and terms may be
/// chained. A bare integer is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let invalid = || format!("'{}' is not a duration (e.g. 60s, 1m30s, 1.5h)", raw);
    let overflow = || format!("duration '{}' is out of range", raw);

    if raw.is_empty() {
        return Err(invalid());
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        let secs = raw.parse::<u64>().map_err(|_| overflow())?;
        return Ok(Duration::from_secs(secs));
    }

    let mut total_nanos: u128 = 0;
    let mut rest = raw;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_end);
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            other => return Err(format!("unknown duration unit '{}' in '{}'", other, raw)),
        };
        let term = scaled_term(number, unit_nanos).ok_or_else(invalid)?;
        total_nanos = total_nanos.checked_add(term).ok_or_else(overflow)?;
        rest = next;
    }

    let secs = u64::try_from(total_nanos / NANOS_PER_SEC).map_err(|_| overflow())?;
    // The remainder is below one second, so it fits.
    Ok(Duration::new(secs, (total_nanos % NANOS_PER_SEC) as u32))
}

/// `number` (with an optional fraction) times `unit_nanos`, or `None` if it
/// is malformed or overflows.
fn scaled_term(number: &str, unit_nanos: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(unit_nanos)?;

    let mut place = unit_nanos;
    for digit in fraction.bytes() {
        place /= 10;
        if place == 0 {
            break;
        }
        nanos = nanos.checked_add(u128::from(digit - b'0') * place)?;
    }
    Some(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_are_applied() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.storage_backend, StorageBackend::S3);
        assert_eq!(config.storage_bucket, "skalogram-posts-dev");
        assert_eq!(config.metadata_backend, MetadataBackend::Postgres);
        assert_eq!(config.cache_backend, CacheBackend::Redis);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379/");
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.render_concurrency, 8);
        assert_eq!(config.aws_endpoint, None);
    }

    #[test]
    fn overrides_win() {
        let config = config_from(&[
            ("STORAGE_TYPE", "file"),
            ("STORAGE_ROOT", "/var/lib/skalogram"),
            ("METADATA_BACKEND", "dynamodb"),
            ("CACHE_BACKEND", "memory"),
            ("CACHE_TTL", "5m"),
            ("LISTEN_PORT", "9000"),
            ("AWS_ENDPOINT_URL", "http://localhost:4566"),
        ])
        .unwrap();
        assert_eq!(config.storage_backend, StorageBackend::File);
        assert_eq!(config.storage_backend.scheme(), "file");
        assert_eq!(config.storage_root, PathBuf::from("/var/lib/skalogram"));
        assert_eq!(config.metadata_backend, MetadataBackend::DynamoDb);
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.aws_endpoint.as_deref(), Some("http://localhost:4566"));
    }

    #[test]
    fn google_cloud_storage_is_selectable() {
        let config = config_from(&[("STORAGE_TYPE", "gs")]).unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Gcs);
        assert_eq!(config.storage_backend.scheme(), "gs");
        assert_eq!("GCS".parse::<StorageBackend>(), Ok(StorageBackend::Gcs));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config_from(&[("CACHE_TTL", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar(ref k, _) if k == "CACHE_TTL"));

        let err = config_from(&[("STORAGE_TYPE", "azure")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar(ref k, _) if k == "STORAGE_TYPE"));

        let err = config_from(&[("RENDER_CONCURRENCY", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar(ref k, _) if k == "RENDER_CONCURRENCY"));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn compound_and_fractional_durations() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1h2m3s4ms").unwrap(), Duration::new(3723, 4_000_000));
        assert_eq!(parse_duration(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("300us").unwrap(), Duration::from_micros(300));
        assert_eq!(parse_duration("300µs").unwrap(), Duration::from_micros(300));
        assert!(parse_duration("1m30").is_err());
        assert!(parse_duration("1..5s").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn oversized_durations_are_rejected_not_wrapped() {
        assert!(parse_duration("307445734561825861h").is_err());
        assert!(parse_duration("18446744073709551616").is_err());
        assert!(parse_duration("99999999999999999999999999999999999999999h").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn oversized_cache_ttl_is_a_config_error() {
        let err = config_from(&[("CACHE_TTL", "307445734561825861h")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar(ref k, _) if k == "CACHE_TTL"));
    }

    #[test]
    fn defaults_table_is_sorted() {
        let table = Config::defaults_table();
        let keys: Vec<&str> = table
            .lines()
            .skip(1)
            .filter_map(|l| l.trim().split('=').next())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(table.contains("CACHE_TTL=\"60s\""));
    }
}
