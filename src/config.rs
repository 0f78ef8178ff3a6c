use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

const DEFAULT_PREFIX: &str = "singleauditreport";
const DEFAULT_RESCAN_INTERVAL_DAYS: i64 = 60;
const DEFAULT_TABLE_DISCOVERY_INTERVAL_SECS: u64 = 600;
const DEFAULT_TAGS_DISCOVERY_INTERVAL_SECS: u64 = 60;
const DEFAULT_SELECTION_INTERVAL_SECS: u64 = 1;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 180;
const MIN_REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 180;

/// Where scan records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordBackend {
    /// SQLite table; discovery registers records and a selection loop scans them.
    Table,
    /// `last_scan_timestamp` tag on each object; discovery scans inline.
    Tags,
}

/// Connection settings for the bucket being scanned.
#[derive(Clone)]
pub struct S3Config {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
    pub bucket: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Where and how files are submitted for scanning.
#[derive(Debug, Clone)]
pub struct ScanEndpointConfig {
    pub url: String,
    pub request_timeout: Duration,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub record_backend: RecordBackend,
    pub s3: S3Config,
    pub object_prefix: String,
    pub scan_endpoint: ScanEndpointConfig,
    pub rescan_interval: TimeDelta,
    pub discovery_interval: Duration,
    pub selection_interval: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Periodic antivirus scanning of bucket objects")]
pub struct Args {
    /// Host to bind the health endpoint to (overrides SCANNER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind the health endpoint to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL for scan records (overrides SCANNER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Scan record storage (overrides SCANNER_RECORD_BACKEND)
    #[arg(long, value_enum)]
    pub record_backend: Option<RecordBackend>,

    /// S3 region (overrides AWS_S3_REGION_NAME)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// S3 access key id (overrides AWS_S3_ACCESS_KEY_ID)
    #[arg(long)]
    pub s3_access_key_id: Option<String>,

    /// S3 secret access key (overrides AWS_S3_SECRET_ACCESS_KEY)
    #[arg(long)]
    pub s3_secret_access_key: Option<String>,

    /// Custom S3 endpoint URL (overrides AWS_S3_ENDPOINT_URL)
    #[arg(long)]
    pub s3_endpoint_url: Option<String>,

    /// Bucket to scan (overrides AWS_S3_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Only objects under this key prefix are scanned (overrides SCANNER_OBJECT_PREFIX)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Scan endpoint URL (overrides CLAMAV_ENDPOINT_URL)
    #[arg(long)]
    pub scan_endpoint_url: Option<String>,

    /// Days after which a scanned object is scanned again (overrides SCANNER_RESCAN_INTERVAL_DAYS)
    #[arg(long)]
    pub rescan_interval_days: Option<i64>,

    /// Pause between discovery passes (overrides SCANNER_DISCOVERY_INTERVAL_SECS)
    #[arg(long)]
    pub discovery_interval_secs: Option<u64>,

    /// Pause between selections (overrides SCANNER_SELECTION_INTERVAL_SECS)
    #[arg(long)]
    pub selection_interval_secs: Option<u64>,

    /// Scan request timeout, 30 to 180 seconds (overrides SCANNER_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge parsed arguments with values from `lookup`.
    ///
    /// Arguments win over the environment, the environment wins over defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<(Self, bool)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let record_backend = match args.record_backend {
            Some(backend) => backend,
            None => match lookup("SCANNER_RECORD_BACKEND") {
                Some(value) => <RecordBackend as ValueEnum>::from_str(&value, true)
                    .map_err(anyhow::Error::msg)
                    .with_context(|| {
                        format!("parsing SCANNER_RECORD_BACKEND value `{}`", value)
                    })?,
                None => RecordBackend::Table,
            },
        };

        let default_discovery_secs = match record_backend {
            RecordBackend::Table => DEFAULT_TABLE_DISCOVERY_INTERVAL_SECS,
            RecordBackend::Tags => DEFAULT_TAGS_DISCOVERY_INTERVAL_SECS,
        };

        let rescan_days = pick(
            args.rescan_interval_days,
            &lookup,
            "SCANNER_RESCAN_INTERVAL_DAYS",
            DEFAULT_RESCAN_INTERVAL_DAYS,
        )?;
        if rescan_days <= 0 {
            bail!("rescan interval must be at least one day, got {}", rescan_days);
        }
        let rescan_interval = TimeDelta::try_days(rescan_days)
            .with_context(|| format!("rescan interval of {} days is out of range", rescan_days))?;

        let discovery_secs = pick(
            args.discovery_interval_secs,
            &lookup,
            "SCANNER_DISCOVERY_INTERVAL_SECS",
            default_discovery_secs,
        )?;
        if discovery_secs == 0 {
            bail!("discovery interval must be non-zero");
        }

        let selection_secs = pick(
            args.selection_interval_secs,
            &lookup,
            "SCANNER_SELECTION_INTERVAL_SECS",
            DEFAULT_SELECTION_INTERVAL_SECS,
        )?;
        if selection_secs == 0 {
            bail!("selection interval must be non-zero");
        }

        let timeout_secs = pick(
            args.request_timeout_secs,
            &lookup,
            "SCANNER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        if !(MIN_REQUEST_TIMEOUT_SECS..=MAX_REQUEST_TIMEOUT_SECS).contains(&timeout_secs) {
            bail!(
                "request timeout must be between {} and {} seconds, got {}",
                MIN_REQUEST_TIMEOUT_SECS,
                MAX_REQUEST_TIMEOUT_SECS,
                timeout_secs
            );
        }

        let s3 = S3Config {
            region: require(args.s3_region, &lookup, "AWS_S3_REGION_NAME", "--s3-region")?,
            access_key_id: require(
                args.s3_access_key_id,
                &lookup,
                "AWS_S3_ACCESS_KEY_ID",
                "--s3-access-key-id",
            )?,
            secret_access_key: require(
                args.s3_secret_access_key,
                &lookup,
                "AWS_S3_SECRET_ACCESS_KEY",
                "--s3-secret-access-key",
            )?,
            endpoint_url: args
                .s3_endpoint_url
                .or_else(|| lookup("AWS_S3_ENDPOINT_URL"))
                .filter(|url| !url.trim().is_empty()),
            bucket: require(args.bucket, &lookup, "AWS_S3_BUCKET", "--bucket")?,
        };

        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("SCANNER_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &lookup, "PORT", 8080)?,
            database_url: args
                .database_url
                .or_else(|| lookup("SCANNER_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/scan_records.db".into()),
            record_backend,
            s3,
            object_prefix: args
                .prefix
                .or_else(|| lookup("SCANNER_OBJECT_PREFIX"))
                .unwrap_or_else(|| DEFAULT_PREFIX.into()),
            scan_endpoint: ScanEndpointConfig {
                url: require(
                    args.scan_endpoint_url,
                    &lookup,
                    "CLAMAV_ENDPOINT_URL",
                    "--scan-endpoint-url",
                )?,
                request_timeout: Duration::from_secs(timeout_secs),
            },
            rescan_interval,
            discovery_interval: Duration::from_secs(discovery_secs),
            selection_interval: Duration::from_secs(selection_secs),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value, else parsed environment value, else `default`.
fn pick<T, F>(arg: Option<T>, lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = arg {
        return Ok(value);
    }
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, raw)),
        None => Ok(default),
    }
}

fn require<F>(arg: Option<String>, lookup: &F, name: &str, flag: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    arg.or_else(|| lookup(name))
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("missing required setting: pass {} or set {}", flag, name))
}
