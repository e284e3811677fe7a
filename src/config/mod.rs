//! Configuration management for the mining client

use crate::error::{Error, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(
    name = "challenge-mining-client",
    about = "Proof-of-work mining client for a challenge/response network",
    version,
    author
)]
pub struct Args {
    /// Configuration file in YAML, JSON or TOML format
    #[clap(
        long = "config-file",
        value_name = "FILE",
        help = "Configuration file in YAML, JSON or TOML format. If more than a single config file option is present files are loaded in the order in which they appear on the command line."
    )]
    pub config_file: Vec<PathBuf>,

    /// Print the parsed configuration to standard out and exit
    #[clap(
        long = "print-config",
        help = "Print the parsed configuration to standard out and exit"
    )]
    pub print_config: bool,

    /// Base URL of the challenge network node
    #[clap(
        short = 'n',
        long = "node",
        value_name = "DOMAIN:PORT",
        help = "node to which to connect"
    )]
    pub node: Option<String>,

    /// Use TLS to connect to the node
    #[clap(short = 't', long = "tls", help = "use TLS to connect to node")]
    pub tls: bool,

    /// Unset flag tls
    #[clap(long = "no-tls", help = "unset flag tls")]
    pub no_tls: bool,

    /// Accept self-signed TLS certificates
    #[clap(
        short = 'x',
        long = "insecure",
        help = "accept self-signed TLS certificates"
    )]
    pub insecure: bool,

    /// Unset flag insecure
    #[clap(long = "no-insecure", help = "unset flag insecure")]
    pub no_insecure: bool,

    /// Wallet manifest with the ready list of signing-capable addresses
    #[clap(
        long = "wallet-file",
        value_name = "FILE",
        help = "JSON manifest with the derived addresses and their registration signatures"
    )]
    pub wallet_file: Option<PathBuf>,

    /// Number of parallel hashing workers per cohort
    #[clap(
        short = 'c',
        long = "worker-threads",
        help = "number of parallel hashing workers per cohort (1-32)"
    )]
    pub worker_threads: Option<usize>,

    /// Preimages per hash-engine batch
    #[clap(
        short = 'b',
        long = "batch-size",
        help = "preimages per hash-engine batch (50-1000)"
    )]
    pub batch_size: Option<usize>,

    /// Challenge poll cadence in milliseconds
    #[clap(
        long = "poll-interval-ms",
        help = "challenge poll cadence in milliseconds"
    )]
    pub poll_interval_ms: Option<u64>,

    /// Submission failures tolerated per address and challenge
    #[clap(
        long = "max-submission-failures",
        help = "submission failures tolerated per address and challenge before moving on"
    )]
    pub max_submission_failures: Option<u32>,

    /// One dev-fee solution per this many user solutions
    #[clap(
        long = "dev-fee-ratio",
        help = "one dev-fee solution per this many user solutions"
    )]
    pub dev_fee_ratio: Option<u32>,

    /// Disable the dev-fee obligation
    #[clap(long = "no-dev-fee", help = "disable the dev-fee obligation")]
    pub no_dev_fee: bool,

    /// Receipt log path
    #[clap(long = "receipt-log", value_name = "FILE", help = "receipt log path")]
    pub receipt_log: Option<PathBuf>,

    /// Error log path
    #[clap(long = "error-log", value_name = "FILE", help = "error log path")]
    pub error_log: Option<PathBuf>,

    /// Level at which log messages are written to the console
    #[clap(
        short = 'l',
        long = "log-level",
        value_name = "error|warn|info|debug",
        help = "Level at which log messages are written to the console"
    )]
    pub log_level: Option<String>,

    /// Log output format
    #[clap(
        long = "log-format",
        value_name = "plain|json",
        help = "log output format"
    )]
    pub log_format: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,

    /// Mining configuration
    #[serde(default)]
    pub mining: MiningConfig,

    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node URL
    pub url: String,

    /// Use TLS
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Allow insecure TLS connections
    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl NodeConfig {
    /// Merge another node config into this one
    fn merge(&mut self, other: NodeConfig) {
        if !other.url.is_empty() {
            self.url = other.url;
        }
        self.use_tls = other.use_tls;
        if other.insecure {
            self.insecure = other.insecure;
        }
        if other.timeout_secs != default_timeout() {
            self.timeout_secs = other.timeout_secs;
        }
    }
}

/// Mining configuration
///
/// Changes take effect on the next cohort restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Number of parallel hashing workers per cohort
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Preimages per hash-engine batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Challenge poll cadence in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Submission failures tolerated per address and challenge
    #[serde(default = "default_max_submission_failures")]
    pub max_submission_failures: u32,

    /// One dev-fee solution per this many user solutions
    #[serde(default = "default_dev_fee_ratio")]
    pub dev_fee_ratio: u32,

    /// Whether the dev-fee obligation is enforced
    #[serde(default = "default_true")]
    pub dev_fee_enabled: bool,
}

impl MiningConfig {
    /// Merge another mining config into this one
    fn merge(&mut self, other: MiningConfig) {
        if other.worker_threads != default_worker_threads() {
            self.worker_threads = other.worker_threads;
        }
        if other.batch_size != default_batch_size() {
            self.batch_size = other.batch_size;
        }
        if other.poll_interval_ms != default_poll_interval_ms() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.max_submission_failures != default_max_submission_failures() {
            self.max_submission_failures = other.max_submission_failures;
        }
        if other.dev_fee_ratio != default_dev_fee_ratio() {
            self.dev_fee_ratio = other.dev_fee_ratio;
        }
        if !other.dev_fee_enabled {
            self.dev_fee_enabled = false;
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_submission_failures: default_max_submission_failures(),
            dev_fee_ratio: default_dev_fee_ratio(),
            dev_fee_enabled: true,
        }
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Receipt log path
    #[serde(default = "default_receipt_log")]
    pub receipt_log: PathBuf,

    /// Error log path
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,
}

impl StoreConfig {
    fn merge(&mut self, other: StoreConfig) {
        if other.receipt_log != default_receipt_log() {
            self.receipt_log = other.receipt_log;
        }
        if other.error_log != default_error_log() {
            self.error_log = other.error_log;
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            receipt_log: default_receipt_log(),
            error_log: default_error_log(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (plain, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log to file
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Merge another logging config into this one
    fn merge(&mut self, other: LoggingConfig) {
        if other.level != default_log_level() {
            self.level = other.level;
        }
        if other.format != default_log_format() {
            self.format = other.format;
        }
        if other.file.is_some() {
            self.file = other.file;
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_worker_threads() -> usize {
    11
}

fn default_batch_size() -> usize {
    300
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_submission_failures() -> u32 {
    6
}

fn default_dev_fee_ratio() -> u32 {
    17
}

fn default_receipt_log() -> PathBuf {
    PathBuf::from("receipts.jsonl")
}

fn default_error_log() -> PathBuf {
    PathBuf::from("errors.jsonl")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let path_str = path.to_string_lossy();

        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config_parse_error(path_str.clone(), format!("failed to read file: {}", e))
        })?;

        Self::from_contents(&contents, &path_str)
    }

    /// Parse configuration from contents with format detection
    pub fn from_contents(contents: &str, source: &str) -> Result<Self> {
        let format = if source.ends_with(".yaml") || source.ends_with(".yml") {
            "yaml"
        } else if source.ends_with(".json") {
            "json"
        } else if source.ends_with(".toml") {
            "toml"
        } else {
            Self::detect_format(contents)
        };

        let config: Config = match format {
            "yaml" => serde_yaml::from_str(contents).map_err(|e| {
                Error::config_parse_error(source, format!("YAML parse error: {}", e))
            })?,
            "json" => serde_json::from_str(contents).map_err(|e| {
                Error::config_parse_error(source, format!("JSON parse error: {}", e))
            })?,
            "toml" => toml::from_str(contents).map_err(|e| {
                Error::config_parse_error(source, format!("TOML parse error: {}", e))
            })?,
            _ => {
                return Err(Error::config(format!(
                    "Unknown config format for source: {}",
                    source
                )));
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Detect configuration format from content
    fn detect_format(contents: &str) -> &'static str {
        let trimmed = contents.trim();

        if trimmed.starts_with('{') {
            "json"
        } else if trimmed.contains('[') && trimmed.contains(']') && trimmed.contains('=') {
            "toml"
        } else if trimmed.contains('=') && trimmed.contains('"') {
            "toml"
        } else {
            "yaml"
        }
    }

    /// Create configuration from command-line arguments
    ///
    /// Config files are loaded in order (later files override earlier ones),
    /// then CLI flags override file values.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config: Option<Config> = None;
        for path in &args.config_file {
            let file_config = Self::from_file(path)?;
            config = Some(match config {
                None => file_config,
                Some(mut base) => {
                    base.merge(file_config);
                    base
                }
            });
        }

        let mut config = match config {
            Some(config) => config,
            None => {
                let node_url = args
                    .node
                    .clone()
                    .ok_or_else(|| Error::config("Node URL is required (use -n or --node)"))?;
                Config {
                    node: NodeConfig {
                        url: node_url,
                        use_tls: true,
                        insecure: false,
                        timeout_secs: default_timeout(),
                    },
                    mining: MiningConfig::default(),
                    store: StoreConfig::default(),
                    logging: LoggingConfig::default(),
                }
            }
        };

        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line arguments to existing config
    fn apply_args(&mut self, args: &Args) {
        if let Some(node) = &args.node {
            let use_tls = if args.no_tls {
                false
            } else if args.tls {
                true
            } else {
                node.starts_with("https://") || !node.starts_with("http://")
            };
            self.node.url = node
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string();
            self.node.use_tls = use_tls;
        } else if args.tls && !args.no_tls {
            self.node.use_tls = true;
        } else if args.no_tls {
            self.node.use_tls = false;
        }

        if args.insecure && !args.no_insecure {
            self.node.insecure = true;
        } else if args.no_insecure {
            self.node.insecure = false;
        }

        if let Some(worker_threads) = args.worker_threads {
            self.mining.worker_threads = worker_threads;
        }
        if let Some(batch_size) = args.batch_size {
            self.mining.batch_size = batch_size;
        }
        if let Some(poll_interval_ms) = args.poll_interval_ms {
            self.mining.poll_interval_ms = poll_interval_ms;
        }
        if let Some(max_failures) = args.max_submission_failures {
            self.mining.max_submission_failures = max_failures;
        }
        if let Some(ratio) = args.dev_fee_ratio {
            self.mining.dev_fee_ratio = ratio;
        }
        if args.no_dev_fee {
            self.mining.dev_fee_enabled = false;
        }

        if let Some(receipt_log) = &args.receipt_log {
            self.store.receipt_log = receipt_log.clone();
        }
        if let Some(error_log) = &args.error_log {
            self.store.error_log = error_log.clone();
        }

        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if let Some(log_format) = &args.log_format {
            self.logging.format = log_format.clone();
        }
    }

    /// Merge another config into this one
    ///
    /// Fields from 'other' will override fields in 'self' where they differ.
    pub fn merge(&mut self, other: Config) {
        self.node.merge(other.node);
        self.mining.merge(other.mining);
        self.store.merge(other.store);
        self.logging.merge(other.logging);
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node.url.is_empty() {
            return Err(Error::config_missing_field("node.url"));
        }

        if !(1..=32).contains(&self.mining.worker_threads) {
            return Err(Error::config_invalid_value(
                "mining.worker_threads",
                self.mining.worker_threads.to_string(),
                "value between 1 and 32",
            ));
        }

        if !(50..=1000).contains(&self.mining.batch_size) {
            return Err(Error::config_invalid_value(
                "mining.batch_size",
                self.mining.batch_size.to_string(),
                "value between 50 and 1000",
            ));
        }

        if self.mining.poll_interval_ms == 0 {
            return Err(Error::config_invalid_value(
                "mining.poll_interval_ms",
                "0",
                "positive number of milliseconds",
            ));
        }

        if self.mining.max_submission_failures == 0 {
            return Err(Error::config_invalid_value(
                "mining.max_submission_failures",
                "0",
                "positive failure cap",
            ));
        }

        if self.mining.dev_fee_ratio == 0 {
            return Err(Error::config_invalid_value(
                "mining.dev_fee_ratio",
                "0",
                "small positive integer",
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                url: "localhost:8080".to_string(),
                use_tls: false,
                insecure: false,
                timeout_secs: default_timeout(),
            },
            mining: MiningConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
