use rust_decimal::Decimal;
use shared::models::CallPriority;
use std::time::Duration;

/// What happens to pending carts when a session closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Pending orders are cancelled with the session
    CancelPending,
    /// Pending orders stay pending for billing reconciliation
    PreserveForBilling,
}

impl ClosePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cancel_pending" => Some(Self::CancelPending),
            "preserve_for_billing" => Some(Self::PreserveForBilling),
            _ => None,
        }
    }
}

/// Domain policy shared by the store, aggregator and call coordinator
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Tax rate as a percentage of the subtotal (10 = 10%)
    pub tax_rate_percent: Decimal,
    /// Upper bound for a single line's quantity
    pub max_line_quantity: i32,
    /// Character limit for line notes and call messages
    pub max_note_chars: usize,
    /// Whimsical-name draws before falling back to a numeric suffix
    pub name_generation_attempts: u32,
    /// Close the session once the last participant leaves
    pub auto_close_on_empty: bool,
    pub close_policy: ClosePolicy,
    pub bill_call_priority: CallPriority,
    /// Catalog lookup attempts (first try included)
    pub catalog_max_attempts: u32,
    /// Base backoff between catalog attempts, doubled each retry
    pub catalog_backoff: Duration,
    /// Recorded command responses kept for redelivery detection
    pub command_cache_capacity: usize,
    /// Age after which a recorded response may be dropped
    pub command_cache_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            tax_rate_percent: Decimal::TEN,
            max_line_quantity: 99,
            max_note_chars: 200,
            name_generation_attempts: 8,
            auto_close_on_empty: false,
            close_policy: ClosePolicy::CancelPending,
            bill_call_priority: CallPriority::Medium,
            catalog_max_attempts: 3,
            catalog_backoff: Duration::from_millis(50),
            command_cache_capacity: 10_000,
            command_cache_ttl: Duration::from_secs(600),
        }
    }
}

/// Core configuration - 环境变量配置
///
/// Every field can be overridden from the environment; 未设置或无法解析时使用默认值。
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | WORK_DIR | /var/lib/crab/tables | redb file and logs |
/// | ENVIRONMENT | development | development / staging / production |
/// | LOG_LEVEL | info | tracing filter |
/// | TAX_RATE_PERCENT | 10 | tax on order subtotals |
/// | MAX_LINE_QUANTITY | 99 | per-line quantity cap |
/// | MAX_NOTE_CHARS | 200 | note / message length limit |
/// | NAME_GENERATION_ATTEMPTS | 8 | name retries before numeric suffix |
/// | AUTO_CLOSE_ON_EMPTY | false | close when the last diner leaves |
/// | CLOSE_POLICY | cancel_pending | or preserve_for_billing |
/// | BILL_CALL_PRIORITY | medium | low / medium / high |
/// | CATALOG_MAX_ATTEMPTS | 3 | catalog lookup attempts |
/// | CATALOG_BACKOFF_MS | 50 | base retry backoff |
/// | COMMAND_CACHE_CAPACITY | 10000 | recorded command responses |
/// | COMMAND_CACHE_TTL_SECS | 600 | age before a response may be dropped |
/// | EVENT_CHANNEL_CAPACITY | 1024 | per-topic broadcast buffer |
///
/// ```ignore
/// WORK_DIR=/data/tables TAX_RATE_PERCENT=21 my-gateway
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: String,
    /// development | staging | production
    pub environment: String,
    pub log_level: String,
    pub event_channel_capacity: usize,
    pub policy: SessionPolicy,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load `.env` (if any) and then read the environment
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self::from_env()
    }

    /// Read configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = SessionPolicy::default();
        let policy = SessionPolicy {
            tax_rate_percent: env_parse("TAX_RATE_PERCENT").unwrap_or(defaults.tax_rate_percent),
            max_line_quantity: env_parse("MAX_LINE_QUANTITY")
                .unwrap_or(defaults.max_line_quantity),
            max_note_chars: env_parse("MAX_NOTE_CHARS").unwrap_or(defaults.max_note_chars),
            name_generation_attempts: env_parse("NAME_GENERATION_ATTEMPTS")
                .unwrap_or(defaults.name_generation_attempts),
            auto_close_on_empty: env_parse("AUTO_CLOSE_ON_EMPTY")
                .unwrap_or(defaults.auto_close_on_empty),
            close_policy: std::env::var("CLOSE_POLICY")
                .ok()
                .and_then(|v| ClosePolicy::parse(&v))
                .unwrap_or(defaults.close_policy),
            bill_call_priority: std::env::var("BILL_CALL_PRIORITY")
                .ok()
                .and_then(|v| CallPriority::parse(&v))
                .unwrap_or(defaults.bill_call_priority),
            catalog_max_attempts: env_parse::<u32>("CATALOG_MAX_ATTEMPTS")
                .unwrap_or(defaults.catalog_max_attempts)
                .max(1),
            catalog_backoff: env_parse("CATALOG_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.catalog_backoff),
            command_cache_capacity: env_parse::<usize>("COMMAND_CACHE_CAPACITY")
                .unwrap_or(defaults.command_cache_capacity)
                .max(1),
            command_cache_ttl: env_parse("COMMAND_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.command_cache_ttl),
        };

        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/crab/tables".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            event_channel_capacity: env_parse("EVENT_CHANNEL_CAPACITY").unwrap_or(1024),
            policy,
        }
    }

    /// Configuration rooted at `work_dir`, everything else from the environment
    ///
    /// Used by tests and embedding services.
    pub fn with_work_dir(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config
    }

    /// Path of the redb database file
    pub fn database_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.work_dir).join("sessions.redb")
    }

    pub fn log_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.work_dir).join("logs")
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
