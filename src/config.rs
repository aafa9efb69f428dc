// ⚙️ Configuration - environment first, JSON file as base
//
// Resolution order (later wins):
//   1. built-in defaults
//   2. JSON file named by GEO_CONFIG_FILE
//   3. environment variables (a .env file is loaded first when present)
//
// Nothing here is a CLI flag: ceilings, thresholds and filters must be
// adjustable without touching code or the invocation.

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places";
pub const DEFAULT_MONTHLY_CEILING: i64 = 100_000;
pub const DEFAULT_STALENESS_DAYS: i64 = 10;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DATABASE: &str = "geo_reconcile.db";

// ============================================================================
// ADDRESS FIELDS
// ============================================================================

/// One fragment of a customer's free-text address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressField {
    Street,
    Municipality,
    State,
    District,
}

impl AddressField {
    pub fn default_order() -> Vec<AddressField> {
        vec![
            AddressField::Street,
            AddressField::Municipality,
            AddressField::State,
            AddressField::District,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressField::Street => "street",
            AddressField::Municipality => "municipality",
            AddressField::State => "state",
            AddressField::District => "district",
        }
    }
}

impl FromStr for AddressField {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "street" => Ok(AddressField::Street),
            "municipality" | "city" => Ok(AddressField::Municipality),
            "state" => Ok(AddressField::State),
            "district" | "neighborhood" => Ok(AddressField::District),
            other => Err(ReconcileError::config(format!(
                "unknown address field '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TABLE NAMES
// ============================================================================

/// Table qualifiers; the same engine runs against differently named tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub customers: String,
    pub enrichment: String,
    pub quota: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            customers: "customers".to_string(),
            enrichment: "geo_clients".to_string(),
            quota: "geo_api_quota".to_string(),
        }
    }
}

impl TableNames {
    /// Table names are interpolated into SQL, so only plain identifiers pass
    pub fn validate(&self) -> Result<()> {
        for name in [&self.customers, &self.enrichment, &self.quota] {
            if !is_sql_identifier(name) {
                return Err(ReconcileError::config(format!(
                    "invalid table name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// CONFIG FILE (all fields optional)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub database: Option<PathBuf>,
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub monthly_ceiling: Option<i64>,
    pub staleness_days: Option<i64>,
    pub address_fields: Option<Vec<AddressField>>,
    pub status_whitelist: Option<Vec<String>>,
    pub regions: Option<Vec<String>>,
    pub id_prefixes: Option<Vec<String>>,
    pub tables: Option<TableNames>,
}

impl ConfigFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ReconcileError::config(format!(
                "failed to read config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| ReconcileError::config(format!("failed to parse config file: {}", e)))
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub database: PathBuf,
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub http_timeout: Duration,
    pub monthly_ceiling: i64,
    pub staleness_days: i64,
    pub address_fields: Vec<AddressField>,
    pub status_whitelist: Vec<String>,
    pub regions: Vec<String>,
    pub id_prefixes: Vec<String>,
    pub tables: TableNames,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: PathBuf::from(DEFAULT_DATABASE),
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            monthly_ceiling: DEFAULT_MONTHLY_CEILING,
            staleness_days: DEFAULT_STALENESS_DAYS,
            address_fields: AddressField::default_order(),
            status_whitelist: Vec::new(),
            regions: Vec::new(),
            id_prefixes: Vec::new(),
            tables: TableNames::default(),
        }
    }
}

impl Config {
    /// Load from `.env`, the optional JSON file and the process environment
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let file = match std::env::var("GEO_CONFIG_FILE") {
            Ok(path) if !path.trim().is_empty() => Some(ConfigFile::from_file(path.trim())?),
            _ => None,
        };

        Config::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge defaults, file values and a key lookup (normally the environment)
    pub fn resolve<F>(file: Option<ConfigFile>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(file) = file {
            config.apply_file(file);
        }

        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = env("GEO_DATABASE") {
            config.database = PathBuf::from(v.trim());
        }
        if let Some(v) = env("MAP_API_KEY") {
            config.api_key = Some(v.trim().to_string());
        }
        if let Some(v) = env("GEO_API_BASE_URL") {
            config.api_base_url = v.trim().to_string();
        }
        if let Some(v) = env("GEO_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(parse_number("GEO_HTTP_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = env("GEO_MONTHLY_CEILING") {
            config.monthly_ceiling = parse_number("GEO_MONTHLY_CEILING", &v)?;
        }
        if let Some(v) = env("GEO_STALENESS_DAYS") {
            config.staleness_days = parse_number("GEO_STALENESS_DAYS", &v)?;
        }
        if let Some(v) = env("GEO_ADDRESS_FIELDS") {
            config.address_fields = split_list(&v)
                .iter()
                .map(|f| f.parse())
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(v) = env("GEO_STATUS_WHITELIST") {
            config.status_whitelist = split_list(&v);
        }
        if let Some(v) = env("GEO_REGIONS") {
            config.regions = split_list(&v);
        }
        if let Some(v) = env("GEO_ID_PREFIXES") {
            config.id_prefixes = split_list(&v);
        }
        if let Some(v) = env("GEO_CUSTOMER_TABLE") {
            config.tables.customers = v.trim().to_string();
        }
        if let Some(v) = env("GEO_ENRICHMENT_TABLE") {
            config.tables.enrichment = v.trim().to_string();
        }
        if let Some(v) = env("GEO_QUOTA_TABLE") {
            config.tables.quota = v.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.database {
            self.database = v;
        }
        if let Some(v) = file.api_key {
            self.api_key = Some(v);
        }
        if let Some(v) = file.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file.http_timeout_secs {
            self.http_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.monthly_ceiling {
            self.monthly_ceiling = v;
        }
        if let Some(v) = file.staleness_days {
            self.staleness_days = v;
        }
        if let Some(v) = file.address_fields {
            self.address_fields = v;
        }
        if let Some(v) = file.status_whitelist {
            self.status_whitelist = v;
        }
        if let Some(v) = file.regions {
            self.regions = v;
        }
        if let Some(v) = file.id_prefixes {
            self.id_prefixes = v;
        }
        if let Some(v) = file.tables {
            self.tables = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.monthly_ceiling <= 0 {
            return Err(ReconcileError::config("monthly ceiling must be positive"));
        }
        if self.staleness_days < 0 {
            return Err(ReconcileError::config("staleness threshold cannot be negative"));
        }
        if self.http_timeout.is_zero() {
            return Err(ReconcileError::config("HTTP timeout must be positive"));
        }
        if self.address_fields.is_empty() {
            return Err(ReconcileError::config("at least one address field is required"));
        }
        self.tables.validate()
    }

    /// The geocoding credential is only needed by the run command
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ReconcileError::config("MAP_API_KEY is not set"))
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ReconcileError::config(format!("{} must be a number, got '{}'", key, value)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
