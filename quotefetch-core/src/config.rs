//! Market configs (JSON) and run settings (TOML).

use crate::data::{DataSource, FetchRequest, HttpOptions};
use crate::fetch::RetryPolicy;
use crate::output::SaveFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid market config JSON: {0}")]
    MarketJson(#[from] serde_json::Error),

    #[error("invalid settings TOML: {0}")]
    SettingsToml(#[from] toml::de::Error),

    #[error("code list '{file_name}' not found in any of: {searched}")]
    CodeFileNotFound { file_name: String, searched: String },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Directory label used for deal-detail output in place of an interval.
pub const DEALS_LABEL: &str = "deals";

fn default_max_count() -> u64 {
    1_000_000
}

fn default_source() -> DataSource {
    DataSource::Yahoo
}

/// One data source entry of the markets file.
///
/// ```json
/// {"id": 1, "market": "us", "file_name": "us.txt",
///  "interval": "1d", "period": "max", "save_format": "csv"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: i64,
    pub market: String,
    pub file_name: String,
    pub interval: String,
    pub period: String,
    pub save_format: SaveFormat,
    #[serde(default = "default_source")]
    pub source: DataSource,
    #[serde(default = "default_max_count")]
    pub max_count: u64,
}

impl MarketConfig {
    /// The provider request this market issues for every code.
    pub fn request(&self) -> FetchRequest {
        match self.source {
            DataSource::Yahoo => FetchRequest::History {
                period: self.period.clone(),
                interval: self.interval.clone(),
            },
            DataSource::EastmoneyDeals => FetchRequest::DealDetail {
                max_count: self.max_count,
            },
        }
    }

    /// Directory level under the market: the bar interval, or `deals` for
    /// tick-level deal detail.
    pub fn output_label(&self) -> &str {
        match self.source {
            DataSource::Yahoo => &self.interval,
            DataSource::EastmoneyDeals => DEALS_LABEL,
        }
    }
}

/// Parse a JSON array of market configs, sorted by `id` (stable for ties).
pub fn parse_market_configs(content: &str) -> Result<Vec<MarketConfig>, ConfigError> {
    let mut markets: Vec<MarketConfig> = serde_json::from_str(content)?;
    markets.sort_by_key(|m| m.id);
    Ok(markets)
}

pub fn load_market_configs(path: &Path) -> Result<Vec<MarketConfig>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_market_configs(&content)
}

/// Run-wide settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Root of the output tree: `{data_root}/{market}/{interval}/{date}/`.
    pub data_root: PathBuf,
    /// Directories searched, in order, for code-list files.
    pub code_dirs: Vec<PathBuf>,
    /// Pause between markets.
    pub market_delay_secs: u64,
    /// Fetch attempts per instrument.
    pub attempts: u32,
    /// Pause between attempts for the same instrument.
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            code_dirs: vec![PathBuf::from("."), PathBuf::from("yfcode-list")],
            market_delay_secs: 5,
            attempts: 1,
            retry_delay_secs: 0,
            timeout_secs: 30,
            user_agent: crate::data::provider::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl RunSettings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts == 0 {
            return Err(ConfigError::Invalid("attempts must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn market_delay(&self) -> Duration {
        Duration::from_secs(self.market_delay_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts).with_delay(Duration::from_secs(self.retry_delay_secs))
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKETS: &str = r#"[
        {"id": 3, "market": "hk", "file_name": "hk.txt", "interval": "1d", "period": "1y", "save_format": "csv"},
        {"id": 1, "market": "us", "file_name": "us.txt", "interval": "1m", "period": "max", "save_format": "csv"},
        {"id": 2, "market": "cn-futures", "file_name": "futures.txt", "interval": "deals", "period": "1d",
         "save_format": "xlsx", "source": "eastmoney_deals", "max_count": 5000}
    ]"#;

    #[test]
    fn markets_sorted_by_id() {
        let markets = parse_market_configs(MARKETS).unwrap();
        let ids: Vec<i64> = markets.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(markets[0].market, "us");
    }

    #[test]
    fn source_and_max_count_default() {
        let markets = parse_market_configs(MARKETS).unwrap();
        assert_eq!(markets[0].source, DataSource::Yahoo);
        assert_eq!(markets[0].max_count, 1_000_000);
        assert_eq!(
            markets[0].request(),
            FetchRequest::History {
                period: "max".into(),
                interval: "1m".into()
            }
        );
        assert_eq!(
            markets[1].request(),
            FetchRequest::DealDetail { max_count: 5000 }
        );
    }

    #[test]
    fn deal_markets_use_deals_label() {
        let markets = parse_market_configs(MARKETS).unwrap();
        assert_eq!(markets[0].output_label(), "1m");
        assert_eq!(markets[1].output_label(), DEALS_LABEL);
    }

    #[test]
    fn equal_ids_keep_file_order() {
        let tied = r#"[
            {"id": 2, "market": "b", "file_name": "b.txt", "interval": "1d", "period": "1y", "save_format": "csv"},
            {"id": 1, "market": "a", "file_name": "a.txt", "interval": "1d", "period": "1y", "save_format": "csv"},
            {"id": 2, "market": "c", "file_name": "c.txt", "interval": "1d", "period": "1y", "save_format": "csv"},
            {"id": 2, "market": "d", "file_name": "d.txt", "interval": "1d", "period": "1y", "save_format": "csv"}
        ]"#;
        let names: Vec<String> = parse_market_configs(tied)
            .unwrap()
            .into_iter()
            .map(|m| m.market)
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn save_format_is_case_insensitive_in_json() {
        let upper = r#"[{"id": 1, "market": "us", "file_name": "a", "interval": "1d", "period": "1y", "save_format": "CSV"}]"#;
        assert_eq!(parse_market_configs(upper).unwrap()[0].save_format, SaveFormat::Csv);
    }

    #[test]
    fn retry_delay_flows_into_policy() {
        let s = RunSettings::from_toml("attempts = 3\nretry_delay_secs = 2").unwrap();
        assert_eq!(
            s.retry_policy(),
            RetryPolicy::new(3).with_delay(Duration::from_secs(2))
        );
        assert_eq!(RunSettings::default().retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn unknown_save_format_rejected() {
        let bad = r#"[{"id": 1, "market": "us", "file_name": "a", "interval": "1d", "period": "1y", "save_format": "json"}]"#;
        assert!(matches!(
            parse_market_configs(bad),
            Err(ConfigError::MarketJson(_))
        ));
    }

    #[test]
    fn empty_settings_use_defaults() {
        let s = RunSettings::from_toml("").unwrap();
        assert_eq!(s, RunSettings::default());
        assert_eq!(s.attempts, 1);
        assert_eq!(s.market_delay(), Duration::from_secs(5));
    }

    #[test]
    fn settings_override_and_validate() {
        let s = RunSettings::from_toml("data_root = \"/tmp/q\"\nmarket_delay_secs = 0").unwrap();
        assert_eq!(s.data_root, PathBuf::from("/tmp/q"));
        assert_eq!(s.market_delay_secs, 0);

        assert!(matches!(
            RunSettings::from_toml("attempts = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
