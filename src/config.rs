use anyhow::{Context, Result};
use arxiu_core::ingest::parse_separator;
use arxiu_core::models::ModerationStatus;
use arxiu_core::search::SearchWeights;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub achievements: AchievementsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_separator")]
    pub default_separator: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_status")]
    pub default_status: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_separator: default_separator(),
            max_upload_bytes: default_max_upload_bytes(),
            default_status: default_status(),
        }
    }
}

fn default_separator() -> String {
    ";".to_string()
}
fn default_max_upload_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_status() -> String {
    "pending".to_string()
}

impl ImportConfig {
    pub fn separator(&self) -> u8 {
        parse_separator(&self.default_separator).unwrap_or(b';')
    }

    pub fn status(&self) -> ModerationStatus {
        self.default_status.parse().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default)]
    pub weights: WeightsConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
            weights: WeightsConfig::default(),
        }
    }
}

fn default_final_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeightsConfig {
    #[serde(default = "default_exact_full")]
    pub exact_full: f64,
    #[serde(default = "default_surname_variant")]
    pub surname_variant: f64,
    #[serde(default = "default_partial_tokens")]
    pub partial_tokens: f64,
    #[serde(default = "default_phonetic")]
    pub phonetic: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            exact_full: default_exact_full(),
            surname_variant: default_surname_variant(),
            partial_tokens: default_partial_tokens(),
            phonetic: default_phonetic(),
        }
    }
}

fn default_exact_full() -> f64 {
    0.4
}
fn default_surname_variant() -> f64 {
    0.3
}
fn default_partial_tokens() -> f64 {
    0.2
}
fn default_phonetic() -> f64 {
    0.1
}

impl WeightsConfig {
    pub fn to_weights(&self) -> SearchWeights {
        SearchWeights {
            exact_full: self.exact_full,
            surname_variant: self.surname_variant,
            partial_tokens: self.partial_tokens,
            phonetic: self.phonetic,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AchievementsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AchievementsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate import
    if parse_separator(&config.import.default_separator).is_none() {
        anyhow::bail!(
            "import.default_separator must be one of , ; | \\t (got '{}')",
            config.import.default_separator
        );
    }
    if config.import.max_upload_bytes == 0 {
        anyhow::bail!("import.max_upload_bytes must be > 0");
    }
    if let Err(e) = config.import.default_status.parse::<ModerationStatus>() {
        anyhow::bail!("import.default_status: {}", e);
    }

    // Validate search
    if config.search.final_limit < 1 {
        anyhow::bail!("search.final_limit must be >= 1");
    }
    let w = &config.search.weights;
    for (name, value) in [
        ("exact_full", w.exact_full),
        ("surname_variant", w.surname_variant),
        ("partial_tokens", w.partial_tokens),
        ("phonetic", w.phonetic),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("search.weights.{} must be in [0.0, 1.0]", name);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_defaults_apply() {
        let f = write("[db]\npath = \"./data/arxiu.sqlite\"\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.import.separator(), b';');
        assert_eq!(config.import.status(), ModerationStatus::Pending);
        assert_eq!(config.search.final_limit, 20);
        assert_eq!(config.search.weights.to_weights(), SearchWeights::default());
        assert!(config.achievements.enabled);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_rejects_bad_values() {
        let f = write("[db]\npath = \"x\"\n[import]\ndefault_separator = \"#\"\n");
        assert!(load_config(f.path()).is_err());
        let f = write("[db]\npath = \"x\"\n[search.weights]\nphonetic = 1.5\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("search.weights.phonetic"));
        let f = write("[db]\npath = \"x\"\n[import]\ndefault_status = \"lost\"\n");
        assert!(load_config(f.path()).is_err());
    }
}
