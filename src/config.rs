//! Configuration loader and validator for the gallery migration.
use chrono::{FixedOffset, Offset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Upper bound for the pause between batch steps (one year).
pub const MAX_BATCH_DELAY_SECONDS: u64 = 31_536_000;

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").unwrap());

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub migration: Migration,
    pub taxonomy: TaxonomySettings,
    pub site: Site,
}

/// Host process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
}

/// What happens to a source record once it has been converted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceDisposition {
    /// Leave the source untouched; the published count never drops.
    #[default]
    Keep,
    /// Move the source to draft so the published count drops.
    Unpublish,
}

/// Batch migration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Migration {
    pub source_type: String,
    pub target_type: String,
    pub gallery_meta_key: String,
    pub batch_size: u32,
    pub batch_delay_seconds: u64,
    pub hook: String,
    #[serde(default)]
    pub source_disposition: SourceDisposition,
}

/// Destination term and default-category lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaxonomySettings {
    pub destination_name: String,
    pub destination_slug: String,
    pub default_category_slug: String,
}

/// Site-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Site {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}/{}", home.trim_end_matches('/'), rest);
            }
        }
        self.data_dir.clone()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate configuration from YAML text.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    let m = &cfg.migration;
    if m.source_type.trim().is_empty() {
        return Err(ConfigError::Invalid("migration.source_type must be non-empty"));
    }
    if m.target_type.trim().is_empty() {
        return Err(ConfigError::Invalid("migration.target_type must be non-empty"));
    }
    if m.source_type == m.target_type {
        return Err(ConfigError::Invalid(
            "migration.source_type and migration.target_type must differ",
        ));
    }
    if m.gallery_meta_key.trim().is_empty() {
        return Err(ConfigError::Invalid("migration.gallery_meta_key must be non-empty"));
    }
    if m.batch_size == 0 {
        return Err(ConfigError::Invalid("migration.batch_size must be > 0"));
    }
    if m.batch_delay_seconds > MAX_BATCH_DELAY_SECONDS {
        return Err(ConfigError::Invalid(
            "migration.batch_delay_seconds must be at most one year",
        ));
    }
    if m.hook.trim().is_empty() {
        return Err(ConfigError::Invalid("migration.hook must be non-empty"));
    }

    let t = &cfg.taxonomy;
    if t.destination_name.trim().is_empty() {
        return Err(ConfigError::Invalid("taxonomy.destination_name must be non-empty"));
    }
    if !SLUG_RE.is_match(&t.destination_slug) {
        return Err(ConfigError::Invalid(
            "taxonomy.destination_slug must be a lowercase slug",
        ));
    }
    if !SLUG_RE.is_match(&t.default_category_slug) {
        return Err(ConfigError::Invalid(
            "taxonomy.default_category_slug must be a lowercase slug",
        ));
    }
    if t.destination_slug == t.default_category_slug {
        return Err(ConfigError::Invalid(
            "taxonomy.destination_slug must differ from taxonomy.default_category_slug",
        ));
    }

    if cfg.site.utc_offset_minutes.abs() >= 1440 {
        return Err(ConfigError::Invalid("site.utc_offset_minutes must be within ±1439"));
    }

    Ok(())
}

/// Returns the canonical example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 1000

migration:
  source_type: "gallery"
  target_type: "post"
  gallery_meta_key: "_post_image_gallery"
  batch_size: 30
  batch_delay_seconds: 60
  hook: "gallery_migration_batch"
  source_disposition: "keep"

taxonomy:
  destination_name: "Gallery"
  destination_slug: "gallery"
  default_category_slug: "uncategorized"

site:
  utc_offset_minutes: 0
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = parse(example()).unwrap();
        assert_eq!(cfg.migration.batch_size, 30);
        assert_eq!(cfg.migration.batch_delay_seconds, 60);
        assert_eq!(cfg.migration.source_disposition, SourceDisposition::Keep);
    }

    #[test]
    fn disposition_defaults_to_keep() {
        let yaml = example().replace("  source_disposition: \"keep\"\n", "");
        let cfg = parse(&yaml).unwrap();
        assert_eq!(cfg.migration.source_disposition, SourceDisposition::Keep);

        let yaml = example().replace("\"keep\"", "\"unpublish\"");
        let cfg = parse(&yaml).unwrap();
        assert_eq!(cfg.migration.source_disposition, SourceDisposition::Unpublish);
    }

    #[test]
    fn invalid_batch_size() {
        let mut cfg = example_cfg();
        cfg.migration.batch_size = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("batch_size")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_types() {
        let mut cfg = example_cfg();
        cfg.migration.target_type = "gallery".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.migration.source_type = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("source_type")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_slugs() {
        let mut cfg = example_cfg();
        cfg.taxonomy.destination_slug = "Gallery Posts".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("destination_slug")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.taxonomy.default_category_slug = "gallery".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn site_offset() {
        let mut cfg = example_cfg();
        cfg.site.utc_offset_minutes = -300;
        assert_eq!(cfg.site.offset().local_minus_utc(), -300 * 60);

        cfg.site.utc_offset_minutes = 2000;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.taxonomy.destination_slug, "gallery");
        assert_eq!(cfg.migration.hook, "gallery_migration_batch");
    }
}
