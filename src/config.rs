//! Worker configuration.
//!
//! Read from `synthmon.toml` (or the path given with `--config`), then
//! overridden by environment variables. Every key has a default, so an
//! empty file or a missing one yields a working configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [browser]
//! cache_browser = true
//! prefer_cached_browser = true
//! teardown_on_failure = true
//! firefox_headless = true
//! chrome_headless_mode = "legacy"
//! chrome_binary = "/opt/chrome-linux/chrome"
//! geckodriver_path = "geckodriver"
//! chromedriver_path = "chromedriver"
//! driver_startup_timeout_secs = 20
//!
//! [queue]
//! max_check_queue_time_secs = 120
//! dead_letter_wait_ms = 100
//!
//! [checks]
//! default_timeout_secs = 60
//! min_timeout_secs = 1
//! max_timeout_secs = 300
//! screenshot_on_failure_default = true
//!
//! [artifacts]
//! dir = "./artifacts"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "synthmon.toml";

/// How Chrome is told to run headless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromeHeadlessMode {
    /// Run with a visible window
    None,
    /// `--headless=new`
    New,
    /// `--headless`
    #[default]
    Legacy,
}

impl ChromeHeadlessMode {
    /// Command-line flag passed to Chrome, if any.
    pub fn flag(self) -> Option<&'static str> {
        match self {
            ChromeHeadlessMode::None => None,
            ChromeHeadlessMode::New => Some("--headless=new"),
            ChromeHeadlessMode::Legacy => Some("--headless"),
        }
    }
}

impl std::fmt::Display for ChromeHeadlessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChromeHeadlessMode::None => write!(f, "none"),
            ChromeHeadlessMode::New => write!(f, "new"),
            ChromeHeadlessMode::Legacy => write!(f, "legacy"),
        }
    }
}

impl std::str::FromStr for ChromeHeadlessMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ChromeHeadlessMode::None),
            "new" => Ok(ChromeHeadlessMode::New),
            "legacy" => Ok(ChromeHeadlessMode::Legacy),
            _ => anyhow::bail!(
                "Invalid chrome headless mode '{}'. Valid values: none, new, legacy",
                s
            ),
        }
    }
}

/// Browser lifecycle and driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSection {
    /// Keep the browser alive between runs
    #[serde(default)]
    pub cache_browser: bool,
    /// Switch to the cached browser kind when a check supports it
    #[serde(default = "default_true")]
    pub prefer_cached_browser: bool,
    /// Tear the cached browser down after a run that did not succeed
    #[serde(default = "default_true")]
    pub teardown_on_failure: bool,
    #[serde(default = "default_true")]
    pub firefox_headless: bool,
    #[serde(default)]
    pub chrome_headless_mode: ChromeHeadlessMode,
    #[serde(default = "default_chrome_binary")]
    pub chrome_binary: String,
    #[serde(default = "default_geckodriver")]
    pub geckodriver_path: String,
    #[serde(default = "default_chromedriver")]
    pub chromedriver_path: String,
    /// How long to wait for a spawned driver to accept connections
    #[serde(default = "default_driver_startup_timeout")]
    pub driver_startup_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_chrome_binary() -> String {
    "/opt/chrome-linux/chrome".to_string()
}

fn default_geckodriver() -> String {
    "geckodriver".to_string()
}

fn default_chromedriver() -> String {
    "chromedriver".to_string()
}

fn default_driver_startup_timeout() -> u64 {
    20
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            cache_browser: false,
            prefer_cached_browser: true,
            teardown_on_failure: true,
            firefox_headless: true,
            chrome_headless_mode: ChromeHeadlessMode::default(),
            chrome_binary: default_chrome_binary(),
            geckodriver_path: default_geckodriver(),
            chromedriver_path: default_chromedriver(),
            driver_startup_timeout_secs: default_driver_startup_timeout(),
        }
    }
}

/// Task queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    /// Maximum time a check task may wait in the queue before it expires
    #[serde(default = "default_max_check_queue_time")]
    pub max_check_queue_time_secs: u64,
    /// Bounded wait for each dead-letter poll while draining
    #[serde(default = "default_dead_letter_wait")]
    pub dead_letter_wait_ms: u64,
}

fn default_max_check_queue_time() -> u64 {
    120
}

fn default_dead_letter_wait() -> u64 {
    100
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_check_queue_time_secs: default_max_check_queue_time(),
            dead_letter_wait_ms: default_dead_letter_wait(),
        }
    }
}

/// Defaults and bounds applied to every check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksSection {
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_min_timeout")]
    pub min_timeout_secs: u64,
    #[serde(default = "default_max_timeout")]
    pub max_timeout_secs: u64,
    /// Capture `failure.png` when a browser run fails and the check does not say otherwise
    #[serde(default = "default_true")]
    pub screenshot_on_failure_default: bool,
}

fn default_timeout() -> u64 {
    60
}

fn default_min_timeout() -> u64 {
    1
}

fn default_max_timeout() -> u64 {
    300
}

impl Default for ChecksSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout(),
            min_timeout_secs: default_min_timeout(),
            max_timeout_secs: default_max_timeout(),
            screenshot_on_failure_default: true,
        }
    }
}

/// Where run artifacts are written by the local artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsSection {
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
        }
    }
}

/// Root of `synthmon.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub browser: BrowserSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub checks: ChecksSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
}

impl WorkerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse synthmon.toml")
    }

    /// Load from `path`, or from `./synthmon.toml` when it exists, then apply
    /// environment overrides.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).and_then(|v| parse_bool(&v));
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = flag("CACHE_BROWSER") {
            self.browser.cache_browser = v;
        }
        if let Some(v) = flag("PREFER_CACHED_BROWSER") {
            self.browser.prefer_cached_browser = v;
        }
        if let Some(v) = flag("TEARDOWN_BROWSER_ON_FAILURE") {
            self.browser.teardown_on_failure = v;
        }
        if let Some(v) = flag("FIREFOX_HEADLESS") {
            self.browser.firefox_headless = v;
        }
        if let Some(mode) = lookup("CHROME_HEADLESS_MODE").and_then(|v| v.parse().ok()) {
            self.browser.chrome_headless_mode = mode;
        }
        if let Some(binary) = lookup("CHROME_BINARY") {
            self.browser.chrome_binary = binary;
        }
        if let Some(path) = lookup("GECKODRIVER_PATH") {
            self.browser.geckodriver_path = path;
        }
        if let Some(path) = lookup("CHROMEDRIVER_PATH") {
            self.browser.chromedriver_path = path;
        }
        if let Some(v) = number("MAX_CHECK_QUEUE_TIME") {
            self.queue.max_check_queue_time_secs = v;
        }
        if let Some(v) = number("DEFAULT_CHECK_TIMEOUT") {
            self.checks.default_timeout_secs = v;
        }
        if let Some(v) = number("MIN_CHECK_TIMEOUT") {
            self.checks.min_timeout_secs = v;
        }
        if let Some(v) = number("MAX_CHECK_TIMEOUT") {
            self.checks.max_timeout_secs = v;
        }
        if let Some(v) = flag("SCREENSHOT_ON_FAILURE_DEFAULT") {
            self.checks.screenshot_on_failure_default = v;
        }
        if let Some(dir) = lookup("ARTIFACT_DIR") {
            self.artifacts.dir = PathBuf::from(dir);
        }
    }

    pub fn max_check_queue_time(&self) -> Duration {
        Duration::from_secs(self.queue.max_check_queue_time_secs)
    }

    pub fn dead_letter_wait(&self) -> Duration {
        Duration::from_millis(self.queue.dead_letter_wait_ms)
    }

    pub fn driver_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.browser.driver_startup_timeout_secs)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize synthmon.toml")
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let checks = &self.checks;

        if checks.min_timeout_secs == 0 {
            warnings.push("min_timeout_secs is 0: checks may time out before running".to_string());
        }
        if checks.min_timeout_secs > checks.max_timeout_secs {
            warnings.push(format!(
                "min_timeout_secs ({}) is greater than max_timeout_secs ({})",
                checks.min_timeout_secs, checks.max_timeout_secs
            ));
        }
        if checks.default_timeout_secs < checks.min_timeout_secs
            || checks.default_timeout_secs > checks.max_timeout_secs
        {
            warnings.push(format!(
                "default_timeout_secs ({}) is outside [{}, {}] and will be clamped",
                checks.default_timeout_secs, checks.min_timeout_secs, checks.max_timeout_secs
            ));
        }
        if self.queue.max_check_queue_time_secs == 0 {
            warnings.push(
                "max_check_queue_time_secs is 0: task claims expire immediately".to_string(),
            );
        }
        if self.browser.driver_startup_timeout_secs == 0 {
            warnings.push("driver_startup_timeout_secs is 0: browser launch will fail".to_string());
        }

        warnings
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(!config.browser.cache_browser);
        assert!(config.browser.prefer_cached_browser);
        assert!(config.browser.teardown_on_failure);
        assert!(config.browser.firefox_headless);
        assert_eq!(config.browser.chrome_headless_mode, ChromeHeadlessMode::Legacy);
        assert_eq!(config.browser.chrome_binary, "/opt/chrome-linux/chrome");
        assert_eq!(config.queue.max_check_queue_time_secs, 120);
        assert_eq!(config.checks.default_timeout_secs, 60);
        assert_eq!(config.checks.min_timeout_secs, 1);
        assert_eq!(config.checks.max_timeout_secs, 300);
        assert!(config.checks.screenshot_on_failure_default);
        assert_eq!(config.artifacts.dir, PathBuf::from("./artifacts"));
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = WorkerConfig::parse("").unwrap();
        assert_eq!(config.queue.dead_letter_wait_ms, 100);
        assert_eq!(config.browser.driver_startup_timeout_secs, 20);
    }

    #[test]
    fn test_parse_sections() {
        let config = WorkerConfig::parse(
            r#"
            [browser]
            cache_browser = true
            chrome_headless_mode = "new"

            [checks]
            default_timeout_secs = 30

            [artifacts]
            dir = "/var/lib/synthmon"
            "#,
        )
        .unwrap();

        assert!(config.browser.cache_browser);
        assert_eq!(config.browser.chrome_headless_mode, ChromeHeadlessMode::New);
        assert_eq!(config.checks.default_timeout_secs, 30);
        assert_eq!(config.checks.max_timeout_secs, 300);
        assert_eq!(config.artifacts.dir, PathBuf::from("/var/lib/synthmon"));
    }

    #[test]
    fn test_parse_invalid_headless_mode() {
        let result = WorkerConfig::parse("[browser]\nchrome_headless_mode = \"sideways\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synthmon.toml");
        std::fs::write(&path, "[queue]\nmax_check_queue_time_secs = 30\n").unwrap();

        let config = WorkerConfig::load(&path).unwrap();
        assert_eq!(config.max_check_queue_time(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = WorkerConfig::load(&dir.path().join("nope.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CACHE_BROWSER", "True"),
            ("PREFER_CACHED_BROWSER", "false"),
            ("CHROME_HEADLESS_MODE", "None"),
            ("MAX_CHECK_QUEUE_TIME", "45"),
            ("ARTIFACT_DIR", "/tmp/artifacts"),
            ("FIREFOX_HEADLESS", "not-a-bool"),
        ]
        .into_iter()
        .collect();

        let mut config = WorkerConfig::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert!(config.browser.cache_browser);
        assert!(!config.browser.prefer_cached_browser);
        assert_eq!(config.browser.chrome_headless_mode, ChromeHeadlessMode::None);
        assert_eq!(config.queue.max_check_queue_time_secs, 45);
        assert_eq!(config.artifacts.dir, PathBuf::from("/tmp/artifacts"));
        // Unparseable values leave the setting alone
        assert!(config.browser.firefox_headless);
    }

    #[test]
    fn test_headless_mode_flags() {
        assert_eq!(ChromeHeadlessMode::None.flag(), None);
        assert_eq!(ChromeHeadlessMode::New.flag(), Some("--headless=new"));
        assert_eq!(ChromeHeadlessMode::Legacy.flag(), Some("--headless"));
        assert_eq!("LEGACY".parse::<ChromeHeadlessMode>().unwrap(), ChromeHeadlessMode::Legacy);
    }

    #[test]
    fn test_validate_defaults_clean() {
        assert!(WorkerConfig::default().validate().is_empty());
    }

    #[test]
    fn test_validate_inverted_bounds() {
        let mut config = WorkerConfig::default();
        config.checks.min_timeout_secs = 500;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("greater than max_timeout_secs")));
        assert!(warnings.iter().any(|w| w.contains("will be clamped")));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = WorkerConfig::default();
        config.browser.cache_browser = true;
        let rendered = config.to_toml().unwrap();
        let parsed = WorkerConfig::parse(&rendered).unwrap();
        assert!(parsed.browser.cache_browser);
    }
}
