//! Bootstrap settings with env-var overrides.
//!
//! Reads `config/bootstrap.toml` relative to the current working directory
//! (optional) or an explicit `-f PATH` (required to exist), then applies
//! `PAPER_BOOTSTRAP_CACHE_DIR` and `PAPER_BOOTSTRAP_LOG_LEVEL`.
//!
//! These settings steer the orchestrator itself. The variables handed to the
//! auxiliary services are resolved separately by [`crate::env`].

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{artifact::ArchUrls, env as effective_env, error::AppError, logger};

pub const DEFAULT_CONFIG_PATH: &str = "config/bootstrap.toml";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_READINESS_GRACE_SECS: u64 = 8;

const SBX_AMD64_URL: &str = "https://amd64.ssss.nyc.mn/s-box";
const SBX_ARM64_URL: &str = "https://arm64.ssss.nyc.mn/s-box";
const NEZHA_AMD64_URL: &str = "https://github.com/nezhahq/agent/releases/latest/download/nezha-agent_linux_amd64";
const NEZHA_ARM64_URL: &str = "https://github.com/nezhahq/agent/releases/latest/download/nezha-agent_linux_arm64";

/// Download locations for both auxiliary artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUrls {
    pub sbx: ArchUrls,
    pub nezha_agent: ArchUrls,
}

impl Default for ArtifactUrls {
    fn default() -> Self {
        Self {
            sbx: ArchUrls::new(SBX_AMD64_URL, SBX_ARM64_URL),
            nezha_agent: ArchUrls::new(NEZHA_AMD64_URL, NEZHA_ARM64_URL),
        }
    }
}

/// Fully-resolved orchestrator settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: String,
    /// Directory holding cached artifacts (already expanded, no `~`).
    pub cache_dir: PathBuf,
    /// Blind wait between starting the auxiliary services and delegating.
    pub readiness_grace: Duration,
    pub artifacts: ArtifactUrls,
    /// `[defaults]`: replaces compiled-in effective-environment defaults.
    pub env_defaults: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            cache_dir: env::temp_dir(),
            readiness_grace: Duration::from_secs(DEFAULT_READINESS_GRACE_SECS),
            artifacts: ArtifactUrls::default(),
            env_defaults: BTreeMap::new(),
        }
    }
}

/// Raw TOML shape, `serde` target before resolution.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    #[serde(default)]
    bootstrap: RawBootstrap,
    #[serde(default)]
    artifacts: RawArtifacts,
    #[serde(default)]
    defaults: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawBootstrap {
    log_level: Option<String>,
    cache_dir: Option<String>,
    readiness_grace_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawArtifacts {
    sbx: Option<ArchUrls>,
    #[serde(rename = "nezha-agent")]
    nezha_agent: Option<ArchUrls>,
}

/// Env-var overrides applied after the file is read.
#[derive(Debug, Default, Clone)]
pub struct Overrides<'a> {
    pub cache_dir: Option<&'a str>,
    pub log_level: Option<&'a str>,
}

/// Load settings from `explicit_path` or the default location, then apply
/// env-var overrides.
pub fn load(explicit_path: Option<&str>) -> Result<Settings, AppError> {
    let cache_dir = env::var("PAPER_BOOTSTRAP_CACHE_DIR").ok();
    let log_level = env::var("PAPER_BOOTSTRAP_LOG_LEVEL").ok();
    let overrides = Overrides { cache_dir: cache_dir.as_deref(), log_level: log_level.as_deref() };

    match explicit_path {
        Some(path) => load_from(Path::new(path), true, &overrides),
        None => load_from(Path::new(DEFAULT_CONFIG_PATH), false, &overrides),
    }
}

/// Internal loader. Accepts an explicit path and overrides.
/// When `required` is false a missing file means "all defaults".
pub fn load_from(path: &Path, required: bool, overrides: &Overrides<'_>) -> Result<Settings, AppError> {
    let raw = match fs::read_to_string(path) {
        Ok(text) => toml::from_str::<RawSettings>(&text)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => RawSettings::default(),
        Err(e) => return Err(AppError::Config(format!("cannot read {}: {e}", path.display()))),
    };

    resolve(raw, overrides)
}

fn resolve(raw: RawSettings, overrides: &Overrides<'_>) -> Result<Settings, AppError> {
    let defaults = Settings::default();
    let b = raw.bootstrap;

    let log_level = non_blank(overrides.log_level)
        .map(str::to_string)
        .or(b.log_level)
        .unwrap_or(defaults.log_level);
    logger::parse_level(&log_level).map_err(|e| AppError::Config(e.to_string()))?;

    let cache_dir = non_blank(overrides.cache_dir)
        .map(str::to_string)
        .or(b.cache_dir)
        .map(|dir| expand_home(&dir))
        .unwrap_or(defaults.cache_dir);

    let readiness_grace = b
        .readiness_grace_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.readiness_grace);

    if let Some(key) = raw.defaults.keys().find(|k| !effective_env::is_whitelisted(k)) {
        return Err(AppError::Config(format!(
            "[defaults] may only set {}; got '{key}'",
            effective_env::WHITELIST.join(", ")
        )));
    }

    Ok(Settings {
        log_level,
        cache_dir,
        readiness_grace,
        artifacts: ArtifactUrls {
            sbx: raw.artifacts.sbx.unwrap_or(defaults.artifacts.sbx),
            nezha_agent: raw.artifacts.nezha_agent.unwrap_or(defaults.artifacts.nezha_agent),
        },
        env_defaults: raw.defaults,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_TOML: &str = r#"
[bootstrap]
log_level = "debug"
cache_dir = "/var/cache/paper"
readiness_grace_secs = 2

[artifacts.sbx]
amd64 = "https://mirror.example/sbx-amd64"
arm64 = "https://mirror.example/sbx-arm64"

[defaults]
NAME = "edge-3"
NEZHA_KEY = ""
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn missing_default_file_yields_defaults() {
        let s = load_from(Path::new("/nonexistent/bootstrap.toml"), false, &Overrides::default()).unwrap();
        assert_eq!(s.log_level, "info");
        assert_eq!(s.cache_dir, env::temp_dir());
        assert_eq!(s.readiness_grace, Duration::from_secs(8));
        assert_eq!(s.artifacts, ArtifactUrls::default());
        assert!(s.env_defaults.is_empty());
    }

    #[test]
    fn missing_explicit_file_errors() {
        let err = load_from(Path::new("/nonexistent/bootstrap.toml"), true, &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("config error"));
    }

    #[test]
    fn parse_full_file() {
        let f = write_toml(FULL_TOML);
        let s = load_from(f.path(), true, &Overrides::default()).unwrap();
        assert_eq!(s.log_level, "debug");
        assert_eq!(s.cache_dir, PathBuf::from("/var/cache/paper"));
        assert_eq!(s.readiness_grace, Duration::from_secs(2));
        assert_eq!(s.artifacts.sbx.amd64, "https://mirror.example/sbx-amd64");
        // Unset section keeps its default.
        assert_eq!(s.artifacts.nezha_agent, ArtifactUrls::default().nezha_agent);
        assert_eq!(s.env_defaults.get("NAME").map(String::as_str), Some("edge-3"));
        assert_eq!(s.env_defaults.get("NEZHA_KEY").map(String::as_str), Some(""));
    }

    #[test]
    fn defaults_outside_whitelist_are_rejected() {
        let f = write_toml("[defaults]\nPATH = \"/usr/bin\"\n");
        let err = load_from(f.path(), true, &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("PATH"));
    }

    #[test]
    fn env_overrides_win_over_file() {
        let f = write_toml(FULL_TOML);
        let overrides = Overrides { cache_dir: Some("/tmp/override"), log_level: Some("warn") };
        let s = load_from(f.path(), true, &overrides).unwrap();
        assert_eq!(s.cache_dir, PathBuf::from("/tmp/override"));
        assert_eq!(s.log_level, "warn");
    }

    #[test]
    fn blank_override_is_ignored() {
        let f = write_toml(FULL_TOML);
        let overrides = Overrides { cache_dir: Some("  "), log_level: None };
        let s = load_from(f.path(), true, &overrides).unwrap();
        assert_eq!(s.cache_dir, PathBuf::from("/var/cache/paper"));
    }

    #[test]
    fn invalid_log_level_errors() {
        let f = write_toml("[bootstrap]\nlog_level = \"loud\"\n");
        let err = load_from(f.path(), true, &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let f = write_toml("[bootstrap]\nreadiness = 3\n");
        assert!(load_from(f.path(), true, &Overrides::default()).is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.cache/paper");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".cache/paper"));
    }

    #[test]
    fn relative_path_unchanged() {
        assert_eq!(expand_home("cache"), PathBuf::from("cache"));
    }
}
