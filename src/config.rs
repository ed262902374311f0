//! Credential and configuration file handling.
//!
//! Loads and persists the INI-style config file the archive tooling shares
//! (`[s3]` keys, `[cookies]`, `[general]`). Resolution order for the file
//! location follows the conventional candidates, first existing wins:
//!
//! 1. `$IA_CONFIG_FILE`
//! 2. `$XDG_CONFIG_HOME/ia/ia.ini`
//! 3. `$HOME/.config/ia.ini`
//! 4. `$HOME/.ia`
//!
//! A missing file yields defaults; a malformed file is reported and degrades
//! to defaults rather than failing the caller.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable overriding the config file location.
pub const CONFIG_FILE_ENV: &str = "IA_CONFIG_FILE";

/// Errors raised while reading or persisting the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file or its parent directory could not be written.
    #[error("failed to write config file {path}: {source}")]
    Write {
        /// Path that failed to write.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// No home directory could be determined for default path resolution.
    #[error("cannot resolve a config path: neither $IA_CONFIG_FILE, $XDG_CONFIG_HOME nor $HOME is set")]
    NoConfigPath,
}

/// S3-style API credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Credentials {
    /// Access key, when configured.
    pub access: Option<String>,
    /// Secret key, when configured.
    pub secret: Option<String>,
}

/// `[general]` section values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralConfig {
    /// Use https when true.
    pub secure: bool,
    /// Host the client talks to.
    pub host: String,
    /// Screen name recorded at login.
    pub screenname: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            secure: true,
            host: "archive.org".to_string(),
            screenname: String::new(),
        }
    }
}

/// Parsed configuration: explicit sections plus the raw cookie map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// `[s3]` credentials.
    pub s3: S3Credentials,
    /// `[cookies]` section, key to raw cookie value.
    pub cookies: BTreeMap<String, String>,
    /// `[general]` section.
    pub general: GeneralConfig,
    /// `[logging]` level label when present.
    pub logging_level: Option<String>,
}

impl Config {
    /// Convenience constructor for tests and embedders that provide
    /// credentials directly instead of reading a file.
    #[must_use]
    pub fn with_credentials(access: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            s3: S3Credentials {
                access: Some(access.into()),
                secret: Some(secret.into()),
            },
            ..Self::default()
        }
    }
}

/// Resolved config location plus whether it was the XDG default.
#[derive(Debug, Clone)]
pub struct ResolvedConfigPath {
    /// The path to read from / write to.
    pub path: PathBuf,
    /// True when the path is the XDG default (its parent is created on write).
    pub is_xdg: bool,
}

/// Resolves the config file path without touching its contents.
///
/// An explicit path always wins. Otherwise the candidate list is probed and
/// the first existing file is returned; when none exists the XDG default is
/// returned so that a later write lands in the conventional location.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigPath`] when no candidate can be built
/// because the relevant environment variables are all unset.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<ResolvedConfigPath, ConfigError> {
    if let Some(path) = explicit {
        return Ok(ResolvedConfigPath {
            path: path.to_path_buf(),
            is_xdg: false,
        });
    }

    if let Some(from_env) = env_var_non_empty(CONFIG_FILE_ENV) {
        return Ok(ResolvedConfigPath {
            path: PathBuf::from(from_env),
            is_xdg: false,
        });
    }

    let home = env_var_non_empty("HOME");
    let xdg_config_home = env_var_non_empty("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| home.as_ref().map(|h| PathBuf::from(h).join(".config")));

    let xdg_default = xdg_config_home.map(|base| base.join("ia").join("ia.ini"));

    let mut candidates: Vec<(PathBuf, bool)> = Vec::new();
    if let Some(xdg) = &xdg_default {
        candidates.push((xdg.clone(), true));
    }
    if let Some(home) = &home {
        candidates.push((PathBuf::from(home).join(".config").join("ia.ini"), false));
        candidates.push((PathBuf::from(home).join(".ia"), false));
    }

    for (candidate, is_xdg) in &candidates {
        if candidate.is_file() {
            return Ok(ResolvedConfigPath {
                path: candidate.clone(),
                is_xdg: *is_xdg,
            });
        }
    }

    match xdg_default {
        Some(path) => Ok(ResolvedConfigPath { path, is_xdg: true }),
        None => candidates
            .into_iter()
            .next()
            .map(|(path, is_xdg)| ResolvedConfigPath { path, is_xdg })
            .ok_or(ConfigError::NoConfigPath),
    }
}

fn env_var_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Loads configuration, returning defaults when no file exists.
///
/// # Errors
///
/// Returns [`ConfigError`] only for path-resolution failures or an IO error
/// on an existing file. Malformed contents are logged and skipped.
pub async fn load_config(explicit_path: Option<&Path>) -> Result<Config, ConfigError> {
    let resolved = resolve_config_path(explicit_path)?;
    if !resolved.path.is_file() {
        debug!(path = %resolved.path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let raw = tokio::fs::read_to_string(&resolved.path)
        .await
        .map_err(|source| ConfigError::Read {
            path: resolved.path.clone(),
            source,
        })?;

    Ok(parse_config_str(&raw))
}

/// Parses INI-style config text. Unknown sections and keys are ignored with
/// a debug log; malformed lines are warned about and skipped.
#[must_use]
pub fn parse_config_str(raw: &str) -> Config {
    let mut config = Config::default();
    let mut section = String::new();

    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim().to_string();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_ascii_lowercase();
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            warn!(
                line = line_index + 1,
                "malformed config line, expected key = value; skipping"
            );
            continue;
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        if value.is_empty() {
            continue;
        }

        match (section.as_str(), key) {
            ("s3", "access") => config.s3.access = Some(value.to_string()),
            ("s3", "secret") => config.s3.secret = Some(value.to_string()),
            ("cookies", _) => {
                config.cookies.insert(key.to_string(), value.to_string());
            }
            ("general", "secure") => config.general.secure = parse_boolean(value),
            ("general", "host") => config.general.host = value.to_string(),
            ("general", "screenname") => config.general.screenname = value.to_string(),
            ("logging", "level") => config.logging_level = Some(value.to_ascii_uppercase()),
            _ => {
                debug!(section = %section, key = %key, "ignoring unknown config key");
            }
        }
    }

    config
}

fn strip_inline_comment(line: &str) -> &str {
    // Cookie values may contain ';' attributes, so only '#' marks a comment.
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}

fn parse_boolean(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

/// Persists credentials and cookies, merging over the existing file.
///
/// The existing file (if any) is parsed first so unrelated values survive;
/// the `[s3]`, `[cookies]` and `[general] screenname` values from `config`
/// then overwrite. The file is written with owner-only permissions.
///
/// # Errors
///
/// Returns [`ConfigError::Write`] when the directory or file cannot be
/// created.
pub async fn write_config_file(
    config: &Config,
    explicit_path: Option<&Path>,
) -> Result<PathBuf, ConfigError> {
    let resolved = resolve_config_path(explicit_path)?;

    let mut merged = match tokio::fs::read_to_string(&resolved.path).await {
        Ok(raw) => parse_config_str(&raw),
        Err(_) => Config::default(),
    };

    if config.s3.access.is_some() {
        merged.s3.access.clone_from(&config.s3.access);
    }
    if config.s3.secret.is_some() {
        merged.s3.secret.clone_from(&config.s3.secret);
    }
    for (name, value) in &config.cookies {
        merged.cookies.insert(name.clone(), value.clone());
    }
    if !config.general.screenname.is_empty() {
        merged
            .general
            .screenname
            .clone_from(&config.general.screenname);
    }

    if resolved.is_xdg
        && let Some(parent) = resolved.path.parent()
        && !parent.exists()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let serialized = serialize_config(&merged);
    tokio::fs::write(&resolved.path, serialized)
        .await
        .map_err(|source| ConfigError::Write {
            path: resolved.path.clone(),
            source,
        })?;

    restrict_permissions(&resolved.path).await;

    debug!(path = %resolved.path.display(), "config file written");
    Ok(resolved.path)
}

fn serialize_config(config: &Config) -> String {
    let mut out = String::new();

    out.push_str("[s3]\n");
    if let Some(access) = &config.s3.access {
        out.push_str(&format!("access = {access}\n"));
    }
    if let Some(secret) = &config.s3.secret {
        out.push_str(&format!("secret = {secret}\n"));
    }

    out.push_str("\n[cookies]\n");
    for (name, value) in &config.cookies {
        out.push_str(&format!("{name} = {value}\n"));
    }

    out.push_str("\n[general]\n");
    out.push_str(&format!("secure = {}\n", config.general.secure));
    if config.general.host != GeneralConfig::default().host {
        out.push_str(&format!("host = {}\n", config.general.host));
    }
    if !config.general.screenname.is_empty() {
        out.push_str(&format!("screenname = {}\n", config.general.screenname));
    }

    if let Some(level) = &config.logging_level {
        out.push_str(&format!("\n[logging]\nlevel = {level}\n"));
    }

    out
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let permissions = std::fs::Permissions::from_mode(0o600);
    if let Err(error) = tokio::fs::set_permissions(path, permissions).await {
        warn!(path = %path.display(), %error, "failed to restrict config file permissions");
    }
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = "\
[s3]
access = ACCESSKEY
secret = SECRETKEY

[cookies]
logged-in-user = user%40example.com; expires=...
logged-in-sig = sig-value

[general]
secure = true
screenname = tester

[logging]
level = debug
";
        let config = parse_config_str(raw);
        assert_eq!(config.s3.access.as_deref(), Some("ACCESSKEY"));
        assert_eq!(config.s3.secret.as_deref(), Some("SECRETKEY"));
        assert_eq!(
            config.cookies.get("logged-in-user").map(String::as_str),
            Some("user%40example.com; expires=...")
        );
        assert_eq!(config.general.screenname, "tester");
        assert!(config.general.secure);
        assert_eq!(config.logging_level.as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_parse_malformed_lines_are_skipped() {
        let raw = "\
[s3]
access = KEY
this line has no equals sign
secret = S
";
        let config = parse_config_str(raw);
        assert_eq!(config.s3.access.as_deref(), Some("KEY"));
        assert_eq!(config.s3.secret.as_deref(), Some("S"));
    }

    #[test]
    fn test_parse_unknown_keys_ignored() {
        let raw = "[general]\nsecure = false\nunknown_key = 1\n[mystery]\nfoo = bar\n";
        let config = parse_config_str(raw);
        assert!(!config.general.secure);
        assert_eq!(config.general.host, "archive.org", "host keeps default");
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut config = Config::with_credentials("A", "S");
        config
            .cookies
            .insert("logged-in-user".to_string(), "u@example.com".to_string());
        config.general.screenname = "tester".to_string();

        let parsed = parse_config_str(&serialize_config(&config));
        assert_eq!(parsed, config);
    }

    #[tokio::test]
    async fn test_load_config_missing_file_returns_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nope.ini");
        let config = load_config(Some(&path)).await.unwrap();
        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn test_write_then_load_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("ia.ini");

        let mut config = Config::with_credentials("AK", "SK");
        config
            .cookies
            .insert("logged-in-sig".to_string(), "sig".to_string());

        let written = write_config_file(&config, Some(&path)).await.unwrap();
        assert_eq!(written, path);

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.s3.access.as_deref(), Some("AK"));
        assert_eq!(
            loaded.cookies.get("logged-in-sig").map(String::as_str),
            Some("sig")
        );
    }

    #[tokio::test]
    async fn test_write_merges_over_existing_values() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("ia.ini");
        tokio::fs::write(&path, "[s3]\naccess = OLD\nsecret = KEEP\n")
            .await
            .unwrap();

        let update = Config {
            s3: S3Credentials {
                access: Some("NEW".to_string()),
                secret: None,
            },
            ..Config::default()
        };
        write_config_file(&update, Some(&path)).await.unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.s3.access.as_deref(), Some("NEW"));
        assert_eq!(loaded.s3.secret.as_deref(), Some("KEEP"), "untouched value survives");
    }

    #[test]
    fn test_resolve_explicit_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/tmp/custom.ini"))).unwrap();
        assert_eq!(resolved.path, PathBuf::from("/tmp/custom.ini"));
        assert!(!resolved.is_xdg);
    }
}
