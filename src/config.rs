//! Settings: immutable configuration built once at startup.
//!
//! Layering, lowest precedence first:
//!   built-in defaults
//!        ↓
//!   YAML config file (`--config`, `$HANDLECHECK_CONFIG`, or
//!   `<config dir>/handlecheck/config.yaml` when present)
//!        ↓
//!   environment (`.env` honoured); the bearer token lives only here
//!        ↓
//!   command-line overrides
//!
//! Everything that can be wrong with the configuration is reported here,
//! before any network activity.

use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::engine::LoopPolicy;
use crate::pacing::PacingPolicy;

pub const BEARER_TOKEN_ENV: &str = "TWITTER_BEARER_TOKEN";
pub const CONFIG_PATH_ENV: &str = "HANDLECHECK_CONFIG";

pub const DEFAULT_RESERVATION_BASE_URL: &str = "https://api.lixqa.de/v3/discord/pomelo";
pub const DEFAULT_SIGNUP_URL: &str = "https://twitter.com/i/api/i/users/username_available.json";
pub const DEFAULT_GUEST_TOKEN: &str = "1337";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_TARGET: usize = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: set {0} in the environment or .env")]
    MissingCredential(&'static str),
    #[error("no candidate file (*.txt) found in {0}")]
    NoInputFile(PathBuf),
    #[error("{count} candidate files found in {dir}; exactly one is expected")]
    MultipleInputFiles { dir: PathBuf, count: usize },
    #[error("candidate file {0} contains no candidates")]
    EmptyInput(PathBuf),
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

// ── Secrets ─────────────────────────────────────────────────────────

/// Credential string, wiped from memory on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

// ── File Layer ──────────────────────────────────────────────────────

/// Pacing section of the config file, in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingFile {
    pub spacing_ms: Option<u64>,
    pub periodic_every: Option<u32>,
    pub periodic_pause_min_ms: Option<u64>,
    pub periodic_pause_max_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
}

impl PacingFile {
    fn apply(&self, mut base: PacingPolicy) -> PacingPolicy {
        if let Some(v) = self.spacing_ms {
            base.spacing = Duration::from_millis(v);
        }
        if let Some(v) = self.periodic_every {
            base.periodic_every = v;
        }
        if let Some(v) = self.periodic_pause_min_ms {
            base.periodic_pause_min = Duration::from_millis(v);
        }
        if let Some(v) = self.periodic_pause_max_ms {
            base.periodic_pause_max = Duration::from_millis(v);
        }
        if let Some(v) = self.cooldown_ms {
            base.cooldown = Duration::from_millis(v);
        }
        base
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingSection {
    pub reservation: PacingFile,
    pub signup: PacingFile,
}

/// On-disk configuration. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub input_dir: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub reservation_base_url: Option<String>,
    pub signup_url: Option<String>,
    pub guest_token: Option<String>,
    pub timeout_secs: Option<u64>,
    pub target: Option<usize>,
    pub max_passes: Option<u32>,
    pub single_pass: Option<bool>,
    pub require_signup: Option<bool>,
    pub pacing: PacingSection,
}

impl FileConfig {
    pub fn from_yaml(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config file named by the overrides or the environment, or
    /// the per-user default if one exists. No file means all defaults.
    pub fn discover(overrides: &Overrides) -> Result<Self, ConfigError> {
        match config_path(overrides) {
            Some(path) => Self::from_yaml(&path),
            None => Ok(Self::default()),
        }
    }
}

/// Output file location without the rest of the settings. Maintenance
/// commands use this; they need no credentials.
pub fn resolve_output_file(overrides: &Overrides) -> Result<PathBuf, ConfigError> {
    let file = FileConfig::discover(overrides)?;
    Ok(overrides
        .output_file
        .clone()
        .or(file.output_file)
        .unwrap_or_else(default_output_file))
}

fn default_output_file() -> PathBuf {
    PathBuf::from("outputs").join("valid_usernames.txt")
}

/// Command-line overrides; `None` leaves the lower layer in effect.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub input_dir: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub target: Option<usize>,
    pub max_passes: Option<u32>,
    pub single_pass: bool,
}

// ── Settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub output_file: PathBuf,
    pub reservation_base_url: Url,
    pub signup_url: Url,
    pub bearer_token: SecretToken,
    pub guest_token: String,
    /// Upper bound for every outbound call.
    pub timeout: Duration,
    pub reservation_pacing: PacingPolicy,
    pub signup_pacing: PacingPolicy,
    pub loop_policy: LoopPolicy,
    /// When false, reservation-confirmed handles are stored without the
    /// signup check.
    pub require_signup: bool,
}

impl Settings {
    /// Load `.env`, the config file and the environment, then apply
    /// `overrides`.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();

        let file = FileConfig::discover(overrides)?;
        let token = std::env::var(BEARER_TOKEN_ENV).ok();
        Self::from_parts(file, token, overrides)
    }

    /// Assemble settings from already-gathered layers.
    pub fn from_parts(
        file: FileConfig,
        bearer_token: Option<String>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let bearer_token = bearer_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(SecretToken::new)
            .ok_or(ConfigError::MissingCredential(BEARER_TOKEN_ENV))?;

        let reservation_base_url = parse_url(
            "reservation_base_url",
            file.reservation_base_url.as_deref().unwrap_or(DEFAULT_RESERVATION_BASE_URL),
        )?;
        if reservation_base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl {
                field: "reservation_base_url",
                value: reservation_base_url.to_string(),
            });
        }
        let signup_url = parse_url(
            "signup_url",
            file.signup_url.as_deref().unwrap_or(DEFAULT_SIGNUP_URL),
        )?;

        let timeout_secs = file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".into()));
        }

        let reservation_pacing = file.pacing.reservation.apply(PacingPolicy::reservation_default());
        let signup_pacing = file.pacing.signup.apply(PacingPolicy::signup_default());
        reservation_pacing
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("reservation pacing: {}", e)))?;
        signup_pacing
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("signup pacing: {}", e)))?;

        let single_pass = overrides.single_pass || file.single_pass.unwrap_or(false);
        let loop_policy = if single_pass {
            LoopPolicy::SinglePass
        } else {
            let target = overrides.target.or(file.target).unwrap_or(DEFAULT_TARGET);
            if target == 0 {
                return Err(ConfigError::Invalid("target must be at least 1".into()));
            }
            LoopPolicy::UntilTarget {
                target,
                max_passes: overrides.max_passes.or(file.max_passes),
            }
        };

        Ok(Self {
            input_dir: overrides
                .input_dir
                .clone()
                .or(file.input_dir)
                .unwrap_or_else(|| PathBuf::from("inputs")),
            output_file: overrides
                .output_file
                .clone()
                .or(file.output_file)
                .unwrap_or_else(default_output_file),
            reservation_base_url,
            signup_url,
            bearer_token,
            guest_token: file.guest_token.unwrap_or_else(|| DEFAULT_GUEST_TOKEN.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            reservation_pacing,
            signup_pacing,
            loop_policy,
            require_signup: file.require_signup.unwrap_or(true),
        })
    }
}

fn config_path(overrides: &Overrides) -> Option<PathBuf> {
    if let Some(p) = &overrides.config_path {
        return Some(p.clone());
    }
    if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(p));
    }
    dirs::config_dir()
        .map(|d| d.join("handlecheck").join("config.yaml"))
        .filter(|p| p.is_file())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Option<String> {
        Some("AAAA-test-bearer".to_string())
    }

    #[test]
    fn test_defaults() {
        let s = Settings::from_parts(FileConfig::default(), token(), &Overrides::default()).unwrap();
        assert_eq!(s.timeout, Duration::from_secs(5));
        assert_eq!(s.guest_token, "1337");
        assert_eq!(s.input_dir, PathBuf::from("inputs"));
        assert_eq!(s.output_file, PathBuf::from("outputs/valid_usernames.txt"));
        assert!(s.require_signup);
        assert_eq!(
            s.loop_policy,
            LoopPolicy::UntilTarget { target: 50, max_passes: None }
        );
        assert_eq!(s.reservation_pacing.periodic_every, 2);
        assert_eq!(s.reservation_pacing.cooldown, Duration::from_secs(15));
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let err = Settings::from_parts(FileConfig::default(), None, &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential(BEARER_TOKEN_ENV)));

        let err = Settings::from_parts(FileConfig::default(), Some("  ".into()), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential(_)));
    }

    #[test]
    fn test_yaml_layer_and_overrides() {
        let yaml = r#"
input_dir: /data/in
target: 10
timeout_secs: 7
pacing:
  reservation:
    cooldown_ms: 30000
    periodic_every: 3
  signup:
    spacing_ms: 2500
"#;
        let file: FileConfig = serde_yaml::from_str(yaml).unwrap();
        let overrides = Overrides {
            target: Some(20),
            output_file: Some(PathBuf::from("/tmp/out.txt")),
            ..Default::default()
        };
        let s = Settings::from_parts(file, token(), &overrides).unwrap();
        assert_eq!(s.input_dir, PathBuf::from("/data/in"));
        assert_eq!(s.output_file, PathBuf::from("/tmp/out.txt"));
        assert_eq!(s.timeout, Duration::from_secs(7));
        assert_eq!(s.reservation_pacing.cooldown, Duration::from_secs(30));
        assert_eq!(s.reservation_pacing.periodic_every, 3);
        assert_eq!(s.signup_pacing.spacing, Duration::from_millis(2500));
        assert_eq!(
            s.loop_policy,
            LoopPolicy::UntilTarget { target: 20, max_passes: None }
        );
    }

    #[test]
    fn test_single_pass_override() {
        let overrides = Overrides { single_pass: true, ..Default::default() };
        let s = Settings::from_parts(FileConfig::default(), token(), &overrides).unwrap();
        assert_eq!(s.loop_policy, LoopPolicy::SinglePass);
    }

    #[test]
    fn test_unknown_yaml_field_rejected() {
        let result: Result<FileConfig, _> = serde_yaml::from_str("timeout: 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = FileConfig { timeout_secs: Some(0), ..Default::default() };
        assert!(matches!(
            Settings::from_parts(file, token(), &Overrides::default()),
            Err(ConfigError::Invalid(_))
        ));

        let file = FileConfig { signup_url: Some("not a url".into()), ..Default::default() };
        assert!(matches!(
            Settings::from_parts(file, token(), &Overrides::default()),
            Err(ConfigError::InvalidUrl { field: "signup_url", .. })
        ));

        let mut file = FileConfig::default();
        file.pacing.reservation.periodic_pause_min_ms = Some(20_000);
        file.pacing.reservation.periodic_pause_max_ms = Some(5_000);
        assert!(matches!(
            Settings::from_parts(file, token(), &Overrides::default()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_secret_token_debug_is_redacted() {
        let s = Settings::from_parts(FileConfig::default(), token(), &Overrides::default()).unwrap();
        let dump = format!("{:?}", s);
        assert!(!dump.contains("AAAA-test-bearer"));
        assert!(dump.contains("***"));
        assert_eq!(s.bearer_token.expose(), "AAAA-test-bearer");
    }

    #[test]
    fn test_resolve_output_file_needs_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "output_file: /srv/handles.txt\n").unwrap();
        let overrides = Overrides { config_path: Some(path), ..Default::default() };
        assert_eq!(
            resolve_output_file(&overrides).unwrap(),
            PathBuf::from("/srv/handles.txt")
        );
    }

    #[test]
    fn test_from_yaml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "target: [1, 2]\n").unwrap();
        match FileConfig::from_yaml(&path) {
            Err(ConfigError::ConfigFile { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected ConfigFile error, got {:?}", other),
        }
    }
}
