//! Per-run migration settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;
use validator::{Validate, ValidationError};

use shared::validation::{validate_database_url, validate_http_url};

/// Default number of items requested per page or batch.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Upper bound for `batch_size`.
pub const MAX_BATCH_SIZE: u32 = 1000;

/// The system a run reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Legacy self-hosted instance, read straight from its database.
    Legacy,
    /// GitHub Gists REST API.
    Github,
    /// GitLab Snippets REST API.
    Gitlab,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Legacy => "legacy",
            SourceKind::Github => "github",
            SourceKind::Gitlab => "gitlab",
        }
    }

    /// Remote sources are paginated HTTP APIs with a request quota.
    pub fn is_remote(&self) -> bool {
        !matches!(self, SourceKind::Legacy)
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" => Ok(SourceKind::Legacy),
            "github" => Ok(SourceKind::Github),
            "gitlab" => Ok(SourceKind::Gitlab),
            _ => Err(format!("Invalid source kind: {}", s)),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options accepted by start and dry-run requests.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
#[validate(schema(function = "validate_source"))]
pub struct MigrationSettings {
    pub source_kind: SourceKind,

    /// Connection string (legacy) or API base URL (remote).
    #[validate(length(min = 1, max = 2048, message = "source_url must be 1-2048 characters"))]
    pub source_url: String,

    /// Account whose items are imported from a remote source.
    #[validate(custom(function = "shared::validation::validate_username"))]
    pub username: Option<String>,

    /// Remote API token. Accepted on input, never serialised back out.
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,

    /// Public web address of a legacy instance. Links to it are rewritten.
    #[validate(custom(function = "shared::validation::validate_http_url"))]
    pub source_web_url: Option<String>,

    #[serde(default)]
    pub reset_passwords: bool,

    #[serde(default)]
    pub preserve_timestamps: bool,

    #[serde(default)]
    pub migrate_keys: bool,

    #[serde(default = "default_true")]
    pub migrate_private_items: bool,

    #[serde(default)]
    pub import_comments: bool,

    #[serde(default = "default_true")]
    pub import_stars: bool,

    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 1000, message = "batch_size must be between 1 and 1000"))]
    pub batch_size: u32,

    /// Cap on the number of posts considered.
    #[validate(range(min = 1, message = "max_items must be at least 1"))]
    pub max_items: Option<u32>,

    /// Minimum delay between remote requests.
    #[serde(default)]
    #[validate(range(max = 60000, message = "rate_limit_delay_ms must be at most 60000"))]
    pub rate_limit_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn validate_source(settings: &MigrationSettings) -> Result<(), ValidationError> {
    match settings.source_kind {
        SourceKind::Legacy => validate_database_url(&settings.source_url),
        SourceKind::Github | SourceKind::Gitlab => {
            validate_http_url(&settings.source_url)?;
            if settings.username.as_deref().map_or(true, str::is_empty) {
                let mut err = ValidationError::new("username_required");
                err.message = Some("username is required for remote sources".into());
                return Err(err);
            }
            if settings.auth_token.as_deref().map_or(true, str::is_empty) {
                let mut err = ValidationError::new("auth_token_required");
                err.message = Some("auth_token is required for remote sources".into());
                return Err(err);
            }
            Ok(())
        }
    }
}

impl MigrationSettings {
    /// Settings with defaults for the given source.
    pub fn new(source_kind: SourceKind, source_url: impl Into<String>) -> Self {
        Self {
            source_kind,
            source_url: source_url.into(),
            username: None,
            auth_token: None,
            source_web_url: None,
            reset_passwords: false,
            preserve_timestamps: false,
            migrate_keys: false,
            migrate_private_items: true,
            import_comments: false,
            import_stars: true,
            batch_size: DEFAULT_BATCH_SIZE,
            max_items: None,
            rate_limit_delay_ms: 0,
        }
    }

    /// The settings as recorded on the job and the persisted summary.
    ///
    /// The auth token is never part of the snapshot, and the password of a
    /// legacy connection string is masked.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut redacted = self.clone();
        redacted.auth_token = None;
        redacted.source_url = redact_url_password(&self.source_url);
        serde_json::to_value(&redacted).unwrap_or(serde_json::Value::Null)
    }
}

const MASK: &str = "***";

/// Query parameters that carry a credential in connection strings.
const SECRET_PARAMS: [&str; 2] = ["password", "sslpassword"];

/// Masks every credential in a URL with `***`.
///
/// Covers the userinfo password and `password`/`sslpassword` query pairs.
/// URLs without a credential are returned untouched; input that does not
/// parse is masked entirely.
pub fn redact_url_password(raw: &str) -> String {
    if raw.trim().is_empty() {
        return raw.to_string();
    }
    let mut url = match Url::parse(raw) {
        Ok(url) if !url.cannot_be_a_base() => url,
        _ => return MASK.to_string(),
    };

    let mut masked = false;
    if url.password().is_some() {
        if url.set_password(Some(MASK)).is_err() {
            return MASK.to_string();
        }
        masked = true;
    }

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs
        .iter()
        .any(|(key, _)| SECRET_PARAMS.contains(&key.to_ascii_lowercase().as_str()))
    {
        let pairs = pairs.into_iter().map(|(key, value)| {
            if SECRET_PARAMS.contains(&key.to_ascii_lowercase().as_str()) {
                (key, MASK.to_string())
            } else {
                (key, value)
            }
        });
        url.query_pairs_mut().clear().extend_pairs(pairs);
        masked = true;
    }

    if masked {
        url.to_string()
    } else {
        raw.to_string()
    }
}
