//! Common validation utilities.

use validator::ValidationError;

/// Maximum length of a username on the target instance.
const MAX_USERNAME_LENGTH: usize = 64;

/// URL schemes accepted for remote API sources.
const HTTP_SCHEMES: [&str; 2] = ["http", "https"];

/// URL schemes accepted for legacy database connection strings.
const DATABASE_SCHEMES: [&str; 2] = ["postgres", "postgresql"];

/// Validates a username as accepted by the target instance.
///
/// Usernames are 1-64 characters of ASCII letters, digits, `-`, `_` or `.`,
/// and may not start with a separator.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() || username.len() > MAX_USERNAME_LENGTH {
        let mut err = ValidationError::new("username_length");
        err.message = Some("Username must be between 1 and 64 characters".into());
        return Err(err);
    }

    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    let valid_start = username
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);

    if valid_chars && valid_start {
        Ok(())
    } else {
        let mut err = ValidationError::new("username_format");
        err.message = Some(
            "Username may only contain letters, digits, '-', '_' and '.', and must start with a letter or digit"
                .into(),
        );
        Err(err)
    }
}

/// Validates that a value is an absolute http(s) URL.
pub fn validate_http_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(parsed) if HTTP_SCHEMES.contains(&parsed.scheme()) && parsed.has_host() => Ok(()),
        _ => {
            let mut err = ValidationError::new("http_url");
            err.message = Some("Value must be an absolute http or https URL".into());
            Err(err)
        }
    }
}

/// Validates that a value is a PostgreSQL connection string.
pub fn validate_database_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(parsed) if DATABASE_SCHEMES.contains(&parsed.scheme()) => Ok(()),
        _ => {
            let mut err = ValidationError::new("database_url");
            err.message = Some("Value must be a postgres:// connection string".into());
            Err(err)
        }
    }
}

/// Strips a trailing slash so URLs can be joined with `format!`.
pub fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::faker::internet::en::Username;
    use fake::Fake;

    #[test]
    fn test_validate_username_accepts_common_handles() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob-the-builder").is_ok());
        assert!(validate_username("carol_99").is_ok());
        assert!(validate_username("d.e").is_ok());
    }

    #[test]
    fn test_validate_username_generated_handles() {
        for _ in 0..20 {
            let name: String = Username().fake();
            let cleaned: String = name
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            if !cleaned.is_empty() {
                assert!(validate_username(&cleaned).is_ok(), "{cleaned}");
            }
        }
    }

    #[test]
    fn test_validate_username_rejects_empty_and_long() {
        assert!(validate_username("").is_err());
        assert!(validate_username(&"a".repeat(65)).is_err());
        assert!(validate_username(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_username_rejects_bad_characters() {
        assert!(validate_username("al ice").is_err());
        assert!(validate_username("-alice").is_err());
        assert!(validate_username("alice/../root").is_err());
    }

    #[test]
    fn test_validate_username_error_message() {
        let err = validate_username("").unwrap_err();
        assert_eq!(
            err.message.unwrap().to_string(),
            "Username must be between 1 and 64 characters"
        );
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("https://api.github.com").is_ok());
        assert!(validate_http_url("http://localhost:8080/api/v4").is_ok());
        assert!(validate_http_url("ftp://example.com").is_err());
        assert!(validate_http_url("not a url").is_err());
    }

    #[test]
    fn test_validate_database_url() {
        assert!(validate_database_url("postgres://u:p@localhost:5432/legacy").is_ok());
        assert!(validate_database_url("postgresql://localhost/legacy").is_ok());
        assert!(validate_database_url("mysql://localhost/legacy").is_err());
        assert!(validate_database_url("https://example.com").is_err());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://example.com/"), "https://example.com");
        assert_eq!(normalize_base_url("https://example.com"), "https://example.com");
    }
}
