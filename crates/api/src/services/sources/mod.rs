//! Source connectors and the factory selecting one per job.

mod github;
mod gitlab;
mod http;
mod legacy;

use std::sync::Arc;

use domain::models::{MigrationSettings, SourceKind};
use domain::services::SourceConnector;
use domain::MigrationError;

use crate::config::MigrationConfig;

pub use github::GitHubSource;
pub use gitlab::GitLabSource;
pub use legacy::LegacySource;

/// Builds the connector for a run's source kind.
#[async_trait::async_trait]
pub trait ConnectorFactory: Send + Sync {
    /// Opens a connector. Failing to reach the source is a fatal error.
    async fn connect(
        &self,
        settings: &MigrationSettings,
    ) -> Result<Arc<dyn SourceConnector>, MigrationError>;
}

/// Connects to real sources using the engine configuration.
pub struct DefaultConnectorFactory {
    config: MigrationConfig,
}

impl DefaultConnectorFactory {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    /// The run's URL wins; the configured API root fills in when it is blank.
    fn remote_base<'a>(&'a self, settings: &'a MigrationSettings, default: &'a str) -> &'a str {
        if settings.source_url.trim().is_empty() {
            default
        } else {
            settings.source_url.as_str()
        }
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, MigrationError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MigrationError::InvalidSettings(format!("{} is required", field)))
}

#[async_trait::async_trait]
impl ConnectorFactory for DefaultConnectorFactory {
    async fn connect(
        &self,
        settings: &MigrationSettings,
    ) -> Result<Arc<dyn SourceConnector>, MigrationError> {
        match settings.source_kind {
            SourceKind::Legacy => {
                let source = LegacySource::connect(
                    &settings.source_url,
                    self.config.legacy_max_connections,
                    settings.source_web_url.as_deref(),
                )
                .await?;
                Ok(Arc::new(source))
            }
            SourceKind::Github => {
                let source = GitHubSource::new(
                    self.remote_base(settings, &self.config.github_api_url),
                    required(settings.username.as_deref(), "username")?,
                    required(settings.auth_token.as_deref(), "auth_token")?,
                    &self.config.user_agent,
                    self.config.http_timeout(),
                )?;
                Ok(Arc::new(source))
            }
            SourceKind::Gitlab => {
                let source = GitLabSource::new(
                    self.remote_base(settings, &self.config.gitlab_api_url),
                    required(settings.username.as_deref(), "username")?,
                    required(settings.auth_token.as_deref(), "auth_token")?,
                    &self.config.user_agent,
                    self.config.http_timeout(),
                )?;
                Ok(Arc::new(source))
            }
        }
    }
}

/// Hands out one prepared connector for every run. Used to drive the engine
/// against in-memory fixtures.
pub struct FixedConnectorFactory {
    connector: Arc<dyn SourceConnector>,
}

impl FixedConnectorFactory {
    pub fn new(connector: Arc<dyn SourceConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait::async_trait]
impl ConnectorFactory for FixedConnectorFactory {
    async fn connect(
        &self,
        _settings: &MigrationSettings,
    ) -> Result<Arc<dyn SourceConnector>, MigrationError> {
        Ok(Arc::clone(&self.connector))
    }
}

/// Serves `router` on an ephemeral local port and returns its base URL.
#[cfg(test)]
pub(crate) async fn serve_locally(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
