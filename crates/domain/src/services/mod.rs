//! Domain services for the migration engine.
//!
//! Pure logic (ID mapping, content rewriting, language detection) and the
//! seams the engine is driven through: sources, the target store and
//! progress reporting.

pub mod content_transform;
pub mod entity_mapper;
pub mod language;
pub mod progress;
pub mod source_connector;
pub mod target_store;

pub use content_transform::{
    github_rules, gitlab_rules, legacy_rules, snippet_url, ContentTransformer, UrlTransformRule,
};
pub use entity_mapper::{EntityMapper, MappingError};
pub use language::{detect_language, DEFAULT_LANGUAGE};
pub use progress::{NoopProgress, ProgressSink, RecordingProgress};
pub use source_connector::{SourceConnector, StaticSourceConnector};
pub use target_store::{StoreError, TargetStore};
