//! Rewrites references to the source system inside migrated text.
//!
//! Two passes: ordered regex rules, then literal old-URL to new-URL
//! substitution from URLs recorded while the run creates entities. Once every
//! referenced entity is recorded, re-applying the transform is a no-op. If new
//! URLs are recorded between two calls the second call may still rewrite text
//! the first one left alone.

use regex::Regex;
use uuid::Uuid;

use shared::validation::normalize_base_url;

lazy_static::lazy_static! {
    static ref GIST_PAGE_REGEX: Regex = Regex::new(
        r"https?://gist\.github\.com/([A-Za-z0-9][A-Za-z0-9-]*)/([0-9a-fA-F]+)\b"
    ).unwrap();
    static ref GIST_RAW_REGEX: Regex = Regex::new(
        r"https?://gist\.githubusercontent\.com/([A-Za-z0-9][A-Za-z0-9-]*)/([0-9a-fA-F]+)/raw/(?:[0-9a-fA-F]{40}/)?([A-Za-z0-9._-]+)"
    ).unwrap();
    static ref GITLAB_SNIPPET_REGEX: Regex = Regex::new(
        r"https?://gitlab\.com/(?:[A-Za-z0-9._-]+/)*-/snippets/(\d+)\b"
    ).unwrap();
    static ref GITLAB_REFERENCE_REGEX: Regex = Regex::new(
        r"(^|[^\w$/])\$(\d+)\b"
    ).unwrap();
}

/// One ordered substitution.
#[derive(Debug, Clone)]
pub struct UrlTransformRule {
    pub pattern: Regex,
    /// Replacement template; may reference capture groups as `${1}`.
    pub replacement: String,
    pub description: String,
}

impl UrlTransformRule {
    pub fn new(
        pattern: &str,
        replacement: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
            description: description.into(),
        })
    }

    fn from_static(
        pattern: &Regex,
        replacement: String,
        description: &str,
    ) -> Self {
        Self {
            pattern: pattern.clone(),
            replacement,
            description: description.to_string(),
        }
    }

    pub fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }
}

/// Escapes `$` so a literal can be used inside a replacement template.
fn template_literal(value: &str) -> String {
    value.replace('$', "$$")
}

/// Rules for GitHub gist links.
pub fn github_rules(base_url: &str) -> Vec<UrlTransformRule> {
    let base = template_literal(&normalize_base_url(base_url));
    vec![
        UrlTransformRule::from_static(
            &GIST_RAW_REGEX,
            format!("{}/u/${{1}}/${{2}}/raw/${{3}}", base),
            "Raw gist file URLs",
        ),
        UrlTransformRule::from_static(
            &GIST_PAGE_REGEX,
            format!("{}/u/${{1}}/${{2}}", base),
            "Gist page URLs",
        ),
    ]
}

/// Rules for GitLab snippet links and inline `$N` references.
pub fn gitlab_rules(base_url: &str) -> Vec<UrlTransformRule> {
    let base = template_literal(&normalize_base_url(base_url));
    vec![
        UrlTransformRule::from_static(
            &GITLAB_SNIPPET_REGEX,
            format!("{}/snippets/${{1}}", base),
            "Snippet page URLs",
        ),
        UrlTransformRule::from_static(
            &GITLAB_REFERENCE_REGEX,
            format!("${{1}}{}/snippets/${{2}}", base),
            "Inline snippet references",
        ),
    ]
}

/// Rules for links into a legacy instance hosted at `source_base`.
///
/// Returns no rules when the legacy instance and the target share a base
/// URL, since rewritten links would match the rule again.
pub fn legacy_rules(source_base: &str, base_url: &str) -> Result<Vec<UrlTransformRule>, regex::Error> {
    let source = normalize_base_url(source_base);
    let base = normalize_base_url(base_url);
    if source.is_empty() || source == base {
        return Ok(Vec::new());
    }

    let escaped = regex::escape(&source);
    let base = template_literal(&base);
    Ok(vec![
        UrlTransformRule::new(
            &format!(r"{}/([A-Za-z0-9][A-Za-z0-9._-]*)/([0-9a-fA-F]+)/raw/([A-Za-z0-9._-]+)", escaped),
            format!("{}/u/${{1}}/${{2}}/raw/${{3}}", base),
            "Legacy raw file URLs",
        )?,
        UrlTransformRule::new(
            &format!(r"{}/([A-Za-z0-9][A-Za-z0-9._-]*)/([0-9a-fA-F]+)\b", escaped),
            format!("{}/u/${{1}}/${{2}}", base),
            "Legacy gist page URLs",
        )?,
    ])
}

/// URL of a migrated snippet on the target instance.
pub fn snippet_url(base_url: &str, snippet_id: Uuid) -> String {
    format!("{}/snippets/{}", normalize_base_url(base_url), snippet_id)
}

/// Applies rules and recorded URL substitutions to text fields.
#[derive(Debug, Clone)]
pub struct ContentTransformer {
    base_url: String,
    rules: Vec<UrlTransformRule>,
    /// Sorted longest key first.
    urls: Vec<(String, String)>,
}

impl ContentTransformer {
    pub fn new(base_url: &str, rules: Vec<UrlTransformRule>) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            rules,
            urls: Vec::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rules(&self) -> &[UrlTransformRule] {
        &self.rules
    }

    /// Adds a literal substitution. A later entry for the same old URL
    /// replaces the earlier one.
    pub fn record_url(&mut self, old_url: impl Into<String>, new_url: impl Into<String>) {
        let old_url = old_url.into();
        let new_url = new_url.into();
        if old_url.is_empty() || old_url == new_url {
            return;
        }
        self.urls.retain(|(old, _)| *old != old_url);
        self.urls.push((old_url, new_url));
        self.urls
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    /// Records where a migrated post now lives.
    ///
    /// Both the source URL and its rule-rewritten form point at the new
    /// snippet, so links rewritten by the rules pass also resolve.
    pub fn record_post(&mut self, source_url: &str, snippet_id: Uuid) {
        let target = snippet_url(&self.base_url, snippet_id);
        let rewritten = self.apply_rules(source_url);
        if rewritten != source_url {
            self.record_url(rewritten, target.clone());
        }
        self.record_url(source_url, target);
    }

    pub fn url_count(&self) -> usize {
        self.urls.len()
    }

    pub fn transform(&self, text: &str) -> String {
        let rewritten = self.apply_rules(text);
        self.apply_urls(&rewritten)
    }

    fn apply_rules(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, rule| rule.apply(&acc))
    }

    fn apply_urls(&self, text: &str) -> String {
        if self.urls.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        'scan: while let Some(ch) = rest.chars().next() {
            for (old, new) in &self.urls {
                if rest.starts_with(old.as_str()) && at_boundary(&rest[old.len()..]) {
                    out.push_str(new);
                    rest = &rest[old.len()..];
                    continue 'scan;
                }
            }
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        out
    }
}

/// A literal only matches when it is not followed by more identifier text.
fn at_boundary(after: &str) -> bool {
    after
        .chars()
        .next()
        .map_or(true, |c| !(c.is_alphanumeric() || c == '-' || c == '_'))
}
