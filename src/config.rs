//! Builder for configuring the engine, and the engine itself.

use std::sync::Arc;

use crate::dom::SharedDocument;
use crate::error::Result;
use crate::gate::PageScope;
use crate::rules::{Mode, Rule, RuleSet};
use crate::scope::{self, EmbeddedDocuments, ShadowTrees};
use crate::session::{ContextKind, ScopeContext, Session};

/// Stored settings in the shape the settings editor writes them.
///
/// ```json
/// {
///   "entries": [{ "type": "Text", "value": "ssn" }],
///   "active": true,
///   "mode": "masking",
///   "allowedPages": ["https://example.com/account"]
/// }
/// ```
///
/// Every field is optional. `allowedPages` absent means "run everywhere";
/// present but empty means "run nowhere".
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct MaskerConfig {
    pub entries: Vec<Rule>,
    pub active: bool,
    pub mode: Mode,
    pub allowed_pages: Option<Vec<String>>,
}

impl Default for MaskerConfig {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            active: true,
            mode: Mode::default(),
            allowed_pages: None,
        }
    }
}

/// Builder for a [`Masker`].
///
/// # Example
///
/// ```
/// use live_masker::{Document, MaskerBuilder, Mode, Rule};
///
/// let masker = MaskerBuilder::new()
///     .rule(Rule::text(r"\d{3}-\d{2}-\d{4}"))
///     .rule(Rule::selector("input.email").with_replacement("[redacted]"))
///     .mode(Mode::Masking)
///     .page_scope(["https://example.com/"])
///     .build()
///     .unwrap();
///
/// let doc = Document::parse_shared("<p>123-45-6789</p>", "https://example.com/me").unwrap();
/// let mut session = masker.attach(&doc);
/// session.settle();
/// assert!(doc.borrow().html().contains("<p>***********</p>"));
/// ```
#[derive(Clone, Debug)]
pub struct MaskerBuilder {
    rules: Vec<Rule>,
    mode: Mode,
    enabled: bool,
    page_scope: Option<PageScope>,
}

impl MaskerBuilder {
    /// Create a builder with no rules, masking mode, enabled, and no page
    /// scope.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            mode: Mode::default(),
            enabled: true,
            page_scope: None,
        }
    }

    /// Start from stored settings.
    ///
    /// Entry values are trimmed and entries left empty are dropped, the way
    /// the settings editor saves them.
    pub fn from_config(config: MaskerConfig) -> Self {
        let rules: Vec<Rule> = config
            .entries
            .into_iter()
            .filter_map(|mut rule| {
                let trimmed = rule.pattern.trim();
                if trimmed.is_empty() {
                    return None;
                }
                rule.pattern = trimmed.to_string();
                Some(rule)
            })
            .collect();

        let mut builder = Self::new()
            .rules(rules)
            .mode(config.mode)
            .enabled(config.active);
        if let Some(pages) = config.allowed_pages {
            builder = builder.page_scope(pages);
        }
        builder
    }

    /// Append one rule. Rules keep the order they are added in.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append several rules.
    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// A disabled engine attaches nothing.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Restrict the engine to locations under `prefixes`. An empty list
    /// disables it everywhere.
    pub fn page_scope<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.page_scope = Some(PageScope::new(prefixes));
        self
    }

    /// Compile the rules and return the engine.
    ///
    /// Fails with [`MaskerError::EmptyPattern`](crate::MaskerError::EmptyPattern)
    /// if a rule has an empty pattern.
    pub fn build(self) -> Result<Masker> {
        Ok(Masker {
            rules: Arc::new(RuleSet::new(self.rules)?),
            mode: self.mode,
            enabled: self.enabled,
            page_scope: self.page_scope,
        })
    }
}

impl Default for MaskerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured engine. Cheap to keep around; attach it to each document
/// that loads.
pub struct Masker {
    rules: Arc<RuleSet>,
    mode: Mode,
    enabled: bool,
    page_scope: Option<PageScope>,
}

impl Masker {
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Transform `document` once and start watching it, together with its
    /// shadow trees and same-origin embedded documents.
    ///
    /// Returns an inactive session when the engine is disabled, has no rules,
    /// or the document's location is outside the page scope. Failures in one
    /// context are logged and never stop the others.
    pub fn attach(&self, document: &SharedDocument) -> Session {
        if !self.enabled || self.rules.is_empty() {
            tracing::debug!("Masking disabled or no rules configured");
            return Session::inactive();
        }

        if let Some(page_scope) = &self.page_scope {
            let location = match document.try_borrow() {
                Ok(doc) => doc.location().to_string(),
                Err(_) => {
                    tracing::warn!("Document is busy, not attaching");
                    return Session::inactive();
                }
            };
            if !page_scope.allows(&location) {
                tracing::info!("Page {location} is outside the page scope");
                return Session::inactive();
            }
            tracing::info!("Page {location} is inside the page scope");
        }

        let mut contexts = Vec::new();
        match ScopeContext::wire(document, ContextKind::Document, &self.rules, self.mode) {
            Ok(context) => contexts.push(context),
            Err(e) => tracing::warn!("Failed to wire main document: {e}"),
        }
        scope::traverse(document, &ShadowTrees, &self.rules, self.mode, &mut contexts);
        scope::traverse(document, &EmbeddedDocuments, &self.rules, self.mode, &mut contexts);

        tracing::info!("Masking session started with {} contexts", contexts.len());
        Session::new(contexts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    #[test]
    fn builder_defaults() {
        let masker = MaskerBuilder::new().build().unwrap();
        assert!(masker.rules().is_empty());
        assert_eq!(masker.mode(), Mode::Masking);
        assert!(masker.is_enabled());
    }

    #[test]
    fn empty_pattern_fails_build() {
        assert!(MaskerBuilder::new().rule(Rule::text("")).build().is_err());
    }

    #[test]
    fn from_config_trims_and_drops_empty_entries() {
        let config = MaskerConfig {
            entries: vec![Rule::text("  ssn "), Rule::selector("   "), Rule::selector(".card")],
            ..MaskerConfig::default()
        };
        let masker = MaskerBuilder::from_config(config).build().unwrap();
        assert_eq!(masker.rules().len(), 2);
    }

    #[test]
    fn disabled_engine_attaches_nothing() {
        let document = Document::parse_shared("<p>ssn</p>", "https://example.com/").unwrap();
        let masker = MaskerBuilder::new()
            .rule(Rule::text("ssn"))
            .enabled(false)
            .build()
            .unwrap();

        let session = masker.attach(&document);
        assert!(!session.is_active());
        assert_eq!(document.borrow().observer_count(), 0);
        assert!(document.borrow().html().contains("<p>ssn</p>"));
    }

    #[test]
    fn out_of_scope_page_is_left_alone() {
        let document = Document::parse_shared("<p>ssn</p>", "https://example.com/public").unwrap();
        let masker = MaskerBuilder::new()
            .rule(Rule::text("ssn"))
            .page_scope(["https://example.com/account"])
            .build()
            .unwrap();

        assert!(!masker.attach(&document).is_active());
        assert!(document.borrow().html().contains("<p>ssn</p>"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn stored_settings_deserialize() {
        use crate::rules::RuleKind;

        let config: MaskerConfig = serde_json::from_str(
            r#"{
                "entries": [
                    { "type": "Text", "value": "ssn" },
                    { "type": "CSS", "value": "input.email", "replacement": "[redacted]" },
                    { "type": "Selector", "pattern": "img" }
                ],
                "mode": "replacement",
                "allowedPages": []
            }"#,
        )
        .unwrap();

        assert!(config.active);
        assert_eq!(config.mode, Mode::Replacement);
        assert_eq!(config.allowed_pages, Some(Vec::new()));
        assert_eq!(config.entries[1].kind, RuleKind::Selector);
        assert_eq!(config.entries[1].replacement, "[redacted]");
        assert_eq!(config.entries[2].pattern, "img");
    }
}
