//! Masking rules and the compiled, immutable [`RuleSet`].

use regex::{Regex, RegexBuilder};
use scraper::Selector;

use crate::error::{MaskerError, Result};

/// Character used to fill masked content.
pub const MASK_CHAR: char = '*';

/// Build a mask of `MASK_CHAR` with the same number of characters as `s`.
pub(crate) fn mask_of(s: &str) -> String {
    std::iter::repeat_n(MASK_CHAR, s.chars().count()).collect()
}

/// How a rule locates content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RuleKind {
    /// Case-insensitive, partial-match regular expression over text nodes.
    Text,
    /// CSS selector evaluated against elements.
    #[cfg_attr(feature = "serde", serde(rename = "CSS", alias = "Selector"))]
    Selector,
}

/// Transformation direction, global to one engine run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Mode {
    /// Matched content becomes same-length filler.
    #[default]
    Masking,
    /// Matched content becomes the rule's replacement string.
    Replacement,
}

/// A single user-defined rule.
///
/// `replacement` is only consulted under [`Mode::Replacement`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rule {
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: RuleKind,
    #[cfg_attr(feature = "serde", serde(rename = "value", alias = "pattern"))]
    pub pattern: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub replacement: String,
}

impl Rule {
    /// A [`RuleKind::Text`] rule with an empty replacement.
    pub fn text(pattern: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Text,
            pattern: pattern.into(),
            replacement: String::new(),
        }
    }

    /// A [`RuleKind::Selector`] rule with an empty replacement.
    pub fn selector(pattern: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Selector,
            pattern: pattern.into(),
            replacement: String::new(),
        }
    }

    /// Set the string substituted under [`Mode::Replacement`].
    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = replacement.into();
        self
    }
}

/// A compiled text rule. `regex` is `None` when the pattern is malformed.
pub(crate) struct TextRule {
    pub(crate) pattern: String,
    pub(crate) regex: Option<Regex>,
    pub(crate) replacement: String,
}

/// A compiled selector rule. `selector` is `None` when the query is malformed.
pub(crate) struct SelectorRule {
    pub(crate) pattern: String,
    pub(crate) selector: Option<Selector>,
    pub(crate) replacement: String,
}

/// Immutable, validated list of rules, compiled once.
///
/// Rule order is preserved within each kind: text rules compose in list
/// order, each one matching against the output of the previous one.
///
/// Malformed patterns do not fail construction. They are reported once and
/// kept as inert rules that never match.
///
/// # Example
///
/// ```
/// use live_masker::{Rule, RuleSet};
///
/// let rules = RuleSet::new(vec![
///     Rule::text(r"\d{3}-\d{2}-\d{4}"),
///     Rule::selector("input.email").with_replacement("[redacted]"),
/// ])
/// .unwrap();
/// assert_eq!(rules.len(), 2);
/// ```
pub struct RuleSet {
    texts: Vec<TextRule>,
    selectors: Vec<SelectorRule>,
}

impl RuleSet {
    /// Validate and compile `rules`.
    ///
    /// Returns [`MaskerError::EmptyPattern`] if any rule has an empty pattern.
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let mut texts = Vec::new();
        let mut selectors = Vec::new();

        for (index, rule) in rules.into_iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(MaskerError::EmptyPattern { index });
            }

            match rule.kind {
                RuleKind::Text => {
                    let regex = match RegexBuilder::new(&rule.pattern)
                        .case_insensitive(true)
                        .build()
                    {
                        Ok(re) => Some(re),
                        Err(e) => {
                            tracing::warn!("Invalid text pattern skipped: {}: {e}", rule.pattern);
                            None
                        }
                    };
                    texts.push(TextRule {
                        pattern: rule.pattern,
                        regex,
                        replacement: rule.replacement,
                    });
                }
                RuleKind::Selector => {
                    let selector = match Selector::parse(&rule.pattern) {
                        Ok(sel) => Some(sel),
                        Err(e) => {
                            tracing::warn!("Invalid selector skipped: {}: {e}", rule.pattern);
                            None
                        }
                    };
                    selectors.push(SelectorRule {
                        pattern: rule.pattern,
                        selector,
                        replacement: rule.replacement,
                    });
                }
            }
        }

        Ok(Self { texts, selectors })
    }

    pub(crate) fn text_rules(&self) -> &[TextRule] {
        &self.texts
    }

    pub(crate) fn selector_rules(&self) -> &[SelectorRule] {
        &self.selectors
    }

    /// Total number of rules, including inert ones.
    pub fn len(&self) -> usize {
        self.texts.len() + self.selectors.len()
    }

    /// Returns `true` if the set holds no rules at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
