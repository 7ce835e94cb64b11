//! Regex-based transformation of text nodes.

use std::borrow::Cow;

use regex::{Captures, NoExpand};

use crate::dom::{Document, NodeId};
use crate::error::{MaskerError, Result};
use crate::rules::{Mode, RuleSet, TextRule, mask_of};

/// Apply every text rule to `text`, in list order.
///
/// Each rule matches against the output of the previous one. Under
/// [`Mode::Masking`] every match becomes a run of mask characters of the same
/// length; under [`Mode::Replacement`] it becomes the rule's replacement,
/// inserted verbatim. Inert (malformed) rules are skipped.
///
/// Returns [`Cow::Borrowed`] when no rule matched.
///
/// # Example
///
/// ```
/// use live_masker::{Mode, Rule, RuleSet, transform::apply_text_rules};
///
/// let rules = RuleSet::new(vec![Rule::text("ssn")]).unwrap();
/// assert_eq!(apply_text_rules("SSN: 123", &rules, Mode::Masking), "***: 123");
/// ```
pub fn apply_text_rules<'t>(text: &'t str, rules: &RuleSet, mode: Mode) -> Cow<'t, str> {
    let mut current = Cow::Borrowed(text);
    for rule in rules.text_rules() {
        if let Some(next) = apply_rule(&current, rule, mode) {
            current = Cow::Owned(next);
        }
    }
    current
}

fn apply_rule(text: &str, rule: &TextRule, mode: Mode) -> Option<String> {
    let re = rule.regex.as_ref()?;
    let replaced = match mode {
        Mode::Masking => re.replace_all(text, |caps: &Captures<'_>| mask_of(&caps[0])),
        Mode::Replacement => re.replace_all(text, NoExpand(&rule.replacement)),
    };
    match replaced {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    }
}

/// Rewrite text node `node` with [`apply_text_rules`].
///
/// Nothing is written when the result equals the current content. Returns
/// whether the node changed.
pub fn transform_text_node(
    doc: &mut Document,
    node: NodeId,
    rules: &RuleSet,
    mode: Mode,
) -> Result<bool> {
    let current = doc.text(node).ok_or(MaskerError::NotText(node))?;
    let updated = apply_text_rules(current, rules, mode);
    if updated == current {
        return Ok(false);
    }
    let updated = updated.into_owned();
    doc.set_text(node, &updated)?;
    Ok(true)
}
