//! One-shot pass over a subtree: text rules first, then selector rules.

use crate::dom::{Document, NodeId};
use crate::rules::{Mode, RuleSet};
use crate::transform::{transform_element, transform_text_node};

/// What a [`walk`] touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Text nodes whose content changed.
    pub text_nodes: usize,
    /// Elements a selector rule matched and a class policy was applied to.
    pub elements: usize,
}

/// Apply `rules` to the subtree at `root`.
///
/// Walking a document's tree root walks its content root instead, so text
/// in `<head>` (titles, scripts) is left alone. Per-node failures are logged
/// and skipped; the walk always visits everything it can.
pub fn walk(doc: &mut Document, root: NodeId, rules: &RuleSet, mode: Mode) -> WalkSummary {
    let mut summary = WalkSummary::default();
    let text_root = if root == doc.root() {
        doc.content_root()
    } else {
        root
    };

    if doc.is_text(text_root) {
        summary.text_nodes += text_node(doc, text_root, rules, mode);
    } else {
        for node in doc.text_nodes(text_root) {
            summary.text_nodes += text_node(doc, node, rules, mode);
        }
    }

    if !doc.is_text(root) {
        // Each element takes the first selector rule that matches it, so
        // overlapping rules never fight over the same element.
        let matched: Vec<_> = doc
            .elements_within(root)
            .into_iter()
            .filter_map(|el| {
                rules
                    .selector_rules()
                    .iter()
                    .find(|rule| rule.selector.as_ref().is_some_and(|s| doc.matches(el, s)))
                    .map(|rule| (el, rule))
            })
            .collect();

        for (el, rule) in matched {
            // An earlier match may have replaced this element's subtree.
            if !doc.is_attached(el) {
                continue;
            }
            match transform_element(doc, el, &rule.replacement, mode) {
                Ok(Some(_)) => summary.elements += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to transform element for {}: {e}", rule.pattern),
            }
        }
    }

    summary
}

fn text_node(doc: &mut Document, node: NodeId, rules: &RuleSet, mode: Mode) -> usize {
    match transform_text_node(doc, node, rules, mode) {
        Ok(changed) => usize::from(changed),
        Err(e) => {
            tracing::warn!("Failed to transform text node: {e}");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;

    fn doc(body: &str) -> Document {
        Document::parse(
            &format!("<html><head><title>ssn</title></head><body>{body}</body></html>"),
            "https://example.com/",
        )
        .unwrap()
    }

    #[test]
    fn walks_text_then_selectors() {
        let mut d = doc(r#"<p>SSN: 123</p><input class="email" value="a@b.com">"#);
        let rules = RuleSet::new(vec![Rule::text("ssn"), Rule::selector("input.email")]).unwrap();
        let root = d.root();
        let summary = walk(&mut d, root, &rules, Mode::Masking);

        assert_eq!(summary, WalkSummary { text_nodes: 1, elements: 1 });
        assert_eq!(d.inner_text(d.query("p").unwrap()), "***: 123");
        assert_eq!(d.form_value(d.query("input").unwrap()).as_deref(), Some("*******"));
    }

    #[test]
    fn head_text_is_left_alone() {
        let mut d = doc("<p>ssn</p>");
        let rules = RuleSet::new(vec![Rule::text("ssn")]).unwrap();
        let root = d.root();
        walk(&mut d, root, &rules, Mode::Masking);
        assert_eq!(d.inner_text(d.query("title").unwrap()), "ssn");
    }

    #[test]
    fn nested_matches_are_skipped_once_detached() {
        let mut d = doc(r#"<div class="pii">Jane <span class="pii">Doe</span></div>"#);
        let rules = RuleSet::new(vec![Rule::selector(".pii")]).unwrap();
        let root = d.root();
        let summary = walk(&mut d, root, &rules, Mode::Masking);

        assert_eq!(summary.elements, 1);
        assert_eq!(d.inner_text(d.query("div").unwrap()), "********");
    }

    #[test]
    fn walking_a_text_node_applies_text_rules_only() {
        let mut d = doc("<p>token</p>");
        let rules = RuleSet::new(vec![Rule::text("token")]).unwrap();
        let text = d.text_nodes(d.query("p").unwrap())[0];
        let summary = walk(&mut d, text, &rules, Mode::Masking);
        assert_eq!(summary.text_nodes, 1);
        assert_eq!(d.text(text), Some("*****"));
    }

    #[test]
    fn first_matching_rule_wins_for_overlapping_selectors() {
        let mut d = doc(r#"<input class="email" value="a@b.com"><input value="x">"#);
        let rules = RuleSet::new(vec![
            Rule::selector("input").with_replacement("[x]"),
            Rule::selector("input.email").with_replacement("[email]"),
        ])
        .unwrap();
        let root = d.root();
        let summary = walk(&mut d, root, &rules, Mode::Replacement);

        assert_eq!(summary.elements, 2);
        let email = d.query("input.email").unwrap();
        assert_eq!(d.form_value(email).as_deref(), Some("[x]"));

        let mut rx = d.observe(&[]).unwrap();
        walk(&mut d, root, &rules, Mode::Replacement);
        assert_eq!(d.form_value(email).as_deref(), Some("[x]"));
        assert_eq!(d.flush_mutations(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn second_walk_changes_nothing() {
        let mut d = doc(r#"<p class="name">Jane</p><div id="map"></div><img src="a.png">"#);
        let rules = RuleSet::new(vec![
            Rule::text("jane"),
            Rule::selector("#map"),
            Rule::selector("img"),
        ])
        .unwrap();
        let root = d.root();
        walk(&mut d, root, &rules, Mode::Masking);
        let once = d.html();
        let mut rx = d.observe(&[]).unwrap();
        walk(&mut d, root, &rules, Mode::Masking);

        assert_eq!(d.html(), once);
        assert_eq!(d.flush_mutations(), 0);
        assert!(rx.try_recv().is_err());
    }
}
