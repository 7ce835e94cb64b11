//! Discovery of nested contexts: shadow trees and same-origin embedded
//! documents.
//!
//! Both kinds are described by a [`NestedScope`] and driven by the same
//! [`traverse`]. Every nested context is wired inside its own failure
//! boundary, so one broken context never stops its siblings.

use std::sync::Arc;

use crate::dom::{Document, NodeId, SharedDocument};
use crate::error::{MaskerError, Result};
use crate::rules::{Mode, RuleSet};
use crate::session::{ContextKind, ScopeContext};

/// A way one document can host others.
pub trait NestedScope {
    /// Kind given to the contexts this scope discovers.
    fn kind(&self) -> ContextKind;

    /// Elements that may host a nested context.
    fn enumerate(&self, doc: &Document) -> Vec<NodeId> {
        doc.elements()
    }

    /// Returns `true` if `el` hosts a nested context, reachable or not.
    fn has_nested_context(&self, doc: &Document, el: NodeId) -> bool;

    /// The nested context hosted by `el`.
    fn nested_context(&self, doc: &Document, el: NodeId) -> Result<SharedDocument>;
}

/// Shadow trees attached to any element.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShadowTrees;

impl NestedScope for ShadowTrees {
    fn kind(&self) -> ContextKind {
        ContextKind::ShadowRoot
    }

    fn has_nested_context(&self, doc: &Document, el: NodeId) -> bool {
        doc.shadow_root(el).is_some()
    }

    fn nested_context(&self, doc: &Document, el: NodeId) -> Result<SharedDocument> {
        doc.shadow_root(el).ok_or(MaskerError::NoShadowRoot(el))
    }
}

/// Documents embedded by `iframe` elements.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedDocuments;

impl NestedScope for EmbeddedDocuments {
    fn kind(&self) -> ContextKind {
        ContextKind::EmbeddedDocument
    }

    fn enumerate(&self, doc: &Document) -> Vec<NodeId> {
        doc.query_all("iframe")
    }

    fn has_nested_context(&self, doc: &Document, el: NodeId) -> bool {
        doc.has_embedded_document(el)
    }

    fn nested_context(&self, doc: &Document, el: NodeId) -> Result<SharedDocument> {
        doc.content_document(el)
    }
}

/// Wire every context `scope` finds in `root` and push it to `out`.
///
/// Each wired context is then searched for shadow trees of its own, to any
/// depth. Unreachable cross-origin documents are skipped quietly; any other
/// failure is logged and skips only that context.
pub fn traverse<S: NestedScope>(
    root: &SharedDocument,
    scope: &S,
    rules: &Arc<RuleSet>,
    mode: Mode,
    out: &mut Vec<ScopeContext>,
) {
    let nested: Vec<Result<SharedDocument>> = {
        let Ok(doc) = root.try_borrow() else {
            tracing::warn!("Skipping {:?} discovery: {}", scope.kind(), MaskerError::Busy);
            return;
        };
        scope
            .enumerate(&doc)
            .into_iter()
            .filter(|el| scope.has_nested_context(&doc, *el))
            .map(|el| scope.nested_context(&doc, el))
            .collect()
    };

    for found in nested {
        let context = found.and_then(|document| {
            ScopeContext::wire(&document, scope.kind(), rules, mode).map(|ctx| (document, ctx))
        });
        match context {
            Ok((document, ctx)) => {
                out.push(ctx);
                traverse(&document, &ShadowTrees, rules, mode, out);
            }
            Err(MaskerError::CrossOrigin { origin, frame }) => {
                tracing::trace!("Skipping {frame} embedded in {origin}: cross-origin");
            }
            Err(e) => tracing::warn!("Failed to wire {:?} context: {e}", scope.kind()),
        }
    }
}
