//! Running contexts and the loop that drives them.

use std::rc::Rc;
use std::sync::Arc;

use crate::dom::SharedDocument;
use crate::error::{MaskerError, Result};
use crate::rules::{Mode, RuleSet};
use crate::walker::walk;
use crate::watcher::{TRACKED_ATTRIBUTES, Watcher};

/// Upper bound on [`Session::settle`] rounds. Transformers converge in two
/// rounds; hitting this means a host keeps rewriting what the engine writes.
pub const MAX_SETTLE_ROUNDS: usize = 32;

/// Where a context's root lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextKind {
    /// The main document.
    Document,
    /// A shadow tree attached to an element.
    ShadowRoot,
    /// A same-origin document embedded by an `iframe`.
    EmbeddedDocument,
}

/// One traversable root with its own watcher.
pub struct ScopeContext {
    kind: ContextKind,
    location: String,
    watcher: Watcher,
}

impl ScopeContext {
    /// Walk `document` once, then subscribe a watcher to it.
    pub(crate) fn wire(
        document: &SharedDocument,
        kind: ContextKind,
        rules: &Arc<RuleSet>,
        mode: Mode,
    ) -> Result<Self> {
        let mut doc = document.try_borrow_mut().map_err(|_| MaskerError::Busy)?;
        if doc.is_unloaded() {
            return Err(MaskerError::Unloaded);
        }

        let root = doc.root();
        let summary = walk(&mut doc, root, rules, mode);
        let rx = doc.observe(TRACKED_ATTRIBUTES)?;
        doc.flush_mutations();

        tracing::debug!(
            "Wired {kind:?} context at {}: {} text nodes, {} elements",
            doc.location(),
            summary.text_nodes,
            summary.elements,
        );

        Ok(Self {
            kind,
            location: doc.location().to_string(),
            watcher: Watcher::new(Rc::downgrade(document), rx, Arc::clone(rules), mode),
        })
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Location of the context's document. Shadow roots report their host's.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

/// The set of contexts wired by one [`Masker::attach`](crate::Masker::attach).
///
/// Contexts run independently. Drive them synchronously with
/// [`settle`](Self::settle) or hand them to a `LocalSet` with
/// [`run`](Self::run).
#[derive(Default)]
pub struct Session {
    contexts: Vec<ScopeContext>,
}

impl Session {
    /// A session with no contexts: nothing is watched.
    pub fn inactive() -> Self {
        Self::default()
    }

    pub(crate) fn new(contexts: Vec<ScopeContext>) -> Self {
        Self { contexts }
    }

    pub fn is_active(&self) -> bool {
        !self.contexts.is_empty()
    }

    pub fn contexts(&self) -> &[ScopeContext] {
        &self.contexts
    }

    /// Process pending changes in every context, round after round, until a
    /// round handles nothing. Contexts whose document is gone are dropped.
    ///
    /// Returns the number of rounds that did work.
    pub fn settle(&mut self) -> usize {
        let mut rounds = 0;
        loop {
            let mut handled = 0;
            for context in &mut self.contexts {
                match context.watcher.process_pending() {
                    Ok(n) => handled += n,
                    Err(e) => tracing::warn!("Context {} skipped a round: {e}", context.location),
                }
            }
            self.contexts.retain(|c| !c.watcher.is_closed());

            if handled == 0 {
                return rounds;
            }
            rounds += 1;
            if rounds >= MAX_SETTLE_ROUNDS {
                tracing::warn!("Still changing after {rounds} rounds, giving up for now");
                return rounds;
            }
        }
    }

    /// Run every context's watcher as a local task until its document is
    /// dropped or unloaded.
    ///
    /// Must be awaited inside a [`tokio::task::LocalSet`].
    pub async fn run(self) {
        tracing::info!("Session running {} contexts", self.contexts.len());
        let tasks: Vec<_> = self
            .contexts
            .into_iter()
            .map(|context| tokio::task::spawn_local(context.watcher.run()))
            .collect();

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!("Watcher task failed: {e}");
            }
        }
    }
}
