//! Re-applies rules to whatever changes in one observed document.
//!
//! A [`Watcher`] owns the receiving end of a document's mutation channel.
//! Every batch is handled in one go: added nodes are walked, and elements
//! whose tracked attributes changed are re-walked. The watcher's own edits
//! are flushed at the end of each batch, so they arrive as the next batch and
//! settle once the transformers stop writing.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::dom::{Document, MutationBatch, MutationRecord, SharedDocument};
use crate::error::{MaskerError, Result};
use crate::rules::{Mode, RuleSet};
use crate::transform::transform_text_node;
use crate::walker::walk;

/// Attribute writes that can reveal or restyle sensitive content.
pub const TRACKED_ATTRIBUTES: &[&str] = &["value", "style", "class", "src"];

/// Whether a watcher is in the middle of a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WatcherState {
    #[default]
    Idle,
    Processing,
}

pub struct Watcher {
    document: Weak<RefCell<Document>>,
    rx: mpsc::UnboundedReceiver<MutationBatch>,
    rules: Arc<RuleSet>,
    mode: Mode,
    state: WatcherState,
    closed: bool,
}

impl Watcher {
    /// Subscribe to `document` for child-list changes and
    /// [`TRACKED_ATTRIBUTES`] writes.
    pub fn attach(document: &SharedDocument, rules: Arc<RuleSet>, mode: Mode) -> Result<Self> {
        let rx = document
            .try_borrow_mut()
            .map_err(|_| MaskerError::Busy)?
            .observe(TRACKED_ATTRIBUTES)?;
        Ok(Self::new(Rc::downgrade(document), rx, rules, mode))
    }

    pub(crate) fn new(
        document: Weak<RefCell<Document>>,
        rx: mpsc::UnboundedReceiver<MutationBatch>,
        rules: Arc<RuleSet>,
        mode: Mode,
    ) -> Self {
        Self {
            document,
            rx,
            rules,
            mode,
            state: WatcherState::Idle,
            closed: false,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Returns `true` once the document is gone or stopped delivering.
    pub fn is_closed(&self) -> bool {
        self.closed || self.document.strong_count() == 0
    }

    /// Apply the rules to every node a batch touched.
    ///
    /// Added text nodes get the text rules; added elements are walked in full.
    /// An attribute record re-walks its target element. Character-data
    /// records are ignored. Records about nodes that have since been detached
    /// are skipped. Returns the number of records acted on.
    pub fn handle_batch(&mut self, doc: &mut Document, batch: MutationBatch) -> usize {
        self.state = WatcherState::Processing;
        let mut handled = 0;

        for record in batch {
            match record {
                MutationRecord::ChildList { added, .. } => {
                    for node in added {
                        if !doc.is_attached(node) {
                            continue;
                        }
                        if doc.is_text(node) {
                            if let Err(e) = transform_text_node(doc, node, &self.rules, self.mode) {
                                tracing::warn!("Failed to transform inserted text: {e}");
                            }
                        } else if doc.is_element(node) {
                            walk(doc, node, &self.rules, self.mode);
                        } else {
                            continue;
                        }
                        handled += 1;
                    }
                }
                MutationRecord::Attributes { target, .. } => {
                    if doc.is_attached(target) && doc.is_element(target) {
                        walk(doc, target, &self.rules, self.mode);
                        handled += 1;
                    }
                }
                MutationRecord::CharacterData { .. } => {}
            }
        }

        self.state = WatcherState::Idle;
        handled
    }

    /// Handle one batch against the live document and publish the resulting
    /// edits. A busy document hands the batch back untouched.
    fn dispatch(&mut self, batch: MutationBatch) -> std::result::Result<(), MutationBatch> {
        let Some(document) = self.document.upgrade() else {
            self.closed = true;
            return Ok(());
        };
        let Ok(mut doc) = document.try_borrow_mut() else {
            return Err(batch);
        };
        self.process(&mut doc, batch);
        Ok(())
    }

    fn process(&mut self, doc: &mut Document, batch: MutationBatch) {
        let records = batch.len();
        let handled = self.handle_batch(doc, batch);
        tracing::debug!("Processed batch: {handled} of {records} records acted on");
        doc.flush_mutations();
    }

    /// Run one round: publish the document's unflushed changes, then handle
    /// every batch queued at that point. Returns the number of batches
    /// handled.
    ///
    /// Fails with [`MaskerError::Busy`] while the document is borrowed
    /// elsewhere. Nothing is consumed in that case, so the next round picks
    /// the same batches up.
    pub fn process_pending(&mut self) -> Result<usize> {
        let Some(document) = self.document.upgrade() else {
            self.closed = true;
            return Ok(0);
        };
        let mut doc = document.try_borrow_mut().map_err(|_| MaskerError::Busy)?;
        doc.flush_mutations();

        let mut batches = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(batch) => batches.push(batch),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }

        let count = batches.len();
        for batch in batches {
            self.process(&mut doc, batch);
        }
        Ok(count)
    }

    /// Handle batches as they arrive until the document is dropped or
    /// unloaded. A batch that arrives while the document is busy is retried
    /// after yielding.
    pub async fn run(mut self) {
        while let Some(mut batch) = self.rx.recv().await {
            while let Err(pending) = self.dispatch(batch) {
                tracing::trace!("Document busy, retrying mutation batch");
                batch = pending;
                tokio::task::yield_now().await;
            }
        }
        self.closed = true;
        tracing::debug!("Watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;

    fn setup(body: &str, rules: Vec<Rule>, mode: Mode) -> (SharedDocument, Watcher) {
        let document = Document::parse_shared(
            &format!("<html><body>{body}</body></html>"),
            "https://example.com/",
        )
        .unwrap();
        let rules = Arc::new(RuleSet::new(rules).unwrap());
        let watcher = Watcher::attach(&document, rules, mode).unwrap();
        (document, watcher)
    }

    #[test]
    fn inserted_text_is_masked() {
        let (document, mut watcher) = setup("<div></div>", vec![Rule::text("secret")], Mode::Masking);
        {
            let mut doc = document.borrow_mut();
            let div = doc.query("div").unwrap();
            doc.append_text(div, "a secret").unwrap();
            doc.flush_mutations();
        }

        assert_eq!(watcher.process_pending().unwrap(), 1);
        let doc = document.borrow();
        assert_eq!(doc.inner_text(doc.query("div").unwrap()), "a ******");
    }

    #[test]
    fn inserted_elements_are_walked() {
        let (document, mut watcher) =
            setup("<main></main>", vec![Rule::selector(".card")], Mode::Masking);
        {
            let mut doc = document.borrow_mut();
            let main = doc.query("main").unwrap();
            doc.append_html(main, r#"<section><p class="card">4111</p></section>"#).unwrap();
            doc.flush_mutations();
        }

        watcher.process_pending().unwrap();
        let doc = document.borrow();
        assert_eq!(doc.inner_text(doc.query(".card").unwrap()), "****");
    }

    #[test]
    fn tracked_attribute_write_rewalks_target() {
        let (document, mut watcher) =
            setup(r#"<input class="email" value="">"#, vec![Rule::selector("input.email")], Mode::Masking);
        {
            let mut doc = document.borrow_mut();
            let input = doc.query("input").unwrap();
            doc.set_attribute(input, "value", "me@x.io").unwrap();
            doc.flush_mutations();
        }

        watcher.process_pending().unwrap();
        let doc = document.borrow();
        let input = doc.query("input").unwrap();
        assert_eq!(doc.form_value(input).as_deref(), Some("*******"));
    }

    #[test]
    fn own_edits_settle_after_one_echo() {
        let (document, mut watcher) =
            setup("<main></main>", vec![Rule::selector("p")], Mode::Masking);
        {
            let mut doc = document.borrow_mut();
            let main = doc.query("main").unwrap();
            doc.append_html(main, "<p>Jane</p>").unwrap();
            doc.flush_mutations();
        }

        assert_eq!(watcher.process_pending().unwrap(), 1);
        assert_eq!(watcher.process_pending().unwrap(), 1);
        assert_eq!(watcher.process_pending().unwrap(), 0);
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[test]
    fn untracked_attributes_are_not_delivered() {
        let (document, mut watcher) =
            setup("<p>x</p>", vec![Rule::selector("p")], Mode::Masking);
        {
            let mut doc = document.borrow_mut();
            let p = doc.query("p").unwrap();
            doc.set_attribute(p, "title", "hover").unwrap();
            doc.flush_mutations();
        }
        assert_eq!(watcher.process_pending().unwrap(), 0);
    }

    #[test]
    fn dropping_the_document_closes_the_watcher() {
        let (document, mut watcher) = setup("", vec![Rule::text("x")], Mode::Masking);
        assert!(!watcher.is_closed());
        drop(document);
        assert_eq!(watcher.process_pending().unwrap(), 0);
        assert!(watcher.is_closed());
    }

    #[test]
    fn busy_document_keeps_its_batches_for_the_next_round() {
        let (document, mut watcher) = setup("<div></div>", vec![Rule::text("ssn")], Mode::Masking);
        {
            let mut doc = document.borrow_mut();
            let div = doc.query("div").unwrap();
            doc.append_text(div, "ssn 1").unwrap();
            doc.flush_mutations();
            assert!(matches!(watcher.process_pending(), Err(MaskerError::Busy)));
        }

        assert_eq!(watcher.process_pending().unwrap(), 1);
        let doc = document.borrow();
        assert_eq!(doc.inner_text(doc.query("div").unwrap()), "*** 1");
    }
}
