//! Typed structural-change notifications and the per-document observer list.

use ego_tree::NodeId;
use tokio::sync::mpsc;

/// One structural or attribute change observed on a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationRecord {
    /// Children of `target` were inserted and/or removed.
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    /// Attribute `name` of element `target` was written.
    Attributes { target: NodeId, name: String },
    /// The content of text node `target` changed. Never delivered to
    /// observers; kept so callers can describe the edit precisely.
    CharacterData { target: NodeId },
}

/// Records delivered together, in the order the changes happened.
pub type MutationBatch = Vec<MutationRecord>;

struct Observer {
    tx: mpsc::UnboundedSender<MutationBatch>,
    attribute_filter: Vec<String>,
    pending: MutationBatch,
}

impl Observer {
    fn wants(&self, record: &MutationRecord) -> bool {
        match record {
            MutationRecord::ChildList { .. } => true,
            MutationRecord::Attributes { name, .. } => {
                self.attribute_filter.is_empty() || self.attribute_filter.iter().any(|a| a == name)
            }
            MutationRecord::CharacterData { .. } => false,
        }
    }
}

/// Observers registered on one document.
///
/// Records are queued per observer at the moment the change happens, so an
/// observer registered later never sees earlier changes. Queued records are
/// handed over as one batch by [`flush`](Self::flush).
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: Vec<Observer>,
}

impl ObserverRegistry {
    pub(crate) fn subscribe(
        &mut self,
        attribute_filter: &[&str],
    ) -> mpsc::UnboundedReceiver<MutationBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(Observer {
            tx,
            attribute_filter: attribute_filter.iter().map(|a| a.to_string()).collect(),
            pending: Vec::new(),
        });
        rx
    }

    pub(crate) fn record(&mut self, record: MutationRecord) {
        for observer in &mut self.observers {
            if observer.wants(&record) {
                observer.pending.push(record.clone());
            }
        }
    }

    /// Deliver every pending batch. Observers whose receiver is gone are
    /// dropped. Returns the number of batches delivered.
    pub(crate) fn flush(&mut self) -> usize {
        let mut delivered = 0;
        self.observers.retain_mut(|observer| {
            if observer.pending.is_empty() {
                return !observer.tx.is_closed();
            }
            let batch = std::mem::take(&mut observer.pending);
            match observer.tx.send(batch) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    pub(crate) fn clear(&mut self) {
        self.observers.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ego_tree::Tree;

    fn ids() -> (NodeId, NodeId) {
        let mut tree = Tree::new(0);
        let a = tree.root_mut().append(1).id();
        let b = tree.root_mut().append(2).id();
        (a, b)
    }

    #[test]
    fn attribute_filter_drops_untracked_names() {
        let (a, _) = ids();
        let mut registry = ObserverRegistry::default();
        let mut rx = registry.subscribe(&["style"]);

        registry.record(MutationRecord::Attributes { target: a, name: "alt".into() });
        registry.record(MutationRecord::Attributes { target: a, name: "style".into() });
        registry.record(MutationRecord::CharacterData { target: a });
        assert_eq!(registry.flush(), 1);

        let batch = rx.try_recv().unwrap();
        assert_eq!(
            batch,
            vec![MutationRecord::Attributes { target: a, name: "style".into() }]
        );
    }

    #[test]
    fn late_subscribers_miss_earlier_records() {
        let (a, b) = ids();
        let mut registry = ObserverRegistry::default();
        let mut early = registry.subscribe(&[]);
        registry.record(MutationRecord::ChildList { target: a, added: vec![b], removed: vec![] });
        let mut late = registry.subscribe(&[]);

        registry.flush();
        assert!(early.try_recv().is_ok());
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let (a, _) = ids();
        let mut registry = ObserverRegistry::default();
        let rx = registry.subscribe(&[]);
        drop(rx);
        registry.record(MutationRecord::ChildList { target: a, added: vec![], removed: vec![] });
        assert_eq!(registry.flush(), 0);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn empty_flush_delivers_nothing() {
        let mut registry = ObserverRegistry::default();
        let mut rx = registry.subscribe(&[]);
        assert_eq!(registry.flush(), 0);
        assert!(rx.try_recv().is_err());
    }
}
