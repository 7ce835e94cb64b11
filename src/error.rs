//! Error types for the `live_masker` crate.

use ego_tree::NodeId;

/// All errors that can occur while configuring the engine or driving a
/// document.
///
/// None of these are fatal to a running [`Session`](crate::Session): the
/// engine logs them at the boundary of the context they occurred in and keeps
/// processing everything else.
#[derive(Debug, thiserror::Error)]
pub enum MaskerError {
    /// A rule was configured with an empty pattern.
    #[error("Rule {index} has an empty pattern")]
    EmptyPattern { index: usize },

    /// A document location could not be parsed as a URL.
    #[error("Invalid location: {0}")]
    InvalidLocation(#[from] url::ParseError),

    /// The node id does not belong to this document.
    #[error("Node {0:?} not found")]
    NodeNotFound(NodeId),

    /// The node exists but is not an element.
    #[error("Node {0:?} is not an element")]
    NotAnElement(NodeId),

    /// The node exists but is not a text node.
    #[error("Node {0:?} is not a text node")]
    NotText(NodeId),

    /// Only `iframe` elements can carry an embedded document.
    #[error("Element <{0}> cannot embed a document")]
    NotAnEmbeddingElement(String),

    /// The element has no shadow tree attached.
    #[error("No shadow root attached to {0:?}")]
    NoShadowRoot(NodeId),

    /// The embedding element has no document attached.
    #[error("No embedded document attached")]
    NoEmbeddedDocument,

    /// The embedded document belongs to another origin.
    #[error("Cross-origin access denied: {frame} is not reachable from {origin}")]
    CrossOrigin { origin: String, frame: String },

    /// The document was unloaded and can no longer be observed.
    #[error("Document has been unloaded")]
    Unloaded,

    /// The document is already borrowed by someone else on this thread.
    #[error("Document is busy")]
    Busy,
}

/// A type alias for `Result<T, MaskerError>`.
pub type Result<T> = std::result::Result<T, MaskerError>;
