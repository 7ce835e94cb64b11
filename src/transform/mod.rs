//! Per-node transformations applied by the walker and the watcher.
//!
//! - [`text`] -- regex rules over one text node.
//! - [`element`] -- the class-specific policy for one selector match.

pub mod element;
pub mod text;

pub use element::{ElementClass, MASKED_MARKER, OVERLAY_CLASS, classify, transform_element};
pub use text::{apply_text_rules, transform_text_node};
