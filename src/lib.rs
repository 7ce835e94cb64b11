//! # live_masker
//!
//! A live content-masking engine for mutable HTML documents.
//!
//! ## Overview
//!
//! `live_masker` applies a list of user-defined [`Rule`]s to a [`Document`]
//! once when it is attached, then keeps applying them as the document
//! changes. Text rules are case-insensitive regular expressions over text
//! nodes; selector rules pick elements, which are transformed according to
//! their class (form field, media, visible text, or opaque container).
//!
//! Two directions are supported: [`Mode::Masking`] turns matches into
//! same-length runs of `*`, and [`Mode::Replacement`] swaps them for the
//! rule's replacement string.
//!
//! Shadow trees and same-origin `iframe` documents are discovered and watched
//! independently. Cross-origin documents are skipped.
//!
//! ## Quick start
//!
//! ```
//! use live_masker::{Document, MaskerBuilder, Rule};
//!
//! let masker = MaskerBuilder::new()
//!     .rule(Rule::text("ssn"))
//!     .rule(Rule::selector(".avatar"))
//!     .build()
//!     .unwrap();
//!
//! let doc = Document::parse_shared(
//!     r#"<p>ssn: 123-45-6789</p><div id="list"></div>"#,
//!     "https://example.com/account",
//! )
//! .unwrap();
//! let mut session = masker.attach(&doc);
//!
//! // The page keeps changing; the engine keeps up.
//! {
//!     let mut page = doc.borrow_mut();
//!     let list = page.query("#list").unwrap();
//!     page.append_html(list, r#"<img class="avatar" src="me.png">"#).unwrap();
//! }
//! session.settle();
//!
//! let page = doc.borrow();
//! assert_eq!(page.inner_text(page.query("p").unwrap()), "***: 123-45-6789");
//! assert_eq!(page.attr(page.query("img").unwrap(), "alt"), Some(""));
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `serde` | **yes** | (De)serialization of [`Rule`], [`Mode`] and [`MaskerConfig`]. |

pub mod config;
pub mod dom;
pub mod error;
pub mod gate;
pub mod rules;
pub mod scope;
pub mod session;
pub mod transform;
pub mod walker;
pub mod watcher;

pub use config::{Masker, MaskerBuilder, MaskerConfig};
pub use dom::{Document, DocumentKind, MutationBatch, MutationRecord, NodeId, Rect, SharedDocument};
pub use error::{MaskerError, Result};
pub use gate::PageScope;
pub use rules::{MASK_CHAR, Mode, Rule, RuleKind, RuleSet};
pub use scope::{EmbeddedDocuments, NestedScope, ShadowTrees};
pub use session::{ContextKind, ScopeContext, Session};
pub use walker::{WalkSummary, walk};
pub use watcher::{Watcher, WatcherState};
