//! treelens
//!
//! Diagnostic mirror of a live element tree, plus a flame graph of the
//! per-element timings of a layout pass.
//!
//! - [`tree::MirrorTree`] shadows the logical or visual relationship of a
//!   [`live::LiveTree`] and follows its change feed incrementally.
//! - [`flame`] lays a mirror out as duration-proportional bars and
//!   [`render`] draws them on any [`render::DrawingSurface`].

pub mod collection;
pub mod color;
pub mod config;
pub mod flame;
pub mod inspector;
pub mod live;
pub mod logging;
pub mod performance;
pub mod render;
pub mod scene;
pub mod timing;
pub mod tree;

pub use color::{node_color, Color};
pub use config::Config;
pub use flame::{Bounds, FlameBar, FlameLayout, Rect};
pub use inspector::{Inspector, Tab};
pub use live::{ChangeHub, ElementId, LiveTree, TreeKind};
pub use render::{render, DrawingSurface};
pub use scene::Scene;
pub use timing::{LayoutPass, Timings};
pub use tree::{MirrorTree, SyncReport, TreeNode};

use indextree::NodeId;

/// treelens error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown element {0}")]
    UnknownElement(ElementId),

    #[error("Element {element} cannot be mirrored in the {kind} tree")]
    NotMirrorable { element: ElementId, kind: TreeKind },

    #[error("Child index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Element {0} already has a parent")]
    AlreadyParented(ElementId),

    #[error("Element {0} has no classes")]
    NotTaggable(ElementId),

    #[error("Mirror node {0:?} is no longer part of the tree")]
    StaleNode(NodeId),

    #[error("Element {0} is not reachable from the mirrored root")]
    StaleElement(ElementId),

    #[error("The {0} tab shows no tree")]
    NoTree(Tab),

    #[error(transparent)]
    Arena(#[from] indextree::NodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
