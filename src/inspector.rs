//! Diagnostics window model: both tree mirrors of one root plus the
//! performance page, with a shared selection that follows tab switches.

use indextree::NodeId;
use std::fmt;

use crate::config::FlameStyle;
use crate::flame::{Bounds, FlameLayout};
use crate::live::{ElementId, LiveTree, TreeKind};
use crate::performance::PerformancePage;
use crate::render::DrawingSurface;
use crate::timing::{LayoutPass, TimingMode, Timings};
use crate::tree::{MirrorTree, SyncReport};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Logical,
    Visual,
    Performance,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Logical, Tab::Visual, Tab::Performance];

    pub fn title(self) -> &'static str {
        match self {
            Tab::Logical => "Logical Tree",
            Tab::Visual => "Visual Tree",
            Tab::Performance => "Performance",
        }
    }

    /// Tree shown by this tab, if it is a tree tab.
    pub fn tree_kind(self) -> Option<TreeKind> {
        match self {
            Tab::Logical => Some(TreeKind::Logical),
            Tab::Visual => Some(TreeKind::Visual),
            Tab::Performance => None,
        }
    }

    pub fn next(self) -> Tab {
        match self {
            Tab::Logical => Tab::Visual,
            Tab::Visual => Tab::Performance,
            Tab::Performance => Tab::Logical,
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug)]
pub struct Inspector {
    root: ElementId,
    logical: MirrorTree,
    visual: MirrorTree,
    performance: PerformancePage,
    tab: Tab,
    selected: Option<ElementId>,
}

impl Inspector {
    /// Mirror `root` in both trees, with the top level expanded.
    pub fn new<T: LiveTree + ?Sized>(tree: &T, root: ElementId, mode: TimingMode) -> Result<Self> {
        let mut inspector = Self {
            root,
            logical: MirrorTree::logical(tree, root)?,
            visual: MirrorTree::visual(tree, root)?,
            performance: PerformancePage::new(mode),
            tab: Tab::default(),
            selected: None,
        };

        for kind in [TreeKind::Logical, TreeKind::Visual] {
            let mirror = inspector.mirror_mut(kind);
            if let Some(top) = mirror.root() {
                mirror.expand(tree, top)?;
            }
        }

        tracing::info!("Inspecting {} ({} elements mirrored)", root, inspector.visual.len());
        Ok(inspector)
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn selected(&self) -> Option<ElementId> {
        self.selected
    }

    pub fn mirror(&self, kind: TreeKind) -> &MirrorTree {
        match kind {
            TreeKind::Logical => &self.logical,
            TreeKind::Visual => &self.visual,
        }
    }

    pub fn mirror_mut(&mut self, kind: TreeKind) -> &mut MirrorTree {
        match kind {
            TreeKind::Logical => &mut self.logical,
            TreeKind::Visual => &mut self.visual,
        }
    }

    /// Mirror behind the current tab; `None` on the performance tab.
    pub fn current_mirror(&self) -> Option<&MirrorTree> {
        self.tab.tree_kind().map(|kind| self.mirror(kind))
    }

    pub fn performance(&self) -> &PerformancePage {
        &self.performance
    }

    pub fn performance_mut(&mut self) -> &mut PerformancePage {
        &mut self.performance
    }

    /// Apply every pending live-tree notification to whichever mirror owns
    /// its subscription.
    pub fn sync<T: LiveTree + ?Sized>(&mut self, tree: &T) -> SyncReport {
        let mut report = SyncReport::default();
        let pending = tree
            .hub()
            .drain_where(|n| self.logical.owns(n) || self.visual.owns(n));
        for notification in pending {
            let outcome = match self.logical.handle(tree, &notification) {
                Ok(false) => self.visual.handle(tree, &notification),
                handled => handled,
            };
            report.record(outcome);
        }

        if report.applied > 0 {
            tracing::debug!(
                "Synced {} changes ({} ignored, {} failed)",
                report.applied,
                report.ignored,
                report.errors.len()
            );
        }
        report
    }

    /// Select `element` in the current tree, expanding its ancestors.
    pub fn select<T: LiveTree + ?Sized>(&mut self, tree: &T, element: ElementId) -> Result<NodeId> {
        let kind = self.tab.tree_kind().ok_or(Error::NoTree(self.tab))?;
        let node = self.mirror_mut(kind).select(tree, element)?;
        self.selected = Some(element);
        Ok(node)
    }

    /// Select the element behind a node of the current tree.
    pub fn select_node(&mut self, node: NodeId) -> Result<ElementId> {
        let element = self
            .current_mirror()
            .and_then(|mirror| mirror.node(node))
            .map(|data| data.element())
            .ok_or(Error::StaleNode(node))?;
        self.selected = Some(element);
        Ok(element)
    }

    /// Switch tabs and carry the selection over to the new tree.
    ///
    /// The switch always happens. The returned error says the selected
    /// element could not be found in the new tree; the selection is kept.
    pub fn set_tab<T: LiveTree + ?Sized>(&mut self, tree: &T, tab: Tab) -> Result<()> {
        self.tab = tab;
        let (Some(kind), Some(element)) = (tab.tree_kind(), self.selected) else {
            return Ok(());
        };

        match self.mirror_mut(kind).select(tree, element) {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::debug!("Selection {} not carried to the {} tree: {}", element, kind, err);
                Err(err)
            }
        }
    }

    pub fn refresh_performance<E: LayoutPass + ?Sized>(&mut self, engine: &mut E) -> &Timings {
        self.performance.refresh(engine)
    }

    /// Flame graph of the visual tree.
    pub fn render_performance<T, S>(&mut self, tree: &T, bounds: Bounds, style: &FlameStyle, surface: &mut S) -> FlameLayout
    where
        T: LiveTree + ?Sized,
        S: DrawingSurface + ?Sized,
    {
        self.performance
            .render(&mut self.visual, tree, bounds, style, surface)
    }

    pub fn dispose(&mut self) {
        self.logical.dispose();
        self.visual.dispose();
        self.selected = None;
    }
}
