use indextree::{Arena, NodeId};
use std::collections::HashMap;

use crate::collection::TreeNodeCollection;
use crate::live::{Change, ElementId, ElementInfo, LiveTree, Notification, Subscription, SubscriptionId, Topic, TreeKind};
use crate::{Error, Result};

/// Mirror of one live element.
#[derive(Debug)]
pub struct TreeNode {
    element: ElementId,
    type_name: String,
    name: Option<String>,
    /// Class summary, `"(a b)"` or empty
    classes: String,
    tooltip: String,
    /// Descendants in the mirrored relationship when this node was created.
    subtree_size: u64,
    is_expanded: bool,
    pub(crate) children: TreeNodeCollection,
    pub(crate) class_watch: Option<Subscription>,
}

impl TreeNode {
    fn new(element: ElementId, info: ElementInfo, subtree_size: u64) -> Self {
        let mut node = Self {
            element,
            type_name: info.type_name,
            name: info.name,
            classes: String::new(),
            tooltip: String::new(),
            subtree_size,
            is_expanded: false,
            children: TreeNodeCollection::default(),
            class_watch: None,
        };
        node.update_classes(info.classes.as_deref());
        node.update_tooltip();
        node
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn classes(&self) -> &str {
        &self.classes
    }

    pub fn tooltip(&self) -> &str {
        &self.tooltip
    }

    pub fn subtree_size(&self) -> u64 {
        self.subtree_size
    }

    pub fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    /// Whether class changes of the element still reach this mirror.
    pub fn is_tracking_classes(&self) -> bool {
        self.class_watch.is_some()
    }

    pub fn collection(&self) -> &TreeNodeCollection {
        &self.children
    }

    /// One-line label used by the tree views.
    pub fn label(&self) -> String {
        let mut label = self.type_name.clone();
        if let Some(name) = &self.name {
            label.push_str(&format!(" #{}", name));
        }
        if !self.classes.is_empty() {
            label.push(' ');
            label.push_str(&self.classes);
        }
        label
    }

    fn update_classes(&mut self, classes: Option<&[String]>) {
        self.classes = match classes {
            Some(classes) if !classes.is_empty() => format!("({})", classes.join(" ")),
            _ => String::new(),
        };
    }

    fn update_tooltip(&mut self) {
        let mut tooltip = format!("{}\n", self.type_name);
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            tooltip.push_str(&format!("Name: {}\n", name));
        }
        tooltip.push_str(&format!("Subtree Size: {}", self.subtree_size));
        self.tooltip = tooltip;
    }
}

/// What a subscription owned by a mirror node feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Children(NodeId),
    Element(NodeId),
}

/// Outcome of applying a batch of notifications.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub applied: usize,
    /// Notifications whose subscription was released before they were
    /// applied, e.g. by an earlier removal in the same batch.
    pub ignored: usize,
    pub errors: Vec<Error>,
}

impl SyncReport {
    pub fn record(&mut self, outcome: Result<bool>) {
        match outcome {
            Ok(true) => self.applied += 1,
            Ok(false) => self.ignored += 1,
            Err(err) => {
                tracing::warn!("Notification not applied: {}", err);
                self.errors.push(err);
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Arena-backed mirror of one relationship of a live tree.
///
/// Nodes own their children through the arena; the parent link is an index
/// used for navigation only.
#[derive(Debug)]
pub struct MirrorTree {
    kind: TreeKind,
    pub(crate) arena: Arena<TreeNode>,
    root: Option<NodeId>,
    pub(crate) routes: HashMap<SubscriptionId, Route>,
}

impl MirrorTree {
    /// Mirror `element` and, lazily, everything below it in `kind`.
    pub fn create<T: LiveTree + ?Sized>(tree: &T, element: ElementId, kind: TreeKind) -> Result<Self> {
        let mut mirror = Self {
            kind,
            arena: Arena::new(),
            root: None,
            routes: HashMap::new(),
        };

        let root = mirror
            .create_node(tree, element)
            .ok_or(Error::NotMirrorable { element, kind })?;
        mirror.root = Some(root);

        tracing::debug!("Created {} mirror rooted at {}", kind, element);
        Ok(mirror)
    }

    pub fn logical<T: LiveTree + ?Sized>(tree: &T, element: ElementId) -> Result<Self> {
        Self::create(tree, element, TreeKind::Logical)
    }

    pub fn visual<T: LiveTree + ?Sized>(tree: &T, element: ElementId) -> Result<Self> {
        Self::create(tree, element, TreeKind::Visual)
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    /// Root node, `None` once disposed.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn is_disposed(&self) -> bool {
        self.root.is_none()
    }

    /// Whether `id` still names a node of this mirror. Arena slots are
    /// reused, so the id's stamp is checked and not just the slot.
    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some() && !id.is_removed(&self.arena)
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        if !self.contains(id) {
            return None;
        }
        self.arena.get(id).map(|node| node.get())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut TreeNode> {
        if !self.contains(id) {
            return Err(Error::StaleNode(id));
        }
        self.arena
            .get_mut(id)
            .map(|node| node.get_mut())
            .ok_or(Error::StaleNode(id))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        if !self.contains(id) {
            return None;
        }
        self.arena.get(id).and_then(|node| node.parent())
    }

    /// Currently mirrored children of `id`, in live order. Empty until the
    /// node's collection is materialized.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .map(|_| id)
            .into_iter()
            .flat_map(move |id| id.children(&self.arena))
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.children(id).count()
    }

    /// Number of mirror nodes currently alive.
    pub fn len(&self) -> usize {
        self.root
            .map(|root| root.descendants(&self.arena).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Breadth-first level of `id` below the root.
    pub fn depth(&self, id: NodeId) -> Option<usize> {
        self.node(id)?;
        Some(id.ancestors(&self.arena).count() - 1)
    }

    /// Whether expanding `id` would show anything.
    pub fn may_have_children<T: LiveTree + ?Sized>(&self, tree: &T, id: NodeId) -> bool {
        match self.node(id) {
            Some(node) if node.children.is_materialized() => self.child_count(id) > 0,
            Some(node) => !tree.children(node.element, self.kind).is_empty(),
            None => false,
        }
    }

    pub(crate) fn create_node<T: LiveTree + ?Sized>(&mut self, tree: &T, element: ElementId) -> Option<NodeId> {
        let Some(info) = tree.describe(element) else {
            tracing::debug!("Skipping {}: unknown to the live tree", element);
            return None;
        };
        if !self.kind.accepts(&info) {
            tracing::debug!(
                "Skipping {} ({}): not mirrorable in the {} tree",
                element,
                info.type_name,
                self.kind
            );
            return None;
        }

        let subtree_size = self.kind.descendant_count(tree, element);
        let class_watch = info
            .is_taggable()
            .then(|| tree.hub().subscribe(element, Topic::Element));

        let id = self.arena.new_node(TreeNode::new(element, info, subtree_size));
        if let Some(watch) = class_watch {
            self.routes.insert(watch.id(), Route::Element(id));
            self.arena[id].get_mut().class_watch = Some(watch);
        }
        Some(id)
    }

    /// Apply one notification if it belongs to this mirror.
    ///
    /// Returns `Ok(false)` for notifications owned by someone else.
    pub fn handle<T: LiveTree + ?Sized>(&mut self, tree: &T, notification: &Notification) -> Result<bool> {
        let Some(route) = self.routes.get(&notification.subscription).copied() else {
            return Ok(false);
        };

        tracing::trace!(
            "{} mirror: {:?} on {}",
            self.kind,
            notification.change,
            notification.element
        );
        match route {
            Route::Children(node) => self.apply_child_change(tree, node, &notification.change)?,
            Route::Element(node) => self.apply_element_change(tree, node, &notification.change)?,
        }
        Ok(true)
    }

    /// Whether a notification is addressed to a subscription of this mirror.
    pub fn owns(&self, notification: &Notification) -> bool {
        self.routes.contains_key(&notification.subscription)
    }

    /// Take this mirror's queued notifications and apply them in order.
    /// Notifications for other observers of the hub stay queued.
    pub fn sync<T: LiveTree + ?Sized>(&mut self, tree: &T) -> SyncReport {
        let mut report = SyncReport::default();
        let pending = tree.hub().drain_where(|notification| self.owns(notification));
        for notification in pending {
            report.record(self.handle(tree, &notification));
        }
        report
    }

    fn apply_element_change<T: LiveTree + ?Sized>(&mut self, tree: &T, node: NodeId, change: &Change) -> Result<()> {
        match change {
            Change::ClassesChanged => match tree.describe(self.node_mut(node)?.element()) {
                Some(info) => {
                    let data = self.node_mut(node)?;
                    data.name = info.name;
                    data.update_classes(info.classes.as_deref());
                    data.update_tooltip();
                }
                None => self.stop_class_tracking(node)?,
            },
            Change::Detached => self.stop_class_tracking(node)?,
            other => tracing::debug!("Ignoring {:?} on element route", other),
        }
        Ok(())
    }

    fn stop_class_tracking(&mut self, node: NodeId) -> Result<()> {
        if let Some(watch) = self.node_mut(node)?.class_watch.take() {
            self.routes.remove(&watch.id());
        }
        Ok(())
    }

    /// First mirrored node of `element`, searching materialized nodes only.
    pub fn find(&self, element: ElementId) -> Option<NodeId> {
        let root = self.root?;
        root.descendants(&self.arena)
            .find(|id| self.arena[*id].get().element == element)
    }

    /// Locate `element`, materializing and expanding its ancestors on the way.
    ///
    /// Fails with [`Error::StaleElement`] if the element is not under the
    /// mirrored root, or if the mirror has not caught up with the live tree.
    pub fn select<T: LiveTree + ?Sized>(&mut self, tree: &T, element: ElementId) -> Result<NodeId> {
        let root = self.root.ok_or(Error::StaleElement(element))?;
        let root_element = self.arena[root].get().element;

        let mut chain = vec![element];
        let mut cursor = element;
        while cursor != root_element {
            cursor = tree
                .parent(cursor, self.kind)
                .ok_or(Error::StaleElement(element))?;
            chain.push(cursor);
        }

        let mut current = root;
        for step in chain.iter().rev().skip(1) {
            self.materialize(tree, current)?;
            self.node_mut(current)?.is_expanded = true;
            current = self
                .children(current)
                .find(|child| self.arena[*child].get().element == *step)
                .ok_or(Error::StaleElement(element))?;
        }
        Ok(current)
    }

    /// Materialize `id` and mark it expanded.
    pub fn expand<T: LiveTree + ?Sized>(&mut self, tree: &T, id: NodeId) -> Result<()> {
        self.materialize(tree, id)?;
        self.node_mut(id)?.is_expanded = true;
        Ok(())
    }

    /// Mark `id` collapsed. Its children stay mirrored.
    pub fn collapse(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.is_expanded = false;
        Ok(())
    }

    pub fn toggle<T: LiveTree + ?Sized>(&mut self, tree: &T, id: NodeId) -> Result<()> {
        let expanded = self.node(id).ok_or(Error::StaleNode(id))?.is_expanded;
        if expanded {
            self.collapse(id)
        } else {
            self.expand(tree, id)
        }
    }

    /// Rows of a tree view: every node reachable through expanded nodes,
    /// depth first, with its indentation level.
    pub fn visible_rows(&self) -> Vec<(NodeId, usize)> {
        let mut rows = Vec::new();
        let Some(root) = self.root else {
            return rows;
        };

        let mut stack = vec![(root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            rows.push((id, depth));
            if self.node(id).is_some_and(TreeNode::is_expanded) {
                let children: Vec<NodeId> = self.children(id).collect();
                stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
            }
        }
        rows
    }

    /// Release every subscription and drop all mirror nodes.
    pub fn dispose(&mut self) {
        if let Some(root) = self.root.take() {
            self.dispose_subtree(root);
            tracing::debug!("Disposed {} mirror", self.kind);
        }
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Scene;

    fn window() -> (Scene, ElementId, ElementId) {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let panel = scene.create_control("StackPanel");
        let button = scene.create_control("Button");
        scene.set_name(button, "ok").unwrap();
        scene.push_child(root, TreeKind::Logical, panel).unwrap();
        scene.push_child(panel, TreeKind::Logical, button).unwrap();
        (scene, panel, button)
    }

    #[test]
    fn test_tooltip_format() {
        let (scene, panel, button) = window();
        let mut mirror = MirrorTree::logical(&scene, scene.root()).unwrap();
        let root = mirror.root().unwrap();
        assert_eq!(mirror.node(root).unwrap().tooltip(), "Window\nSubtree Size: 2");

        let button_node = mirror.select(&scene, button).unwrap();
        let node = mirror.node(button_node).unwrap();
        assert_eq!(node.tooltip(), "Button\nName: ok\nSubtree Size: 0");
        assert!(node.tooltip().starts_with(node.type_name()));
        assert!(node.tooltip().ends_with(&node.subtree_size().to_string()));

        let panel_node = mirror.find(panel).unwrap();
        assert!(mirror.node(panel_node).unwrap().tooltip().ends_with("Subtree Size: 1"));
    }

    #[test]
    fn test_classes_follow_live_element() {
        let (mut scene, panel, _) = window();
        scene.add_class(panel, "main").unwrap();

        let mut mirror = MirrorTree::logical(&scene, scene.root()).unwrap();
        let panel_node = mirror.select(&scene, panel).unwrap();
        assert_eq!(mirror.node(panel_node).unwrap().classes(), "(main)");

        scene.add_class(panel, "wide").unwrap();
        let report = mirror.sync(&scene);
        assert_eq!(report.applied, 1);
        assert_eq!(mirror.node(panel_node).unwrap().classes(), "(main wide)");

        scene.remove_class(panel, "main").unwrap();
        scene.remove_class(panel, "wide").unwrap();
        mirror.sync(&scene);
        assert_eq!(mirror.node(panel_node).unwrap().classes(), "");
    }

    #[test]
    fn test_detach_stops_class_tracking() {
        let (mut scene, panel, button) = window();
        let mut mirror = MirrorTree::create(&scene, panel, TreeKind::Logical).unwrap();
        let root = mirror.root().unwrap();
        mirror.materialize(&scene, root).unwrap();
        let button_node = mirror.find(button).unwrap();
        assert!(mirror.node(button_node).unwrap().is_tracking_classes());

        // detach the panel from the window: panel and button get Detached
        scene.remove_child(scene.root(), TreeKind::Logical, 0).unwrap();
        mirror.sync(&scene);
        assert!(!mirror.node(root).unwrap().is_tracking_classes());
        assert!(!mirror.node(button_node).unwrap().is_tracking_classes());

        scene.add_class(button, "late").unwrap();
        mirror.sync(&scene);
        assert_eq!(mirror.node(button_node).unwrap().classes(), "");
    }

    #[test]
    fn test_variants_count_their_own_relationship() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let border = scene.create_visual("Border");
        let panel = scene.create_control("StackPanel");
        scene.push_child(root, TreeKind::Visual, border).unwrap();
        scene.push_child(border, TreeKind::Visual, panel).unwrap();
        scene.push_child(root, TreeKind::Logical, panel).unwrap();

        let logical = MirrorTree::logical(&scene, root).unwrap();
        let visual = MirrorTree::visual(&scene, root).unwrap();
        assert_eq!(logical.node(logical.root().unwrap()).unwrap().subtree_size(), 1);
        assert_eq!(visual.node(visual.root().unwrap()).unwrap().subtree_size(), 2);
    }

    #[test]
    fn test_plain_visual_is_not_a_logical_root() {
        let mut scene = Scene::new("Window");
        let border = scene.create_visual("Border");
        assert!(matches!(
            MirrorTree::logical(&scene, border),
            Err(Error::NotMirrorable { kind: TreeKind::Logical, .. })
        ));
        let visual = MirrorTree::visual(&scene, border).unwrap();
        assert!(!visual.node(visual.root().unwrap()).unwrap().is_tracking_classes());
    }

    #[test]
    fn test_select_reports_stale_elements() {
        let (mut scene, _, _) = window();
        let mut mirror = MirrorTree::logical(&scene, scene.root()).unwrap();

        let stray = scene.create_control("Button");
        assert!(matches!(mirror.select(&scene, stray), Err(Error::StaleElement(_))));

        // live tree ahead of the mirror: not synced yet
        let root = mirror.root().unwrap();
        mirror.materialize(&scene, root).unwrap();
        let late = scene.create_control("TextBox");
        scene.push_child(scene.root(), TreeKind::Logical, late).unwrap();
        assert!(matches!(mirror.select(&scene, late), Err(Error::StaleElement(_))));

        mirror.sync(&scene);
        let node = mirror.select(&scene, late).unwrap();
        assert_eq!(mirror.node(node).unwrap().element(), late);
    }

    #[test]
    fn test_visible_rows_follow_expansion() {
        let (scene, panel, button) = window();
        let mut mirror = MirrorTree::logical(&scene, scene.root()).unwrap();
        let root = mirror.root().unwrap();
        assert_eq!(mirror.visible_rows(), vec![(root, 0)]);

        let button_node = mirror.select(&scene, button).unwrap();
        let panel_node = mirror.find(panel).unwrap();
        assert_eq!(
            mirror.visible_rows(),
            vec![(root, 0), (panel_node, 1), (button_node, 2)]
        );
        assert_eq!(mirror.depth(button_node), Some(2));
        assert_eq!(mirror.parent(button_node), Some(panel_node));

        mirror.collapse(root).unwrap();
        assert_eq!(mirror.visible_rows(), vec![(root, 0)]);
        mirror.toggle(&scene, root).unwrap();
        assert_eq!(mirror.visible_rows().len(), 3);
    }

    #[test]
    fn test_removed_node_id_stays_stale_after_reuse() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let first = scene.create_control("Button");
        scene.push_child(root, TreeKind::Logical, first).unwrap();

        let mut mirror = MirrorTree::logical(&scene, root).unwrap();
        mirror.expand(&scene, mirror.root().unwrap()).unwrap();
        let old = mirror.find(first).unwrap();

        scene.remove_child(root, TreeKind::Logical, 0).unwrap();
        mirror.sync(&scene);
        let second = scene.create_control("CheckBox");
        scene.push_child(root, TreeKind::Logical, second).unwrap();
        mirror.sync(&scene);

        let new = mirror.find(second).unwrap();
        assert_ne!(new, old);
        assert!(!mirror.contains(old));
        assert!(mirror.node(old).is_none());
        assert!(mirror.parent(old).is_none());
        assert_eq!(mirror.children(old).count(), 0);
        assert!(matches!(mirror.toggle(&scene, old), Err(Error::StaleNode(_))));
        assert!(matches!(mirror.collapse(old), Err(Error::StaleNode(_))));
        assert_eq!(mirror.node(new).unwrap().type_name(), "CheckBox");
    }

    #[test]
    fn test_two_mirrors_sync_independently() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let mut logical = MirrorTree::logical(&scene, root).unwrap();
        let mut visual = MirrorTree::visual(&scene, root).unwrap();
        logical.expand(&scene, logical.root().unwrap()).unwrap();
        visual.expand(&scene, visual.root().unwrap()).unwrap();

        let panel = scene.create_control("StackPanel");
        scene.push_child(root, TreeKind::Logical, panel).unwrap();
        scene.push_child(root, TreeKind::Visual, panel).unwrap();

        let report = logical.sync(&scene);
        assert_eq!(report.applied, 1);
        assert_eq!(report.ignored, 0);
        assert_eq!(scene.hub().pending(), 1);

        let report = visual.sync(&scene);
        assert_eq!(report.applied, 1);
        assert_eq!(scene.hub().pending(), 0);
        assert!(logical.find(panel).is_some());
        assert!(visual.find(panel).is_some());

        // class changes fan out to both mirrors' watches
        let panel_logical = logical.find(panel).unwrap();
        let panel_visual = visual.find(panel).unwrap();
        scene.add_class(panel, "main").unwrap();
        visual.sync(&scene);
        logical.sync(&scene);
        assert_eq!(logical.node(panel_logical).unwrap().classes(), "(main)");
        assert_eq!(visual.node(panel_visual).unwrap().classes(), "(main)");
    }

    #[test]
    fn test_dispose_releases_everything() {
        let (scene, _, button) = window();
        let mut mirror = MirrorTree::logical(&scene, scene.root()).unwrap();
        mirror.select(&scene, button).unwrap();
        assert!(scene.hub().subscription_count() > 0);

        mirror.dispose();
        assert!(mirror.is_disposed());
        assert!(mirror.is_empty());
        assert_eq!(scene.hub().subscription_count(), 0);
    }

    #[test]
    fn test_drop_releases_everything() {
        let (scene, _, button) = window();
        {
            let mut mirror = MirrorTree::logical(&scene, scene.root()).unwrap();
            mirror.select(&scene, button).unwrap();
        }
        assert_eq!(scene.hub().subscription_count(), 0);
    }
}
