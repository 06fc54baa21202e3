//! Incremental synchronization of a mirror node's children.
//!
//! A collection stays lazy until something asks for its children. On
//! materialization it snapshots the live child list, then subscribes to the
//! element's child feed; afterwards it only ever applies `Insert`, `Remove`
//! and `Reset` changes, in emission order.
//!
//! Elements the tree kind cannot mirror (see [`TreeKind::accepts`]) are
//! skipped: they occupy a placeholder slot so that later live indices still
//! map to the right mirror position, but no mirror node is created for them.
//!
//! [`TreeKind::accepts`]: crate::live::TreeKind::accepts

use indextree::NodeId;

use crate::live::{Change, ElementId, LiveTree, Subscription, SubscriptionId, Topic};
use crate::tree::{MirrorTree, Route};
use crate::{Error, Result};

#[derive(Debug, Default)]
enum State {
    #[default]
    Lazy,
    Live {
        subscription: Subscription,
        /// One entry per live child; `true` when that child is mirrored.
        slots: Vec<bool>,
    },
    Disposed,
}

/// Child bookkeeping of one mirror node.
#[derive(Debug, Default)]
pub struct TreeNodeCollection {
    state: State,
}

impl TreeNodeCollection {
    pub fn is_materialized(&self) -> bool {
        matches!(self.state, State::Live { .. })
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.state, State::Disposed)
    }

    /// Length of the live child list as last synchronized.
    pub fn live_len(&self) -> usize {
        match &self.state {
            State::Live { slots, .. } => slots.len(),
            _ => 0,
        }
    }

    /// Live children that have no mirror node.
    pub fn skipped(&self) -> usize {
        match &self.state {
            State::Live { slots, .. } => slots.iter().filter(|mirrored| !**mirrored).count(),
            _ => 0,
        }
    }

    fn begin(&mut self, subscription: Subscription) {
        self.state = State::Live {
            subscription,
            slots: Vec::new(),
        };
    }

    fn slots_mut(&mut self) -> Option<&mut Vec<bool>> {
        match &mut self.state {
            State::Live { slots, .. } => Some(slots),
            _ => None,
        }
    }

    /// Record a live insertion; returns the mirror position when mirrored.
    fn insert_slot(&mut self, index: usize, mirrored: bool) -> Result<Option<usize>> {
        let Some(slots) = self.slots_mut() else {
            return Ok(None);
        };
        if index > slots.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: slots.len(),
            });
        }

        let position = mirror_position(slots, index);
        slots.insert(index, mirrored);
        Ok(mirrored.then_some(position))
    }

    /// Record a live removal; returns the mirror position of the removed
    /// child when it was mirrored.
    fn remove_slot(&mut self, index: usize) -> Result<Option<usize>> {
        let Some(slots) = self.slots_mut() else {
            return Ok(None);
        };
        if index >= slots.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: slots.len(),
            });
        }

        let position = mirror_position(slots, index);
        let mirrored = slots.remove(index);
        Ok(mirrored.then_some(position))
    }

    fn clear_slots(&mut self) {
        if let Some(slots) = self.slots_mut() {
            slots.clear();
        }
    }

    /// Unsubscribe. The subscription is dropped before this returns.
    pub(crate) fn release(&mut self) -> Option<SubscriptionId> {
        match std::mem::replace(&mut self.state, State::Disposed) {
            State::Live { subscription, .. } => {
                let id = subscription.id();
                drop(subscription);
                Some(id)
            }
            _ => None,
        }
    }
}

/// Number of mirrored slots before `index`.
fn mirror_position(slots: &[bool], index: usize) -> usize {
    slots[..index].iter().filter(|mirrored| **mirrored).count()
}

impl MirrorTree {
    fn collection_mut(&mut self, node: NodeId) -> Result<&mut TreeNodeCollection> {
        self.node_mut(node).map(|data| &mut data.children)
    }

    /// Populate the children of `node` from the live tree and start
    /// following its child feed. No-op when already materialized.
    pub fn materialize<T: LiveTree + ?Sized>(&mut self, tree: &T, node: NodeId) -> Result<()> {
        let data = self.node(node).ok_or(Error::StaleNode(node))?;
        if data.children.is_materialized() || data.children.is_disposed() {
            return Ok(());
        }
        let element = data.element();

        let snapshot = tree.children(element, self.kind()).to_vec();
        let subscription = tree.hub().subscribe(element, Topic::Children(self.kind()));
        self.routes.insert(subscription.id(), Route::Children(node));
        self.collection_mut(node)?.begin(subscription);

        for (index, child) in snapshot.into_iter().enumerate() {
            self.insert_child(tree, node, index, child)?;
        }

        tracing::trace!(
            "Materialized {} children of {} in the {} tree",
            self.child_count(node),
            element,
            self.kind()
        );
        Ok(())
    }

    /// Materialize `node` and everything below it.
    pub fn materialize_subtree<T: LiveTree + ?Sized>(&mut self, tree: &T, node: NodeId) -> Result<()> {
        let mut pending = vec![node];
        while let Some(next) = pending.pop() {
            self.materialize(tree, next)?;
            pending.extend(self.children(next));
        }
        Ok(())
    }

    pub(crate) fn apply_child_change<T: LiveTree + ?Sized>(
        &mut self,
        tree: &T,
        node: NodeId,
        change: &Change,
    ) -> Result<()> {
        match change {
            Change::Insert { index, element } => self.insert_child(tree, node, *index, *element),
            Change::Remove { index } => self.remove_child(node, *index),
            Change::Reset => self.reset_children(node),
            other => {
                tracing::debug!("Ignoring {:?} on child route", other);
                Ok(())
            }
        }
    }

    fn insert_child<T: LiveTree + ?Sized>(
        &mut self,
        tree: &T,
        parent: NodeId,
        index: usize,
        element: ElementId,
    ) -> Result<()> {
        let len = self.collection_mut(parent)?.live_len();
        if index > len {
            return Err(Error::IndexOutOfRange { index, len });
        }

        let child = self.create_node(tree, element);
        let position = self
            .collection_mut(parent)?
            .insert_slot(index, child.is_some())?;

        match (child, position) {
            (Some(child), Some(position)) => {
                let sibling = parent.children(&self.arena).nth(position);
                match sibling {
                    Some(sibling) => sibling.checked_insert_before(child, &mut self.arena)?,
                    None => parent.checked_append(child, &mut self.arena)?,
                }
            }
            // collection not live: nothing to attach to
            (Some(orphan), None) => self.dispose_subtree(orphan),
            _ => {}
        }
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, index: usize) -> Result<()> {
        let position = self.collection_mut(parent)?.remove_slot(index)?;

        if let Some(position) = position {
            if let Some(child) = parent.children(&self.arena).nth(position) {
                self.dispose_subtree(child);
            }
        }
        Ok(())
    }

    fn reset_children(&mut self, parent: NodeId) -> Result<()> {
        self.collection_mut(parent)?.clear_slots();

        let children: Vec<NodeId> = parent.children(&self.arena).collect();
        for child in children {
            self.dispose_subtree(child);
        }
        Ok(())
    }

    /// Release the subscriptions of `node` and its descendants, parents
    /// before children, then remove the nodes from the arena.
    pub(crate) fn dispose_subtree(&mut self, node: NodeId) {
        if self.node(node).is_none() {
            return;
        }

        let doomed: Vec<NodeId> = node.descendants(&self.arena).collect();
        for id in doomed {
            let Some(data) = self.arena.get_mut(id).map(|n| n.get_mut()) else {
                continue;
            };
            if let Some(subscription) = data.children.release() {
                self.routes.remove(&subscription);
            }
            if let Some(watch) = data.class_watch.take() {
                self.routes.remove(&watch.id());
            }
        }

        node.remove_subtree(&mut self.arena);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::TreeKind;
    use crate::scene::Scene;

    /// Walk every materialized mirror node and compare its children with the
    /// live child list, minus elements the kind does not accept.
    fn assert_in_sync(scene: &Scene, mirror: &MirrorTree) {
        let Some(root) = mirror.root() else {
            return;
        };

        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            let node = mirror.node(id).unwrap();
            if !node.collection().is_materialized() {
                continue;
            }

            let live: Vec<ElementId> = scene
                .children(node.element(), mirror.kind())
                .iter()
                .copied()
                .filter(|e| {
                    scene
                        .describe(*e)
                        .map(|info| mirror.kind().accepts(&info))
                        .unwrap_or(false)
                })
                .collect();
            let mirrored: Vec<ElementId> = mirror
                .children(id)
                .map(|child| mirror.node(child).unwrap().element())
                .collect();

            assert_eq!(mirrored, live, "children of {}", node.element());
            assert_eq!(
                node.collection().live_len(),
                scene.children(node.element(), mirror.kind()).len()
            );
            pending.extend(mirror.children(id));
        }
    }

    fn elements(mirror: &MirrorTree, id: NodeId) -> Vec<ElementId> {
        mirror
            .children(id)
            .map(|child| mirror.node(child).unwrap().element())
            .collect()
    }

    #[test]
    fn test_lazy_until_materialized() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let a = scene.create_control("A");
        scene.push_child(root, TreeKind::Logical, a).unwrap();

        let mut mirror = MirrorTree::logical(&scene, root).unwrap();
        let root_node = mirror.root().unwrap();
        assert!(!mirror.node(root_node).unwrap().collection().is_materialized());
        assert_eq!(mirror.child_count(root_node), 0);
        // only the root's class watch so far
        assert_eq!(scene.hub().subscription_count(), 1);

        mirror.materialize(&scene, root_node).unwrap();
        assert_eq!(elements(&mirror, root_node), vec![a]);

        // materializing twice keeps a single child subscription
        let subscriptions = scene.hub().subscription_count();
        mirror.materialize(&scene, root_node).unwrap();
        assert_eq!(scene.hub().subscription_count(), subscriptions);
    }

    #[test]
    fn test_insert_remove_reset_in_order() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let mut mirror = MirrorTree::visual(&scene, root).unwrap();
        let root_node = mirror.root().unwrap();
        mirror.materialize(&scene, root_node).unwrap();

        let a = scene.create_control("A");
        let b = scene.create_control("B");
        let c = scene.create_control("C");
        scene.push_child(root, TreeKind::Visual, a).unwrap();
        scene.push_child(root, TreeKind::Visual, b).unwrap();
        scene.insert_child(root, TreeKind::Visual, 1, c).unwrap();

        let report = mirror.sync(&scene);
        assert_eq!(report.applied, 3);
        assert!(report.is_clean());
        assert_eq!(elements(&mirror, root_node), vec![a, c, b]);

        // keep the identity of untouched mirrors
        let b_node = mirror.find(b).unwrap();
        scene.remove_child(root, TreeKind::Visual, 0).unwrap();
        mirror.sync(&scene);
        assert_eq!(elements(&mirror, root_node), vec![c, b]);
        assert_eq!(mirror.find(b), Some(b_node));

        scene.clear_children(root, TreeKind::Visual).unwrap();
        mirror.sync(&scene);
        assert_eq!(mirror.child_count(root_node), 0);
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn test_notifications_applied_one_at_a_time() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let mut mirror = MirrorTree::logical(&scene, root).unwrap();
        let root_node = mirror.root().unwrap();
        mirror.materialize(&scene, root_node).unwrap();

        let a = scene.create_control("A");
        let b = scene.create_control("B");
        scene.push_child(root, TreeKind::Logical, a).unwrap();
        scene.push_child(root, TreeKind::Logical, b).unwrap();
        scene.remove_child(root, TreeKind::Logical, 0).unwrap();

        let expected = [vec![a], vec![a, b], vec![b]];
        for (notification, expected) in scene.hub().drain().iter().zip(expected) {
            assert!(mirror.handle(&scene, notification).unwrap());
            assert_eq!(elements(&mirror, root_node), expected);
        }
    }

    #[test]
    fn test_skipped_elements_keep_indices_aligned() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let plain = scene.create_visual("Border");
        let a = scene.create_control("A");
        let b = scene.create_control("B");
        scene.push_child(root, TreeKind::Logical, plain).unwrap();
        scene.push_child(root, TreeKind::Logical, a).unwrap();

        let mut mirror = MirrorTree::logical(&scene, root).unwrap();
        let root_node = mirror.root().unwrap();
        mirror.materialize(&scene, root_node).unwrap();
        assert_eq!(elements(&mirror, root_node), vec![a]);
        assert_eq!(mirror.node(root_node).unwrap().collection().skipped(), 1);

        // live [plain, b, a]: b lands before a in the mirror
        scene.insert_child(root, TreeKind::Logical, 1, b).unwrap();
        mirror.sync(&scene);
        assert_eq!(elements(&mirror, root_node), vec![b, a]);

        // removing the skipped placeholder leaves the mirror untouched
        scene.remove_child(root, TreeKind::Logical, 0).unwrap();
        mirror.sync(&scene);
        assert_eq!(elements(&mirror, root_node), vec![b, a]);
        assert_eq!(mirror.node(root_node).unwrap().collection().skipped(), 0);
        assert_in_sync(&scene, &mirror);
    }

    #[test]
    fn test_out_of_range_notification_is_local() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let a = scene.create_control("A");
        scene.push_child(root, TreeKind::Logical, a).unwrap();

        let mut mirror = MirrorTree::logical(&scene, root).unwrap();
        let root_node = mirror.root().unwrap();
        mirror.materialize(&scene, root_node).unwrap();

        let result = mirror.apply_child_change(&scene, root_node, &Change::Remove { index: 4 });
        assert!(matches!(result, Err(Error::IndexOutOfRange { index: 4, len: 1 })));
        let result = mirror.apply_child_change(
            &scene,
            root_node,
            &Change::Insert {
                index: 3,
                element: a,
            },
        );
        assert!(matches!(result, Err(Error::IndexOutOfRange { index: 3, len: 1 })));
        assert_eq!(elements(&mirror, root_node), vec![a]);
    }

    #[test]
    fn test_disposed_subtree_ignores_later_changes() {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let panel = scene.create_control("StackPanel");
        let text = scene.create_control("TextBlock");
        scene.push_child(root, TreeKind::Logical, panel).unwrap();

        let mut mirror = MirrorTree::logical(&scene, root).unwrap();
        let root_node = mirror.root().unwrap();
        mirror.materialize_subtree(&scene, root_node).unwrap();
        let panel_node = mirror.find(panel).unwrap();

        // mutate the panel, then remove it before the mirror catches up
        scene.push_child(panel, TreeKind::Logical, text).unwrap();
        scene.remove_child(root, TreeKind::Logical, 0).unwrap();
        let report = mirror.sync(&scene);
        assert!(report.is_clean());
        assert!(mirror.node(panel_node).is_none());

        // the panel keeps changing, nothing reaches the mirror any more
        scene.clear_children(panel, TreeKind::Logical).unwrap();
        assert_eq!(scene.hub().pending(), 0);
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn test_disposed_mirror_is_inert() {
        let mut scene = Scene::demo();
        let root = scene.root();
        let mut mirror = MirrorTree::visual(&scene, root).unwrap();
        let root_node = mirror.root().unwrap();
        mirror.materialize_subtree(&scene, root_node).unwrap();
        let before = scene.hub().subscription_count();
        assert!(before > 0);

        mirror.dispose();
        assert_eq!(scene.hub().subscription_count(), 0);

        let extra = scene.create_control("Extra");
        scene.push_child(root, TreeKind::Visual, extra).unwrap();
        let report = mirror.sync(&scene);
        assert_eq!(report.applied, 0);
        assert!(mirror.is_empty());
    }

    /// Drive 400 random inserts, removals and resets through `kind` and check
    /// the mirror after every notification.
    fn random_mutations(kind: TreeKind, mut seed: u64) {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let mut mirror = MirrorTree::create(&scene, root, kind).unwrap();
        let root_node = mirror.root().unwrap();
        mirror.materialize(&scene, root_node).unwrap();

        // xorshift, deterministic across runs
        let mut next = move |bound: usize| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % bound.max(1) as u64) as usize
        };

        let mut parents = vec![root];
        for step in 0..400 {
            let parent = parents[next(parents.len())];
            let len = scene.children(parent, kind).len();

            match next(10) {
                0..=4 => {
                    let child = if next(5) == 0 {
                        scene.create_visual("Plain")
                    } else {
                        scene.create_control("Item")
                    };
                    scene
                        .insert_child(parent, kind, next(len + 1), child)
                        .unwrap();
                    parents.push(child);
                }
                5..=7 if len > 0 => {
                    scene.remove_child(parent, kind, next(len)).unwrap();
                }
                8 if len > 0 && next(4) == 0 => {
                    scene.clear_children(parent, kind).unwrap();
                }
                _ => {
                    // grow the materialized part of the mirror
                    if let Some(node) = mirror.find(parent) {
                        mirror.materialize(&scene, node).unwrap();
                    }
                }
            }

            // each step emits at most one child change, ahead of any Detached
            for notification in scene.hub().drain() {
                mirror.handle(&scene, &notification).unwrap();
                assert_in_sync(&scene, &mirror);
            }
            assert_eq!(scene.hub().pending(), 0, "{} step {}", kind, step);
        }

        // plain visuals are skipped only by the logical mirror
        let root_node = mirror.root().unwrap();
        if kind == TreeKind::Visual {
            assert_eq!(mirror.node(root_node).unwrap().collection().skipped(), 0);
        }
    }

    #[test]
    fn test_random_logical_mutations_stay_in_sync() {
        random_mutations(TreeKind::Logical, 0x9E37_79B9_7F4A_7C15);
    }

    #[test]
    fn test_random_visual_mutations_stay_in_sync() {
        random_mutations(TreeKind::Visual, 0x9E37_79B9_7F4A_7C15);
        random_mutations(TreeKind::Visual, 0xD1B5_4A32_D192_ED03);
    }
}
