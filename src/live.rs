//! Contract of the observed scene ("live tree").
//!
//! The live tree is owned elsewhere. This module only describes what the
//! mirrors need from it: element descriptions, ordered child lists for the
//! two relationships, parent lookups and a change feed. Change delivery is an
//! explicit queue on a [`ChangeHub`]; a [`Subscription`] is an owned guard
//! that stops delivery when dropped.

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

/// Stable handle of a live-tree element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which relationship of the live tree a mirror follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    /// Composition tree: controls and their logical content.
    Logical,
    /// Rendering tree: every visual including template parts.
    Visual,
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeKind::Logical => f.write_str("logical"),
            TreeKind::Visual => f.write_str("visual"),
        }
    }
}

impl TreeKind {
    /// Whether an element can be mirrored in a tree of this kind.
    ///
    /// The logical tree only holds controls (taggable elements); the visual
    /// tree holds any visual.
    pub fn accepts(self, info: &ElementInfo) -> bool {
        match self {
            TreeKind::Logical => info.is_taggable(),
            TreeKind::Visual => true,
        }
    }

    /// Number of descendants of `element` in this relationship.
    pub fn descendant_count<T: LiveTree + ?Sized>(self, tree: &T, element: ElementId) -> u64 {
        let mut count = 0u64;
        let mut stack: Vec<ElementId> = tree.children(element, self).to_vec();

        while let Some(next) = stack.pop() {
            count += 1;
            stack.extend_from_slice(tree.children(next, self));
        }

        count
    }
}

/// Snapshot of the displayable state of one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub type_name: String,
    pub name: Option<String>,
    /// `None` when the element has no tag/class capability.
    pub classes: Option<Vec<String>>,
}

impl ElementInfo {
    pub fn is_taggable(&self) -> bool {
        self.classes.is_some()
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Child list changes of an element in one relationship.
    Children(TreeKind),
    /// Class changes and detachment of the element itself.
    Element,
}

/// A single change published by the live tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Insert { index: usize, element: ElementId },
    Remove { index: usize },
    /// The whole child list was cleared.
    Reset,
    ClassesChanged,
    /// The element left its logical tree.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A change addressed to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subscription: SubscriptionId,
    pub element: ElementId,
    pub change: Change,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    active: HashMap<SubscriptionId, (ElementId, Topic)>,
    listeners: HashMap<(ElementId, Topic), Vec<SubscriptionId>>,
    queue: VecDeque<Notification>,
}

impl HubState {
    fn release(&mut self, id: SubscriptionId) {
        if let Some(key) = self.active.remove(&id) {
            if let Some(ids) = self.listeners.get_mut(&key) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.listeners.remove(&key);
                }
            }
        }
        self.queue.retain(|n| n.subscription != id);
    }
}

#[derive(Default)]
struct HubShared {
    state: RefCell<HubState>,
    /// Subscriptions dropped while `state` was borrowed.
    deferred: RefCell<Vec<SubscriptionId>>,
}

/// Single-threaded change feed shared by a live tree and its observers.
///
/// Cloning yields another handle to the same feed.
#[derive(Clone, Default)]
pub struct ChangeHub {
    shared: Rc<HubShared>,
}

impl fmt::Debug for ChangeHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeHub")
            .field("subscriptions", &self.subscription_count())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the hub state, finishing any deferred unsubscriptions first.
    fn state(&self) -> RefMut<'_, HubState> {
        let mut state = self.shared.state.borrow_mut();
        for id in self.shared.deferred.take() {
            state.release(id);
        }
        state
    }

    /// Start listening to `topic` on `element`. Delivery stops when the
    /// returned guard is dropped.
    pub fn subscribe(&self, element: ElementId, topic: Topic) -> Subscription {
        let mut state = self.state();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.active.insert(id, (element, topic));
        state.listeners.entry((element, topic)).or_default().push(id);

        Subscription {
            id,
            hub: Rc::downgrade(&self.shared),
        }
    }

    /// Queue `change` for every current listener of `topic` on `element`.
    pub fn publish(&self, element: ElementId, topic: Topic, change: Change) {
        let mut state = self.state();
        let Some(ids) = state.listeners.get(&(element, topic)).cloned() else {
            return;
        };

        for subscription in ids {
            state.queue.push_back(Notification {
                subscription,
                element,
                change: change.clone(),
            });
        }
    }

    /// Take every queued notification, in publication order.
    pub fn drain(&self) -> Vec<Notification> {
        self.state().queue.drain(..).collect()
    }

    /// Take the queued notifications matching `wanted`, in publication
    /// order. The others stay queued for their own observers.
    pub fn drain_where<F>(&self, mut wanted: F) -> Vec<Notification>
    where
        F: FnMut(&Notification) -> bool,
    {
        let mut state = self.state();
        let (taken, kept): (Vec<_>, Vec<_>) = state.queue.drain(..).partition(|n| wanted(n));
        state.queue = kept.into();
        taken
    }

    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.state().active.len()
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.state().active.contains_key(&id)
    }
}

/// Owned registration on a [`ChangeHub`].
///
/// Dropping it unsubscribes and discards notifications still queued for it.
pub struct Subscription {
    id: SubscriptionId,
    hub: Weak<HubShared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscription").field(&self.id.0).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(shared) = self.hub.upgrade() else {
            return;
        };

        match shared.state.try_borrow_mut() {
            Ok(mut state) => state.release(self.id),
            Err(_) => {
                tracing::debug!("change hub busy, releasing subscription {} later", self.id.0);
                shared.deferred.borrow_mut().push(self.id);
            }
        };
    }
}

/// Read access to the observed tree.
pub trait LiveTree {
    /// Describe `element`, or `None` if the tree does not know it.
    fn describe(&self, element: ElementId) -> Option<ElementInfo>;

    /// Ordered children of `element` in the `kind` relationship.
    fn children(&self, element: ElementId, kind: TreeKind) -> &[ElementId];

    fn parent(&self, element: ElementId, kind: TreeKind) -> Option<ElementId>;

    fn hub(&self) -> &ChangeHub;
}
