//! Layout-pass profiling contract and the duration lookups fed to the flame
//! graph.

use std::collections::HashMap;
use std::time::Duration;

use indextree::NodeId;
use serde::{Deserialize, Serialize};

use crate::live::ElementId;
use crate::tree::MirrorTree;

/// Engine that can run a profiled layout pass over the live tree.
pub trait LayoutPass {
    fn begin_profiling(&mut self);
    fn execute_pass(&mut self);
    /// Stop profiling and hand back the time spent per element.
    fn end_profiling(&mut self) -> Timings;
}

/// Run one profiled layout pass.
pub fn profile<E: LayoutPass + ?Sized>(engine: &mut E) -> Timings {
    engine.begin_profiling();
    engine.execute_pass();
    let timings = engine.end_profiling();
    tracing::info!("Profiled layout pass: {} elements timed", timings.len());
    timings
}

/// How a mirror node's duration is read from [`Timings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// The element's own recorded time.
    SelfTime,
    /// Own time plus the recorded times of its grandchildren.
    #[default]
    WithGrandchildren,
}

/// Time spent per element during one profiled layout pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timings {
    by_element: HashMap<ElementId, Duration>,
}

impl From<HashMap<ElementId, Duration>> for Timings {
    fn from(by_element: HashMap<ElementId, Duration>) -> Self {
        Self { by_element }
    }
}

impl FromIterator<(ElementId, Duration)> for Timings {
    fn from_iter<I: IntoIterator<Item = (ElementId, Duration)>>(iter: I) -> Self {
        Self {
            by_element: iter.into_iter().collect(),
        }
    }
}

impl Timings {
    pub fn get(&self, element: ElementId) -> Option<Duration> {
        self.by_element.get(&element).copied()
    }

    pub fn insert(&mut self, element: ElementId, duration: Duration) {
        self.by_element.insert(element, duration);
    }

    pub fn len(&self) -> usize {
        self.by_element.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_element.is_empty()
    }

    /// Duration of `node` under `mode`; `None` when the node has no entry.
    pub fn duration(&self, mode: TimingMode, mirror: &MirrorTree, node: NodeId) -> Option<Duration> {
        match mode {
            TimingMode::SelfTime => self.self_time(mirror, node),
            TimingMode::WithGrandchildren => self.with_grandchildren(mirror, node),
        }
    }

    pub fn self_time(&self, mirror: &MirrorTree, node: NodeId) -> Option<Duration> {
        self.get(mirror.node(node)?.element())
    }

    /// Own time plus the times of all grandchildren. Grandchildren without an
    /// entry contribute nothing.
    pub fn with_grandchildren(&self, mirror: &MirrorTree, node: NodeId) -> Option<Duration> {
        let own = self.self_time(mirror, node)?;
        let nested: Duration = mirror
            .children(node)
            .flat_map(|child| mirror.children(child))
            .filter_map(|grandchild| self.self_time(mirror, grandchild))
            .sum();
        Some(own + nested)
    }
}
