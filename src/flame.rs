use std::collections::VecDeque;
use std::time::Duration;

use indextree::NodeId;

use crate::color::{node_color, Color};
use crate::tree::MirrorTree;

/// Axis-aligned rectangle, y growing downwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    /// Overlapping part of two rectangles; zero-sized when they are disjoint.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Rect::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
    }
}

/// Size of the area the graph is laid out in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

/// One laid-out node.
#[derive(Debug, Clone)]
pub struct FlameBar {
    pub node: NodeId,
    /// Breadth-first level, root = 0
    pub level: usize,
    pub rect: Rect,
    pub color: Color,
    pub duration: Duration,
}

/// Why a layout produced no bars at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degenerate {
    /// The root has no mirrored children to take the baseline from.
    NoChildren,
    /// The root's first child has no timing.
    MissingBaseline,
    /// The root's first child took no time.
    ZeroBaseline,
}

/// Flame graph geometry for one mirror subtree.
///
/// Bars are stacked bottom-up: level 0 sits on the bottom edge of the
/// bounds and every level is one bar height above its parent's. Widths are
/// scaled against the duration of the root's first child, so that child
/// spans the full width and its siblings compare directly to it.
#[derive(Debug, Clone, Default)]
pub struct FlameLayout {
    /// Bars in breadth-first visitation order.
    pub bars: Vec<FlameBar>,
    pub baseline: Option<Duration>,
    /// Visited nodes that had no timing and therefore no bar.
    pub missing: Vec<NodeId>,
    pub degenerate: Option<Degenerate>,
}

impl FlameLayout {
    /// Lay out `root` and its materialized descendants.
    ///
    /// `duration` maps a mirror node to its time; `None` means no timing
    /// was recorded for it. Such nodes take no horizontal space but their
    /// children are still laid out.
    pub fn compute<F>(mirror: &MirrorTree, root: NodeId, bounds: Bounds, bar_height: f32, mut duration: F) -> Self
    where
        F: FnMut(NodeId) -> Option<Duration>,
    {
        let baseline = match Self::baseline(mirror, root, &mut duration) {
            Ok(baseline) => baseline,
            Err(degenerate) => {
                tracing::warn!("Flame graph not laid out: {:?}", degenerate);
                return Self {
                    degenerate: Some(degenerate),
                    ..Self::default()
                };
            }
        };

        let mut layout = Self {
            baseline: Some(baseline),
            ..Self::default()
        };
        let baseline_nanos = baseline.as_nanos() as f64;
        let width = f64::from(bounds.width);

        let mut queue = VecDeque::from([(root, 0usize)]);
        let mut offset_x = 0.0f32;
        let mut visited = 0usize;

        while let Some((node, level)) = queue.pop_front() {
            let color = node_color(visited);
            visited += 1;
            queue.extend(mirror.children(node).map(|child| (child, level + 1)));

            match duration(node) {
                Some(time) => {
                    let bar_width = (time.as_nanos() as f64 / baseline_nanos * width) as f32;
                    let bottom = bounds.height - bar_height * level as f32;
                    let rect = Rect::new(offset_x, bottom - bar_height, bar_width, bar_height);
                    offset_x += bar_width;

                    layout.bars.push(FlameBar {
                        node,
                        level,
                        rect,
                        color,
                        duration: time,
                    });
                }
                None => {
                    tracing::debug!("No timing for {:?}, bar skipped", node);
                    layout.missing.push(node);
                }
            }

            // next level starts at the left edge again
            if queue.front().map_or(true, |(_, next)| *next != level) {
                offset_x = 0.0;
            }
        }

        tracing::trace!(
            "Flame layout: {} bars, {} without timing",
            layout.bars.len(),
            layout.missing.len()
        );
        layout
    }

    fn baseline<F>(mirror: &MirrorTree, root: NodeId, duration: &mut F) -> Result<Duration, Degenerate>
    where
        F: FnMut(NodeId) -> Option<Duration>,
    {
        let first = mirror.children(root).next().ok_or(Degenerate::NoChildren)?;
        match duration(first) {
            None => Err(Degenerate::MissingBaseline),
            Some(time) if time.is_zero() => Err(Degenerate::ZeroBaseline),
            Some(time) => Ok(time),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars_at(&self, level: usize) -> impl Iterator<Item = &FlameBar> {
        self.bars.iter().filter(move |bar| bar.level == level)
    }

    /// Deepest level that produced a bar.
    pub fn depth(&self) -> usize {
        self.bars.iter().map(|bar| bar.level).max().unwrap_or(0)
    }

    /// Topmost bar under a point, used for hover tooltips.
    pub fn hit(&self, x: f32, y: f32) -> Option<&FlameBar> {
        self.bars
            .iter()
            .find(|bar| x >= bar.rect.x && x < bar.rect.right() && y >= bar.rect.y && y < bar.rect.bottom())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{ElementId, LiveTree, TreeKind};
    use crate::scene::Scene;
    use std::collections::HashMap;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    /// Window with the given visual children, fully mirrored.
    fn mirrored(children: usize) -> (Scene, MirrorTree, Vec<ElementId>) {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        let mut ids = vec![root];
        for _ in 0..children {
            let child = scene.create_control("Child");
            scene.push_child(root, TreeKind::Visual, child).unwrap();
            ids.push(child);
        }

        let mut mirror = MirrorTree::visual(&scene, root).unwrap();
        let root_node = mirror.root().unwrap();
        mirror.materialize_subtree(&scene, root_node).unwrap();
        (scene, mirror, ids)
    }

    fn compute(mirror: &MirrorTree, times: &HashMap<ElementId, Duration>, bounds: Bounds, bar_height: f32) -> FlameLayout {
        let root = mirror.root().unwrap();
        FlameLayout::compute(mirror, root, bounds, bar_height, |node| {
            times.get(&mirror.node(node)?.element()).copied()
        })
    }

    #[test]
    fn test_widths_scale_against_first_child() {
        let (_scene, mirror, ids) = mirrored(2);
        let times = HashMap::from([(ids[0], ms(10)), (ids[1], ms(4)), (ids[2], ms(2))]);

        let layout = compute(&mirror, &times, Bounds::new(200.0, 100.0), 10.0);
        assert_eq!(layout.baseline, Some(ms(4)));
        assert!(layout.degenerate.is_none());

        let level1: Vec<&FlameBar> = layout.bars_at(1).collect();
        assert_eq!(level1.len(), 2);
        assert_eq!(level1[0].rect.width, 200.0);
        assert_eq!(level1[1].rect.width, 100.0);
        assert_eq!(level1[0].rect.x, 0.0);
        assert_eq!(level1[1].rect.x, level1[0].rect.right());

        // the root is wider than the bounds: scaled to the child, not clamped
        let root_bar = layout.bars_at(0).next().unwrap();
        assert_eq!(root_bar.rect.width, 500.0);
    }

    #[test]
    fn test_levels_stack_upwards() {
        let (mut scene, _, ids) = mirrored(2);
        let grandchild = scene.create_control("Leaf");
        scene.push_child(ids[2], TreeKind::Visual, grandchild).unwrap();
        let mut mirror = MirrorTree::visual(&scene, scene.root()).unwrap();
        let root = mirror.root().unwrap();
        mirror.materialize_subtree(&scene, root).unwrap();

        let times = HashMap::from([
            (ids[0], ms(8)),
            (ids[1], ms(4)),
            (ids[2], ms(4)),
            (grandchild, ms(1)),
        ]);
        let (height, bar_height) = (100.0, 10.0);
        let layout = compute(&mirror, &times, Bounds::new(80.0, height), bar_height);

        for bar in &layout.bars {
            assert_eq!(bar.rect.bottom(), height - bar_height * bar.level as f32);
            assert_eq!(bar.rect.height, bar_height);
        }

        let level0 = layout.bars_at(0).next().unwrap();
        let level1 = layout.bars_at(1).next().unwrap();
        assert_eq!(level0.rect.x, 0.0);
        assert_eq!(level0.rect.bottom(), height);
        assert!(level1.rect.bottom() <= level0.rect.y);

        // level 2 restarts at the left edge
        let level2 = layout.bars_at(2).next().unwrap();
        assert_eq!(level2.rect.x, 0.0);
        assert_eq!(level2.rect.width, 20.0);
        assert_eq!(layout.depth(), 2);
    }

    #[test]
    fn test_root_without_children_is_degenerate() {
        let (_scene, mirror, ids) = mirrored(0);
        let times = HashMap::from([(ids[0], ms(3))]);

        let layout = compute(&mirror, &times, Bounds::new(100.0, 100.0), 10.0);
        assert_eq!(layout.degenerate, Some(Degenerate::NoChildren));
        assert!(layout.is_empty());
        assert_eq!(layout.baseline, None);
    }

    #[test]
    fn test_zero_or_missing_baseline_is_degenerate() {
        let (_scene, mirror, ids) = mirrored(2);

        let times = HashMap::from([(ids[0], ms(3)), (ids[1], Duration::ZERO), (ids[2], ms(1))]);
        let layout = compute(&mirror, &times, Bounds::new(100.0, 100.0), 10.0);
        assert_eq!(layout.degenerate, Some(Degenerate::ZeroBaseline));
        assert!(layout.is_empty());

        let times = HashMap::from([(ids[0], ms(3)), (ids[2], ms(1))]);
        let layout = compute(&mirror, &times, Bounds::new(100.0, 100.0), 10.0);
        assert_eq!(layout.degenerate, Some(Degenerate::MissingBaseline));
    }

    #[test]
    fn test_missing_timing_leaves_a_gap_in_the_list_only() {
        let (mut scene, _, ids) = mirrored(3);
        let leaf = scene.create_control("Leaf");
        scene.push_child(ids[2], TreeKind::Visual, leaf).unwrap();
        let mut mirror = MirrorTree::visual(&scene, scene.root()).unwrap();
        let root = mirror.root().unwrap();
        mirror.materialize_subtree(&scene, root).unwrap();

        // ids[2] has no timing, its child does
        let times = HashMap::from([(ids[0], ms(6)), (ids[1], ms(2)), (ids[3], ms(1)), (leaf, ms(1))]);
        let layout = compute(&mirror, &times, Bounds::new(100.0, 50.0), 10.0);

        let missing = mirror.find(ids[2]).unwrap();
        assert_eq!(layout.missing, vec![missing]);

        let level1: Vec<&FlameBar> = layout.bars_at(1).collect();
        assert_eq!(level1.len(), 2);
        assert_eq!(level1[1].rect.x, 100.0);
        assert_eq!(layout.bars_at(2).count(), 1);
    }

    #[test]
    fn test_colors_follow_visitation_order() {
        let (scene, mirror, ids) = mirrored(12);
        let times: HashMap<ElementId, Duration> = ids.iter().map(|id| (*id, ms(1))).collect();

        let layout = compute(&mirror, &times, Bounds::new(100.0, 50.0), 10.0);
        assert_eq!(layout.bars.len(), 13);
        for (index, bar) in layout.bars.iter().enumerate() {
            assert_eq!(bar.color, node_color(index));
        }
        assert_eq!(layout.bars[0].color, layout.bars[10].color);
        assert_eq!(scene.children(scene.root(), TreeKind::Visual).len(), 12);
    }

    #[test]
    fn test_hit_finds_bar_under_point() {
        let (_scene, mirror, ids) = mirrored(2);
        let times = HashMap::from([(ids[0], ms(4)), (ids[1], ms(2)), (ids[2], ms(2))]);
        let layout = compute(&mirror, &times, Bounds::new(100.0, 40.0), 10.0);

        let second = mirror.find(ids[2]).unwrap();
        assert_eq!(layout.hit(150.0, 25.0).map(|bar| bar.node), Some(second));
        assert!(layout.hit(150.0, 5.0).is_none());
    }

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 8.0, 10.0, 10.0);
        assert_eq!(a.intersect(&b), Rect::new(5.0, 8.0, 5.0, 2.0));
        let far = Rect::new(20.0, 20.0, 1.0, 1.0);
        assert_eq!(a.intersect(&far).width, 0.0);
    }
}
