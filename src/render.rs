use std::ops::{Deref, DerefMut};
use std::time::Duration;

use indextree::NodeId;

use crate::color::Color;
use crate::config::FlameStyle;
use crate::flame::{Bounds, FlameLayout, Rect};
use crate::tree::MirrorTree;

/// Target the flame graph is drawn on.
///
/// Text is positioned by its left edge and vertical center.
pub trait DrawingSurface {
    fn fill_rectangle(&mut self, color: Color, rect: Rect);
    fn draw_text(&mut self, color: Color, x: f32, center_y: f32, text: &str);
    /// Restrict drawing to `rect` until the matching [`pop_clip`](Self::pop_clip).
    fn push_clip(&mut self, rect: Rect);
    fn pop_clip(&mut self);
}

/// Clip region that is popped when the scope ends.
pub struct ClipScope<'a, S: DrawingSurface + ?Sized> {
    surface: &'a mut S,
}

impl<'a, S: DrawingSurface + ?Sized> ClipScope<'a, S> {
    pub fn new(surface: &'a mut S, rect: Rect) -> Self {
        surface.push_clip(rect);
        Self { surface }
    }
}

impl<S: DrawingSurface + ?Sized> Deref for ClipScope<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.surface
    }
}

impl<S: DrawingSurface + ?Sized> DerefMut for ClipScope<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.surface
    }
}

impl<S: DrawingSurface + ?Sized> Drop for ClipScope<'_, S> {
    fn drop(&mut self) {
        self.surface.pop_clip();
    }
}

/// Bar caption: type name, element name if any, and milliseconds.
pub fn label(mirror: &MirrorTree, node: NodeId, duration: Duration) -> String {
    let millis = duration.as_secs_f64() * 1000.0;
    match mirror.node(node) {
        Some(data) => match data.name().filter(|name| !name.is_empty()) {
            Some(name) => format!("{} ({}) {:.2} ms", data.type_name(), name, millis),
            None => format!("{} {:.2} ms", data.type_name(), millis),
        },
        None => format!("{:.2} ms", millis),
    }
}

/// Lay out `root` and draw every bar with its clipped caption.
///
/// Labels wider than their bar are cut by the clip region. Nodes without a
/// timing are left out; the returned layout lists them.
pub fn render<S, F>(
    mirror: &MirrorTree,
    root: NodeId,
    bounds: Bounds,
    style: &FlameStyle,
    duration: F,
    surface: &mut S,
) -> FlameLayout
where
    S: DrawingSurface + ?Sized,
    F: FnMut(NodeId) -> Option<Duration>,
{
    let layout = FlameLayout::compute(mirror, root, bounds, style.bar_height, duration);

    for bar in &layout.bars {
        surface.fill_rectangle(bar.color, bar.rect);

        let text = label(mirror, bar.node, bar.duration);
        let mut clipped = ClipScope::new(&mut *surface, bar.rect);
        clipped.draw_text(
            style.label_color,
            bar.rect.x + style.label_padding,
            bar.rect.center_y(),
            &text,
        );
    }
    layout
}
