use crate::config::FlameStyle;
use crate::flame::{Bounds, FlameLayout};
use crate::live::LiveTree;
use crate::render::{render, DrawingSurface};
use crate::timing::{profile, LayoutPass, TimingMode, Timings};
use crate::tree::MirrorTree;

/// Layout profiling tab: holds the timings of the last profiled pass and
/// draws them as a flame graph.
#[derive(Debug, Default)]
pub struct PerformancePage {
    timings: Option<Timings>,
    mode: TimingMode,
    refreshes: u64,
}

impl PerformancePage {
    pub fn new(mode: TimingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Run a profiled layout pass and keep its timings.
    pub fn refresh<E: LayoutPass + ?Sized>(&mut self, engine: &mut E) -> &Timings {
        self.refreshes += 1;
        self.timings.insert(profile(engine))
    }

    pub fn timings(&self) -> Option<&Timings> {
        self.timings.as_ref()
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TimingMode) {
        self.mode = mode;
    }

    /// Draw the flame graph of `mirror` from the last refresh.
    ///
    /// The whole mirror is materialized first. Nothing is drawn before the
    /// first refresh.
    pub fn render<T, S>(
        &self,
        mirror: &mut MirrorTree,
        tree: &T,
        bounds: Bounds,
        style: &FlameStyle,
        surface: &mut S,
    ) -> FlameLayout
    where
        T: LiveTree + ?Sized,
        S: DrawingSurface + ?Sized,
    {
        let (Some(timings), Some(root)) = (&self.timings, mirror.root()) else {
            tracing::debug!("Performance page has nothing to draw yet");
            return FlameLayout::default();
        };

        if let Err(err) = mirror.materialize_subtree(tree, root) {
            tracing::warn!("Flame graph drawn from a partial mirror: {}", err);
        }

        let mirror = &*mirror;
        render(
            mirror,
            root,
            bounds,
            style,
            |node| timings.duration(self.mode, mirror, node),
            surface,
        )
    }
}
