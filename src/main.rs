use eframe::egui;
use indextree::NodeId;

use treelens::config::Config;
use treelens::flame::{Bounds, Rect};
use treelens::render::{label, DrawingSurface};
use treelens::{logging, Color, ElementId, Error, Inspector, LiveTree, Scene, Tab, TreeKind};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, config_error) = match Config::from_env() {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };
    if let Err(err) = logging::init(&config.log) {
        eprintln!("treelens: {}", err);
    }
    if let Some(err) = config_error {
        tracing::warn!("Using default configuration: {}", err);
    }

    let app = TreeLensApp::new(config)?;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 760.0])
            .with_title("TreeLens - Element Tree Inspector"),
        ..Default::default()
    };

    eframe::run_native(
        "TreeLens",
        options,
        Box::new(move |cc| {
            configure_custom_style(&cc.egui_ctx);
            Box::new(app)
        }),
    )
    .map_err(|err| err.to_string())?;
    Ok(())
}

fn configure_custom_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    let mut visuals = egui::Visuals::dark();
    visuals.panel_fill = egui::Color32::from_rgba_unmultiplied(30, 41, 59, 240);
    visuals.window_fill = egui::Color32::from_rgba_unmultiplied(30, 41, 59, 230);
    visuals.window_stroke = egui::Stroke::new(1.0, egui::Color32::from_rgba_unmultiplied(255, 255, 255, 26));
    visuals.widgets.noninteractive.rounding = egui::Rounding::same(6.0);
    visuals.widgets.inactive.rounding = egui::Rounding::same(6.0);
    visuals.widgets.hovered.rounding = egui::Rounding::same(6.0);
    visuals.widgets.active.rounding = egui::Rounding::same(6.0);
    style.visuals = visuals;

    style.spacing.item_spacing = egui::vec2(8.0, 4.0);
    style.spacing.button_padding = egui::vec2(10.0, 4.0);

    ctx.set_style(style);
}

fn to_color32(color: Color) -> egui::Color32 {
    egui::Color32::from_rgba_unmultiplied(color.r, color.g, color.b, color.a)
}

/// Flame graph surface backed by an egui painter. Coordinates are relative
/// to `origin`.
struct EguiSurface {
    base: egui::Painter,
    clipped: Vec<egui::Painter>,
    origin: egui::Pos2,
    font: egui::FontId,
}

impl EguiSurface {
    fn new(painter: egui::Painter, origin: egui::Pos2, font: egui::FontId) -> Self {
        Self {
            base: painter,
            clipped: Vec::new(),
            origin,
            font,
        }
    }

    fn painter(&self) -> &egui::Painter {
        self.clipped.last().unwrap_or(&self.base)
    }

    fn to_screen(&self, rect: Rect) -> egui::Rect {
        egui::Rect::from_min_size(
            self.origin + egui::vec2(rect.x, rect.y),
            egui::vec2(rect.width, rect.height),
        )
    }
}

impl DrawingSurface for EguiSurface {
    fn fill_rectangle(&mut self, color: Color, rect: Rect) {
        let rect = self.to_screen(rect);
        self.painter().rect_filled(rect, 0.0, to_color32(color));
    }

    fn draw_text(&mut self, color: Color, x: f32, center_y: f32, text: &str) {
        let pos = self.origin + egui::vec2(x, center_y);
        self.painter().text(
            pos,
            egui::Align2::LEFT_CENTER,
            text,
            self.font.clone(),
            to_color32(color),
        );
    }

    fn push_clip(&mut self, rect: Rect) {
        let rect = self.to_screen(rect);
        let painter = self.painter().with_clip_rect(rect);
        self.clipped.push(painter);
    }

    fn pop_clip(&mut self) {
        self.clipped.pop();
    }
}

/// User requests collected while drawing, applied after the frame's UI.
enum Action {
    SetTab(Tab),
    Toggle(NodeId),
    Select(NodeId),
    AddChild,
    RemoveSelected,
    ToggleClass,
    ReplaceChildren,
    Refresh,
}

struct TreeLensApp {
    scene: Scene,
    inspector: Inspector,
    config: Config,
    class_input: String,
    status: Option<String>,
}

impl TreeLensApp {
    fn new(config: Config) -> treelens::Result<Self> {
        let scene = Scene::demo();
        let inspector = Inspector::new(&scene, scene.root(), config.timing_mode)?;
        Ok(Self {
            scene,
            inspector,
            config,
            class_input: "highlight".to_string(),
            status: None,
        })
    }

    fn current_kind(&self) -> TreeKind {
        self.inspector.tab().tree_kind().unwrap_or(TreeKind::Visual)
    }

    fn selected(&self) -> Result<ElementId, Error> {
        self.inspector
            .selected()
            .ok_or(Error::StaleElement(self.scene.root()))
    }

    fn apply(&mut self, action: Action) -> treelens::Result<()> {
        let kind = self.current_kind();
        match action {
            Action::SetTab(tab) => self.inspector.set_tab(&self.scene, tab)?,
            Action::Toggle(node) => self.inspector.mirror_mut(kind).toggle(&self.scene, node)?,
            Action::Select(node) => {
                self.inspector.select_node(node)?;
            }
            Action::AddChild => {
                let parent = self.selected()?;
                let child = self.scene.create_control("Button");
                self.scene.set_name(child, &format!("button{}", child.0))?;
                self.scene.push_child(parent, kind, child)?;
                tracing::info!("Added {} under {} ({} tree)", child, parent, kind);
            }
            Action::RemoveSelected => {
                let element = self.selected()?;
                let parent = self
                    .scene
                    .parent(element, kind)
                    .ok_or(Error::StaleElement(element))?;
                let index = self
                    .scene
                    .children(parent, kind)
                    .iter()
                    .position(|child| *child == element)
                    .ok_or(Error::StaleElement(element))?;
                self.scene.remove_child(parent, kind, index)?;
                self.inspector.select(&self.scene, parent)?;
            }
            Action::ToggleClass => {
                let element = self.selected()?;
                self.scene.toggle_class(element, self.class_input.trim())?;
            }
            Action::ReplaceChildren => {
                let parent = self.selected()?;
                let first = self.scene.create_control("TextBlock");
                let second = self.scene.create_control("TextBlock");
                self.scene.replace_children(parent, kind, &[first, second])?;
            }
            Action::Refresh => {
                let timings = self.inspector.refresh_performance(&mut self.scene);
                self.status = Some(format!("Profiled {} elements", timings.len()));
            }
        }
        Ok(())
    }

    fn tree_view(&self, ui: &mut egui::Ui, kind: TreeKind, actions: &mut Vec<Action>) {
        let mirror = self.inspector.mirror(kind);
        let selected = self.inspector.selected();

        egui::ScrollArea::vertical().auto_shrink([false; 2]).show(ui, |ui| {
            for (node, depth) in mirror.visible_rows() {
                let Some(data) = mirror.node(node) else {
                    continue;
                };

                ui.horizontal(|ui| {
                    ui.add_space(depth as f32 * 16.0);
                    let arrow = if !mirror.may_have_children(&self.scene, node) {
                        "  "
                    } else if data.is_expanded() {
                        "v"
                    } else {
                        ">"
                    };
                    if ui.small_button(arrow).clicked() {
                        actions.push(Action::Toggle(node));
                    }

                    let response = ui
                        .selectable_label(selected == Some(data.element()), data.label())
                        .on_hover_text(data.tooltip());
                    if response.clicked() {
                        actions.push(Action::Select(node));
                    }
                });
            }
        });
    }

    fn performance_view(&mut self, ui: &mut egui::Ui, actions: &mut Vec<Action>) {
        ui.horizontal(|ui| {
            if ui.button("Refresh").clicked() {
                actions.push(Action::Refresh);
            }
            match self.inspector.performance().timings() {
                Some(timings) => ui.label(format!("{} elements timed", timings.len())),
                None => ui.label("Press Refresh to profile a layout pass"),
            };
        });

        let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::hover());
        let area = response.rect;
        let style = &self.config.flame;
        painter.rect_filled(area, 0.0, to_color32(style.background));

        let mut surface = EguiSurface::new(painter, area.min, egui::FontId::proportional(style.font_size));
        let layout = self.inspector.render_performance(
            &self.scene,
            Bounds::new(area.width(), area.height()),
            style,
            &mut surface,
        );

        if let Some(degenerate) = layout.degenerate {
            ui.label(format!("Nothing to draw: {:?}", degenerate));
        }

        let hovered = response
            .hover_pos()
            .and_then(|pos| layout.hit(pos.x - area.min.x, pos.y - area.min.y));
        if let Some(bar) = hovered {
            let mirror = self.inspector.mirror(TreeKind::Visual);
            let tooltip = mirror.node(bar.node).map(|data| data.tooltip()).unwrap_or_default();
            let text = format!("{}\n{}", label(mirror, bar.node, bar.duration), tooltip);
            response.on_hover_text(text);
        }
    }
}

impl eframe::App for TreeLensApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let report = self.inspector.sync(&self.scene);
        if let Some(err) = report.errors.first() {
            self.status = Some(format!("Sync: {}", err));
        }

        let mut actions = Vec::new();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("TreeLens");
                ui.separator();
                for tab in Tab::ALL {
                    if ui.selectable_label(self.inspector.tab() == tab, tab.title()).clicked() {
                        actions.push(Action::SetTab(tab));
                    }
                }
            });
        });

        egui::TopBottomPanel::bottom("status_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!("{} elements", self.scene.len()));
                ui.separator();
                ui.label(format!("{} subscriptions", self.scene.hub().subscription_count()));
                if let Some(status) = &self.status {
                    ui.separator();
                    ui.label(status);
                }
            });
        });

        if let Some(kind) = self.inspector.tab().tree_kind() {
            egui::SidePanel::right("mutations").show(ctx, |ui| {
                ui.heading("Live tree");
                match self.inspector.selected() {
                    Some(element) => ui.label(format!("Selected {} ({} tree)", element, kind)),
                    None => ui.label("Select an element"),
                };
                ui.separator();
                if ui.button("Add child").clicked() {
                    actions.push(Action::AddChild);
                }
                if ui.button("Remove").clicked() {
                    actions.push(Action::RemoveSelected);
                }
                if ui.button("Replace children").clicked() {
                    actions.push(Action::ReplaceChildren);
                }
                ui.separator();
                ui.text_edit_singleline(&mut self.class_input);
                if ui.button("Toggle class").clicked() {
                    actions.push(Action::ToggleClass);
                }
            });
        }

        egui::CentralPanel::default().show(ctx, |ui| match self.inspector.tab().tree_kind() {
            Some(kind) => self.tree_view(ui, kind, &mut actions),
            None => self.performance_view(ui, &mut actions),
        });

        for action in actions {
            if let Err(err) = self.apply(action) {
                tracing::warn!("{}", err);
                self.status = Some(err.to_string());
            }
        }
    }
}

impl Drop for TreeLensApp {
    fn drop(&mut self) {
        self.inspector.dispose();
    }
}
