use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Layout, Rect as UiRect};
use ratatui::style::{Color as UiColor, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::{Frame, Terminal};
use std::io::{self, stdout};
use std::time::Duration;
use treelens::config::Config;
use treelens::flame::{Bounds, Rect};
use treelens::render::DrawingSurface;
use treelens::{logging, Color, Error, Inspector, LiveTree, Scene, Tab, TreeKind};

const CLASS_TO_TOGGLE: &str = "highlight";

fn to_ui_color(color: Color) -> UiColor {
    UiColor::Rgb(color.r, color.g, color.b)
}

/// Flame graph surface over a terminal buffer: one unit is one cell.
struct BufferSurface<'a> {
    buf: &'a mut Buffer,
    area: UiRect,
    clips: Vec<UiRect>,
}

impl<'a> BufferSurface<'a> {
    fn new(buf: &'a mut Buffer, area: UiRect) -> Self {
        Self {
            buf,
            area,
            clips: Vec::new(),
        }
    }

    fn clip(&self) -> UiRect {
        self.clips.last().copied().unwrap_or(self.area)
    }

    fn to_cells(&self, rect: Rect) -> UiRect {
        let x0 = rect.x.round().max(0.0) as u16;
        let y0 = rect.y.round().max(0.0) as u16;
        let x1 = rect.right().round().max(0.0) as u16;
        let y1 = rect.bottom().round().max(0.0) as u16;
        UiRect::new(
            self.area.x.saturating_add(x0),
            self.area.y.saturating_add(y0),
            x1.saturating_sub(x0),
            y1.saturating_sub(y0),
        )
        .intersection(self.clip())
    }
}

impl DrawingSurface for BufferSurface<'_> {
    fn fill_rectangle(&mut self, color: Color, rect: Rect) {
        let cells = self.to_cells(rect);
        for y in cells.y..cells.y.saturating_add(cells.height) {
            for x in cells.x..cells.x.saturating_add(cells.width) {
                self.buf[(x, y)]
                    .set_char(' ')
                    .set_style(Style::default().bg(to_ui_color(color)));
            }
        }
    }

    fn draw_text(&mut self, color: Color, x: f32, center_y: f32, text: &str) {
        let clip = self.clip();
        let y = self.area.y.saturating_add(center_y.floor().max(0.0) as u16);
        if y < clip.y || y >= clip.y.saturating_add(clip.height) {
            return;
        }

        let start = self.area.x.saturating_add(x.round().max(0.0) as u16);
        for (i, ch) in text.chars().enumerate() {
            let x = start.saturating_add(i as u16);
            if x >= clip.x.saturating_add(clip.width) {
                break;
            }
            if x >= clip.x {
                self.buf[(x, y)].set_char(ch).set_fg(to_ui_color(color));
            }
        }
    }

    fn push_clip(&mut self, rect: Rect) {
        let cells = self.to_cells(rect);
        self.clips.push(cells);
    }

    fn pop_clip(&mut self) {
        self.clips.pop();
    }
}

struct App {
    scene: Scene,
    inspector: Inspector,
    config: Config,
    cursor: usize,
    status: String,
    should_quit: bool,
}

impl App {
    fn new(config: Config) -> treelens::Result<Self> {
        let scene = Scene::demo();
        let inspector = Inspector::new(&scene, scene.root(), config.timing_mode)?;
        Ok(Self {
            scene,
            inspector,
            config,
            cursor: 0,
            status: String::from("Tab: switch view   q: quit"),
            should_quit: false,
        })
    }

    fn current_kind(&self) -> TreeKind {
        self.inspector.tab().tree_kind().unwrap_or(TreeKind::Visual)
    }

    fn sync(&mut self) {
        let report = self.inspector.sync(&self.scene);
        if let Some(err) = report.errors.first() {
            self.status = format!("Sync: {}", err);
        }
        let rows = self.inspector.mirror(self.current_kind()).visible_rows().len();
        self.cursor = self.cursor.min(rows.saturating_sub(1));
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c')) {
            self.should_quit = true;
            return;
        }

        let outcome = match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Ok(())
            }
            KeyCode::Tab => self.switch_tab(self.inspector.tab().next()),
            KeyCode::Char('1') => self.switch_tab(Tab::Logical),
            KeyCode::Char('2') => self.switch_tab(Tab::Visual),
            KeyCode::Char('3') => self.switch_tab(Tab::Performance),
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::Enter | KeyCode::Char(' ') => self.toggle_cursor(),
            KeyCode::Char('a') => self.add_child(),
            KeyCode::Char('x') => self.remove_selected(),
            KeyCode::Char('t') => self.toggle_class(),
            KeyCode::Char('R') => self.replace_children(),
            KeyCode::Char('r') => {
                let timed = self.inspector.refresh_performance(&mut self.scene).len();
                self.status = format!("Profiled {} elements", timed);
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(err) = outcome {
            tracing::warn!("{}", err);
            self.status = err.to_string();
        }
    }

    fn switch_tab(&mut self, tab: Tab) -> treelens::Result<()> {
        let result = self.inspector.set_tab(&self.scene, tab);
        self.cursor = self.selected_row().unwrap_or(0);
        result
    }

    fn selected_row(&self) -> Option<usize> {
        let mirror = self.inspector.current_mirror()?;
        let selected = self.inspector.selected()?;
        mirror
            .visible_rows()
            .iter()
            .position(|(node, _)| mirror.node(*node).map(|data| data.element()) == Some(selected))
    }

    fn move_cursor(&mut self, delta: isize) -> treelens::Result<()> {
        let Some(mirror) = self.inspector.current_mirror() else {
            return Ok(());
        };
        let rows = mirror.visible_rows();
        if rows.is_empty() {
            return Ok(());
        }

        self.cursor = self
            .cursor
            .saturating_add_signed(delta)
            .min(rows.len() - 1);
        self.inspector.select_node(rows[self.cursor].0)?;
        Ok(())
    }

    fn toggle_cursor(&mut self) -> treelens::Result<()> {
        let kind = self.current_kind();
        let Some((node, _)) = self.inspector.mirror(kind).visible_rows().get(self.cursor).copied() else {
            return Ok(());
        };
        self.inspector.mirror_mut(kind).toggle(&self.scene, node)?;
        self.inspector.select_node(node)?;
        Ok(())
    }

    fn selected(&self) -> treelens::Result<treelens::ElementId> {
        self.inspector
            .selected()
            .ok_or(Error::StaleElement(self.scene.root()))
    }

    fn add_child(&mut self) -> treelens::Result<()> {
        let parent = self.selected()?;
        let kind = self.current_kind();
        let child = self.scene.create_control("Button");
        self.scene.set_name(child, &format!("button{}", child.0))?;
        self.scene.push_child(parent, kind, child)?;
        self.status = format!("Added {} under {}", child, parent);
        Ok(())
    }

    fn remove_selected(&mut self) -> treelens::Result<()> {
        let element = self.selected()?;
        let kind = self.current_kind();
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
        self.status = format!("Removed {}", element);
        Ok(())
    }

    fn toggle_class(&mut self) -> treelens::Result<()> {
        let element = self.selected()?;
        self.scene.toggle_class(element, CLASS_TO_TOGGLE)?;
        Ok(())
    }

    fn replace_children(&mut self) -> treelens::Result<()> {
        let parent = self.selected()?;
        let kind = self.current_kind();
        let first = self.scene.create_control("TextBlock");
        let second = self.scene.create_control("TextBlock");
        self.scene.replace_children(parent, kind, &[first, second])?;
        Ok(())
    }
}

fn tab_line(current: Tab) -> Line<'static> {
    let mut spans = Vec::new();
    for (i, tab) in Tab::ALL.iter().enumerate() {
        let style = if *tab == current {
            Style::default().fg(UiColor::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(UiColor::Gray)
        };
        spans.push(Span::styled(format!(" {} {} ", i + 1, tab.title()), style));
    }
    Line::from(spans)
}

fn draw_tree(frame: &mut Frame, app: &App, kind: TreeKind, area: UiRect) {
    let mirror = app.inspector.mirror(kind);
    let rows = mirror.visible_rows();
    let height = area.height as usize;
    let skip = app.cursor.saturating_sub(height.saturating_sub(1));

    let lines: Vec<Line> = rows
        .iter()
        .enumerate()
        .skip(skip)
        .take(height)
        .filter_map(|(i, (node, depth))| {
            let data = mirror.node(*node)?;
            let marker = if !mirror.may_have_children(&app.scene, *node) {
                "  "
            } else if data.is_expanded() {
                "▾ "
            } else {
                "▸ "
            };
            let style = if i == app.cursor {
                Style::default().bg(UiColor::Rgb(59, 130, 246)).fg(UiColor::White)
            } else {
                Style::default()
            };
            Some(Line::from(vec![
                Span::raw("  ".repeat(*depth)),
                Span::styled(format!("{}{}", marker, data.label()), style),
            ]))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines), area);
}

fn draw_flame(frame: &mut Frame, app: &mut App, area: UiRect) {
    let mut style = app.config.flame.clone();
    style.bar_height = 1.0;
    style.label_padding = 1.0;

    let mut surface = BufferSurface::new(frame.buffer_mut(), area);
    let layout = app.inspector.render_performance(
        &app.scene,
        Bounds::new(area.width as f32, area.height as f32),
        &style,
        &mut surface,
    );

    if app.inspector.performance().timings().is_none() {
        frame.render_widget(
            Paragraph::new("Press r to profile a layout pass.").style(Style::default().fg(UiColor::Gray)),
            area,
        );
    } else if let Some(degenerate) = layout.degenerate {
        frame.render_widget(
            Paragraph::new(format!("Nothing to draw: {:?}", degenerate)).style(Style::default().fg(UiColor::Gray)),
            area,
        );
    }
}

fn selection_lines(app: &App) -> Vec<Line<'static>> {
    let kind = app.current_kind();
    let mirror = app.inspector.mirror(kind);
    let node = app.inspector.selected().and_then(|element| mirror.find(element));

    match node.and_then(|node| mirror.node(node)) {
        Some(data) => {
            let mut lines: Vec<Line> = data.tooltip().lines().map(|line| Line::from(line.to_string())).collect();
            if !data.classes().is_empty() {
                lines.push(Line::from(vec![
                    Span::styled("Classes: ", Style::default().fg(UiColor::Gray)),
                    Span::raw(data.classes().to_string()),
                ]));
            }
            lines
        }
        None => vec![Line::from("Selected: (none)")],
    }
}

fn draw_ui(frame: &mut Frame, app: &mut App) {
    let root = frame.area();
    let rows = Layout::vertical([Constraint::Length(1), Constraint::Min(8)]).split(root);
    frame.render_widget(Paragraph::new(tab_line(app.inspector.tab())), rows[0]);

    let split = Layout::horizontal([Constraint::Min(30), Constraint::Length(40)]).split(rows[1]);
    let main = split[0];
    let side = split[1];

    let tab = app.inspector.tab();
    let main_block = Block::default()
        .title(format!(" {} ", tab.title()))
        .borders(Borders::ALL);
    let main_inner = main_block.inner(main);
    frame.render_widget(main_block, main);
    match tab.tree_kind() {
        Some(kind) => draw_tree(frame, app, kind, main_inner),
        None => draw_flame(frame, app, main_inner),
    }

    let side_rows = Layout::vertical([
        Constraint::Length(5),
        Constraint::Min(6),
        Constraint::Length(7),
    ])
    .split(side);

    let status = vec![
        Line::from(app.status.clone()),
        Line::from(format!(
            "{} elements, {} subscriptions",
            app.scene.len(),
            app.scene.hub().subscription_count()
        )),
    ];
    frame.render_widget(
        Paragraph::new(status).block(Block::default().title(" Status ").borders(Borders::ALL)),
        side_rows[0],
    );
    frame.render_widget(
        Paragraph::new(selection_lines(app)).block(Block::default().title(" Selection ").borders(Borders::ALL)),
        side_rows[1],
    );

    let help_lines = vec![
        Line::from("Tab/1-3: view   j/k: move"),
        Line::from("Enter: expand/collapse"),
        Line::from("a: add  x: remove  R: replace"),
        Line::from(format!("t: toggle .{}  r: profile", CLASS_TO_TOGGLE)),
        Line::from("q: quit"),
    ];
    frame.render_widget(
        Paragraph::new(help_lines).block(Block::default().title(" Controls ").borders(Borders::ALL)),
        side_rows[2],
    );
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, config: Config) -> io::Result<()> {
    let mut app = App::new(config).map_err(|err| io::Error::other(err.to_string()))?;

    loop {
        app.sync();

        terminal.draw(|frame| {
            draw_ui(frame, &mut app);
        })?;

        if app.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => app.on_key(key),
                _ => {}
            }
        }
    }

    app.inspector.dispose();
    Ok(())
}

fn main() -> io::Result<()> {
    let config = Config::from_env().map_err(|err| io::Error::other(err.to_string()))?;
    // stdout belongs to the terminal UI: only log when a file is configured
    if config.log.file.is_some() {
        if let Err(err) = logging::init(&config.log) {
            eprintln!("treelens-tui: {}", err);
        }
    }

    enable_raw_mode()?;
    crossterm::execute!(stdout(), EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout());
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let app_result = run_app(&mut terminal, config);

    disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    app_result
}
