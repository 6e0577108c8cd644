/// Surface Workspace
///
/// Terminal workspace showing up to 25 instrument displays at once, each with a
/// live price, day range, volatility and market profile. Ticks come from the
/// aggregated market data server (WS_URL) or from a synthetic demo feed
/// (SURFACE_DEMO=1).
mod feed;
mod grid;
mod types;

use std::{
    error::Error,
    fs::File,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use barter_surface::{
    AggregationEngine, ColorMode, DisplayId, DisplayManager, FrameReport, RenderScheduler,
    Settings, VisualConfig, update_channel,
};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use feed::{ConnectionStatus, DemoFeed, FeedConfig, WebSocketFeed};
use grid::{MAX_DISPLAYS, grid};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
};
use rustls::crypto::ring::default_provider;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Get WebSocket URL from WS_URL env var (default: ws://127.0.0.1:9001)
fn get_ws_url() -> String {
    std::env::var("WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:9001".to_string())
}

/// Symbols to open on start, from SURFACE_SYMBOLS (default: BTC,ETH,SOL)
fn symbols() -> Vec<String> {
    let symbols: Vec<String> = std::env::var("SURFACE_SYMBOLS")
        .unwrap_or_else(|_| "BTC,ETH,SOL".to_string())
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        vec!["BTC".to_string()]
    } else {
        symbols
    }
}

fn demo_mode() -> bool {
    std::env::var("SURFACE_DEMO")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Demo tick interval from SURFACE_DEMO_INTERVAL_MS (default: 20ms)
fn demo_interval() -> Duration {
    std::env::var("SURFACE_DEMO_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(20))
}

/// Log to the file named by SURFACE_LOG. The alternate screen owns stdout, so
/// nothing is logged when it is unset.
fn init_logging() -> Result<(), Box<dyn Error>> {
    let Ok(path) = std::env::var("SURFACE_LOG") else {
        return Ok(());
    };
    let file = File::create(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}

/// Host-side state: which symbols can be opened and which display has focus.
struct Workspace {
    pool: Vec<String>,
    next_symbol: usize,
    focus: usize,
    quit: bool,
}

impl Workspace {
    fn focused(&self, manager: &DisplayManager) -> Option<DisplayId> {
        let ids = manager.ids();
        ids.get(self.focus.min(ids.len().saturating_sub(1))).copied()
    }

    fn add(&mut self, manager: &mut DisplayManager) {
        if manager.len() >= MAX_DISPLAYS {
            return;
        }
        let symbol = &self.pool[self.next_symbol % self.pool.len()];
        self.next_symbol += 1;
        match manager.create(symbol, VisualConfig::default()) {
            Ok(id) => self.focus = manager.ids().iter().position(|i| *i == id).unwrap_or(0),
            Err(error) => warn!(%symbol, %error, "failed to open display"),
        }
    }

    fn remove_focused(&mut self, manager: &mut DisplayManager) {
        if let Some(id) = self.focused(manager) {
            manager.destroy(id);
            self.focus = self.focus.min(manager.len().saturating_sub(1));
        }
    }

    fn update_visual(&self, manager: &mut DisplayManager, update: impl FnOnce(&mut VisualConfig)) {
        let Some(id) = self.focused(manager) else {
            return;
        };
        let Some(mut visual) = manager.display(id).map(|d| d.visual()) else {
            return;
        };
        update(&mut visual);
        let _ = manager.set_visual(id, visual);
    }

    fn toggle_density(&self, manager: &mut DisplayManager) {
        let Some(id) = self.focused(manager) else {
            return;
        };
        if let Some(density) = manager.display(id).map(|d| d.surface().density()) {
            let _ = manager.set_density(id, density.toggled());
        }
    }
}

/// Apply at most one pending key press.
fn handle_input(workspace: &mut Workspace, manager: &mut DisplayManager) -> Result<(), Box<dyn Error>> {
    if !event::poll(Duration::from_millis(1))? {
        return Ok(());
    }
    let Event::Key(key) = event::read()? else {
        return Ok(());
    };

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => workspace.quit = true,
        KeyCode::Char('a') => workspace.add(manager),
        KeyCode::Char('x') | KeyCode::Delete => workspace.remove_focused(manager),
        KeyCode::Tab => workspace.focus = (workspace.focus + 1) % manager.len().max(1),
        KeyCode::Char('d') => workspace.toggle_density(manager),
        KeyCode::Char('p') => {
            workspace.update_visual(manager, |v| v.show_market_profile = !v.show_market_profile)
        }
        KeyCode::Char('v') => workspace.update_visual(manager, |v| {
            v.show_volatility_indicator = !v.show_volatility_indicator
        }),
        KeyCode::Char('r') => workspace.update_visual(manager, |v| v.show_day_range = !v.show_day_range),
        KeyCode::Char('c') => {
            workspace.update_visual(manager, |v| v.color_mode = next_color_mode(v.color_mode))
        }
        _ => {}
    }
    Ok(())
}

fn next_color_mode(mode: ColorMode) -> ColorMode {
    match mode {
        ColorMode::Directional => ColorMode::Spectrum,
        ColorMode::Spectrum => ColorMode::Single,
        ColorMode::Single => ColorMode::Directional,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();
    init_logging()?;

    let settings = Settings::from_env()?;
    let pool = symbols();

    // Aggregation domain
    let (tick_tx, tick_rx) = mpsc::channel(100_000);
    let (publisher, receiver) = update_channel(&settings.channel);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let engine = AggregationEngine::new(settings.aggregation.clone());
    let aggregation = tokio::spawn(engine.run(tick_rx, command_rx, publisher));

    // Tick feed
    let connected = Arc::new(AtomicBool::new(false));
    if demo_mode() {
        connected.store(true, Ordering::Relaxed);
        DemoFeed::new(pool.clone())
            .with_interval(demo_interval())
            .with_seed(chrono::Utc::now().timestamp_millis() as u64)
            .start(tick_tx);
    } else {
        let config = FeedConfig::new(get_ws_url())
            .with_ping_interval(Duration::from_secs(30))
            .with_reconnect_delay(Duration::from_secs(2));
        let mut status_rx = WebSocketFeed::new(config).start(tick_tx);

        let connected_flag = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(status) = status_rx.recv().await {
                match status {
                    ConnectionStatus::Connected => connected_flag.store(true, Ordering::Relaxed),
                    ConnectionStatus::Disconnected | ConnectionStatus::Reconnecting => {
                        connected_flag.store(false, Ordering::Relaxed)
                    }
                }
            }
        });
    }

    // Rendering domain
    let frame_interval = settings.render.frame_budget;
    let mut scheduler = RenderScheduler::new(settings.render.frame_history);
    let mut manager = DisplayManager::new(settings.render.clone(), receiver, command_tx);
    let mut workspace = Workspace {
        next_symbol: pool.len(),
        pool: pool.clone(),
        focus: 0,
        quit: false,
    };
    for symbol in &pool {
        manager.create(symbol, VisualConfig::default())?;
    }

    // Setup panic hook to restore terminal on crash
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut last_frame = Instant::now();
    let mut report = FrameReport::default();

    let result: Result<(), Box<dyn Error>> = loop {
        if let Err(e) = handle_input(&mut workspace, &mut manager) {
            break Err(e);
        }
        if workspace.quit {
            break Ok(());
        }

        if last_frame.elapsed() >= frame_interval {
            last_frame = Instant::now();

            let size = match terminal.size() {
                Ok(size) => size,
                Err(e) => break Err(e.into()),
            };
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(3), Constraint::Length(1)])
                .split(Rect::new(0, 0, size.width, size.height));

            let ids = manager.ids();
            let resized: Result<(), _> = ids
                .iter()
                .zip(grid(chunks[0], ids.len()))
                .try_for_each(|(id, cell)| manager.resize(*id, cell));
            if let Err(e) = resized {
                break Err(e.into());
            }

            report = scheduler.frame_tick(&mut manager);

            let footer_area = chunks[1];
            let connected_now = connected.load(Ordering::Relaxed);
            let focused = workspace
                .focused(&manager)
                .and_then(|id| manager.display(id))
                .map(|d| d.symbol().to_string())
                .unwrap_or_default();
            let p95 = scheduler.percentile(95.0).unwrap_or_default();
            let coalesced = manager.channel_stats().coalesced;
            let count = manager.len();

            let drawn = terminal.draw(|f| {
                manager.compose(f.buffer_mut());
                render_footer(f, footer_area, connected_now, &focused, count, p95, &report, coalesced);
            });
            if let Err(e) = drawn {
                break Err(e.into());
            }
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
    };

    // Cleanup
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    let destroyed = manager.destroy_all();
    info!(
        destroyed,
        stats = ?manager.stats(),
        resources = ?manager.resource_counts(),
        last_frame = ?report,
        "workspace closed"
    );
    drop(manager);
    if let Ok(stats) = aggregation.await {
        info!(?stats, "aggregation finished");
    }

    result
}

#[allow(clippy::too_many_arguments)]
fn render_footer(
    f: &mut ratatui::Frame,
    area: Rect,
    connected: bool,
    focused: &str,
    displays: usize,
    p95: Duration,
    report: &FrameReport,
    coalesced: u64,
) {
    let status = if connected {
        Span::styled(" ● LIVE ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
    } else {
        Span::styled(" ○ OFFLINE ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
    };

    let spans = vec![
        status,
        Span::styled(
            format!("{displays}/{MAX_DISPLAYS} "),
            Style::default().fg(Color::White),
        ),
        Span::styled(
            format!("focus {focused} "),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(
                "| p95 {:.1}ms defer {} fail {} coalesced {} ",
                p95.as_secs_f64() * 1_000.0,
                report.deferred,
                report.failed,
                coalesced
            ),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("| [a]dd [x]close [Tab]focus [d]ensity [p]rofile [v]ol [r]ange [c]olor [q]uit"),
    ];

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
