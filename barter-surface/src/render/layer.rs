//! Display layers, their layout and the ratatui painters that draw them.

use crate::{
    config::{ColorMode, Density, VisualConfig},
    display::DisplayId,
    error::RenderError,
    snapshot::{ProfileLevel, VisualSnapshot, VolTrend},
};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
};

const C_BUY: Color = Color::Rgb(100, 220, 100);
const C_SELL: Color = Color::Rgb(220, 100, 100);
const C_NEUTRAL: Color = Color::Rgb(180, 180, 100);
const C_DIM: Color = Color::Rgb(120, 120, 120);
const C_BRIGHT: Color = Color::Rgb(220, 220, 220);
const C_ACCENT: Color = Color::Rgb(100, 180, 220);

/// Partial blocks for high density bars, index = eighths filled.
const EIGHTHS: [char; 8] = [' ', '▏', '▎', '▍', '▌', '▋', '▊', '▉'];
const FULL_BLOCK: char = '█';

/// Width reserved for the price label in front of each profile bar
const PROFILE_LABEL_WIDTH: u16 = 10;

/// Layers of a display, declared in compositing order (bottom first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerId {
    Frame,
    Price,
    DayRange,
    Volatility,
    Profile,
}

impl LayerId {
    pub const ALL: [LayerId; 5] = [
        LayerId::Frame,
        LayerId::Price,
        LayerId::DayRange,
        LayerId::Volatility,
        LayerId::Profile,
    ];

    /// Layers whose painted cells are kept in the content cache.
    pub fn cacheable(&self) -> bool {
        matches!(self, LayerId::Frame | LayerId::Profile)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayerId::Frame => "frame",
            LayerId::Price => "price",
            LayerId::DayRange => "day_range",
            LayerId::Volatility => "volatility",
            LayerId::Profile => "profile",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

/// Where each layer lives on a surface of a given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayLayout {
    pub frame: Rect,
    pub price: Option<Rect>,
    pub day_range: Option<Rect>,
    pub volatility: Option<Rect>,
    pub profile: Option<Rect>,
}

impl DisplayLayout {
    /// Border around the whole area, then one row each for price, day range and
    /// volatility, and the remaining rows for the profile. Hidden layers take no space.
    pub fn compute(area: Rect, config: &VisualConfig) -> Self {
        let inner = Rect {
            x: area.x.saturating_add(1),
            y: area.y.saturating_add(1),
            width: area.width.saturating_sub(2),
            height: area.height.saturating_sub(2),
        };

        let mut next_row = inner.y;
        let mut take_row = |show: bool| -> Option<Rect> {
            if !show || inner.width == 0 || next_row >= inner.bottom() {
                return None;
            }
            let row = Rect::new(inner.x, next_row, inner.width, 1);
            next_row += 1;
            Some(row)
        };

        let price = take_row(true);
        let day_range = take_row(config.show_day_range);
        let volatility = take_row(config.show_volatility_indicator);

        let profile = (config.show_market_profile && inner.width > 0 && next_row < inner.bottom())
            .then(|| Rect::new(inner.x, next_row, inner.width, inner.bottom() - next_row));

        Self {
            frame: area,
            price,
            day_range,
            volatility,
            profile,
        }
    }

    pub fn area_of(&self, layer: LayerId) -> Option<Rect> {
        let area = match layer {
            LayerId::Frame => Some(self.frame),
            LayerId::Price => self.price,
            LayerId::DayRange => self.day_range,
            LayerId::Volatility => self.volatility,
            LayerId::Profile => self.profile,
        };
        area.filter(|a| !a.is_empty())
    }

    /// Visible layers in compositing order.
    pub fn layers(&self) -> impl Iterator<Item = (LayerId, Rect)> + '_ {
        LayerId::ALL
            .into_iter()
            .filter_map(|layer| self.area_of(layer).map(|area| (layer, area)))
    }
}

/// Everything a painter may read about one display.
#[derive(Debug, Clone, Copy)]
pub struct DisplayView<'a> {
    pub id: DisplayId,
    pub symbol: &'a str,
    pub snapshot: Option<&'a VisualSnapshot>,
    pub config: VisualConfig,
    pub density: Density,
    pub stale: bool,
}

/// Paints one layer of a display into `buf` within `area`.
pub trait LayerPainter {
    fn paint(
        &self,
        layer: LayerId,
        view: &DisplayView<'_>,
        area: Rect,
        buf: &mut Buffer,
    ) -> Result<(), RenderError>;
}

impl std::fmt::Debug for dyn LayerPainter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LayerPainter")
    }
}

/// Default painter built from ratatui widgets.
#[derive(Debug, Clone, Copy, Default)]
pub struct WidgetPainter;

impl LayerPainter for WidgetPainter {
    fn paint(
        &self,
        layer: LayerId,
        view: &DisplayView<'_>,
        area: Rect,
        buf: &mut Buffer,
    ) -> Result<(), RenderError> {
        match layer {
            LayerId::Frame => paint_frame(view, area, buf),
            LayerId::Price => paint_price(view, area, buf),
            LayerId::DayRange => paint_day_range(view, area, buf),
            LayerId::Volatility => paint_volatility(view, area, buf),
            LayerId::Profile => paint_profile(view, area, buf),
        }
        Ok(())
    }
}

/// Static placeholder shown while a display's circuit breaker is open.
pub fn paint_unavailable(symbol: &str, area: Rect, buf: &mut Buffer) {
    let block = Block::default()
        .title(format!(" {symbol} "))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(C_SELL));
    let inner = block.inner(area);
    block.render(area, buf);
    Paragraph::new(Line::from(Span::styled(
        "display unavailable",
        Style::default().fg(C_DIM),
    )))
    .render(inner, buf);
}

fn paint_frame(view: &DisplayView<'_>, area: Rect, buf: &mut Buffer) {
    Block::default()
        .title(format!(" {} ", view.symbol))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(C_ACCENT))
        .render(area, buf);
}

fn paint_price(view: &DisplayView<'_>, area: Rect, buf: &mut Buffer) {
    let Some(snapshot) = view.snapshot else {
        Paragraph::new(Line::from(Span::styled("Waiting for ticks...", Style::default().fg(C_DIM))))
            .render(area, buf);
        return;
    };

    let direction = snapshot.direction();
    let color = if view.stale {
        C_DIM
    } else {
        match view.config.color_mode {
            ColorMode::Directional | ColorMode::Spectrum => match direction {
                1 => C_BUY,
                -1 => C_SELL,
                _ => C_NEUTRAL,
            },
            ColorMode::Single => C_ACCENT,
        }
    };
    let arrow = match direction {
        1 => "▲",
        -1 => "▼",
        _ => "•",
    };
    let change = snapshot
        .previous_price
        .filter(|p| *p > 0.0)
        .map(|p| (snapshot.price - p) / p * 100.0)
        .unwrap_or(0.0);

    let mut spans = vec![
        Span::styled(
            format_price(snapshot.price),
            Style::default().fg(C_BRIGHT).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!(" {arrow}{change:+.3}%"), Style::default().fg(color)),
    ];
    if view.stale {
        spans.push(Span::styled(" STALE", Style::default().fg(C_SELL)));
    }
    Paragraph::new(Line::from(spans)).render(area, buf);
}

fn paint_day_range(view: &DisplayView<'_>, area: Rect, buf: &mut Buffer) {
    let Some(snapshot) = view.snapshot else {
        return;
    };
    let range = &snapshot.range;

    let ratio = match range.range_to_adr() {
        Some(ratio) => format!(" {:.0}%ADR", ratio * 100.0),
        None => " --ADR".to_string(),
    };
    let ratio_color = match range.range_to_adr() {
        Some(ratio) if ratio >= 1.0 => C_SELL,
        Some(ratio) if ratio >= 0.7 => C_NEUTRAL,
        _ => C_DIM,
    };

    // "L " + bar + " H" + ratio
    let bar_width = (area.width as usize).saturating_sub(4 + ratio.chars().count());
    let marker = range.position(snapshot.price);
    let bar: String = (0..bar_width)
        .map(|i| match marker {
            Some(pos) if i == ((pos * (bar_width.saturating_sub(1)) as f64).round() as usize) => '●',
            _ => '─',
        })
        .collect();

    let bar_color = match view.config.color_mode {
        ColorMode::Single => C_ACCENT,
        _ => C_DIM,
    };

    Paragraph::new(Line::from(vec![
        Span::styled("L ", Style::default().fg(C_SELL)),
        Span::styled(bar, Style::default().fg(bar_color)),
        Span::styled(" H", Style::default().fg(C_BUY)),
        Span::styled(ratio, Style::default().fg(ratio_color)),
    ]))
    .render(area, buf);
}

fn paint_volatility(view: &DisplayView<'_>, area: Rect, buf: &mut Buffer) {
    let Some(snapshot) = view.snapshot else {
        return;
    };
    let vol = &snapshot.volatility;
    let color = match (view.config.color_mode, vol.trend) {
        (ColorMode::Single, _) => C_ACCENT,
        (_, VolTrend::Expanding) => C_SELL,
        (_, VolTrend::Contracting) => C_BUY,
        (_, VolTrend::Stable) => C_NEUTRAL,
    };

    Paragraph::new(Line::from(vec![
        Span::styled("σ ", Style::default().fg(C_DIM)),
        Span::styled(format!("{:.2}bp ", vol.sigma_bps), Style::default().fg(C_BRIGHT)),
        Span::styled(
            format!("{} {}", vol.trend.arrow(), vol.trend.label()),
            Style::default().fg(color),
        ),
    ]))
    .render(area, buf);
}

fn paint_profile(view: &DisplayView<'_>, area: Rect, buf: &mut Buffer) {
    let Some(snapshot) = view.snapshot else {
        return;
    };
    let profile = &snapshot.profile;
    let max_volume = profile.max_volume();
    if max_volume <= 0.0 {
        return;
    }

    let bar_width = area.width.saturating_sub(PROFILE_LABEL_WIDTH) as usize;
    let levels = profile.levels_by_price();
    let poc = profile.point_of_control;

    let lines: Vec<Line> = levels
        .iter()
        .take(area.height as usize)
        .map(|level| {
            let fraction = level.volume / max_volume;
            let in_value_area = profile
                .value_area
                .is_some_and(|(low, high)| level.price_low >= low && level.price_high <= high);
            let is_poc = poc.is_some_and(|p| p.price_low == level.price_low);
            let color = profile_color(view.config.color_mode, fraction, is_poc, in_value_area);

            let label_style = if level.contains(snapshot.price) {
                Style::default().fg(C_BRIGHT).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(C_DIM)
            };

            Line::from(vec![
                Span::styled(profile_label(level), label_style),
                Span::styled(bar(fraction, bar_width, view.density), Style::default().fg(color)),
            ])
        })
        .collect();

    Paragraph::new(lines).render(area, buf);
}

fn profile_label(level: &ProfileLevel) -> String {
    let label = format_price(level.price_low);
    format!("{:>width$} ", label, width = (PROFILE_LABEL_WIDTH - 1) as usize)
}

fn profile_color(mode: ColorMode, fraction: f64, is_poc: bool, in_value_area: bool) -> Color {
    match mode {
        ColorMode::Single => C_ACCENT,
        ColorMode::Directional => {
            if is_poc {
                C_NEUTRAL
            } else if in_value_area {
                C_ACCENT
            } else {
                C_DIM
            }
        }
        ColorMode::Spectrum => {
            // cool to hot by relative volume
            let t = fraction.clamp(0.0, 1.0);
            let r = (100.0 + 120.0 * t) as u8;
            let g = (180.0 - 80.0 * t) as u8;
            let b = (220.0 - 120.0 * t) as u8;
            Color::Rgb(r, g, b)
        }
    }
}

/// Horizontal bar `fraction` of `width` cells long, resolved to eighths at high density.
pub fn bar(fraction: f64, width: usize, density: Density) -> String {
    let scale = density.scale() as usize;
    let steps = (fraction.clamp(0.0, 1.0) * (width * scale) as f64).round() as usize;
    let full = steps / scale;
    let partial = steps % scale;

    let mut bar: String = std::iter::repeat_n(FULL_BLOCK, full).collect();
    if partial > 0 {
        bar.push(EIGHTHS[partial]);
    }
    bar
}

fn format_price(price: f64) -> String {
    if price >= 1_000.0 {
        format!("{price:.1}")
    } else if price >= 1.0 {
        format!("{price:.2}")
    } else {
        format!("{price:.5}")
    }
}
