use std::fmt::Write;

use anyhow::Context;
use resvg::{tiny_skia, usvg};

use crate::app_config::Palette;
use crate::models::HistorySeries;

pub const CHART_TITLE: &str = "Pendências nas últimas competências";

const WIDTH: f64 = 520.0;
const HEIGHT: f64 = 220.0;
const PAD_TOP: f64 = 40.0;
const PAD_RIGHT: f64 = 20.0;
const PAD_BOTTOM: f64 = 40.0;
const PAD_LEFT: f64 = 40.0;
const GRID_LINES: usize = 4;
const PNG_SCALE: f32 = 2.0;

/// Smoothing needs at least three points and some variation.
pub fn can_smooth(values: &[f64]) -> bool {
    values.len() >= 3 && values.iter().any(|v| *v != values[0])
}

#[derive(Debug, Clone, Copy)]
struct Point {
    x: f64,
    y: f64,
}

fn plot_points(values: &[f64]) -> Vec<Point> {
    let chart_width = WIDTH - PAD_LEFT - PAD_RIGHT;
    let chart_height = HEIGHT - PAD_TOP - PAD_BOTTOM;
    let max = values.iter().copied().fold(1.0_f64, f64::max);
    let min = values.iter().copied().fold(0.0_f64, f64::min);
    let range = if max - min == 0.0 { 1.0 } else { max - min };
    let step = chart_width / (values.len().saturating_sub(1).max(1)) as f64;

    values
        .iter()
        .enumerate()
        .map(|(idx, value)| Point {
            x: PAD_LEFT + step * idx as f64,
            y: PAD_TOP + chart_height - ((value - min) / range) * chart_height,
        })
        .collect()
}

fn straight_path(points: &[Point]) -> String {
    let mut path = String::new();
    for (idx, p) in points.iter().enumerate() {
        let cmd = if idx == 0 { "M" } else { " L" };
        let _ = write!(path, "{cmd} {:.1} {:.1}", p.x, p.y);
    }
    path
}

fn smooth_path(points: &[Point]) -> String {
    let mut path = String::new();
    let Some(first) = points.first() else {
        return path;
    };
    let _ = write!(path, "M {:.1} {:.1}", first.x, first.y);
    for pair in points.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);
        let cx = prev.x + (curr.x - prev.x) / 2.0;
        let mid_y = (prev.y + curr.y) / 2.0;
        let _ = write!(
            path,
            " Q {cx:.1} {:.1}, {cx:.1} {mid_y:.1} Q {cx:.1} {:.1}, {:.1} {:.1}",
            prev.y, curr.y, curr.x, curr.y
        );
    }
    path
}

/// Renders the pendency trend of a history as a standalone SVG document.
pub fn render_trend_chart(series: &HistorySeries, palette: &Palette) -> String {
    let values: Vec<f64> = series.points.iter().map(|p| p.pendencies as f64).collect();
    let points = plot_points(&values);
    let baseline = HEIGHT - PAD_BOTTOM;
    let smooth = can_smooth(&values);

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        "<svg width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\" \
         xmlns=\"http://www.w3.org/2000/svg\" style=\"font-family:Arial,sans-serif;\">"
    );

    for idx in 0..=GRID_LINES {
        let y = PAD_TOP + (baseline - PAD_TOP) / GRID_LINES as f64 * idx as f64;
        let _ = writeln!(
            svg,
            "<line x1=\"{PAD_LEFT}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"#E5E7EB\" \
             stroke-width=\"0.5\" stroke-dasharray=\"3,3\" opacity=\"0.5\"/>",
            WIDTH - PAD_RIGHT
        );
    }

    if let (true, Some(first), Some(last)) = (smooth, points.first(), points.last()) {
        let line = smooth_path(&points);
        let _ = writeln!(
            svg,
            "<path d=\"{line} L {:.1} {baseline:.1} L {:.1} {baseline:.1} Z\" fill=\"{}\" opacity=\"0.2\"/>",
            last.x, first.x, palette.line_soft
        );
        let _ = writeln!(
            svg,
            "<path d=\"{line}\" stroke=\"{}\" stroke-width=\"2.5\" fill=\"none\" \
             stroke-linecap=\"round\" stroke-linejoin=\"round\"/>",
            palette.line_strong
        );
    } else {
        let _ = writeln!(
            svg,
            "<path d=\"{}\" stroke=\"{}\" stroke-width=\"2.5\" fill=\"none\" \
             stroke-linecap=\"round\" stroke-linejoin=\"round\"/>",
            straight_path(&points),
            palette.line_strong
        );
    }

    for (point, history) in points.iter().zip(series.points.iter()) {
        let _ = writeln!(
            svg,
            "<circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"4.5\" fill=\"{}\" stroke=\"white\" stroke-width=\"1.5\"/>",
            point.x, point.y, palette.primary
        );
        let _ = writeln!(
            svg,
            "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"11\" font-weight=\"600\" \
             fill=\"{}\">{}</text>",
            point.x,
            point.y - 12.0,
            palette.primary,
            history.pendencies
        );
        let _ = writeln!(
            svg,
            "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"11\" fill=\"#374151\">{}</text>",
            point.x,
            baseline + 25.0,
            history.period
        );
    }

    let _ = writeln!(
        svg,
        "<text x=\"{:.1}\" y=\"20\" text-anchor=\"middle\" font-size=\"13\" font-weight=\"500\" \
         fill=\"{}\">{CHART_TITLE}</text>",
        WIDTH / 2.0,
        palette.primary
    );
    let _ = writeln!(
        svg,
        "<line x1=\"{PAD_LEFT}\" y1=\"{baseline:.1}\" x2=\"{:.1}\" y2=\"{baseline:.1}\" \
         stroke=\"#D1D5DB\" stroke-width=\"1\"/>",
        WIDTH - PAD_RIGHT
    );
    let _ = writeln!(svg, "</svg>");

    svg
}

/// Rasterizes chart SVG to PNG for mail clients that do not display SVG
/// images. System fonts are loaded once per rasterizer.
pub struct PngRasterizer {
    options: usvg::Options<'static>,
}

impl PngRasterizer {
    pub fn new() -> Self {
        let mut options = usvg::Options::default();
        options.fontdb_mut().load_system_fonts();
        Self { options }
    }

    pub fn rasterize(&self, svg: &str) -> anyhow::Result<Vec<u8>> {
        let tree = usvg::Tree::from_str(svg, &self.options).context("failed to parse chart SVG")?;
        let scale = f64::from(PNG_SCALE);
        let mut pixmap = tiny_skia::Pixmap::new(
            (WIDTH * scale).round() as u32,
            (HEIGHT * scale).round() as u32,
        )
        .context("failed to allocate chart canvas")?;
        pixmap.fill(tiny_skia::Color::WHITE);
        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(PNG_SCALE, PNG_SCALE),
            &mut pixmap.as_mut(),
        );
        pixmap.encode_png().context("failed to encode chart PNG")
    }
}

impl Default for PngRasterizer {
    fn default() -> Self {
        Self::new()
    }
}
