use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use crate::compute::data_uri;
use crate::error::ComputeError;
use crate::table::Table;

const WIDTH: u32 = 600;
const HEIGHT: u32 = 400;
const MARGIN: u32 = 40;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const BAR: Rgb<u8> = Rgb([100, 149, 237]);

/// Turns a table into an embeddable image artifact.
pub trait ChartRenderer: Send + Sync {
    /// Returns a `data:` URI.
    fn render(&self, table: &Table) -> Result<String, ComputeError>;
}

/// Bar chart of the first numeric column, one bar per row, as PNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct BarChartRenderer;

impl ChartRenderer for BarChartRenderer {
    fn render(&self, table: &Table) -> Result<String, ComputeError> {
        let idx = table
            .first_numeric_column()
            .ok_or_else(|| ComputeError::Chart("no numeric column to plot".into()))?;
        let values = table.numeric_values(idx);
        let png = draw_bars(&values)?;
        Ok(data_uri(&png, "image/png"))
    }
}

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    for x in x0.min(x1)..=x0.max(x1).min(WIDTH - 1) {
        for y in y0.min(y1)..=y0.max(y1).min(HEIGHT - 1) {
            img.put_pixel(x, y, color);
        }
    }
}

fn draw_bars(values: &[f64]) -> Result<Vec<u8>, ComputeError> {
    if values.is_empty() {
        return Err(ComputeError::Chart("nothing to plot".into()));
    }
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);

    let hi = values.iter().copied().fold(0.0_f64, f64::max);
    let lo = values.iter().copied().fold(0.0_f64, f64::min);
    let span = if hi - lo > 0.0 { hi - lo } else { 1.0 };

    let plot_h = f64::from(HEIGHT - 2 * MARGIN);
    let plot_w = WIDTH - 2 * MARGIN;
    let y_of = |v: f64| MARGIN + ((hi - v) / span * plot_h).round() as u32;
    let baseline = y_of(0.0);

    let slot = (plot_w / values.len() as u32).max(1);
    let bar_w = (slot * 7 / 10).max(1);
    for (i, v) in values.iter().enumerate() {
        let x0 = MARGIN + i as u32 * slot + (slot - bar_w) / 2;
        if x0 >= WIDTH - MARGIN {
            break;
        }
        fill_rect(&mut img, x0, baseline, x0 + bar_w - 1, y_of(*v), BAR);
    }

    fill_rect(&mut img, MARGIN, MARGIN, MARGIN, HEIGHT - MARGIN, AXIS);
    fill_rect(&mut img, MARGIN, baseline, WIDTH - MARGIN, baseline, AXIS);

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| ComputeError::Chart(e.to_string()))?;
    Ok(buf.into_inner())
}
