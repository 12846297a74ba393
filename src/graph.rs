use crate::dataset::Averages;
use crate::error::{Error, Result};
use crate::projection::ChartProjection;
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use plotters::prelude::*;
use std::f64::consts::PI;
use std::io::Cursor;

/// Charts the service can draw for a dataset
///
/// These map to the images shown by clients and embedded in PDF reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    /// Bar chart of equipment counts per type
    Bar,

    /// Pie chart of each type's share of the equipment
    Pie,

    /// Bar chart of the three parameter averages
    Averages,
}

impl ChartKind {
    /// Parse the file name used in chart URLs (`bar.png`, `pie.png`, `averages.png`).
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name.strip_suffix(".png").unwrap_or(name) {
            "bar" => Some(ChartKind::Bar),
            "pie" => Some(ChartKind::Pie),
            "averages" => Some(ChartKind::Averages),
            _ => None,
        }
    }

    /// Default styling for this chart
    pub fn options(self) -> GraphOptions {
        match self {
            ChartKind::Bar => GraphOptions {
                title: "Equipment Type Distribution".to_string(),
                x_label: "Equipment Type".to_string(),
                y_label: "Count".to_string(),
                ..GraphOptions::default()
            },
            ChartKind::Pie => GraphOptions {
                title: "Equipment Type Share".to_string(),
                ..GraphOptions::default()
            },
            ChartKind::Averages => GraphOptions {
                title: "Parameter Averages".to_string(),
                x_label: "Parameter".to_string(),
                y_label: "Average Value".to_string(),
                ..GraphOptions::default()
            },
        }
    }
}

/// Configuration options for chart generation
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            x_label: String::new(),
            y_label: String::new(),
            width: 800,
            height: 500,
        }
    }
}

/// A rendered chart, kept as raw RGB pixels until encoded
#[derive(Clone, Debug)]
pub struct Chart {
    image: RgbImage,
}

impl Chart {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode the chart as PNG
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(self.image.clone())
            .write_to(&mut out, ImageOutputFormat::Png)
            .map_err(|e| Error::Render(e.to_string()))?;
        Ok(out.into_inner())
    }

    pub fn into_image(self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.image)
    }
}

/// Render one of the dataset charts from its chart projection
///
/// # Arguments
/// * `kind` - Which chart to draw
/// * `projection` - Chart-ready reshape of the dataset summary
///
/// # Returns
/// * `Result<Chart>` - The rendered chart, or `Render` if drawing failed
pub fn render_chart(kind: ChartKind, projection: &ChartProjection) -> Result<Chart> {
    let options = kind.options();
    match kind {
        ChartKind::Bar => {
            render_bar_chart(&projection.bar.labels, &projection.bar.values, &options)
        }
        ChartKind::Pie => render_pie_chart(
            &projection.proportion.labels,
            &projection.proportion.values,
            &options,
        ),
        ChartKind::Averages => render_averages_chart(&projection.averages, &options),
    }
}

/// Bar chart with one bar per label
pub fn render_bar_chart(
    labels: &[String],
    values: &[f64],
    options: &GraphOptions,
) -> Result<Chart> {
    render(options, |buffer| draw_bar_chart(buffer, labels, values, options))
}

/// Pie chart of the values' shares, with a legend
pub fn render_pie_chart(
    labels: &[String],
    values: &[f64],
    options: &GraphOptions,
) -> Result<Chart> {
    render(options, |buffer| draw_pie_chart(buffer, labels, values, options))
}

/// Bar chart of the three parameter averages
pub fn render_averages_chart(averages: &Averages, options: &GraphOptions) -> Result<Chart> {
    let (labels, values): (Vec<String>, Vec<f64>) = averages
        .entries()
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .unzip();
    render_bar_chart(&labels, &values, options)
}

type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

// Draws into an in-memory RGB buffer instead of a temporary PNG file
fn render<F>(options: &GraphOptions, draw: F) -> Result<Chart>
where
    F: FnOnce(&mut [u8]) -> DrawResult,
{
    if options.width == 0 || options.height == 0 {
        return Err(Error::Render("chart dimensions must be positive".to_string()));
    }
    let mut buffer = vec![0u8; options.width as usize * options.height as usize * 3];
    draw(&mut buffer).map_err(|e| Error::Render(e.to_string()))?;

    let image = RgbImage::from_raw(options.width, options.height, buffer)
        .ok_or_else(|| Error::Render("pixel buffer does not match chart size".to_string()))?;
    Ok(Chart { image })
}

fn draw_no_data(root: &DrawingArea<BitMapBackend, plotters::coord::Shift>) -> DrawResult {
    let (w, h) = root.dim_in_pixel();
    root.draw(&Text::new(
        "No data",
        (w as i32 / 2 - 40, h as i32 / 2),
        ("sans-serif", 24).into_font(),
    ))?;
    Ok(())
}

fn draw_bar_chart(
    buffer: &mut [u8],
    labels: &[String],
    values: &[f64],
    options: &GraphOptions,
) -> DrawResult {
    let root = BitMapBackend::with_buffer(buffer, (options.width, options.height))
        .into_drawing_area();
    root.fill(&WHITE)?;

    if labels.is_empty() {
        draw_no_data(&root)?;
        root.present()?;
        return Ok(());
    }

    let max_value = values.iter().copied().fold(0.0, f64::max);
    let y_max = if max_value > 0.0 { max_value * 1.1 } else { 1.0 };

    let mut chart = ChartBuilder::on(&root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d((0..labels.len()).into_segmented(), 0f64..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_formatter(&|x: &SegmentValue<usize>| match x {
            SegmentValue::CenterOf(i) => labels.get(*i).cloned().unwrap_or_default(),
            _ => String::new(),
        })
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(i, &value)| {
        let mut bar = Rectangle::new(
            [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), value)],
            Palette99::pick(i).filled(),
        );
        bar.set_margin(0, 0, 8, 8);
        bar
    }))?;

    root.present()?;
    Ok(())
}

fn draw_pie_chart(
    buffer: &mut [u8],
    labels: &[String],
    values: &[f64],
    options: &GraphOptions,
) -> DrawResult {
    let root = BitMapBackend::with_buffer(buffer, (options.width, options.height))
        .into_drawing_area();
    root.fill(&WHITE)?;
    let area = root.titled(&options.title, ("sans-serif", 30).into_font())?;

    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        draw_no_data(&area)?;
        root.present()?;
        return Ok(());
    }

    let (w, h) = area.dim_in_pixel();
    let radius = f64::from(w.min(h)) * 0.4;
    let (cx, cy) = (f64::from(w) * 0.33, f64::from(h) / 2.0);
    let legend_x = (f64::from(w) * 0.68) as i32;

    let mut angle = -PI / 2.0;
    for (i, (label, &value)) in labels.iter().zip(values).enumerate() {
        let sweep = value / total * 2.0 * PI;
        let steps = ((sweep / (2.0 * PI)) * 180.0).ceil().max(1.0) as usize;

        let mut points = vec![(cx as i32, cy as i32)];
        points.extend((0..=steps).map(|s| {
            let a = angle + sweep * s as f64 / steps as f64;
            ((cx + radius * a.cos()) as i32, (cy + radius * a.sin()) as i32)
        }));
        area.draw(&Polygon::new(points, Palette99::pick(i).filled()))?;

        let y = 20 + i as i32 * 26;
        area.draw(&Rectangle::new(
            [(legend_x, y), (legend_x + 16, y + 16)],
            Palette99::pick(i).filled(),
        ))?;
        area.draw(&Text::new(
            format!("{} ({:.1}%)", label, value / total * 100.0),
            (legend_x + 24, y),
            ("sans-serif", 16).into_font(),
        ))?;

        angle += sweep;
    }

    root.present()?;
    Ok(())
}
