use crate::dataset::DatasetRecord;
use crate::error::{Error, Result};
use crate::graph::{Chart, ChartKind, render_chart};
use crate::projection::{ChartProjection, ReportProjection};
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference,
};

const PAGE_WIDTH: f32 = 215.9;
const PAGE_HEIGHT: f32 = 279.4;
const MARGIN: f32 = 20.0;
const CHART_WIDTH: f32 = 150.0;

/// Chart images embedded in a report; any of them may be missing
#[derive(Debug, Default)]
pub struct ReportCharts {
    pub averages: Option<Chart>,
    pub bar: Option<Chart>,
    pub pie: Option<Chart>,
}

impl ReportCharts {
    /// Render every report chart, skipping the ones that fail
    pub fn render(projection: &ChartProjection) -> Self {
        let attempt = |kind: ChartKind| match render_chart(kind, projection) {
            Ok(chart) => Some(chart),
            Err(e) => {
                log::warn!("leaving {:?} chart out of report: {}", kind, e);
                None
            }
        };
        ReportCharts {
            averages: attempt(ChartKind::Averages),
            bar: attempt(ChartKind::Bar),
            pie: attempt(ChartKind::Pie),
        }
    }
}

/// Build the complete PDF report for a stored dataset
///
/// # Arguments
/// * `record` - The dataset to report on
///
/// # Returns
/// * `Result<Vec<u8>>` - PDF file content as bytes or a `Render` error
pub fn build_report(record: &DatasetRecord) -> Result<Vec<u8>> {
    let projection = ReportProjection::build(record);
    let charts = ReportCharts::render(&ChartProjection::from_summary(&record.summary));
    render_pdf(&projection, charts)
}

/// Lay out a report projection on letter-sized pages
pub fn render_pdf(report: &ReportProjection, charts: ReportCharts) -> Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        report.title.as_str(),
        Mm(PAGE_WIDTH),
        Mm(PAGE_HEIGHT),
        "Layer 1",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_error)?;
    let layer = doc.get_page(page).get_layer(layer);

    let mut writer = PageWriter {
        doc: &doc,
        layer,
        y: PAGE_HEIGHT - MARGIN,
        regular,
        bold,
    };

    writer.line(&report.title, 20.0, true);
    writer.gap(4.0);

    let metadata = &report.metadata;
    writer.line(&format!("Dataset: {}", metadata.dataset_name), 11.0, false);
    writer.line(&format!("Uploaded by: {}", metadata.uploaded_by), 11.0, false);
    writer.line(&format!("Timestamp: {}", metadata.timestamp), 11.0, false);
    writer.line(
        &format!("Total Records: {}", metadata.total_records),
        11.0,
        false,
    );
    writer.gap(8.0);

    writer.line("Parameter Averages", 14.0, true);
    writer.row(&["Parameter", "Average Value"], &[0.0, 70.0], true);
    for row in &report.averages {
        writer.row(
            &[row.parameter.as_str(), row.display.as_str()],
            &[0.0, 70.0],
            false,
        );
    }
    writer.gap(6.0);
    if let Some(chart) = charts.averages {
        writer.chart(chart);
    }

    writer.line("Equipment Type Distribution", 14.0, true);
    const COLUMNS: [f32; 3] = [0.0, 70.0, 110.0];
    writer.row(&["Equipment Type", "Count", "Percentage"], &COLUMNS, true);
    for row in &report.distribution {
        let count = row.count.to_string();
        let percentage = format!("{:.1}%", row.percentage);
        writer.row(
            &[row.label.as_str(), count.as_str(), percentage.as_str()],
            &COLUMNS,
            false,
        );
    }
    writer.gap(6.0);
    for chart in [charts.bar, charts.pie].into_iter().flatten() {
        writer.chart(chart);
    }

    doc.save_to_bytes().map_err(pdf_error)
}

fn pdf_error(e: printpdf::Error) -> Error {
    Error::Render(format!("pdf: {:?}", e))
}

// Tracks the vertical cursor and starts a new page when content would
// cross the bottom margin.
struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

impl PageWriter<'_> {
    fn ensure_space(&mut self, height: f32) {
        if self.y - height < MARGIN {
            let (page, layer) = self
                .doc
                .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }

    fn font(&self, bold: bool) -> &IndirectFontRef {
        if bold { &self.bold } else { &self.regular }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    fn line(&mut self, text: &str, size: f32, bold: bool) {
        let height = size * 0.5;
        self.ensure_space(height);
        self.y -= height;
        self.layer
            .use_text(text, size, Mm(MARGIN), Mm(self.y), self.font(bold));
        self.y -= 2.0;
    }

    fn row(&mut self, cells: &[&str], offsets: &[f32], bold: bool) {
        const SIZE: f32 = 10.0;
        self.ensure_space(SIZE * 0.6);
        self.y -= SIZE * 0.6;
        for (cell, offset) in cells.iter().zip(offsets) {
            self.layer.use_text(
                *cell,
                SIZE,
                Mm(MARGIN + offset),
                Mm(self.y),
                self.font(bold),
            );
        }
        self.y -= 1.5;
    }

    fn chart(&mut self, chart: Chart) {
        let dpi = chart.width() as f32 / (CHART_WIDTH / 25.4);
        let height = chart.height() as f32 / dpi * 25.4;
        self.ensure_space(height);
        self.y -= height;

        Image::from_dynamic_image(&chart.into_image()).add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(Mm((PAGE_WIDTH - CHART_WIDTH) / 2.0)),
                translate_y: Some(Mm(self.y)),
                dpi: Some(dpi),
                ..Default::default()
            },
        );
        self.y -= 6.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{AverageRow, DistributionRow, ReportMetadata};

    fn report(types: usize) -> ReportProjection {
        ReportProjection {
            title: "Chemical Equipment Parameter Report".to_string(),
            metadata: ReportMetadata {
                dataset_name: "plant.csv".to_string(),
                uploaded_by: "alice".to_string(),
                timestamp: "2025-03-09 14:05:07".to_string(),
                total_records: types as u64,
            },
            averages: vec![AverageRow {
                parameter: "Flowrate".to_string(),
                value: 1.5,
                display: "1.50".to_string(),
            }],
            distribution: (0..types)
                .map(|i| DistributionRow {
                    label: format!("Type {}", i),
                    count: 1,
                    percentage: 100.0 / types as f64,
                })
                .collect(),
        }
    }

    #[test]
    fn report_without_charts_is_a_pdf() {
        let bytes = render_pdf(&report(3), ReportCharts::default()).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn long_tables_spill_onto_more_pages() {
        let short = render_pdf(&report(3), ReportCharts::default()).unwrap();
        let long = render_pdf(&report(200), ReportCharts::default()).unwrap();
        assert!(long.starts_with(b"%PDF-"));
        assert!(long.len() > short.len());
    }
}
