//! Reshapes of a stored [`Summary`] for chart and print consumers.
//!
//! Nothing here looks at raw data again: every function is a pure function
//! of the summary (and, for reports, the record metadata).

use crate::dataset::{Averages, DatasetRecord, PreviewRow, Summary};
use serde::Serialize;

pub const REPORT_TITLE: &str = "Chemical Equipment Parameter Report";

/// Parallel label and value arrays, ready for a chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelValues {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

/// Everything a client needs to draw the dataset charts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartProjection {
    /// Type counts for a bar chart
    pub bar: LabelValues,
    /// Type shares in percent for a pie chart
    pub proportion: LabelValues,
    pub averages: Averages,
    pub data_preview: Vec<PreviewRow>,
}

impl ChartProjection {
    pub fn from_summary(summary: &Summary) -> Self {
        let rows = distribution_rows(summary);
        let labels: Vec<String> = rows.iter().map(|row| row.label.clone()).collect();

        ChartProjection {
            bar: LabelValues {
                labels: labels.clone(),
                values: rows.iter().map(|row| row.count as f64).collect(),
            },
            proportion: LabelValues {
                labels,
                values: rows.iter().map(|row| row.percentage).collect(),
            },
            averages: summary.averages,
            data_preview: summary.data_preview.clone(),
        }
    }
}

/// One line of the distribution table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionRow {
    pub label: String,
    pub count: u64,
    pub percentage: f64,
}

/// Metadata block printed under the report title
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetadata {
    pub dataset_name: String,
    pub uploaded_by: String,
    pub timestamp: String,
    pub total_records: u64,
}

/// One line of the averages table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AverageRow {
    pub parameter: String,
    pub value: f64,
    /// Value with two decimals, as printed
    pub display: String,
}

/// The fixed narrative structure of a printed report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportProjection {
    pub title: String,
    pub metadata: ReportMetadata,
    pub averages: Vec<AverageRow>,
    pub distribution: Vec<DistributionRow>,
}

impl ReportProjection {
    pub fn build(record: &DatasetRecord) -> Self {
        let summary = &record.summary;
        ReportProjection {
            title: REPORT_TITLE.to_string(),
            metadata: ReportMetadata {
                dataset_name: record.name.clone(),
                uploaded_by: record.owner.to_string(),
                timestamp: record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                total_records: summary.total_records,
            },
            averages: summary
                .averages
                .entries()
                .into_iter()
                .map(|(parameter, value)| AverageRow {
                    parameter: parameter.to_string(),
                    value,
                    display: format!("{:.2}", value),
                })
                .collect(),
            distribution: distribution_rows(summary),
        }
    }
}

/// Type distribution ordered by descending count
///
/// Ties keep the insertion order of the summary's distribution. Percentages
/// are relative to the sum of all counts and 0 when that sum is 0.
pub fn distribution_rows(summary: &Summary) -> Vec<DistributionRow> {
    let total: u64 = summary.type_distribution.values().sum();
    let mut rows: Vec<DistributionRow> = summary
        .type_distribution
        .iter()
        .map(|(label, &count)| DistributionRow {
            label: label.clone(),
            count,
            percentage: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            },
        })
        .collect();
    // stable sort keeps insertion order among equal counts
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// Download name of a report: `Report_<name up to first dot>_<YYYYMMDD>.pdf`
pub fn report_filename(record: &DatasetRecord) -> String {
    let stem = record.name.split('.').next().unwrap_or_default();
    format!(
        "Report_{}_{}.pdf",
        stem,
        record.created_at.format("%Y%m%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{BlobRef, DatasetId, Owner};
    use chrono::{TimeZone, Utc};
    use indexmap::IndexMap;

    fn summary(distribution: &[(&str, u64)]) -> Summary {
        Summary {
            total_records: distribution.iter().map(|(_, c)| c).sum(),
            averages: Averages {
                flowrate: 120.456,
                pressure: 5.0,
                temperature: 98.126,
            },
            type_distribution: distribution
                .iter()
                .map(|(label, count)| (label.to_string(), *count))
                .collect::<IndexMap<_, _>>(),
            data_preview: Vec::new(),
        }
    }

    fn record(summary: Summary) -> DatasetRecord {
        DatasetRecord {
            id: DatasetId(3),
            owner: Owner::new("alice"),
            name: "plant.v2.csv".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap(),
            summary,
            storage_reference: BlobRef::new("x"),
        }
    }

    #[test]
    fn distribution_sorted_descending_with_stable_ties() {
        let s = summary(&[("Valve", 2), ("Pump", 5), ("Reactor", 2), ("Mixer", 1)]);
        let labels: Vec<String> = distribution_rows(&s).into_iter().map(|r| r.label).collect();
        assert_eq!(labels, ["Pump", "Valve", "Reactor", "Mixer"]);
    }

    #[test]
    fn percentages_use_total_count() {
        let s = summary(&[("Pump", 3), ("Valve", 1)]);
        let rows = distribution_rows(&s);
        assert_eq!(rows[0].percentage, 75.0);
        assert_eq!(rows[1].percentage, 25.0);
    }

    #[test]
    fn zero_total_gives_zero_percentages() {
        let s = summary(&[("Pump", 0), ("Valve", 0)]);
        assert!(distribution_rows(&s).iter().all(|r| r.percentage == 0.0));
        assert!(distribution_rows(&summary(&[])).is_empty());
    }

    #[test]
    fn chart_projection_shapes() {
        let s = summary(&[("Valve", 1), ("Pump", 3)]);
        let chart = ChartProjection::from_summary(&s);
        assert_eq!(chart.bar.labels, ["Pump", "Valve"]);
        assert_eq!(chart.bar.values, [3.0, 1.0]);
        assert_eq!(chart.proportion.values, [75.0, 25.0]);
        assert_eq!(chart.averages, s.averages);
    }

    #[test]
    fn report_projection_layout() {
        let report = ReportProjection::build(&record(summary(&[("Pump", 4)])));
        assert_eq!(report.title, REPORT_TITLE);
        assert_eq!(report.metadata.uploaded_by, "alice");
        assert_eq!(report.metadata.timestamp, "2025-03-09 14:05:07");
        assert_eq!(report.metadata.total_records, 4);

        let displayed: Vec<(&str, &str)> = report
            .averages
            .iter()
            .map(|row| (row.parameter.as_str(), row.display.as_str()))
            .collect();
        assert_eq!(
            displayed,
            [("Flowrate", "120.46"), ("Pressure", "5.00"), ("Temperature", "98.13")]
        );
    }

    #[test]
    fn report_is_deterministic() {
        let r = record(summary(&[("Pump", 4), ("Valve", 4)]));
        assert_eq!(ReportProjection::build(&r), ReportProjection::build(&r));
    }

    #[test]
    fn report_filename_uses_stem_and_date() {
        let r = record(summary(&[]));
        assert_eq!(report_filename(&r), "Report_plant_20250309.pdf");
    }
}
