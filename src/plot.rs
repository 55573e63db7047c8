//! SVG charts of a [`ResultTable`].
//!
//! Plotting is best effort: a chart that fails to render is logged and
//! skipped, and the run still succeeds.

use crate::results::{BenchmarkResult, ResultTable};
use anyhow::Result;
use plotters::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const THROUGHPUT_CHART: &str = "throughput_comparison.svg";
pub const LATENCY_CHART: &str = "latency_comparison.svg";
pub const PERCENTILE_CHART: &str = "latency_percentiles.svg";

const CHART_SIZE: (u32, u32) = (1200, 600);
const BAR_HALF_WIDTH: f64 = 0.35;

struct Bar {
    label: String,
    color: RGBAColor,
    value: f64,
    overlay: Option<f64>,
}

/// Label for category index `x`; empty between categories.
fn category_label(labels: &[String], x: f64) -> String {
    let index = x.round();
    if (x - index).abs() > 1e-6 || index < 0.0 {
        return String::new();
    }
    labels.get(index as usize).cloned().unwrap_or_default()
}

fn target_color(table: &ResultTable, target: &str) -> RGBAColor {
    let index = table
        .targets()
        .iter()
        .position(|t| *t == target)
        .unwrap_or(0);
    Palette99::pick(index).to_rgba()
}

/// One bar per result. Labels carry the scenario only when several exist.
fn bars<F>(table: &ResultTable, metric: F) -> Vec<Bar>
where
    F: Fn(&BenchmarkResult) -> Option<(f64, Option<f64>)>,
{
    let qualify = table.scenarios().len() > 1;
    table
        .iter()
        .filter_map(|result| {
            let (value, overlay) = metric(result)?;
            let label = if qualify {
                format!("{}/{}", result.target, result.scenario)
            } else {
                result.target.clone()
            };
            Some(Bar {
                label,
                color: target_color(table, &result.target),
                value,
                overlay,
            })
        })
        .collect()
}

fn draw_bars(
    path: &Path,
    caption: &str,
    y_desc: &str,
    bars: &[Bar],
    overlay_label: &str,
) -> Result<()> {
    let top = bars
        .iter()
        .map(|bar| bar.value.max(bar.overlay.unwrap_or(0.0)))
        .fold(0.0, f64::max);
    let top = if top > 0.0 { top * 1.1 } else { 1.0 };
    let labels: Vec<String> = bars.iter().map(|bar| bar.label.clone()).collect();

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..(bars.len() as f64 - 0.5), 0f64..top)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len())
        .x_label_formatter(&|x| category_label(&labels, *x))
        .x_desc("Server")
        .y_desc(y_desc)
        .draw()?;

    if bars.iter().any(|bar| bar.overlay.is_some()) {
        chart
            .draw_series(bars.iter().enumerate().filter_map(|(i, bar)| {
                let x = i as f64;
                bar.overlay.map(|value| {
                    Rectangle::new(
                        [(x - BAR_HALF_WIDTH, 0.0), (x + BAR_HALF_WIDTH, value)],
                        bar.color.mix(0.25).filled(),
                    )
                })
            }))?
            .label(overlay_label)
            .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], BLACK.mix(0.25).filled()));
    }

    let series = chart.draw_series(bars.iter().enumerate().map(|(i, bar)| {
        let x = i as f64;
        Rectangle::new(
            [(x - BAR_HALF_WIDTH, 0.0), (x + BAR_HALF_WIDTH, bar.value)],
            bar.color.mix(0.8).filled(),
        )
    }))?;

    if bars.iter().any(|bar| bar.overlay.is_some()) {
        series
            .label(y_desc)
            .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], BLACK.mix(0.8).filled()));
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

fn draw_throughput(table: &ResultTable, path: &Path) -> Result<()> {
    let bars = bars(table, |r| Some((r.ops_per_sec, None)));
    draw_bars(path, "Throughput Comparison (Ops/sec)", "Ops/sec", &bars, "")
}

/// Average latency bars over translucent max latency bars.
fn draw_latency(table: &ResultTable, path: &Path) -> Result<()> {
    let bars = bars(table, |r| {
        r.average_latency_ms
            .or_else(|| r.percentile(50.0))
            .map(|avg| (avg, r.max_latency_ms))
    });
    if bars.is_empty() {
        anyhow::bail!("no result carries an average latency");
    }
    draw_bars(path, "Latency Comparison", "Avg Latency (ms)", &bars, "Max Latency (ms)")
}

/// One line per target/scenario across the reported percentiles.
fn draw_percentiles(table: &ResultTable, path: &Path) -> Result<()> {
    let mut percentiles: Vec<f64> = table
        .iter()
        .flat_map(|r| r.percentiles.iter().map(|p| p.percentile))
        .collect();
    percentiles.sort_by(f64::total_cmp);
    percentiles.dedup_by(|a, b| (*a - *b).abs() < 0.01);

    let labels: Vec<String> = percentiles.iter().map(|p| format!("p{}", p)).collect();
    let top = table
        .iter()
        .flat_map(|r| r.percentiles.iter().map(|p| p.value_ms))
        .fold(0.0, f64::max);
    let top = if top > 0.0 { top * 1.1 } else { 1.0 };

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Latency Percentiles", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..(percentiles.len() as f64 - 0.5), 0f64..top)?;

    chart
        .configure_mesh()
        .x_labels(percentiles.len())
        .x_label_formatter(&|x| category_label(&labels, *x))
        .x_desc("Percentile")
        .y_desc("Latency (ms)")
        .draw()?;

    for (index, result) in table.iter().filter(|r| !r.percentiles.is_empty()).enumerate() {
        let color = Palette99::pick(index).to_rgba();
        let points: Vec<(f64, f64)> = result
            .percentiles
            .iter()
            .filter_map(|p| {
                percentiles
                    .iter()
                    .position(|q| (q - p.percentile).abs() < 0.01)
                    .map(|x| (x as f64, p.value_ms))
            })
            .collect();

        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(format!("{}/{}", result.target, result.scenario))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], color));
        chart.draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 3, color.filled())),
        )?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Render every applicable chart into `dir`, returning the files written.
pub fn plot(table: &ResultTable, dir: &Path) -> Vec<PathBuf> {
    if table.is_empty() {
        warn!("No results to plot");
        return Vec::new();
    }

    let mut charts: Vec<(&str, fn(&ResultTable, &Path) -> Result<()>)> = vec![
        (THROUGHPUT_CHART, draw_throughput),
        (LATENCY_CHART, draw_latency),
    ];
    if table.iter().any(|r| !r.percentiles.is_empty()) {
        charts.push((PERCENTILE_CHART, draw_percentiles));
    }

    let mut written = Vec::new();
    for (name, draw) in charts {
        let path = dir.join(name);
        match draw(table, &path) {
            Ok(()) => {
                info!("Plot saved: {}", path.display());
                written.push(path);
            }
            Err(e) => warn!("Skipping {}: {}", name, e),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::collect;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_category_label() {
        let labels = vec!["redis".to_string(), "keydb".to_string()];
        assert_eq!(category_label(&labels, 0.0), "redis");
        assert_eq!(category_label(&labels, 1.0), "keydb");
        assert_eq!(category_label(&labels, 0.5), "");
        assert_eq!(category_label(&labels, -1.0), "");
        assert_eq!(category_label(&labels, 2.0), "");
    }

    #[test]
    fn test_empty_table_plots_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(plot(&ResultTable::default(), dir.path()).is_empty());
    }

    #[test]
    fn test_all_charts_written() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "redis_balanced.json",
            r#"{"ALL STATS":{"Totals":{"Ops/sec":1000,"Average Latency":0.8,"Max Latency":4.0,
                "Percentile Latencies":{"p50.00":0.7,"p99.00":2.0}}}}"#,
        );
        write(
            dir.path(),
            "keydb_balanced.json",
            r#"{"ALL STATS":{"Totals":{"Ops/sec":1500,"Average Latency":0.6,"Max Latency":3.0,
                "Percentile Latencies":{"p50.00":0.5,"p99.00":1.5}}}}"#,
        );
        let table = collect(dir.path());

        let written = plot(&table, dir.path());
        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec![THROUGHPUT_CHART, LATENCY_CHART, PERCENTILE_CHART]);
        for path in &written {
            let svg = std::fs::read_to_string(path).unwrap();
            assert!(svg.contains("<svg"), "{}", path.display());
        }
    }

    #[test]
    fn test_percentile_chart_needs_percentiles() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "redis_balanced.json", r#"{"Totals":{"Ops/sec":10}}"#);
        let table = collect(dir.path());

        let written = plot(&table, dir.path());
        // No latency at all: only the throughput chart renders.
        assert_eq!(written, vec![dir.path().join(THROUGHPUT_CHART)]);
    }
}
