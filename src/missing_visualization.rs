use airq_core::diagnostics::{missing_counts, quarters, MonthlyMissing};
use airq_core::WideTable;
use anyhow::Result;
use chrono::Duration;
use log::{debug, warn};
use plotters::prelude::*;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// Viridis end points: present cells light, missing cells dark.
const PRESENT: RGBColor = RGBColor(253, 231, 37);
const MISSING: RGBColor = RGBColor(68, 1, 84);
const BAR: RGBColor = RGBColor(135, 206, 235);

/// Long timelines are binned so a heatmap never has more columns than this.
const MAX_HEATMAP_BINS: usize = 1000;

pub struct MissingDataPlotter {
    output_dir: PathBuf,
}

impl MissingDataPlotter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn generate_all(&self, wide: &WideTable, monthly: &MonthlyMissing) -> Result<Vec<PathBuf>> {
        println!("\n📊 Generating Missing Data Charts...");
        let mut written = Vec::new();

        written.push(self.missing_percent_by_column(wide)?);
        written.push(self.missing_heatmap(
            wide,
            "missing_heatmap.png",
            "Missing Data Heatmap (sites vs time)",
        )?);
        written.push(self.network_missing(
            wide,
            "network_missing_over_time.png",
            "Missing Data Over Time (Network-wide)",
        )?);

        for slice in quarters(wide) {
            debug!("Rendering quarter {}", slice.label());
            written.push(self.missing_heatmap(
                &slice.table,
                &format!("missing_heatmap_{}.png", slice.file_tag()),
                &format!("Missing Data Heatmap (sites vs time) - {}", slice.label()),
            )?);
            written.push(self.network_missing(
                &slice.table,
                &format!("network_missing_{}.png", slice.file_tag()),
                &format!("Missing Data Over Time (Network-wide) - {}", slice.label()),
            )?);
        }

        let sites = monthly.sites();
        for (site, file_name) in sites.iter().zip(site_file_names(&sites)?) {
            written.push(self.monthly_site(monthly, site, &file_name)?);
        }
        written.push(self.monthly_all_sites(monthly)?);

        println!(
            "  ✅ Saved {} charts to {}",
            written.len(),
            self.output_dir.display()
        );
        Ok(written)
    }

    fn missing_percent_by_column(&self, wide: &WideTable) -> Result<PathBuf> {
        let path = self.output_dir.join("missing_percent_by_column.png");
        let title = "Percentage of Missing Data per Column";

        let mut entries = missing_counts(wide);
        if wide.is_empty() || entries.is_empty() {
            draw_placeholder(&path, title)?;
            return Ok(path);
        }
        entries.sort_by(|a, b| {
            b.missing_percent
                .partial_cmp(&a.missing_percent)
                .unwrap_or(Ordering::Equal)
        });

        let width = (entries.len() as u32 * 24).clamp(800, 4000);
        let root = BitMapBackend::new(&path, (width, 700)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 30).into_font())
            .margin(15)
            .x_label_area_size(220)
            .y_label_area_size(60)
            .build_cartesian_2d((0..entries.len()).into_segmented(), 0.0..100.0)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(entries.len())
            .x_label_style(
                ("sans-serif", 12)
                    .into_font()
                    .transform(FontTransform::Rotate90),
            )
            .x_label_formatter(&|x| match x {
                SegmentValue::CenterOf(i) => entries
                    .get(*i)
                    .map(|e| e.column.clone())
                    .unwrap_or_default(),
                _ => String::new(),
            })
            .y_desc("% Missing")
            .draw()?;

        chart.draw_series(entries.iter().enumerate().map(|(i, entry)| {
            Rectangle::new(
                [
                    (SegmentValue::Exact(i), 0.0),
                    (SegmentValue::Exact(i + 1), entry.missing_percent.unwrap_or(0.0)),
                ],
                BAR.filled(),
            )
        }))?;

        root.present()?;
        Ok(path.clone())
    }

    /// Columns on the y axis, time on the x axis; each cell is shaded by the
    /// fraction of missing hours in its bin.
    fn missing_heatmap(&self, wide: &WideTable, file_name: &str, title: &str) -> Result<PathBuf> {
        let path = self.output_dir.join(file_name);
        if wide.is_empty() || wide.width() == 0 {
            draw_placeholder(&path, title)?;
            return Ok(path);
        }

        let bins = wide.height().min(MAX_HEATMAP_BINS);
        let hours_per_bin = (wide.height() + bins - 1) / bins;
        let n_bins = (wide.height() + hours_per_bin - 1) / hours_per_bin;
        let names = wide.column_names();
        let start = wide.index[0];

        let height = (names.len() as u32 * 14 + 160).clamp(400, 3000);
        let root = BitMapBackend::new(&path, (1500, height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 26).into_font())
            .margin(15)
            .x_label_area_size(50)
            .y_label_area_size(260)
            .build_cartesian_2d(0f64..n_bins as f64, (0..names.len()).into_segmented())?;

        chart
            .configure_mesh()
            .disable_mesh()
            .x_labels(8)
            .x_label_formatter(&|x| {
                let hour = (x * hours_per_bin as f64).round() as i64;
                (start + Duration::hours(hour)).format("%Y-%m-%d").to_string()
            })
            .y_labels(names.len())
            .y_label_formatter(&|y| match y {
                SegmentValue::CenterOf(i) => names.get(*i).map(|n| n.to_string()).unwrap_or_default(),
                _ => String::new(),
            })
            .x_desc("Time")
            .y_desc("Sites")
            .draw()?;

        let cells = (0..wide.width()).flat_map(|c| {
            (0..n_bins).map(move |b| {
                let first = b * hours_per_bin;
                let last = ((b + 1) * hours_per_bin).min(wide.height());
                let missing = (first..last).filter(|&row| wide.is_missing(row, c)).count();
                let fraction = missing as f64 / (last - first) as f64;
                Rectangle::new(
                    [
                        (b as f64, SegmentValue::Exact(c)),
                        ((b + 1) as f64, SegmentValue::Exact(c + 1)),
                    ],
                    shade(fraction).filled(),
                )
            })
        });
        chart.draw_series(cells)?;

        root.present()?;
        Ok(path.clone())
    }

    fn network_missing(&self, wide: &WideTable, file_name: &str, title: &str) -> Result<PathBuf> {
        let path = self.output_dir.join(file_name);
        let points: Vec<(f64, f64)> = (0..wide.height())
            .filter_map(|row| wide.row_missing_percent(row).map(|p| (row as f64, p)))
            .collect();
        if points.is_empty() {
            draw_placeholder(&path, title)?;
            return Ok(path);
        }

        let start = wide.index[0];
        let x_max = ((wide.height() - 1) as f64).max(1.0);

        let root = BitMapBackend::new(&path, (1200, 400)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 26).into_font())
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(0f64..x_max, 0.0..100.0)?;

        chart
            .configure_mesh()
            .x_labels(8)
            .x_label_formatter(&|x| {
                (start + Duration::hours(x.round() as i64))
                    .format("%Y-%m-%d")
                    .to_string()
            })
            .x_desc("Time")
            .y_desc("% Sites Missing")
            .draw()?;

        chart.draw_series(LineSeries::new(points, &BLUE))?;

        root.present()?;
        Ok(path.clone())
    }

    fn monthly_site(&self, monthly: &MonthlyMissing, site: &str, file_name: &str) -> Result<PathBuf> {
        let path = self.output_dir.join(file_name);
        let title = format!("Monthly Missing Data: {}", site);

        let values: Vec<(usize, f64)> = (0..monthly.months.len())
            .filter_map(|m| monthly.site_percent(m, site).map(|p| (m, p)))
            .collect();
        if values.is_empty() {
            draw_placeholder(&path, &title)?;
            return Ok(path);
        }

        let root = BitMapBackend::new(&path, (900, 500)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&title, ("sans-serif", 26).into_font())
            .margin(15)
            .x_label_area_size(50)
            .y_label_area_size(60)
            .build_cartesian_2d((0..monthly.months.len()).into_segmented(), 0.0..100.0)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(monthly.months.len())
            .x_label_formatter(&|x| month_label(monthly, x))
            .x_desc("Month")
            .y_desc("% Missing")
            .draw()?;

        let points: Vec<(SegmentValue<usize>, f64)> = values
            .iter()
            .map(|(m, p)| (SegmentValue::CenterOf(*m), *p))
            .collect();
        chart.draw_series(LineSeries::new(points.clone(), BLUE.stroke_width(2)))?;
        chart.draw_series(
            points
                .into_iter()
                .map(|point| Circle::new(point, 4, BLUE.filled())),
        )?;

        root.present()?;
        Ok(path.clone())
    }

    fn monthly_all_sites(&self, monthly: &MonthlyMissing) -> Result<PathBuf> {
        let path = self.output_dir.join("monthly_missing_all_sites.png");
        let title = "Monthly Missing Data by Site";
        let sites = monthly.sites();
        if monthly.months.is_empty() || sites.is_empty() {
            draw_placeholder(&path, title)?;
            return Ok(path);
        }

        let root = BitMapBackend::new(&path, (1200, 600)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 30).into_font())
            .margin(15)
            .x_label_area_size(50)
            .y_label_area_size(60)
            .build_cartesian_2d((0..monthly.months.len()).into_segmented(), 0.0..100.0)?;

        chart
            .configure_mesh()
            .x_labels(monthly.months.len())
            .x_label_formatter(&|x| month_label(monthly, x))
            .x_desc("Month")
            .y_desc("% Missing")
            .draw()?;

        for (i, site) in sites.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba();
            let points: Vec<(SegmentValue<usize>, f64)> = (0..monthly.months.len())
                .filter_map(|m| {
                    monthly
                        .site_percent(m, site)
                        .map(|p| (SegmentValue::CenterOf(m), p))
                })
                .collect();

            chart
                .draw_series(LineSeries::new(points, color.stroke_width(2)))?
                .label(site.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        }

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;

        root.present()?;
        Ok(path.clone())
    }
}

/// `monthly_missing_<site>.png` per site. Sites that sanitise to the same
/// name get their position appended so no chart overwrites another.
fn site_file_names(sites: &[String]) -> Result<Vec<String>> {
    let unsafe_chars = Regex::new(r"[^A-Za-z0-9_-]+")?;
    let mut taken: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(sites.len());

    for (i, site) in sites.iter().enumerate() {
        let stem = unsafe_chars.replace_all(site, "_").to_string();
        let mut name = format!("monthly_missing_{}.png", stem);
        let mut suffix = i;
        while !taken.insert(name.clone()) {
            name = format!("monthly_missing_{}_{}.png", stem, suffix);
            suffix += 1;
        }
        if suffix != i {
            warn!("Site '{}' clashes with another chart name, writing {}", site, name);
        }
        names.push(name);
    }
    Ok(names)
}

fn month_label(monthly: &MonthlyMissing, x: &SegmentValue<usize>) -> String {
    match x {
        SegmentValue::CenterOf(i) => monthly
            .months
            .get(*i)
            .map(|m| m.month_end.format("%Y-%m").to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn shade(missing_fraction: f64) -> RGBColor {
    let f = missing_fraction.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    RGBColor(
        mix(PRESENT.0, MISSING.0),
        mix(PRESENT.1, MISSING.1),
        mix(PRESENT.2, MISSING.2),
    )
}

fn draw_placeholder(path: &Path, title: &str) -> Result<()> {
    let root = BitMapBackend::new(path, (800, 400)).into_drawing_area();
    root.fill(&WHITE)?;
    let body = root.titled(title, ("sans-serif", 26).into_font())?;
    body.draw(&Text::new(
        "No data to display",
        (300, 150),
        ("sans-serif", 20).into_font(),
    ))?;
    root.present()?;
    println!("  ⚠️  {} has no data, wrote placeholder", title);
    Ok(())
}
