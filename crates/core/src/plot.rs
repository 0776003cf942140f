use crate::error::PlotError;
use crate::models::AccuracyRecord;
use plotters::prelude::*;
use std::path::Path;
use tracing::info;

pub const DEFAULT_RESULTS_TABLE: &str = "eval/RESULTS.md";
pub const DEFAULT_CHART_PATH: &str = "RESULTS.png";
/// 6.4 x 4.8 inches at 600 dpi.
pub const CHART_SIZE: (u32, u32) = (3840, 2880);

const TABLE_FIELDS: usize = 6;
const GROUP_WIDTH: f64 = 0.8;

fn is_separator(fields: &[&str]) -> bool {
    fields
        .iter()
        .all(|field| !field.is_empty() && field.chars().all(|c| c == '-' || c == ':'))
}

/// Parses the markdown accuracy table. Lines that are not table rows, or do
/// not have exactly six cells, are ignored.
pub fn parse_results_table(markdown: &str) -> Result<Vec<AccuracyRecord>, PlotError> {
    let mut records = Vec::new();
    let mut seen_header = false;

    for (index, line) in markdown.lines().enumerate() {
        if !line.starts_with('|') {
            continue;
        }
        let fields: Vec<&str> = line
            .trim_end()
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();
        if fields.len() != TABLE_FIELDS || is_separator(&fields) {
            continue;
        }
        if !seen_header {
            seen_header = true;
            continue;
        }

        let percent_correct = fields[3].parse::<f64>().map_err(|_| PlotError::InvalidAccuracy {
            line: index + 1,
            value: fields[3].to_string(),
        })?;
        records.push(AccuracyRecord {
            embedding_model: fields[0].to_string(),
            chat_model: fields[1].to_string(),
            date: fields[2].to_string(),
            percent_correct,
            evaluator_model: fields[4].to_string(),
            dataset: fields[5].to_string(),
        });
    }

    Ok(records)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub series: usize,
    pub left: f64,
    pub right: f64,
    pub value: f64,
}

/// Dodged bar positions: group `i` is centred on `x = i`, one slot per chat
/// model inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct BarLayout {
    pub groups: Vec<String>,
    pub series: Vec<String>,
    pub bars: Vec<Bar>,
}

impl BarLayout {
    /// Later records for the same model pair replace earlier ones.
    pub fn from_records(records: &[AccuracyRecord]) -> Self {
        let mut groups: Vec<String> = Vec::new();
        let mut series: Vec<String> = Vec::new();
        for record in records {
            if !groups.contains(&record.embedding_model) {
                groups.push(record.embedding_model.clone());
            }
            if !series.contains(&record.chat_model) {
                series.push(record.chat_model.clone());
            }
        }

        let slot = GROUP_WIDTH / series.len().max(1) as f64;
        let mut bars: Vec<Bar> = Vec::new();
        for record in records {
            let group = groups.iter().position(|name| *name == record.embedding_model);
            let member = series.iter().position(|name| *name == record.chat_model);
            let (Some(group), Some(member)) = (group, member) else {
                continue;
            };
            let left = group as f64 - GROUP_WIDTH / 2.0 + slot * member as f64;
            let bar = Bar {
                series: member,
                left,
                right: left + slot,
                value: record.percent_correct,
            };
            match bars.iter_mut().find(|existing| existing.left == bar.left) {
                Some(existing) => *existing = bar,
                None => bars.push(bar),
            }
        }

        Self { groups, series, bars }
    }

    pub fn y_max(&self) -> f64 {
        self.bars
            .iter()
            .map(|bar| bar.value)
            .fold(100.0, f64::max)
    }

    fn group_label(&self, x: f64) -> String {
        let nearest = x.round();
        if (x - nearest).abs() > 1e-6 || nearest < 0.0 {
            return String::new();
        }
        self.groups.get(nearest as usize).cloned().unwrap_or_default()
    }
}

fn render_error(error: impl std::fmt::Display) -> PlotError {
    PlotError::Render(error.to_string())
}

/// Draws a grouped bar chart of accuracy by embedding model, one colour per
/// chat model, to a PNG at [`CHART_SIZE`].
pub fn render_grouped_bars(records: &[AccuracyRecord], path: &Path) -> Result<(), PlotError> {
    if records.is_empty() {
        return Err(PlotError::Empty);
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let layout = BarLayout::from_records(records);
    let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let groups = layout.groups.len();
    let mut chart = ChartBuilder::on(&root)
        .margin(80)
        .x_label_area_size(240)
        .y_label_area_size(240)
        .build_cartesian_2d(-0.5f64..groups as f64 - 0.5, 0f64..layout.y_max())
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(groups)
        .x_label_formatter(&|x| layout.group_label(*x))
        .x_desc("embedding_model")
        .y_desc("percent_correct")
        .label_style(("sans-serif", 56))
        .axis_desc_style(("sans-serif", 64))
        .draw()
        .map_err(render_error)?;

    for (member, chat_model) in layout.series.iter().enumerate() {
        let color = Palette99::pick(member).mix(0.9);
        chart
            .draw_series(
                layout
                    .bars
                    .iter()
                    .filter(|bar| bar.series == member)
                    .map(|bar| Rectangle::new([(bar.left, 0.0), (bar.right, bar.value)], color.filled())),
            )
            .map_err(render_error)?
            .label(chat_model.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 20), (x + 40, y + 20)], color.filled()));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(("sans-serif", 56))
        .draw()
        .map_err(render_error)?;

    root.present().map_err(render_error)?;
    info!(path = %path.display(), bars = layout.bars.len(), "chart saved");
    Ok(())
}

/// Reads the results table at `input` and renders it to `output`.
pub fn plot_results(input: &Path, output: &Path) -> Result<usize, PlotError> {
    let markdown = std::fs::read_to_string(input)?;
    let records = parse_results_table(&markdown)?;
    render_grouped_bars(&records, output)?;
    Ok(records.len())
}
