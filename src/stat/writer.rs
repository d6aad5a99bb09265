use anyhow::{anyhow, bail, Result};
use std::io::Write;

use crate::stat::grouper::LocusSummary;

/// Placeholder for an undefined statistic
pub const NA: &str = "NA";

/// Statistic columns written before the per-population proportions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Catalog,
    Vcf,
}

impl Layout {
    fn stat_columns(self) -> &'static [&'static str] {
        match self {
            Layout::Catalog => &["Locus", "Locus_diversity", "Sample_number", "Locus_length"],
            Layout::Vcf => &[
                "Locus",
                "Locus_diversity",
                "Sample_number",
                "Sample_proportion",
                "NS_average",
            ],
        }
    }

    fn stat_values(self, summary: &LocusSummary) -> Vec<String> {
        let mut values = vec![
            summary.locus.clone(),
            format_stat(summary.diversity),
            summary.sample_count.to_string(),
        ];
        match self {
            Layout::Catalog => {
                values.push(summary.length.map_or_else(|| NA.to_string(), |l| l.to_string()));
            }
            Layout::Vcf => {
                values.push(format_stat(summary.sample_fraction));
                values.push(format_stat(summary.ns_average));
            }
        }
        values
    }
}

/// Shortest round-trip form, always with a decimal point (`1.0`, `0.25`)
pub fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

pub fn format_stat(value: Option<f64>) -> String {
    value.map_or_else(|| NA.to_string(), format_float)
}

/// Tab-separated sink for locus summaries.
pub struct SummaryWriter<W: Write> {
    writer: csv::Writer<W>,
    layout: Layout,
    num_populations: usize,
}

impl<W: Write> SummaryWriter<W> {
    /// Wrap `inner` and write the header row.
    pub fn new(inner: W, layout: Layout, universe: &[String]) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(inner);

        let header = layout
            .stat_columns()
            .iter()
            .copied()
            .chain(universe.iter().map(String::as_str));
        writer.write_record(header)?;

        Ok(Self {
            writer,
            layout,
            num_populations: universe.len(),
        })
    }

    pub fn write(&mut self, summary: &LocusSummary) -> Result<()> {
        if summary.proportions.len() != self.num_populations {
            bail!(
                "Locus {} has {} proportions but {} populations are defined",
                summary.locus,
                summary.proportions.len(),
                self.num_populations
            );
        }

        let row = self
            .layout
            .stat_values(summary)
            .into_iter()
            .chain(summary.proportions.iter().map(|&p| format_float(p)));
        self.writer.write_record(row)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush output: {}", e.error()))
    }
}
