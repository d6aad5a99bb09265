use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::{Serialize, Serializer};
use std::io::{BufRead, Lines, Write};
use std::path::Path;

use crate::core::error::StatsError;
use crate::core::population::LiteralDirectory;
use crate::core::utils::open_reader;

/// Written for any counter the log never reported
pub const MISSING: &str = "-";

const SAMPLE_PREFIX: &str = "Sample";

fn dash_if_missing<S: Serializer>(
    value: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or(MISSING))
}

/// Assembly counters reported by ustacks for one sample.
///
/// Values are kept as they appear in the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleAssembly {
    pub sample: String,
    pub population: String,
    #[serde(serialize_with = "dash_if_missing")]
    pub loci_assembled: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub depth_of_cov: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub stdev_of_cov: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub max_cov: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub number_reads_incorporated: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub percent_reads_incorporated: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub primary_reads: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub secondary_reads: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub stacks_before_primary: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub stacks_after_primary: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub stacks_before_primary_gaps: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub stacks_after_primary_gaps: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub secondary_reads_incorp: Option<String>,
    #[serde(serialize_with = "dash_if_missing")]
    pub secondary_reads_incorp_gaps: Option<String>,
}

impl SampleAssembly {
    pub fn new(sample: &str, population: &str) -> Self {
        Self {
            sample: sample.to_string(),
            population: population.to_string(),
            ..Default::default()
        }
    }
}

/// Section headers whose figures are printed on the following line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingLine {
    PrimaryMerge,
    PrimaryGappedMerge,
    SecondaryMerge,
    SecondaryGappedMerge,
}

/// Token following `keyword` in a whitespace-split line
fn token_after<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let mut tokens = line.split_whitespace();
    tokens.find(|t| *t == keyword)?;
    tokens.next()
}

/// Token preceding `keyword` in a whitespace-split line
fn token_before<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    line.split_whitespace()
        .zip(line.split_whitespace().skip(1))
        .find_map(|(prev, t)| (t == keyword).then_some(prev))
}

fn owned(token: Option<&str>) -> Option<String> {
    token.map(|t| t.trim_end_matches(';').to_string())
}

/// `Final coverage: mean=..; stdev=..; max=..; n_reads=COUNT(PCT%)`
fn parse_coverage(line: &str, assembly: &mut SampleAssembly) {
    for pair in line.split_whitespace() {
        let pair = pair.trim_end_matches(';');
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "mean" => assembly.depth_of_cov = Some(value.to_string()),
            "stdev" => assembly.stdev_of_cov = Some(value.to_string()),
            "max" => assembly.max_cov = Some(value.to_string()),
            "n_reads" => {
                let (count, rest) = value.split_once('(').unwrap_or((value, ""));
                assembly.number_reads_incorporated = Some(count.to_string());
                let percent = rest.split(')').next().unwrap_or("").replace('%', "");
                if !percent.is_empty() {
                    assembly.percent_reads_incorporated = Some(percent);
                }
            }
            _ => {}
        }
    }
}

/// Record whatever a single log line reports. Returns the section whose
/// figures are on the next line, if the line opens one.
fn parse_line(line: &str, assembly: &mut SampleAssembly) -> Option<PendingLine> {
    if line.starts_with("Final number of") {
        assembly.loci_assembled = owned(line.split_whitespace().last());
    } else if line.starts_with("Final coverage") {
        parse_coverage(line, assembly);
    } else if line.contains("stacks representing") {
        if line.contains("primary") {
            assembly.primary_reads = owned(token_before(line, "primary"));
        } else if line.contains("secondary") {
            assembly.secondary_reads = owned(token_after(line, "representing"));
        }
    } else if line.starts_with("Assembling stacks (max.") {
        return Some(PendingLine::PrimaryMerge);
    } else if line.starts_with("Assembling stacks, allowing") {
        return Some(PendingLine::PrimaryGappedMerge);
    } else if line.starts_with("Merging secondary stacks (max.") {
        return Some(PendingLine::SecondaryMerge);
    } else if line.starts_with("Merging secondary stacks, allowing") {
        return Some(PendingLine::SecondaryGappedMerge);
    }
    None
}

fn apply_pending(pending: PendingLine, line: &str, assembly: &mut SampleAssembly) {
    match pending {
        PendingLine::PrimaryMerge => {
            assembly.stacks_before_primary = owned(token_after(line, "Assembled"));
            assembly.stacks_after_primary = owned(token_after(line, "into"));
        }
        PendingLine::PrimaryGappedMerge => {
            assembly.stacks_before_primary_gaps = owned(token_after(line, "Assembled"));
            assembly.stacks_after_primary_gaps = owned(token_after(line, "into"));
        }
        PendingLine::SecondaryMerge => {
            assembly.secondary_reads_incorp = owned(token_after(line, "Merged"));
        }
        PendingLine::SecondaryGappedMerge => {
            assembly.secondary_reads_incorp_gaps = owned(token_after(line, "Merged"));
        }
    }
}

/// Sample name on a `Sample N of M 'name'` line
pub fn sample_name(line: &str) -> Option<String> {
    line.split_whitespace()
        .last()
        .map(|name| name.replace('\'', ""))
        .filter(|name| !name.is_empty())
}

/// Splits a ustacks (or denovo_map) log into one [`SampleAssembly`] per
/// `Sample` section. Lines before the first section are ignored.
pub struct AssemblyLogParser<'d, R> {
    lines: Lines<R>,
    directory: &'d LiteralDirectory,
    current: Option<SampleAssembly>,
    pending: Option<PendingLine>,
    line_no: u64,
    samples: usize,
    done: bool,
}

impl<'d, R: BufRead> AssemblyLogParser<'d, R> {
    pub fn new(reader: R, directory: &'d LiteralDirectory) -> Self {
        Self {
            lines: reader.lines(),
            directory,
            current: None,
            pending: None,
            line_no: 0,
            samples: 0,
            done: false,
        }
    }

    fn open_sample(&mut self, line: &str) -> Result<SampleAssembly> {
        let name = sample_name(line).ok_or_else(|| StatsError::MalformedRecord {
            line: self.line_no,
            reason: "sample line without a sample name".to_string(),
        })?;
        let population = self.directory.lookup_label(name.as_str()).with_context(|| {
            format!("ustacks sample '{}' on line {} has no population", name, self.line_no)
        })?;

        debug!("Parsing assembly of sample {} ({})", name, population);
        self.samples += 1;
        Ok(SampleAssembly::new(&name, population))
    }

    fn fail(&mut self, err: anyhow::Error) -> Option<Result<SampleAssembly>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<R: BufRead> Iterator for AssemblyLogParser<'_, R> {
    type Item = Result<SampleAssembly>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    return self.fail(anyhow::Error::new(e).context("Failed to read ustacks log"))
                }
                None => {
                    self.done = true;
                    if self.samples == 0 {
                        return Some(Err(StatsError::EmptyInput {
                            source_name: "ustacks log".to_string(),
                        }
                        .into()));
                    }
                    return self.current.take().map(Ok);
                }
            };
            self.line_no += 1;

            if line.starts_with(SAMPLE_PREFIX) {
                self.pending = None;
                let started = match self.open_sample(&line) {
                    Ok(assembly) => assembly,
                    Err(e) => return self.fail(e),
                };
                if let Some(finished) = self.current.replace(started) {
                    return Some(Ok(finished));
                }
                continue;
            }

            let Some(assembly) = self.current.as_mut() else {
                continue;
            };
            match self.pending.take() {
                Some(pending) => apply_pending(pending, &line, assembly),
                None => self.pending = parse_line(&line, assembly),
            }
        }
    }
}

/// Tabulate per-sample assembly counters from a ustacks log.
pub fn run_ustacks<W: Write>(log: &Path, population_file: &Path, out: W) -> Result<W> {
    let directory = LiteralDirectory::from_file(population_file)?;
    let reader = open_reader(log)?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(out);

    let mut samples = 0usize;
    for assembly in AssemblyLogParser::new(reader, &directory) {
        let assembly =
            assembly.with_context(|| format!("Failed to parse ustacks log: {}", log.display()))?;
        writer.serialize(&assembly)?;
        samples += 1;
    }
    writer.flush()?;
    info!("Wrote assembly summaries for {} samples", samples);

    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush output: {}", e.error()))
}
