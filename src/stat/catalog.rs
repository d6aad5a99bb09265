use anyhow::{Context, Result};
use std::io::Read;

use crate::core::error::StatsError;
use crate::core::population::PositionalDirectory;
use crate::core::utils::LineTracker;
use crate::stat::diversity::simpson_diversity;
use crate::stat::grouper::{LocusAggregator, LocusRecord, LocusSummary};
use crate::stat::proportions::population_proportions;

const LOCUS_COLUMN: usize = 1;
const PROVENANCE_COLUMN: usize = 4;
const SEQUENCE_COLUMN: usize = 5;

/// Populations of the samples that contributed to one catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPayload {
    /// One population index per provenance token
    pub populations: Vec<usize>,
    pub length: usize,
}

/// Streams records out of a Stacks `catalog.tags.tsv`.
///
/// `#` lines (the leading header and the trailing completion stamp) and blank
/// lines are skipped. Provenance tokens look like `<sample ordinal>_<stack id>`
/// and the ordinal is resolved through a positional population directory.
pub struct CatalogRecords<'d, R> {
    reader: csv::Reader<LineTracker<R>>,
    record: csv::StringRecord,
    directory: &'d PositionalDirectory,
}

impl<'d, R: Read> CatalogRecords<'d, R> {
    pub fn new(reader: R, directory: &'d PositionalDirectory) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .comment(Some(b'#'))
            .from_reader(LineTracker::new(reader, 0));

        Self {
            reader,
            record: csv::StringRecord::new(),
            directory,
        }
    }

    fn parse_record(&self, line: u64) -> Result<LocusRecord<CatalogPayload>> {
        if self.record.len() <= SEQUENCE_COLUMN {
            return Err(StatsError::MalformedRecord {
                line,
                reason: format!(
                    "expected at least {} columns, found {}",
                    SEQUENCE_COLUMN + 1,
                    self.record.len()
                ),
            }
            .into());
        }

        let locus = self.record[LOCUS_COLUMN].to_string();
        let provenance = &self.record[PROVENANCE_COLUMN];

        let populations = if provenance.is_empty() {
            Vec::new()
        } else {
            provenance
                .split(',')
                .map(|token| {
                    let ordinal = sample_ordinal(token).ok_or_else(|| {
                        StatsError::MalformedRecord {
                            line,
                            reason: format!("invalid sample provenance token '{}'", token),
                        }
                    })?;
                    self.directory.lookup(&ordinal).with_context(|| {
                        format!("Locus {} on line {} references an unknown sample", locus, line)
                    })
                })
                .collect::<Result<Vec<usize>>>()?
        };

        Ok(LocusRecord {
            locus,
            line,
            payload: CatalogPayload {
                populations,
                length: self.record[SEQUENCE_COLUMN].len(),
            },
        })
    }
}

impl<R: Read> Iterator for CatalogRecords<'_, R> {
    type Item = Result<LocusRecord<CatalogPayload>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let end = self.reader.position().byte();
                let line = self.reader.get_mut().line_at(end.saturating_sub(1));
                Some(self.parse_record(line))
            }
            Ok(false) => None,
            Err(e) => Some(Err(e).context("Failed to read catalog record")),
        }
    }
}

/// Leading numeric part of a `<ordinal>_<suffix>` provenance token
pub fn sample_ordinal(token: &str) -> Option<usize> {
    token.split('_').next()?.trim().parse().ok()
}

#[derive(Debug, Clone)]
pub struct CatalogGroup {
    counts: Vec<usize>,
    observations: usize,
    length: Option<usize>,
}

/// Every provenance token is one observation, so a sample contributing several
/// stacks to a locus is counted once per stack.
#[derive(Debug, Clone)]
pub struct CatalogAggregator {
    num_populations: usize,
}

impl CatalogAggregator {
    pub fn new(num_populations: usize) -> Self {
        Self { num_populations }
    }
}

impl LocusAggregator for CatalogAggregator {
    type Payload = CatalogPayload;
    type Group = CatalogGroup;

    fn open_group(&self) -> CatalogGroup {
        CatalogGroup {
            counts: vec![0; self.num_populations],
            observations: 0,
            length: None,
        }
    }

    fn absorb(&self, group: &mut CatalogGroup, payload: CatalogPayload) {
        for pop_idx in &payload.populations {
            group.counts[*pop_idx] += 1;
        }
        group.observations += payload.populations.len();
        // length of the first row of the locus
        group.length.get_or_insert(payload.length);
    }

    fn summarize(&self, locus: String, group: CatalogGroup) -> LocusSummary {
        LocusSummary {
            locus,
            diversity: simpson_diversity(&group.counts),
            sample_count: group.observations,
            length: group.length,
            sample_fraction: None,
            ns_average: None,
            proportions: population_proportions(&group.counts),
        }
    }
}
