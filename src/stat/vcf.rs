use anyhow::{Context, Result};
use log::{debug, info};
use std::io::BufRead;

use crate::core::error::StatsError;
use crate::core::population::LiteralDirectory;
use crate::core::utils::LineTracker;
use crate::stat::diversity::simpson_diversity;
use crate::stat::grouper::{LocusAggregator, LocusRecord, LocusSummary};
use crate::stat::proportions::{count_populations, population_proportions};

/// Genotype token of a sample with no call
pub const MISSING_GENOTYPE: &str = "./.";

/// CHROM POS ID REF ALT QUAL FILTER INFO FORMAT
const FIXED_COLUMNS: usize = 9;
const INFO_COLUMN: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfPayload {
    /// Whether each header sample has a call, in header order
    pub present: Vec<bool>,
    pub ns: Option<u32>,
}

/// Streams records out of a VCF whose CHROM column carries the locus id.
pub struct VcfRecords<R> {
    reader: csv::Reader<LineTracker<R>>,
    record: csv::StringRecord,
    sample_names: Vec<String>,
    require_ns: bool,
}

impl<R: BufRead> VcfRecords<R> {
    /// Consume meta lines up to and including `#CHROM`, which names the samples.
    pub fn new(mut reader: R, require_ns: bool) -> Result<Self> {
        let mut line = String::new();
        let mut header_lines = 0u64;

        let sample_names: Vec<String> = loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .context("Failed to read VCF header")?;
            if n == 0 {
                return Err(StatsError::MissingHeader.into());
            }
            header_lines += 1;

            if line.starts_with("#CHROM") {
                break line
                    .trim_end_matches(&['\n', '\r'][..])
                    .split('\t')
                    .skip(FIXED_COLUMNS)
                    .map(str::to_string)
                    .collect();
            }
        };
        info!("VCF header lists {} samples", sample_names.len());

        let reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .comment(Some(b'#'))
            .from_reader(LineTracker::new(reader, header_lines));

        Ok(Self {
            reader,
            record: csv::StringRecord::new(),
            sample_names,
            require_ns,
        })
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    fn parse_record(&self, line: u64) -> Result<LocusRecord<VcfPayload>> {
        let malformed = |reason: String| StatsError::MalformedRecord { line, reason };

        if self.record.len() < FIXED_COLUMNS {
            return Err(malformed(format!(
                "expected at least {} columns, found {}",
                FIXED_COLUMNS,
                self.record.len()
            ))
            .into());
        }
        let num_genotypes = self.record.len() - FIXED_COLUMNS;
        if num_genotypes != self.sample_names.len() {
            return Err(malformed(format!(
                "expected {} sample columns, found {}",
                self.sample_names.len(),
                num_genotypes
            ))
            .into());
        }

        let locus = self.record[0].to_string();
        let ns = match info_ns(&self.record[INFO_COLUMN]) {
            Some(value) => Some(
                value
                    .parse::<u32>()
                    .map_err(|_| malformed(format!("invalid NS value '{}'", value)))?,
            ),
            None if self.require_ns => {
                return Err(StatsError::MissingAnnotation { locus, line }.into());
            }
            None => None,
        };

        let present = self
            .record
            .iter()
            .skip(FIXED_COLUMNS)
            .map(has_call)
            .collect();

        Ok(LocusRecord {
            locus,
            line,
            payload: VcfPayload { present, ns },
        })
    }
}

impl<R: BufRead> Iterator for VcfRecords<R> {
    type Item = Result<LocusRecord<VcfPayload>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let end = self.reader.position().byte();
                let line = self.reader.get_mut().line_at(end.saturating_sub(1));
                Some(self.parse_record(line))
            }
            Ok(false) => None,
            Err(e) => Some(Err(e).context("Failed to read VCF record")),
        }
    }
}

/// Value of the `NS=` entry of an INFO field
pub fn info_ns(info: &str) -> Option<&str> {
    info.split(';').find_map(|field| field.strip_prefix("NS="))
}

/// A sample has a call unless its GT sub-field is the missing sentinel.
pub fn has_call(token: &str) -> bool {
    token.split(':').next() != Some(MISSING_GENOTYPE)
}

#[derive(Debug, Clone)]
pub struct VcfGroup {
    present: Vec<bool>,
    ns_sum: u64,
    ns_records: usize,
}

/// A sample counts as present at a locus if any record of the locus calls it.
#[derive(Debug, Clone)]
pub struct VcfAggregator {
    /// Population index of each header sample
    sample_populations: Vec<usize>,
    num_populations: usize,
}

impl VcfAggregator {
    /// Resolve every header sample up front so unknown samples fail before any output.
    pub fn new(sample_names: &[String], directory: &LiteralDirectory) -> Result<Self> {
        let sample_populations = sample_names
            .iter()
            .map(|name| {
                directory
                    .lookup(name.as_str())
                    .with_context(|| format!("VCF sample '{}' has no population", name))
            })
            .collect::<Result<Vec<usize>>>()?;

        if directory.num_samples() > sample_names.len() {
            debug!(
                "{} samples in population file are not in the VCF header",
                directory.num_samples() - sample_names.len()
            );
        }

        Ok(Self {
            sample_populations,
            num_populations: directory.num_populations(),
        })
    }
}

impl LocusAggregator for VcfAggregator {
    type Payload = VcfPayload;
    type Group = VcfGroup;

    fn open_group(&self) -> VcfGroup {
        VcfGroup {
            present: vec![false; self.sample_populations.len()],
            ns_sum: 0,
            ns_records: 0,
        }
    }

    fn absorb(&self, group: &mut VcfGroup, payload: VcfPayload) {
        for (seen, called) in group.present.iter_mut().zip(payload.present) {
            *seen |= called;
        }
        if let Some(ns) = payload.ns {
            group.ns_sum += u64::from(ns);
            group.ns_records += 1;
        }
    }

    fn summarize(&self, locus: String, group: VcfGroup) -> LocusSummary {
        let present_pops = group
            .present
            .iter()
            .zip(&self.sample_populations)
            .filter(|(&seen, _)| seen)
            .map(|(_, &pop_idx)| pop_idx);
        let counts = count_populations(present_pops, self.num_populations);
        let sample_count: usize = counts.iter().sum();
        let num_samples = self.sample_populations.len();

        LocusSummary {
            locus,
            diversity: simpson_diversity(&counts),
            sample_count,
            length: None,
            sample_fraction: (num_samples > 0).then(|| sample_count as f64 / num_samples as f64),
            ns_average: (group.ns_records > 0)
                .then(|| group.ns_sum as f64 / group.ns_records as f64),
            proportions: population_proportions(&counts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::grouper::{Contiguity, LocusGrouper};
    use rstest::rstest;
    use std::io::Cursor;

    const POPS: &str = "S1\tPopA\nS2\tPopA\nS3\tPopB\n";
    const HEADER: &str = concat!(
        "##fileformat=VCFv4.2\n",
        "##source=\"Stacks v2.64\"\n",
        "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\tS3\n",
    );

    fn summarize(body: &str, require_ns: bool) -> Result<Vec<LocusSummary>> {
        let directory = LiteralDirectory::from_reader(Cursor::new(POPS)).unwrap();
        let records = VcfRecords::new(Cursor::new(format!("{}{}", HEADER, body)), require_ns)?;
        let aggregator = VcfAggregator::new(records.sample_names(), &directory)?;
        LocusGrouper::new(records, aggregator, Contiguity::Enforce, "VCF file").collect()
    }

    #[rstest]
    #[case("0/1", true)]
    #[case("1/1:12:0,12", true)]
    #[case("./.", false)]
    #[case("./.:0:.", false)]
    fn test_has_call(#[case] token: &str, #[case] expected: bool) {
        assert_eq!(has_call(token), expected);
    }

    #[rstest]
    #[case("NS=3;AF=0.5", Some("3"))]
    #[case("AF=0.5;NS=12", Some("12"))]
    #[case("AF=0.5", None)]
    #[case(".", None)]
    fn test_info_ns(#[case] info: &str, #[case] expected: Option<&str>) {
        assert_eq!(info_ns(info), expected);
    }

    #[test]
    fn test_all_samples_present() {
        let body = "1\t10\t.\tA\tG\t.\tPASS\tNS=3\tGT\t0/0\t0/1\t1/1\n";
        let summaries = summarize(body, false).unwrap();
        assert_eq!(summaries.len(), 1);

        let locus = &summaries[0];
        assert_eq!(locus.sample_count, 3);
        assert_eq!(locus.sample_fraction, Some(1.0));
        assert_eq!(locus.ns_average, Some(3.0));
        assert!((locus.proportions[0] - 0.667).abs() < 1e-3);
        assert!((locus.proportions[1] - 0.333).abs() < 1e-3);
        assert!((locus.diversity.unwrap() - 0.667).abs() < 1e-3);
    }

    #[test]
    fn test_single_present_sample() {
        let body = "1\t10\t.\tA\tG\t.\tPASS\tNS=1\tGT\t./.\t./.\t0/1\n";
        let locus = &summarize(body, false).unwrap()[0];
        assert_eq!(locus.proportions, vec![0.0, 1.0]);
        assert_eq!(locus.diversity, None);
        assert_eq!(locus.sample_count, 1);
    }

    #[test]
    fn test_presence_merged_across_locus_rows() {
        let body = concat!(
            "1\t10\t.\tA\tG\t.\tPASS\tNS=1\tGT\t0/1\t./.\t./.\n",
            "1\t25\t.\tC\tT\t.\tPASS\tNS=2\tGT\t./.\t./.\t1/1\n",
            "2\t5\t.\tC\tT\t.\tPASS\tNS=0\tGT\t./.\t./.\t./.\n",
        );
        let summaries = summarize(body, false).unwrap();
        assert_eq!(summaries.len(), 2);

        assert_eq!(summaries[0].locus, "1");
        assert_eq!(summaries[0].sample_count, 2);
        assert_eq!(summaries[0].ns_average, Some(1.5));
        assert_eq!(summaries[0].proportions, vec![0.5, 0.5]);
        assert_eq!(summaries[0].diversity, Some(1.0));

        // nobody called: empty locus convention
        assert_eq!(summaries[1].sample_count, 0);
        assert_eq!(summaries[1].proportions, vec![0.0, 0.0]);
        assert_eq!(summaries[1].sample_fraction, Some(0.0));
        assert_eq!(summaries[1].diversity, None);
    }

    #[test]
    fn test_missing_ns() {
        let body = "7\t10\t.\tA\tG\t.\tPASS\tAF=0.5\tGT\t0/0\t0/1\t1/1\n";
        assert_eq!(summarize(body, false).unwrap()[0].ns_average, None);

        let err = summarize(body, true).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StatsError>(),
            Some(&StatsError::MissingAnnotation {
                locus: "7".to_string(),
                line: 4
            })
        );
    }

    #[test]
    fn test_error_line_after_blank_lines() {
        let body = concat!(
            "1\t10\t.\tA\tG\t.\tPASS\tNS=3\tGT\t0/0\t0/1\t1/1\n",
            "\n",
            "\n",
            "2\t10\t.\tA\tG\t.\tPASS\tAF=0.5\tGT\t0/0\t0/1\t1/1\n",
        );
        let err = summarize(body, true).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StatsError>(),
            Some(&StatsError::MissingAnnotation {
                locus: "2".to_string(),
                line: 7
            })
        );
    }

    #[test]
    fn test_non_contiguous_line_after_blank_lines() {
        let body = concat!(
            "1\t10\t.\tA\tG\t.\tPASS\tNS=1\tGT\t0/0\t./.\t./.\n",
            "\n",
            "2\t10\t.\tA\tG\t.\tPASS\tNS=1\tGT\t0/0\t./.\t./.\n",
            "\n",
            "1\t90\t.\tA\tG\t.\tPASS\tNS=1\tGT\t0/0\t./.\t./.\n",
        );
        let err = summarize(body, false).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StatsError>(),
            Some(&StatsError::NonContiguousLocus {
                locus: "1".to_string(),
                line: 8
            })
        );
    }

    #[test]
    fn test_sample_column_mismatch() {
        let body = "1\t10\t.\tA\tG\t.\tPASS\tNS=2\tGT\t0/0\t0/1\n";
        let err = summarize(body, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatsError>(),
            Some(StatsError::MalformedRecord { line: 4, .. })
        ));
    }

    #[test]
    fn test_missing_header() {
        let err = VcfRecords::new(Cursor::new("1\t10\t.\tA\tG\n"), false)
            .err()
            .unwrap();
        assert_eq!(err.downcast_ref::<StatsError>(), Some(&StatsError::MissingHeader));
    }

    #[test]
    fn test_unknown_header_sample() {
        let directory = LiteralDirectory::from_reader(Cursor::new("S1\tPopA\n")).unwrap();
        let samples = vec!["S1".to_string(), "S2".to_string()];
        let err = VcfAggregator::new(&samples, &directory).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StatsError>(),
            Some(&StatsError::UnknownSample {
                key: "S2".to_string()
            })
        );
    }

    #[test]
    fn test_header_without_records() {
        let err = summarize("", false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatsError>(),
            Some(StatsError::EmptyInput { .. })
        ));
    }
}
