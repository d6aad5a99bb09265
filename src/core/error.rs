use thiserror::Error;

/// Failure kinds raised while loading populations or aggregating loci.
///
/// Functions in this crate return `anyhow::Result`; wrap these with context and
/// recover the kind with `err.downcast_ref::<StatsError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("Population file line {line}: expected 2 non-empty tab-separated columns, got {fields}")]
    MalformedDictionary { line: u64, fields: usize },

    #[error("Duplicated sample '{key}' in population file")]
    DuplicateSample { key: String },

    #[error("Sample '{key}' not found in population file")]
    UnknownSample { key: String },

    #[error("Locus '{locus}' on line {line} is missing the NS= annotation")]
    MissingAnnotation { locus: String, line: u64 },

    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    #[error("No #CHROM header line found")]
    MissingHeader,

    #[error("{source_name} contains no data rows")]
    EmptyInput { source_name: String },

    #[error("Locus '{locus}' reappears on line {line} after a different locus; input must be grouped by locus")]
    NonContiguousLocus { locus: String, line: u64 },
}
