use anyhow::{Context, Result};
use fnv::FnvHashMap;
use indexmap::IndexSet;
use log::debug;
use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::fmt::Display;
use std::fs::File;
use std::hash::Hash;
use std::io::Read;
use std::path::Path;

use crate::core::error::StatsError;
use crate::core::utils::LineTracker;

/// Sample keyed by its literal name, as in VCF headers and ustacks logs.
pub type LiteralDirectory = PopulationDirectory<String>;

/// Sample keyed by its 1-based line ordinal, as in catalog provenance tokens.
pub type PositionalDirectory = PopulationDirectory<usize>;

/// Immutable sample -> population mapping.
///
/// Population labels are stored as indices into the sorted, deduplicated
/// universe of labels, so the universe order is also the output column order.
#[derive(Debug, Clone)]
pub struct PopulationDirectory<K> {
    universe: Vec<String>,
    sample_lookup: FnvHashMap<K, usize>,
}

/// (key, population) rows of a population file. Whitespace-only lines are
/// skipped; any other line needs exactly two non-empty fields.
fn read_pairs<R: Read>(reader: R) -> Result<Vec<(String, String)>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(LineTracker::new(reader, 0));

    let mut pairs = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader
        .read_record(&mut record)
        .context("Failed to read population file")?
    {
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        if record.len() != 2 || record.iter().any(str::is_empty) {
            let end = reader.position().byte();
            return Err(StatsError::MalformedDictionary {
                line: reader.get_mut().line_at(end.saturating_sub(1)),
                fields: record.iter().filter(|field| !field.is_empty()).count(),
            }
            .into());
        }
        pairs.push((record[0].to_string(), record[1].to_string()));
    }

    Ok(pairs)
}

fn open(path: &Path) -> Result<File> {
    File::open(path)
        .with_context(|| format!("Failed to open population file: {}", path.display()))
}

impl PopulationDirectory<String> {
    /// Create from a tab-separated file: sample\tpopulation
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::from_reader(open(path)?)
            .with_context(|| format!("Invalid population file: {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_entries(read_pairs(reader)?)
    }
}

impl PopulationDirectory<usize> {
    /// Create from a tab-separated file where the key column is ignored and
    /// each sample is identified by its 1-based row number instead.
    pub fn positional_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::positional_from_reader(open(path)?)
            .with_context(|| format!("Invalid population file: {}", path.display()))
    }

    pub fn positional_from_reader<R: Read>(reader: R) -> Result<Self> {
        let entries = read_pairs(reader)?
            .into_iter()
            .enumerate()
            .map(|(idx, (_, population))| (idx + 1, population));
        Self::from_entries(entries)
    }
}

impl<K> PopulationDirectory<K>
where
    K: Hash + Eq + Display,
{
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, String)>,
    {
        let entries: Vec<(K, String)> = entries.into_iter().collect();
        if entries.is_empty() {
            return Err(StatsError::EmptyInput {
                source_name: "Population file".to_string(),
            }
            .into());
        }

        let mut labels: IndexSet<String> = entries.iter().map(|(_, l)| l.clone()).collect();
        labels.sort();

        let mut sample_lookup = FnvHashMap::default();
        for (key, label) in entries {
            let pop_idx = labels
                .get_index_of(&label)
                .with_context(|| format!("Population '{}' missing from universe", label))?;

            match sample_lookup.entry(key) {
                Entry::Vacant(entry) => {
                    entry.insert(pop_idx);
                }
                Entry::Occupied(entry) => {
                    return Err(StatsError::DuplicateSample {
                        key: entry.key().to_string(),
                    }
                    .into());
                }
            }
        }
        let universe: Vec<String> = labels.into_iter().collect();

        debug!(
            "Loaded {} samples across {} populations",
            sample_lookup.len(),
            universe.len()
        );

        Ok(Self {
            universe,
            sample_lookup,
        })
    }

    /// Index of the sample's population within [`Self::universe`]
    pub fn lookup<Q>(&self, key: &Q) -> Result<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ?Sized,
    {
        self.sample_lookup.get(key).copied().ok_or_else(|| {
            StatsError::UnknownSample {
                key: key.to_string(),
            }
            .into()
        })
    }

    pub fn lookup_label<Q>(&self, key: &Q) -> Result<&str>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ?Sized,
    {
        let idx = self.lookup(key)?;
        Ok(self.universe[idx].as_str())
    }

    /// Sorted, deduplicated population labels
    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    pub fn num_populations(&self) -> usize {
        self.universe.len()
    }

    pub fn num_samples(&self) -> usize {
        self.sample_lookup.len()
    }
}
