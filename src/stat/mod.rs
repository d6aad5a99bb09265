pub mod catalog;
pub mod diversity;
pub mod grouper;
pub mod proportions;
pub mod vcf;
pub mod writer;

use crate::core::population::{LiteralDirectory, PositionalDirectory};
use crate::core::utils::{create_spinner, open_reader};
use crate::stat::catalog::{CatalogAggregator, CatalogRecords};
use crate::stat::grouper::{Contiguity, LocusSummary};
use crate::stat::vcf::{VcfAggregator, VcfRecords};
use crate::stat::writer::{Layout, SummaryWriter};
use anyhow::{Context, Result};
use log::info;
use std::io::Write;
use std::path::Path;

const PROGRESS_INTERVAL: u64 = 10_000;

/// Per-locus population proportions from a Stacks `catalog.tags.tsv(.gz)`.
pub fn run_catalog<W: Write>(
    catalog: &Path,
    population_file: &Path,
    contiguity: Contiguity,
    out: W,
) -> Result<W> {
    let directory = PositionalDirectory::positional_from_file(population_file)?;
    info!(
        "Loaded {} samples in {} populations",
        directory.num_samples(),
        directory.num_populations()
    );

    let reader = open_reader(catalog)?;
    let records = CatalogRecords::new(reader, &directory);
    let summaries = grouper::LocusGrouper::new(
        records,
        CatalogAggregator::new(directory.num_populations()),
        contiguity,
        "Catalog file",
    );

    let writer = SummaryWriter::new(out, Layout::Catalog, directory.universe())?;
    emit(summaries, writer)
        .with_context(|| format!("Failed to process catalog: {}", catalog.display()))
}

/// Per-locus population proportions from a VCF whose CHROM column is the locus id.
pub fn run_vcf<W: Write>(
    vcf: &Path,
    population_file: &Path,
    require_ns: bool,
    contiguity: Contiguity,
    out: W,
) -> Result<W> {
    let directory = LiteralDirectory::from_file(population_file)?;
    info!(
        "Loaded {} samples in {} populations",
        directory.num_samples(),
        directory.num_populations()
    );

    let run = || -> Result<W> {
        let records = VcfRecords::new(open_reader(vcf)?, require_ns)?;
        let aggregator = VcfAggregator::new(records.sample_names(), &directory)?;
        let summaries = grouper::LocusGrouper::new(records, aggregator, contiguity, "VCF file");

        let writer = SummaryWriter::new(out, Layout::Vcf, directory.universe())?;
        emit(summaries, writer)
    };
    run().with_context(|| format!("Failed to process VCF: {}", vcf.display()))
}

fn emit<I, W>(summaries: I, mut writer: SummaryWriter<W>) -> Result<W>
where
    I: Iterator<Item = Result<LocusSummary>>,
    W: Write,
{
    let spinner = create_spinner("Summarizing loci...");
    let mut loci = 0u64;

    for summary in summaries {
        writer.write(&summary?)?;
        loci += 1;
        if loci % PROGRESS_INTERVAL == 0 {
            spinner.set_message(format!("Summarized {} loci", loci));
        }
    }
    writer.flush()?;
    spinner.finish_and_clear();

    info!("Wrote {} loci", loci);
    writer.into_inner()
}
