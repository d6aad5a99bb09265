use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use lociprop::stat::grouper::Contiguity;
use std::io::{self, Write};
use std::path::PathBuf;

/// Per-locus population proportions and diversity
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Per-locus population proportions and diversity from Stacks output"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize loci of a Stacks catalog.tags.tsv(.gz)
    Catalog(CatalogArgs),
    /// Summarize loci of a VCF whose CHROM column holds the locus id
    Vcf(VcfArgs),
    /// Tabulate per-sample assembly counters from a ustacks log
    Ustacks(UstacksArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GroupingOptions {
    /// Trust that each locus forms one contiguous run and skip the reappearance check
    #[arg(long = "assume-contiguous")]
    pub assume_contiguous: bool,
}

impl GroupingOptions {
    pub fn contiguity(&self) -> Contiguity {
        if self.assume_contiguous {
            Contiguity::Assume
        } else {
            Contiguity::Enforce
        }
    }
}

#[derive(Args, Debug)]
pub struct CatalogArgs {
    /// Path to catalog.tags.tsv, optionally gzipped
    #[arg(required = true)]
    pub catalog: PathBuf,

    /// Path to file that defines populations. Tab separated: sample\tpopulation_name.
    /// Samples are matched by their line order
    #[arg(required = true)]
    pub population_file: PathBuf,

    #[command(flatten)]
    pub grouping: GroupingOptions,
}

#[derive(Args, Debug)]
pub struct VcfArgs {
    /// Path to input VCF, optionally gzipped
    #[arg(required = true)]
    pub vcf: PathBuf,

    /// Path to file that defines populations. Tab separated: sample\tpopulation_name
    #[arg(required = true)]
    pub population_file: PathBuf,

    /// Fail on records without an NS= INFO annotation
    #[arg(long = "require-ns")]
    pub require_ns: bool,

    #[command(flatten)]
    pub grouping: GroupingOptions,
}

#[derive(Args, Debug)]
pub struct UstacksArgs {
    /// Path to a ustacks or denovo_map log
    #[arg(required = true)]
    pub log: PathBuf,

    /// Path to file that defines populations. Tab separated: sample\tpopulation_name
    #[arg(required = true)]
    pub population_file: PathBuf,
}

impl CatalogArgs {
    pub fn run(self) -> Result<()> {
        use lociprop::stat::run_catalog;

        let stdout = io::stdout();
        let mut out = run_catalog(
            &self.catalog,
            &self.population_file,
            self.grouping.contiguity(),
            stdout.lock(),
        )?;
        out.flush()?;
        Ok(())
    }
}

impl VcfArgs {
    pub fn run(self) -> Result<()> {
        use lociprop::stat::run_vcf;

        let stdout = io::stdout();
        let mut out = run_vcf(
            &self.vcf,
            &self.population_file,
            self.require_ns,
            self.grouping.contiguity(),
            stdout.lock(),
        )?;
        out.flush()?;
        Ok(())
    }
}

impl UstacksArgs {
    pub fn run(self) -> Result<()> {
        use lociprop::ustacks::run_ustacks;

        let stdout = io::stdout();
        let mut out = run_ustacks(&self.log, &self.population_file, stdout.lock())?;
        out.flush()?;
        Ok(())
    }
}

// Main entry point
pub fn main() -> Result<()> {
    use env_logger::Env;

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Catalog(args) => args.run(),
        Commands::Vcf(args) => args.run(),
        Commands::Ustacks(args) => args.run(),
    }
}
