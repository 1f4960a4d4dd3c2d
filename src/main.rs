//! grit-annot: nested annotation trees from sorted GTF/GFF files
//!
//! Usage: grit-annot <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process;
use thiserror::Error;

use grit_annotations::config::DEFAULT_CACHE_SIZE;
use grit_annotations::output::TreeWriter;
use grit_annotations::parallel::query_regions_parallel;
use grit_annotations::reader::IndexError;
use grit_annotations::{
    AssemblyError, AssemblyStats, GenomicRegion, GtfParser, IndexedAnnotationStore,
    IndexedFileReader, IntervalAssembler, ParseError, ParsePolicy, RecordParser, StoreConfig,
    StoreError,
};

/// Read buffer for streaming the whole file (4MB).
const READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "grit-annot")]
#[command(version)]
#[command(about = "Assemble and query nested annotation trees (gene > transcript > exon)", long_about = None)]
struct Cli {
    /// Number of threads to use (default: number of CPUs)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    /// Print diagnostics to stderr
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the trees overlapping one or more regions of an indexed file
    Query {
        /// Sorted GTF/GFF file
        #[arg(short, long)]
        input: PathBuf,

        /// Region as chr:start-stop (0-based, half-open), repeatable
        #[arg(short, long = "region", required = true)]
        regions: Vec<GenomicRegion>,

        /// Number of cached query results per store (0 disables caching)
        #[arg(long, default_value_t = DEFAULT_CACHE_SIZE)]
        cache_size: usize,

        /// Abort on the first malformed line instead of skipping it
        #[arg(long)]
        strict: bool,

        /// Print a column header
        #[arg(long)]
        header: bool,
    },

    /// Stream a whole sorted file and print every tree
    Nest {
        /// Sorted GTF/GFF file
        #[arg(short, long)]
        input: PathBuf,

        /// Print a column header
        #[arg(long)]
        header: bool,
    },

    /// Print the top-level region boundaries of a sorted file
    Regions {
        /// Sorted GTF/GFF file
        #[arg(short, long)]
        input: PathBuf,

        /// Only print regions on this contig
        #[arg(long)]
        contig: Option<String>,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("{region}: {source}")]
    Query {
        region: GenomicRegion,
        #[source]
        source: StoreError,
    },

    #[error("line {line}: {source}")]
    Assembly {
        line: usize,
        #[source]
        source: AssemblyError,
    },

    #[error("failed to initialize thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

fn main() {
    pretty_env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    // Configure thread pool if --threads specified
    if let Some(n) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()?;
    }

    match cli.command {
        Commands::Query {
            input,
            regions,
            cache_size,
            strict,
            header,
        } => run_query(input, regions, cache_size, strict, header, cli.stats),
        Commands::Nest { input, header } => run_nest(input, header, cli.stats),
        Commands::Regions { input, contig } => run_regions(input, contig, cli.stats),
    }
}

fn run_query(
    input: PathBuf,
    regions: Vec<GenomicRegion>,
    cache_size: usize,
    strict: bool,
    header: bool,
    stats: bool,
) -> Result<(), CliError> {
    let reader = IndexedFileReader::open(&input)?;
    let policy = if strict {
        ParsePolicy::Fail
    } else {
        ParsePolicy::Skip
    };
    let config = StoreConfig::new()
        .with_cache_size(cache_size)
        .with_parse_policy(policy);

    let results = query_regions_parallel(
        || IndexedAnnotationStore::with_config(reader.clone(), GtfParser, config.clone()),
        &regions,
    );

    let stdout = io::stdout();
    let mut writer = TreeWriter::new(stdout.lock());
    if header {
        writer.write_header()?;
    }

    let mut tree_count = 0;
    for (region, result) in regions.iter().zip(results) {
        let trees = result.map_err(|source| CliError::Query {
            region: region.clone(),
            source,
        })?;
        tree_count += writer.write_trees(trees.iter())?;
    }
    writer.flush()?;

    if stats {
        eprintln!(
            "Regions: {}, Trees: {}, Indexed regions: {}, Unreadable lines: {}",
            regions.len(),
            tree_count,
            reader.index().len(),
            reader.skipped_lines()
        );
    }
    Ok(())
}

fn run_nest(input: PathBuf, header: bool, stats: bool) -> Result<(), CliError> {
    let file = File::open(&input)?;
    let mut lines = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let parser = GtfParser;

    let stdout = io::stdout();
    let mut writer = TreeWriter::new(stdout.lock());
    if header {
        writer.write_header()?;
    }

    let mut assembler = IntervalAssembler::streaming();
    let mut totals = AssemblyStats::default();
    let mut contig: Option<String> = None;
    let mut skipped = 0usize;
    let mut line_buf = Vec::with_capacity(1024);
    let mut line_num = 0usize;

    loop {
        line_buf.clear();
        if lines.read_until(b'\n', &mut line_buf)? == 0 {
            break;
        }
        line_num += 1;

        let record = match parser.parse(&line_buf) {
            Ok(record) => record,
            Err(ParseError::Comment) => continue,
            Err(e) => {
                skipped += 1;
                warn!("skipping line {}: {}", line_num, e);
                continue;
            }
        };

        // Trees never span contigs: flush everything at a contig boundary.
        if contig.as_deref() != Some(record.data.contig.as_str()) {
            if let Some(previous) = contig.take() {
                debug!("finished contig {}", previous);
                writer.write_trees(&assembler.finish())?;
                merge_stats(&mut totals, assembler.stats());
                assembler.reset();
            }
            contig = Some(record.data.contig.clone());
        }

        assembler
            .add_record(record)
            .map_err(|source| CliError::Assembly {
                line: line_num,
                source,
            })?;
        while assembler.has_complete() {
            let tree = assembler
                .pop_complete()
                .map_err(|source| CliError::Assembly {
                    line: line_num,
                    source,
                })?;
            writer.write_tree(&tree)?;
        }
    }

    writer.write_trees(&assembler.finish())?;
    merge_stats(&mut totals, assembler.stats());
    writer.flush()?;

    if stats {
        eprintln!("{}, Skipped lines: {}", totals, skipped);
    }
    Ok(())
}

fn merge_stats(totals: &mut AssemblyStats, run: &AssemblyStats) {
    totals.added += run.added;
    totals.emitted_roots += run.emitted_roots;
    totals.dangling += run.dangling;
    totals.out_of_order += run.out_of_order;
    totals.max_open = totals.max_open.max(run.max_open);
}

fn run_regions(input: PathBuf, contig: Option<String>, stats: bool) -> Result<(), CliError> {
    let reader = IndexedFileReader::open(&input)?;
    let index = reader.index();

    let stdout = io::stdout();
    let mut writer = TreeWriter::new(stdout.lock());
    let mut written = 0;

    for name in index.contigs() {
        if contig.as_ref().is_some_and(|c| c != name) {
            continue;
        }
        for region in index.regions(name) {
            writer.write_region(name, region)?;
            written += 1;
        }
    }
    writer.flush()?;

    if stats {
        eprintln!(
            "Contigs: {}, Regions: {}, Unreadable lines: {}",
            index.contigs().count(),
            written,
            reader.skipped_lines()
        );
    }
    Ok(())
}
