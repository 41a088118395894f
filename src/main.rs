use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::ProgressBar;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use wikistream::codec::{Codec, DeltaCodec, Method};
use wikistream::compress::{CompressedRevision, PoolBuilder};
use wikistream::config::{default_workers, PROGRESS_INTERVAL};
use wikistream::listener::{CompressionListener, ImportListener};
use wikistream::manifest::ManifestWriter;
use wikistream::models::{DumpNamespace, Namespace, PageRecord, RevisionRecord, SiteMetadata};
use wikistream::namespace::{ApiNamespaceResolver, EmbeddedNamespaceResolver, NamespaceResolver};
use wikistream::parser::{open_dump, DumpParser};
use wikistream::pipeline::CompressingImporter;
use wikistream::stats::EventCounters;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikistream")]
#[command(about = "Stream MediaWiki XML dumps and compress their revisions")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a dump and report event counts
    Scan(ScanArgs),
    /// Parse a dump and compress every revision
    Compress(CompressArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Path to the dump (.xml or .xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Use the dump's own namespace declarations instead of querying the site API
    #[arg(long)]
    offline: bool,
}

#[derive(Args)]
struct CompressArgs {
    /// Path to the dump (.xml or .xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Revision codec
    #[arg(long, value_enum, default_value_t = CodecArg::Gzip)]
    codec: CodecArg,

    /// Maximum revisions compressing at once
    #[arg(long, default_value_t = default_workers())]
    workers: usize,

    /// Write a CSV row per compressed revision
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Use the dump's own namespace declarations instead of querying the site API
    #[arg(long)]
    offline: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CodecArg {
    None,
    Gzip,
    Bzip2,
    Lzma2,
    DeltaGzip,
    DeltaBzip2,
    DeltaLzma2,
}

enum Resolver {
    Api(ApiNamespaceResolver),
    Embedded(EmbeddedNamespaceResolver),
}

impl Resolver {
    fn new(offline: bool) -> Result<Self> {
        if offline {
            Ok(Resolver::Embedded(EmbeddedNamespaceResolver))
        } else {
            Ok(Resolver::Api(
                ApiNamespaceResolver::new().context("Failed to build HTTP client")?,
            ))
        }
    }
}

impl NamespaceResolver for Resolver {
    fn resolve(
        &self,
        site: &SiteMetadata,
        embedded: &[DumpNamespace],
    ) -> wikistream::Result<Vec<Namespace>> {
        match self {
            Resolver::Api(api) => api.resolve(site, embedded),
            Resolver::Embedded(local) => local.resolve(site, embedded),
        }
    }
}

/// Ticks a spinner every `PROGRESS_INTERVAL` pages.
struct Progress<I> {
    inner: I,
    bar: ProgressBar,
    pages: u64,
}

impl<I: ImportListener> Progress<I> {
    fn new(inner: I) -> Self {
        Self {
            inner,
            bar: ProgressBar::new_spinner(),
            pages: 0,
        }
    }
}

impl<I: ImportListener> ImportListener for Progress<I> {
    fn on_site(&mut self, site: &SiteMetadata) -> Result<()> {
        self.inner.on_site(site)
    }

    fn on_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        self.inner.on_namespace(namespace)
    }

    fn on_page(&mut self, page: &PageRecord) -> Result<()> {
        self.pages += 1;
        if self.pages % PROGRESS_INTERVAL == 0 {
            self.bar.set_message(format!("{} pages", self.pages));
            self.bar.tick();
        }
        self.inner.on_page(page)
    }

    fn on_revision(&mut self, page: &PageRecord, revision: RevisionRecord) -> Result<()> {
        self.inner.on_revision(page, revision)
    }
}

impl<I> Drop for Progress<I> {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

struct CompressSink<'a> {
    counters: &'a EventCounters,
    manifest: Option<&'a mut ManifestWriter<BufWriter<File>>>,
}

impl CompressionListener for CompressSink<'_> {
    fn on_revision_compressed(&mut self, revision: &CompressedRevision) -> Result<()> {
        self.counters.on_revision_compressed(revision)?;
        if let Some(manifest) = self.manifest.as_mut() {
            manifest.write(revision)?;
        }
        Ok(())
    }
}

fn run_scan(args: ScanArgs) -> Result<()> {
    let input = open_dump(&args.input)
        .with_context(|| format!("Failed to open dump: {}", args.input.display()))?;
    let parser = DumpParser::new(Resolver::new(args.offline)?);
    let counters = EventCounters::new();

    info!("Scanning {}", args.input.display());
    let start = Instant::now();
    let mut listener = Progress::new(&counters);
    parser
        .parse(input, &mut listener)
        .with_context(|| format!("Failed to parse dump: {}", args.input.display()))?;
    drop(listener);
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Scan time:          {:.2}s", duration.as_secs_f64());
    println!("Namespaces:         {}", counters.namespaces());
    println!("Pages:              {}", counters.pages());
    println!("Revisions:          {}", counters.revisions());
    println!("  registered:       {}", counters.registered());
    println!("  anonymous:        {}", counters.anonymous());

    Ok(())
}

fn run_compress(args: CompressArgs) -> Result<()> {
    match args.codec {
        CodecArg::None => compress_with(Method::None, args),
        CodecArg::Gzip => compress_with(Method::Gzip, args),
        CodecArg::Bzip2 => compress_with(Method::Bzip2, args),
        CodecArg::Lzma2 => compress_with(Method::Lzma2, args),
        CodecArg::DeltaGzip => compress_with(DeltaCodec::new(Method::Gzip), args),
        CodecArg::DeltaBzip2 => compress_with(DeltaCodec::new(Method::Bzip2), args),
        CodecArg::DeltaLzma2 => compress_with(DeltaCodec::new(Method::Lzma2), args),
    }
}

fn compress_with<C: Codec>(codec: C, args: CompressArgs) -> Result<()> {
    let input = open_dump(&args.input)
        .with_context(|| format!("Failed to open dump: {}", args.input.display()))?;
    let parser = DumpParser::new(Resolver::new(args.offline)?);
    let counters = EventCounters::new();
    let mut manifest = args
        .manifest
        .as_ref()
        .map(|path| ManifestWriter::create(path))
        .transpose()?;

    let pool = PoolBuilder::new(codec).capacity(args.workers).build(CompressSink {
        counters: &counters,
        manifest: manifest.as_mut(),
    })?;
    let mut importer = CompressingImporter::new(Progress::new(&counters), pool);

    info!(workers = args.workers, "Compressing {}", args.input.display());
    let start = Instant::now();
    parser
        .parse(input, &mut importer)
        .with_context(|| format!("Failed to parse dump: {}", args.input.display()))?;
    let (stats, progress) = importer.finish()?;
    drop(progress);
    let duration = start.elapsed();

    if let Some(manifest) = manifest {
        let rows = manifest.rows();
        manifest.into_inner()?;
        info!(rows, "Manifest written");
    }

    println!();
    println!("=== Summary ===");
    println!("Compression time:   {:.2}s", duration.as_secs_f64());
    println!("Pages:              {}", counters.pages());
    println!("Revisions:          {}", stats.completed);
    println!("  compressed:       {}", counters.compressed());
    println!("  failed:           {}", counters.failed());
    println!("Raw bytes:          {}", stats.uncompressed_bytes);
    println!("Compressed bytes:   {}", stats.compressed_bytes);
    println!("Ratio:              {:.3}", stats.ratio());
    println!("Peak in flight:     {}", stats.peak_in_flight);

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    let result = match cli.command {
        Commands::Scan(args) => run_scan(args),
        Commands::Compress(args) => run_compress(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
