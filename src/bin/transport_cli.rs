use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use transport_buffer::filenames;
use transport_buffer::{BufferConfig, PageCache, PageReader, ReaderConfig, StreamingReader};

#[derive(Parser)]
#[command(name = "transport-cli", version, about = "Paged append log tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BufferArgs {
    /// Directory holding the page files.
    buffer_path: PathBuf,
    /// JSON buffer config; overrides --page-size.
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[arg(long = "page-size", default_value_t = transport_buffer::config::DEFAULT_PAGE_SIZE)]
    page_size: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Append each argument, or each stdin line when none are given, as a record.
    Append {
        #[command(flatten)]
        buffer: BufferArgs,
        messages: Vec<String>,
    },
    /// Print records from the start of the log.
    Tail {
        #[command(flatten)]
        buffer: BufferArgs,
        #[arg(short = 'f', long = "follow")]
        follow: bool,
        #[arg(long = "limit")]
        limit: Option<usize>,
        #[arg(long = "zero-copy")]
        zero_copy: bool,
        #[arg(long = "hexdump")]
        hexdump: bool,
    },
    /// Summarise the pages and index of a buffer.
    Inspect {
        #[command(flatten)]
        buffer: BufferArgs,
    },
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Append { buffer, messages } => append(&buffer, messages),
        Commands::Tail {
            buffer,
            follow,
            limit,
            zero_copy,
            hexdump,
        } => {
            let config = if follow {
                ReaderConfig::tailing()
            } else {
                ReaderConfig::one_shot()
            };
            let config = ReaderConfig { zero_copy, ..config };
            tail(&buffer, config, limit, hexdump)
        }
        Commands::Inspect { buffer } => inspect(&buffer),
    }
}

fn buffer_config(args: &BufferArgs) -> Result<BufferConfig> {
    Ok(match &args.config {
        Some(path) => BufferConfig::from_json_file(path)?,
        None => BufferConfig::with_page_size(args.page_size),
    })
}

fn open(args: &BufferArgs) -> Result<Arc<PageCache>> {
    PageCache::open(&args.buffer_path, buffer_config(args)?)
        .with_context(|| format!("opening buffer at {}", args.buffer_path.display()))
}

/// Readers never create, roll or repair pages.
fn open_read_only(args: &BufferArgs) -> Result<Arc<PageReader>> {
    PageReader::open(&args.buffer_path, buffer_config(args)?)
        .with_context(|| format!("opening buffer at {} for reading", args.buffer_path.display()))
}

fn append(args: &BufferArgs, messages: Vec<String>) -> Result<()> {
    let cache = open(args)?;
    let mut count = 0usize;
    if messages.is_empty() {
        for line in io::stdin().lock().lines() {
            cache.append(line?.as_bytes())?;
            count += 1;
        }
    } else {
        for message in &messages {
            cache.append(message.as_bytes())?;
            count += 1;
        }
    }
    cache.flush()?;
    log::info!(
        "appended {count} records, log now ends on page {}",
        cache.current_page_number()
    );
    Ok(())
}

fn tail(args: &BufferArgs, config: ReaderConfig, limit: Option<usize>, hexdump: bool) -> Result<()> {
    let pages = open_read_only(args)?;
    let stop = Arc::new(AtomicBool::new(false));

    let mut out = io::BufWriter::new(io::stdout());
    let mut printed = 0usize;
    let mut write_error = None;
    {
        let stop_on_limit = Arc::clone(&stop);
        let handler = |record: &[u8], page_number: u32, position: u32| {
            if write_error.is_some() || limit.is_some_and(|limit| printed >= limit) {
                return;
            }
            if let Err(err) = print_record(&mut out, record, page_number, position, hexdump) {
                write_error = Some(err);
                stop_on_limit.store(true, Ordering::Release);
                return;
            }
            printed += 1;
            if limit.is_some_and(|limit| printed >= limit) {
                stop_on_limit.store(true, Ordering::Release);
            }
        };
        let mut reader = StreamingReader::new(Arc::clone(&pages), handler, config)
            .with_stop(Arc::clone(&stop));
        reader.process()?;
    }
    if let Some(err) = write_error {
        return Err(err.into());
    }
    out.flush()?;
    Ok(())
}

fn print_record(
    out: &mut impl Write,
    record: &[u8],
    page_number: u32,
    position: u32,
    hexdump: bool,
) -> io::Result<()> {
    if hexdump {
        writeln!(out, "{page_number}:{position} len={}", record.len())?;
        for (line, chunk) in record.chunks(16).enumerate() {
            write!(out, "  {:08x} ", line * 16)?;
            for byte in chunk {
                write!(out, " {byte:02x}")?;
            }
            writeln!(out)?;
        }
    } else {
        writeln!(
            out,
            "{page_number}:{position} {}",
            String::from_utf8_lossy(record)
        )?;
    }
    Ok(())
}

fn inspect(args: &BufferArgs) -> Result<()> {
    let reader = open_read_only(args)?;
    println!("path: {}", reader.path().display());
    println!("page_size: {}", reader.page_size());
    println!("estimated_length: {}", reader.estimate_total_length()?);
    match reader.index() {
        Some(index) => println!(
            "index: lowest={} highest={}",
            index.lowest_tracked_page_number(),
            index.highest_page_number()
        ),
        None => println!("index: missing"),
    }
    let pages = reader.pages()?;
    println!("pages: {}", pages.len());
    for page_number in pages {
        let page = reader.get_page(page_number)?;
        let used = page.written_length();
        println!(
            "  {} used={} sealed={}",
            filenames::page_filename(page_number),
            used,
            used == page.total_data_size()
        );
    }
    Ok(())
}
