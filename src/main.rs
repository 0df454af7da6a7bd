//! Tiled bitmap measurement tool.
//!
//! `load` fills a synthetic layer through the thread pool, waits for the
//! tiles to compress, verifies every tile and reports timings and memory.
//! `compress` pushes one synthetic buffer through the page codec.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiled_bitmap::{
    config::{Cli, Command, CompressConfig, LoadConfig, MemoryConfig, OutputFormat},
    BlobContext, DeflateCodec, Layer, LoadProgress, MemoryReport, PageCodec, PageProvider,
    PatternSource, PoolStats, ProgressReport, TaskQueue, ThreadPool,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Load(config) => run_load(config).await,
        Command::Compress(config) => run_compress(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tiled_bitmap=debug"
    } else {
        "tiled_bitmap=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_context(memory: &MemoryConfig, pool: Arc<ThreadPool>) -> BlobContext {
    BlobContext::new(
        PageProvider::new(memory.pages_per_block, memory.page_size),
        pool,
    )
    .with_codec(Arc::new(DeflateCodec::new(memory.compression_level)))
}

fn print_json<T: Serialize>(report: &T) -> ExitCode {
    match serde_json::to_string_pretty(report) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize report: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

// =============================================================================
// Load Command
// =============================================================================

#[derive(Debug, Serialize)]
struct LoadReport {
    width: u32,
    height: u32,
    bpp: u32,
    tile_size: u32,
    columns: u32,
    rows: u32,
    raw_bytes: usize,
    fetch_ms: f64,
    settle_ms: f64,
    verify_ms: f64,
    mismatched_tiles: usize,
    progress: ProgressReport,
    memory: MemoryReport,
    pool: PoolStats,
}

async fn run_load(config: LoadConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "Loading {}x{} bitmap ({} bpp) in {} px tiles, {} workers",
        config.width, config.height, config.bpp, config.tile_size, config.memory.workers
    );

    let pool = Arc::new(ThreadPool::new(config.memory.workers));
    let context = build_context(&config.memory, Arc::clone(&pool));

    let layer = match Layer::new(
        0,
        config.width,
        config.height,
        config.bpp,
        config.tile_size,
        &context,
    ) {
        Ok(layer) => layer,
        Err(e) => {
            error!("Failed to create layer: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let progress = Arc::new(LoadProgress::new(layer.tile_count()));
    let _progress_registration = layer.register_init_observer(progress.clone());

    // Fill
    let source = Arc::new(PatternSource::new(config.width, config.height, config.bpp));
    let queue = TaskQueue::new();
    let started = Instant::now();

    match layer.fetch_data(source.clone(), queue.downgrade()).await {
        Some(Ok(summary)) => info!("Filled {} tiles in {} rows", summary.tiles, summary.rows),
        Some(Err(e)) => {
            error!("Load failed: {}", e);
            return ExitCode::FAILURE;
        }
        None => {
            error!("Load was dropped before completing");
            return ExitCode::FAILURE;
        }
    }
    let fetch_time = started.elapsed();

    // Let background compression finish
    let settle_started = Instant::now();
    if let Err(e) = wait_idle(&pool).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    let settle_time = settle_started.elapsed();
    let memory = context.report();
    let pool_stats = context.provider().stats();

    // Verify
    let verify_started = Instant::now();
    let verify_layer = Arc::clone(&layer);
    let mismatched = match tokio::task::spawn_blocking(move || {
        verify_layer
            .tiles()
            .filter(|tile| {
                !tile
                    .get_const_tile_sync()
                    .is_some_and(|data| source.matches(&data))
            })
            .count()
    })
    .await
    {
        Ok(count) => count,
        Err(e) => {
            error!("Verification task failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let verify_time = verify_started.elapsed();

    if mismatched > 0 {
        warn!("{} tile(s) do not hold the expected data", mismatched);
    }

    let report = LoadReport {
        width: config.width,
        height: config.height,
        bpp: config.bpp,
        tile_size: config.tile_size,
        columns: layer.columns(),
        rows: layer.rows(),
        raw_bytes: layer.tile_count() * config.tile_bytes(),
        fetch_ms: millis(fetch_time),
        settle_ms: millis(settle_time),
        verify_ms: millis(verify_time),
        mismatched_tiles: mismatched,
        progress: progress.report(),
        memory,
        pool: pool_stats,
    };

    let status = match config.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            print_load_report(&report);
            ExitCode::SUCCESS
        }
    };

    if mismatched > 0 {
        ExitCode::FAILURE
    } else {
        status
    }
}

async fn wait_idle(pool: &Arc<ThreadPool>) -> Result<(), String> {
    let pool = Arc::clone(pool);
    tokio::task::spawn_blocking(move || pool.wait_idle())
        .await
        .map_err(|e| format!("Waiting for workers failed: {}", e))
}

fn print_load_report(report: &LoadReport) {
    println!("Tiled Bitmap Load");
    println!("═════════════════");
    println!(
        "Bitmap:      {}x{} @ {} bpp",
        report.width, report.height, report.bpp
    );
    println!(
        "Tiles:       {}x{} of {} px ({} finished)",
        report.columns, report.rows, report.tile_size, report.progress.finished
    );
    println!("Raw size:    {:.1} MiB", mib(report.raw_bytes));
    println!();
    println!("Fetch:       {:.1} ms", report.fetch_ms);
    println!("Compression: {:.1} ms after fetch", report.settle_ms);
    println!("Verify:      {:.1} ms", report.verify_ms);
    println!();
    println!(
        "Resident:    {:.1} MiB",
        mib(report.memory.resident_bytes)
    );
    println!(
        "Compressed:  {:.1} MiB in {} pages of {} bytes ({} blocks)",
        mib(report.memory.compressed_bytes),
        report.pool.live_pages(),
        report.pool.page_size,
        report.pool.blocks
    );
    println!(
        "Compressions: {} committed, {} aborted",
        report.memory.compressions, report.memory.aborted_compressions
    );
    println!();
    if report.mismatched_tiles == 0 {
        println!("✓ All tiles verified");
    } else {
        println!("✗ {} tile(s) failed verification", report.mismatched_tiles);
    }
}

// =============================================================================
// Compress Command
// =============================================================================

#[derive(Debug, Serialize)]
struct CompressReport {
    codec: &'static str,
    level: u32,
    size: usize,
    compressed: usize,
    pages: usize,
    footprint: usize,
    ratio: f64,
    compress_ms: f64,
    decompress_ms: f64,
}

fn run_compress(config: CompressConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let provider = PageProvider::new(config.memory.pages_per_block, config.memory.page_size);
    let codec = DeflateCodec::new(config.memory.compression_level);

    // One synthetic 4096-byte-wide bitmap, line after line
    let input: Vec<u8> = (0..config.size)
        .map(|i| PatternSource::expected_byte(i % 4096, i / 4096))
        .collect();

    let started = Instant::now();
    let pages = match codec.compress(&input, &provider) {
        Ok(pages) => pages,
        Err(e) => {
            error!("Compression failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let compress_time = started.elapsed();

    let started = Instant::now();
    let mut output = vec![0u8; config.size];
    if let Err(e) = codec.decompress(&mut output, &pages) {
        error!("Decompression failed: {}", e);
        return ExitCode::FAILURE;
    }
    let decompress_time = started.elapsed();

    if output != input {
        error!("Round trip produced different data");
        return ExitCode::FAILURE;
    }

    let report = CompressReport {
        codec: codec.name(),
        level: codec.level(),
        size: config.size,
        compressed: pages.compressed_len(),
        pages: pages.page_count(),
        footprint: pages.footprint(),
        ratio: config.size as f64 / pages.compressed_len().max(1) as f64,
        compress_ms: millis(compress_time),
        decompress_ms: millis(decompress_time),
    };

    match config.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("Codec:       {} (level {})", report.codec, report.level);
            println!("Input:       {:.2} MiB", mib(report.size));
            println!(
                "Compressed:  {} bytes in {} pages ({} bytes held)",
                report.compressed, report.pages, report.footprint
            );
            println!("Ratio:       {:.1}:1", report.ratio);
            println!("Compress:    {:.1} ms", report.compress_ms);
            println!("Decompress:  {:.1} ms", report.decompress_ms);
            ExitCode::SUCCESS
        }
    }
}
