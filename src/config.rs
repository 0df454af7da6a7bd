//! Configuration for the `tiled-bitmap` measurement tool.
//!
//! Options come from command-line arguments (clap) with environment
//! variable fallbacks using the `TB_` prefix:
//!
//! - `TB_PAGE_SIZE` - Size of a pool page in bytes (default: 64 KiB)
//! - `TB_PAGES_PER_BLOCK` - Pages allocated per block (default: 16)
//! - `TB_WORKERS` - Worker threads (default: available parallelism)
//! - `TB_COMPRESSION_LEVEL` - Deflate level 0-9 (default: 1)
//! - `TB_TILE_SIZE` - Tile edge in pixels (default: 4096)
//! - `TB_WIDTH`, `TB_HEIGHT`, `TB_BPP` - Synthetic bitmap geometry
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use tiled_bitmap::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! if let Command::Load(config) = cli.command {
//!     config.validate()?;
//! }
//! ```

use std::thread;

use clap::{Args, Parser, Subcommand, ValueEnum};

// =============================================================================
// Default Values
// =============================================================================

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 4096;

/// Default number of pages per allocated block.
pub const DEFAULT_PAGES_PER_BLOCK: usize = 16;

/// Default page size (64 KiB).
pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// Default deflate level: fastest.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

/// Default synthetic bitmap edge in pixels.
pub const DEFAULT_BITMAP_SIZE: u32 = 16384;

/// Default bits per pixel.
pub const DEFAULT_BPP: u32 = 8;

/// Default buffer size for the compress command (16 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Largest accepted page size (64 MiB).
pub const MAX_PAGE_SIZE: usize = 64 * 1024 * 1024;

/// Largest accepted tile edge.
pub const MAX_TILE_SIZE: u32 = 16384;

/// Number of worker threads when not configured.
pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}

// =============================================================================
// CLI
// =============================================================================

/// Tiled bitmap memory manager - load and compression measurements.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiled-bitmap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fill a synthetic layer, let it compress, and verify every tile.
    Load(LoadConfig),

    /// Compress a synthetic buffer into pages and report the ratio.
    Compress(CompressConfig),
}

/// Report format.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable lines
    #[default]
    Text,
    /// A single JSON document
    Json,
}

// =============================================================================
// Memory Configuration
// =============================================================================

/// Page pool, codec and worker settings shared by all commands.
#[derive(Args, Debug, Clone)]
pub struct MemoryConfig {
    /// Size of each pool page in bytes.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, env = "TB_PAGE_SIZE")]
    pub page_size: usize,

    /// Number of pages allocated at once when the pool runs dry.
    #[arg(long, default_value_t = DEFAULT_PAGES_PER_BLOCK, env = "TB_PAGES_PER_BLOCK")]
    pub pages_per_block: usize,

    /// Worker threads for filling and compressing.
    #[arg(long, default_value_t = default_workers(), env = "TB_WORKERS")]
    pub workers: usize,

    /// Deflate compression level (0-9).
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_LEVEL, env = "TB_COMPRESSION_LEVEL")]
    pub compression_level: u32,
}

impl MemoryConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(format!(
                "page_size must be between 1 and {} bytes",
                MAX_PAGE_SIZE
            ));
        }
        if self.pages_per_block == 0 {
            return Err("pages_per_block must be greater than 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.compression_level > 9 {
            return Err("compression_level must be between 0 and 9".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Load Command
// =============================================================================

/// Arguments of the `load` command.
#[derive(Args, Debug, Clone)]
pub struct LoadConfig {
    /// Bitmap width in pixels.
    #[arg(long, default_value_t = DEFAULT_BITMAP_SIZE, env = "TB_WIDTH")]
    pub width: u32,

    /// Bitmap height in pixels.
    #[arg(long, default_value_t = DEFAULT_BITMAP_SIZE, env = "TB_HEIGHT")]
    pub height: u32,

    /// Bits per pixel (1, 2, 4 or a multiple of 8).
    #[arg(long, default_value_t = DEFAULT_BPP, env = "TB_BPP")]
    pub bpp: u32,

    /// Tile edge in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TB_TILE_SIZE")]
    pub tile_size: u32,

    #[command(flatten)]
    pub memory: MemoryConfig,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl LoadConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.memory.validate()?;

        if self.width == 0 || self.height == 0 {
            return Err("width and height must be greater than 0".to_string());
        }
        if self.bpp == 0 || (self.bpp % 8 != 0 && 8 % self.bpp != 0) || self.bpp > 64 {
            return Err(format!(
                "bpp must be 1, 2, 4 or a multiple of 8 up to 64, got {}",
                self.bpp
            ));
        }
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!(
                "tile_size must be between 1 and {}",
                MAX_TILE_SIZE
            ));
        }
        if (self.tile_size as u64 * self.bpp as u64) % 8 != 0 {
            return Err("a tile row must fill whole bytes (tile_size * bpp % 8 == 0)".to_string());
        }

        Ok(())
    }

    /// Raw bytes of one tile.
    pub fn tile_bytes(&self) -> usize {
        self.tile_size as usize * self.tile_size as usize * self.bpp as usize / 8
    }
}

// =============================================================================
// Compress Command
// =============================================================================

/// Arguments of the `compress` command.
#[derive(Args, Debug, Clone)]
pub struct CompressConfig {
    /// Size of the synthetic buffer in bytes.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE, env = "TB_BUFFER_SIZE")]
    pub size: usize,

    #[command(flatten)]
    pub memory: MemoryConfig,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CompressConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.memory.validate()?;

        if self.size == 0 {
            return Err("size must be greater than 0".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
