//! Command-line configuration.
//!
//! Every print option can also come from a `BLEPRINT_*` environment variable
//! (or a `.env` file loaded before parsing).

use std::path::PathBuf;

use bleprint::{AdapterOptions, TextEncoding};
use bleprint::options::{DEFAULT_CHUNK_SIZE, DEFAULT_DELAY, DEFAULT_RETRIES};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bleprint-cli")]
#[command(about = "Send print jobs to Bluetooth thermal printers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a receipt from the given parts and print it
    Print(PrintArgs),
}

#[derive(Debug, Args)]
pub struct PrintArgs {
    /// Peripheral id (address / platform id) or advertised name
    #[arg(long, env = "BLEPRINT_DEVICE")]
    pub device: String,

    /// Line of text; repeat for several lines
    #[arg(long = "text")]
    pub texts: Vec<String>,

    /// Content of a QR code printed after the text
    #[arg(long)]
    pub qr: Option<String>,

    /// Image file printed after the QR code
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Lines to feed at the end of the receipt
    #[arg(long, default_value_t = 3)]
    pub feed: u32,

    /// Cut the paper after feeding
    #[arg(long)]
    pub cut: bool,

    /// Text encoding: utf8, gbk or big5
    #[arg(long, env = "BLEPRINT_ENCODING", default_value = "utf8")]
    pub encoding: TextEncoding,

    /// Bytes per BLE write
    #[arg(long, env = "BLEPRINT_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Pause between chunks in milliseconds
    #[arg(long = "delay", env = "BLEPRINT_DELAY_MS", default_value_t = DEFAULT_DELAY.as_millis() as u64)]
    pub delay_ms: u64,

    /// Extra attempts after a chunk write fails (1 + retries in total)
    #[arg(long, env = "BLEPRINT_RETRIES", default_value_t = DEFAULT_RETRIES)]
    pub retries: u32,

    /// Record writes in memory instead of talking to a device
    #[arg(long, env = "BLEPRINT_DRY_RUN")]
    pub dry_run: bool,
}

impl PrintArgs {
    /// Transmission options, clamped to the supported ranges.
    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions::new()
            .with_chunk_size(self.chunk_size)
            .with_delay_ms(self.delay_ms)
            .with_retries(self.retries)
    }

    pub fn has_content(&self) -> bool {
        !self.texts.is_empty() || self.qr.is_some() || self.image.is_some()
    }
}
