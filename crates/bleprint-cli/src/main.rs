//! Command-line front end for the `bleprint` client.
//!
//! Builds a receipt from the arguments, sends it to the printer and logs
//! progress. Ctrl+C cancels the job at the next chunk boundary.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bleprint::{Adapter, DryRunAdapter, JobOutcome, Printer, QrOptions};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod config;

use config::{Cli, Command, PrintArgs};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    load_dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Print(args) => run_print(args).await,
    }
}

/// Load .env from the working directory or its parents.
fn load_dotenv() {
    for path in [".env", "../.env"] {
        if dotenvy::from_filename(path).is_ok() {
            tracing::info!("Loaded .env from: {path}");
            return;
        }
    }
}

async fn open_adapter(dry_run: bool) -> Result<Arc<dyn Adapter>> {
    if dry_run {
        tracing::info!("Dry run: writes are recorded, not sent");
        return Ok(Arc::new(DryRunAdapter::new()));
    }
    let adapter = bleprint::BleAdapter::new()
        .await
        .context("Failed to initialise Bluetooth")?;
    Ok(Arc::new(adapter))
}

async fn run_print(args: PrintArgs) -> Result<()> {
    if !args.has_content() {
        bail!("Nothing to print: pass --text, --qr or --image");
    }

    let adapter = open_adapter(args.dry_run).await?;
    let printer = Printer::new(adapter);
    printer
        .set_options(args.adapter_options())
        .set_encoding(args.encoding);

    let progress = spawn_progress_logger(&printer);

    printer.connect(&args.device).await?;
    let outcome = compose_and_print(&printer, &args).await;
    progress.abort();

    if let Err(e) = printer.disconnect().await {
        tracing::warn!("Disconnect failed: {e}");
    }

    match outcome? {
        JobOutcome::Completed => tracing::info!("Print complete"),
        other => bail!("Print did not complete: {other:?}"),
    }
    Ok(())
}

async fn compose_and_print(printer: &Printer, args: &PrintArgs) -> Result<JobOutcome> {
    printer.init()?;
    for line in &args.texts {
        printer.text(line)?;
    }
    if let Some(content) = &args.qr {
        printer.qr(content, &QrOptions::default())?;
    }
    if let Some(path) = &args.image {
        let img = image::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        printer.image(img.as_raw(), width, height)?;
    }
    printer.feed(args.feed)?;
    if args.cut {
        printer.cut()?;
    }

    let print = printer.print();
    tokio::pin!(print);
    tokio::select! {
        res = &mut print => return Ok(res?),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling print job");
            printer.cancel();
        }
    }
    Ok(print.await?)
}

fn spawn_progress_logger(printer: &Printer) -> tokio::task::JoinHandle<()> {
    let mut progress = printer.events().subscribe_progress();
    let mut errors = printer.events().subscribe_error();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = progress.recv() => match msg {
                    Ok(p) => tracing::info!(sent = p.sent, total = p.total, "Progress"),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                msg = errors.recv() => match msg {
                    Ok(e) => tracing::error!("Printer error: {e}"),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
