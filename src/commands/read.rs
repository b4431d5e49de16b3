//! Read command handler.
//!
//! Drives a read session from the tape to a file or standard output.

use crate::error::{Result, RustOnStreamError};
use crate::scsi::{OnStreamDrive, SgDevice};
use crate::session::{CancelToken, ReadSession, ReadSummary, SessionOptions};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

pub async fn execute(
    device: String,
    output: Option<PathBuf>,
    start: Option<u32>,
    end: Option<u32>,
    raw: bool,
    retension: bool,
) -> Result<()> {
    info!("Starting read operation: {} -> {:?}", device, output);

    let cancel = CancelToken::new();
    super::spawn_cancel_handler(cancel.clone());

    let opts = SessionOptions {
        raw_passthrough: raw,
        start_frame: start,
        stop_frame: end,
        retension,
        ..SessionOptions::default()
    };

    let spinner = super::session_spinner(format!("Reading from {}", device));

    let summary = tokio::task::spawn_blocking(move || -> Result<ReadSummary> {
        let transport = SgDevice::open(&device)?;
        let mut session = ReadSession::new(OnStreamDrive::new(transport), opts, cancel);
        match output {
            Some(path) => {
                let mut sink = BufWriter::new(File::create(&path)?);
                let summary = session.run(&mut sink)?;
                sink.flush()?;
                Ok(summary)
            }
            None => session.run(&mut io::stdout().lock()),
        }
    })
    .await
    .map_err(|e| RustOnStreamError::tape_device(format!("read session task failed: {}", e)))??;

    spinner.finish_and_clear();
    info!(
        "Read {} frames ({} bytes) in {:.1} seconds",
        summary.frames,
        summary.bytes,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}
