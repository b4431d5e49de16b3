//! Write command handler.
//!
//! Drives a write session from a file or standard input onto the tape.

use crate::error::{Result, RustOnStreamError};
use crate::scsi::{OnStreamDrive, SgDevice};
use crate::session::{CancelToken, SessionOptions, WriteSession, WriteSummary};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::info;

pub async fn execute(
    device: String,
    input: Option<PathBuf>,
    force: bool,
    eject: bool,
    retension: bool,
) -> Result<()> {
    info!("Starting write operation: {:?} -> {}", input, device);

    let cancel = CancelToken::new();
    super::spawn_cancel_handler(cancel.clone());

    let opts = SessionOptions {
        format_if_unrecognized: force,
        eject_at_end: eject,
        retension,
        ..SessionOptions::default()
    };

    let spinner = super::session_spinner(format!("Writing to {}", device));

    let summary = tokio::task::spawn_blocking(move || -> Result<WriteSummary> {
        let transport = SgDevice::open(&device)?;
        let mut session = WriteSession::new(OnStreamDrive::new(transport), opts, cancel);
        match input {
            Some(path) => session.run(&mut BufReader::new(File::open(&path)?)),
            None => session.run(&mut io::stdin().lock()),
        }
    })
    .await
    .map_err(|e| RustOnStreamError::tape_device(format!("write session task failed: {}", e)))??;

    spinner.finish_and_clear();
    info!(
        "Wrote {} frames ({} bytes) in {:.1} seconds",
        summary.frames,
        summary.bytes,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}
