//! Command handlers for the CLI subcommands.

pub mod info;
pub mod read;
pub mod write;

use crate::session::CancelToken;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::warn;

/// Trip the session's cancellation flag on ctrl-c. The session finishes
/// the frame in flight before tearing down, so a second interrupt while
/// that happens is deliberately ignored.
pub(crate) fn spawn_cancel_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current frame before stopping");
            cancel.cancel();
        }
    });
}

/// Spinner shown while a blocking tape session runs. Tape sessions have no
/// usable length estimate up front (the input may be a pipe), so this is a
/// steady tick rather than a bar.
pub(crate) fn session_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
