mod cli;
mod commands;
mod error;
mod firmware;
mod frame;
mod logger;
mod scsi;
mod session;
mod tape;

use crate::cli::{Cli, Commands};
use crate::error::Result;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse_args();

    // Initialize logging system
    logger::init(args.verbose)?;

    debug!("RustOnStream CLI starting");

    match run(args).await {
        Ok(_) => {
            info!("Operation completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    match args.command {
        Commands::Read {
            device,
            output,
            start,
            end,
            raw,
            retension,
        } => commands::read::execute(device, output, start, end, raw, retension).await,

        Commands::Write {
            device,
            input,
            force,
            eject,
            retension,
        } => commands::write::execute(device, input, force, eject, retension).await,

        Commands::Info { device } => commands::info::execute(device).await,
    }
}
