use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rustonstream")]
#[command(about = "A Rust CLI tool for OnStream ADR tape direct read/write operations")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read tape content to a file or standard output
    Read {
        /// Tape device path (e.g. /dev/sg1)
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Local destination file (standard output if not provided)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Start reading from this frame instead of the recorded data start
        #[arg(short, long, value_name = "FRAME")]
        start: Option<u32>,

        /// Stop reading upon reaching this frame (the frame itself is not read)
        #[arg(short, long, value_name = "FRAME")]
        end: Option<u32>,

        /// Pass frames with unrecognized metadata through unfiltered
        #[arg(long)]
        raw: bool,

        /// Apply equal tension throughout the tape before reading
        #[arg(short = 't', long)]
        retension: bool,
    },

    /// Write a file or standard input to tape
    Write {
        /// Tape device path (e.g. /dev/sg1)
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Source file (standard input if not provided)
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Format an unrecognized or blank tape instead of refusing
        #[arg(short, long)]
        force: bool,

        /// Eject the tape when the session completes
        #[arg(short, long)]
        eject: bool,

        /// Apply equal tension throughout the tape before writing
        #[arg(short = 't', long)]
        retension: bool,
    },

    /// Show drive and tape information
    Info {
        /// Tape device path (e.g. /dev/sg1)
        #[arg(value_name = "DEVICE")]
        device: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
