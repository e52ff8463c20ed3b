//! # simfsctl
//!
//! `simfsctl` is the cli utility for `simfs` images. It formats images, manages the files inside
//! them and prints their state.
//!
//! ## Usage
//!
//! ```text
//! Usage: simfsctl [OPTIONS] <COMMAND>
//!
//! Commands:
//!   init    Create a fresh, empty image
//!   print   Print the file table and the block map
//!   check   Verify that the image is readable and consistent
//!   create  Create an empty file
//!   delete  Delete a file and free its blocks
//!   write   Write bytes from stdin into a file
//!   read    Write bytes of a file to stdout
//!   help    Print this message or the help of the given subcommand(s)
//! ```
//!
//! The geometry options have to match the values the image was created with.
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use simfs::{FileStorage, Geometry, Image};
use std::{
    io::{Read, Write},
    path::PathBuf,
};

/// Simfs cli utility
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    image: ImageArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Location and geometry of the image
#[derive(Args, Debug)]
struct ImageArgs {
    /// Image file to operate on
    #[arg(short, long, env = "SIMFS_IMAGE", default_value = "simfs.img", global = true)]
    image: PathBuf,

    /// Number of slots in the file table
    #[arg(long, env = "SIMFS_MAX_FILES", default_value_t = Geometry::default().max_files(), global = true)]
    max_files: u32,

    /// Number of blocks, including the ones covered by metadata
    #[arg(long, env = "SIMFS_MAX_BLOCKS", default_value_t = Geometry::default().max_blocks(), global = true)]
    max_blocks: u32,

    /// Size of a block in bytes
    #[arg(long, env = "SIMFS_BLOCK_SIZE", default_value_t = Geometry::default().block_size(), global = true)]
    block_size: u32,
}

impl ImageArgs {
    fn geometry(&self) -> anyhow::Result<Geometry> {
        Geometry::new(self.max_files, self.max_blocks, self.block_size)
            .context("Invalid image geometry")
    }

    fn open(&self) -> anyhow::Result<Image<FileStorage>> {
        log::debug!("Opening {}", self.image.display());
        Image::new(FileStorage::new(&self.image), self.geometry()?)
            .with_context(|| format!("Failed to open {}", self.image.display()))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a fresh, empty image
    Init {
        /// Replace an existing image
        #[arg(short, long, default_value = "false")]
        force: bool,
    },
    /// Print the file table and the block map
    Print,
    /// Verify that the image is readable and consistent
    Check,
    /// Create an empty file
    Create {
        /// Name of the new file
        name: String,
    },
    /// Delete a file and free its blocks
    Delete {
        /// Name of the file
        name: String,
    },
    /// Write bytes from stdin into a file
    Write {
        /// Name of the file
        name: String,
        /// Offset in the file where writing starts
        start: u32,
        /// Number of bytes to read from stdin
        length: u32,
    },
    /// Write bytes of a file to stdout
    Read {
        /// Name of the file
        name: String,
        /// Offset in the file where reading starts
        start: u32,
        /// Number of bytes to read
        length: u32,
    },
}

fn run(cli: Cli, input: impl Read, mut output: impl Write) -> anyhow::Result<()> {
    let image_path = cli.image.image.display().to_string();
    match cli.command {
        Commands::Init { force } => {
            if cli.image.image.exists() {
                if !force {
                    bail!("{} already exists, use --force to replace it", image_path);
                }
                log::warn!("Replacing the existing image {}", image_path);
            }
            let geometry = cli.image.geometry()?;
            Image::format(FileStorage::new(&cli.image.image), geometry)
                .with_context(|| format!("Failed to create {}", image_path))?;
        }
        Commands::Print => {
            let volume = cli
                .image
                .open()?
                .inspect()
                .with_context(|| format!("Failed to load {}", image_path))?;
            writeln!(output, "{}", volume)?;
        }
        Commands::Check => {
            cli.image
                .open()?
                .check()
                .with_context(|| format!("{} is not a valid image", image_path))?;
            writeln!(output, "{} is consistent", image_path)?;
        }
        Commands::Create { name } => {
            cli.image
                .open()?
                .create_file(&name)
                .with_context(|| format!("Failed to create {}", name))?;
        }
        Commands::Delete { name } => {
            cli.image
                .open()?
                .delete_file(&name)
                .with_context(|| format!("Failed to delete {}", name))?;
        }
        Commands::Write {
            name,
            start,
            length,
        } => {
            cli.image
                .open()?
                .write_file(&name, start, length, input)
                .with_context(|| format!("Failed to write to {}", name))?;
        }
        Commands::Read {
            name,
            start,
            length,
        } => {
            cli.image
                .open()?
                .read_file(&name, start, length, &mut output)
                .with_context(|| format!("Failed to read from {}", name))?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let cli = Cli::parse();
    run(cli, std::io::stdin().lock(), std::io::stdout().lock())
}
