//! Command-line front end for the map and catalog crates.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use otbm::IdConversion;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maptool", version, about = "Inspect and convert OTBM maps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a map's header without loading its tiles.
    Info {
        /// Path to the .otbm file.
        map: PathBuf,
    },
    /// Print an item catalog's version and entry count.
    Catalog {
        /// Path to the .otb file.
        catalog: PathBuf,
    },
    /// Rewrite a map's item ids between the server and client id spaces.
    Convert {
        /// Map to convert.
        input: PathBuf,
        /// Where to write the converted map.
        output: PathBuf,
        /// Item catalog that defines the id mapping.
        #[arg(long)]
        otb: PathBuf,
        /// Translate server ids to client ids.
        #[arg(long, conflicts_with = "to_server")]
        to_client: bool,
        /// Translate client ids to server ids.
        #[arg(long)]
        to_server: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Info { map } => {
            let header = otbm::read_header(&map).map_err(|e| e.to_string())?;
            println!("revision:    {}", header.otbm_version);
            println!("size:        {}x{}", header.width, header.height);
            println!("catalog:     {}.{}", header.otb_major, header.otb_minor);
            if !header.description.is_empty() {
                println!("description: {}", header.description);
            }
            if !header.spawn_file.is_empty() {
                println!("spawn file:  {}", header.spawn_file);
            }
            if !header.house_file.is_empty() {
                println!("house file:  {}", header.house_file);
            }
            Ok(())
        }
        Command::Catalog { catalog } => {
            let catalog = otb::read_catalog(&catalog).map_err(|e| e.to_string())?;
            let version = catalog.version;
            println!(
                "version: {}.{} (build {})",
                version.major, version.minor, version.build
            );
            println!("items:   {}", catalog.len());
            Ok(())
        }
        Command::Convert {
            input,
            output,
            otb,
            to_client,
            to_server,
        } => {
            let conversion = match (to_client, to_server) {
                (true, false) => IdConversion::ToClient,
                (false, true) => IdConversion::ToServer,
                _ => return Err("pass exactly one of --to-client or --to-server".into()),
            };
            let catalog = otb::read_catalog(&otb).map_err(|e| e.to_string())?;

            let mut log_progress = |percent: u8, phase: &str| {
                tracing::info!(percent, phase, "converting");
            };
            let summary = otbm::convert(&input, &output, conversion, &catalog, Some(&mut log_progress))
                .map_err(|e| e.to_string())?;
            println!("converted: {}", summary.converted);
            println!("skipped:   {}", summary.skipped);
            Ok(())
        }
    }
}
