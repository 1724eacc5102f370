//! uceforge - UCE cartridge container builder and editor.
//!
//! A container is a squashfs game image, a 64-byte digest header and a
//! 4 MiB ext4 save partition, concatenated:
//! - `build` packs a staged directory into a new container
//! - `extract-save` / `replace-save` / `edit-save` work on the save partition
//! - `inspect` verifies an existing container

mod commands;

use clap::{Parser, Subcommand};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

use uceforge::config::Config;
use uceforge::edit::EditStrategy;

#[derive(Parser)]
#[command(name = "uceforge")]
#[command(about = "UCE cartridge container builder and editor")]
#[command(after_help = "QUICK START:
  uceforge preflight                 Check host tools
  uceforge build staged/ game.uce    Build a container
  uceforge inspect game.uce          Verify a container
  uceforge edit-save game.uce        Edit its save partition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a container from a staged directory
    Build {
        /// Staged directory (must contain exec.sh)
        staged_dir: PathBuf,
        /// Output container path
        output: PathBuf,
        /// Run preflight checks first and stop if any fail
        #[arg(long)]
        preflight: bool,
        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a container's save partition to a file
    ExtractSave {
        container: PathBuf,
        /// Output image (default: save.img)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace a container's save partition with an image
    ReplaceSave {
        container: PathBuf,
        /// Replacement ext4 image (exactly 4194304 bytes)
        image: PathBuf,
        /// Copy the container to <container>.bak first
        #[arg(long)]
        backup: bool,
    },

    /// Edit a container's save partition
    EditSave {
        container: PathBuf,
        /// How to open the partition
        #[arg(long, value_enum, default_value_t = EditStrategy::Offline)]
        strategy: EditStrategy,
        /// Copy the container to <container>.bak first
        #[arg(long)]
        backup: bool,
        /// File manager to open (default: UCE_FILE_MANAGER or auto-detect)
        #[arg(long, conflicts_with = "apply")]
        file_manager: Option<String>,
        /// Copy this file into the partition instead of opening a file manager
        #[arg(long, requires = "to")]
        apply: Option<PathBuf>,
        /// Destination of --apply, relative to the partition root
        #[arg(long, requires = "apply")]
        to: Option<PathBuf>,
    },

    /// Verify a container's layout and digests
    Inspect {
        container: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (verify host tools before building)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the container layout
    Layout,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load();

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Build {
            staged_dir,
            output,
            preflight,
            json,
        } => commands::cmd_build(&staged_dir, &output, config, preflight, json),

        Commands::ExtractSave { container, output } => {
            commands::cmd_extract_save(&container, output)
        }

        Commands::ReplaceSave {
            container,
            image,
            backup,
        } => commands::cmd_replace_save(&container, &image, backup),

        Commands::EditSave {
            container,
            strategy,
            backup,
            file_manager,
            apply,
            to,
        } => {
            let request = match (apply, to) {
                (Some(source), Some(destination)) => commands::save::EditRequest::Apply {
                    source,
                    destination,
                },
                _ => commands::save::EditRequest::Interactive { file_manager },
            };
            commands::cmd_edit_save(&container, strategy, backup, request, config)
        }

        Commands::Inspect { container, json } => commands::cmd_inspect(&container, json),

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Layout => commands::show::ShowTarget::Layout,
            };
            commands::cmd_show(show_target, config)
        }

        Commands::Preflight { strict } => commands::cmd_preflight(config, strict),
    }
}
