use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use env_logger::Env;
use gp2040ce_core::StorageRegion;
use log::*;

use std::io::Write;

use crate::{
    concatenate::{ConfigFiles, Output, concatenate},
    dump::{dump_config, dump_gp2040ce},
    edit::edit_config,
    source::Source,
    summarize::summarize,
    visualize::visualize,
};

mod concatenate;
mod device;
mod dump;
mod edit;
mod files;
mod reporter;
mod source;
mod summarize;
mod visualize;

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputArgs {
    /// Read from a RP2040 board connected over USB and in BOOTSEL mode
    #[clap(long)]
    usb: bool,

    /// .bin or .uf2 file to read
    #[clap(long)]
    filename: Option<PathBuf>,
}

impl InputArgs {
    fn source(&self) -> Result<Source<'_>, Box<dyn std::error::Error>> {
        Source::new(self.usb, self.filename.as_deref())
    }
}

#[derive(Parser, Debug)]
enum Command {
    /// Combine a firmware binary with board and/or user config sections into one image
    #[command(arg_required_else_help = true)]
    Concatenate {
        /// .bin file of a GP2040-CE firmware, probably from a build
        firmware: PathBuf,

        /// .bin file of a GP2040-CE board config with footer
        #[clap(long, conflicts_with = "json_board_config_filename")]
        binary_board_config_filename: Option<PathBuf>,

        /// .json file of a GP2040-CE board config
        #[clap(long)]
        json_board_config_filename: Option<PathBuf>,

        /// .bin file of a GP2040-CE user config with footer
        #[clap(long, conflicts_with = "json_user_config_filename")]
        binary_user_config_filename: Option<PathBuf>,

        /// .json file of a GP2040-CE user config
        #[clap(long)]
        json_user_config_filename: Option<PathBuf>,

        /// Cut off firmware that runs into the storage regions (e.g. a whole board dump)
        #[clap(long)]
        replace_extra: bool,

        /// Move an existing output file to <name>.old first
        #[clap(long, requires = "new_filename")]
        backup: bool,

        /// Write the resulting image to a board over USB
        #[clap(long, required_unless_present = "new_filename", conflicts_with = "new_filename")]
        usb: bool,

        /// Output .bin or .uf2 file of the resulting image
        #[clap(long)]
        new_filename: Option<PathBuf>,
    },
    /// Read the GP2040-CE firmware + storage section off a board in BOOTSEL mode
    #[command(arg_required_else_help = true)]
    DumpGp2040ce {
        /// Output .bin or .uf2 file
        output: PathBuf,
    },
    /// Print the firmware version and config versions of a board or image
    #[command(arg_required_else_help = true)]
    SummarizeGp2040ce {
        #[clap(flatten)]
        input: InputArgs,
    },
    /// Print the contents of a config section
    #[command(arg_required_else_help = true)]
    VisualizeConfig {
        /// The file is a whole board image rather than a config section
        #[clap(long)]
        whole_board: bool,

        /// Print the config as JSON
        #[clap(long)]
        json: bool,

        /// Use the board config rather than the user config
        #[clap(long)]
        board_config: bool,

        #[clap(flatten)]
        input: InputArgs,
    },
    /// Save a config section from a board in BOOTSEL mode
    #[command(arg_required_else_help = true)]
    DumpConfig {
        /// Dump the board config rather than the user config
        #[clap(long)]
        board_config: bool,

        /// Output file; .uf2 is padded to the whole storage region, anything else is the raw section
        output: PathBuf,
    },
    /// Set the board version of a config and write it back
    #[command(arg_required_else_help = true)]
    EditConfig {
        /// The file is a whole board image rather than a config section
        #[clap(long)]
        whole_board: bool,

        /// Edit the board config rather than the user config
        #[clap(long)]
        board_config: bool,

        /// New board version
        #[clap(long)]
        board_version: String,

        #[clap(flatten)]
        input: InputArgs,
    },
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Set the logging verbosity
    #[clap(short, long, value_enum, global = true, default_value_t = LogLevel::Info)]
    verbose: LogLevel,

    /// Enable debug logging, same as --verbose debug
    #[clap(short, long, global = true)]
    debug: bool,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

fn region(board_config: bool) -> StorageRegion {
    if board_config {
        StorageRegion::Board
    } else {
        StorageRegion::User
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.debug {
        LevelFilter::Debug.max(cli.verbose.into())
    } else {
        cli.verbose.into()
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let level = record.level();
            if level == Level::Info {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "{}: {}", record.level(), record.args())
            }
        })
        .init();

    let command = match cli.command {
        Some(command) => command,
        None => return Ok(()),
    };

    match command {
        Command::Concatenate {
            firmware,
            binary_board_config_filename,
            json_board_config_filename,
            binary_user_config_filename,
            json_user_config_filename,
            replace_extra,
            backup,
            usb,
            new_filename,
        } => {
            let configs = ConfigFiles {
                binary_board: binary_board_config_filename.as_deref(),
                json_board: json_board_config_filename.as_deref(),
                binary_user: binary_user_config_filename.as_deref(),
                json_user: json_user_config_filename.as_deref(),
            };
            let output = match (usb, new_filename.as_deref()) {
                (false, Some(path)) => Output::File { path, backup },
                _ => Output::Usb,
            };

            concatenate(&firmware, configs, replace_extra, output)
        }
        Command::DumpGp2040ce { output } => dump_gp2040ce(&output),
        Command::SummarizeGp2040ce { input } => summarize(input.source()?),
        Command::VisualizeConfig {
            whole_board,
            json,
            board_config,
            input,
        } => visualize(input.source()?, whole_board, region(board_config), json),
        Command::DumpConfig {
            board_config,
            output,
        } => dump_config(region(board_config), &output),
        Command::EditConfig {
            whole_board,
            board_config,
            board_version,
            input,
        } => edit_config(
            input.source()?,
            whole_board,
            region(board_config),
            &board_version,
        ),
    }
}
