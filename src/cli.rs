//! Command line definition.

use clap::Parser;
use std::path::PathBuf;

/// Connects a LabVIEW program to the command line.
#[derive(Parser, Debug)]
#[command(name = "lv-cli", version, about)]
pub struct Cli {
    /// Prints additional details for debugging
    #[arg(short, long)]
    pub verbose: bool,

    /// The version of LabVIEW to launch e.g. 2020
    #[arg(long = "lv-ver", value_name = "VERSION")]
    pub lv_version: Option<String>,

    /// Launch the 64 bit version of LabVIEW
    #[arg(long)]
    pub x64: bool,

    /// The time in ms to wait for the connection from LabVIEW [default: 60000]
    #[arg(long, alias = "timeout", value_name = "MS")]
    pub connect_timeout: Option<u64>,

    /// Force LabVIEW to exit after the exit code is received. Use
    /// kill-timeout to set a delay before this occurs
    #[arg(long)]
    pub kill: bool,

    /// The delay in ms before the process is killed when the kill flag is
    /// set [default: 10000]
    #[arg(long, value_name = "MS")]
    pub kill_timeout: Option<u64>,

    /// Allow LabVIEW to show user dialogs by removing the unattended flag.
    /// Generally not recommended
    #[arg(long, alias = "allowDialogs")]
    pub allow_dialogs: bool,

    /// Don't launch the VI or application automatically. You must start it
    /// manually
    #[arg(long)]
    pub no_launch: bool,

    /// VI or executable to run
    #[arg(value_name = "APP")]
    pub app: PathBuf,

    /// Arguments forwarded to the program, given after --
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}
