pub mod channel;
pub mod cli;
pub mod config;
pub mod install;
pub mod process_scan;
pub mod registration;
pub mod supervisor;
