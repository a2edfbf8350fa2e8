//! Configuration: command line and TOML file

mod args;
mod file;

pub use args::{Args, Command, Overrides};
pub use file::RingtimeConfig;
