use std::path::PathBuf;

use clap::{Arg, Command};

/// Parsed command line for every role binary (spec §6 CLI surface):
/// `-c <config-file>` (required), `-d <level>` (log level, default `info`).
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub log_level: String,
}

/// Builds the shared `-c`/`-d` surface on top of a role-specific `Command`
/// (name/about set by the caller), mirroring the builder-style `clap` usage
/// in `services/streamer/src/main.rs`.
pub fn parse(command: Command) -> CliArgs {
    let matches = command
        .arg(
            Arg::new("config")
                .help("Path to the INI configuration file")
                .short('c')
                .long("config")
                .value_name("config_file")
                .required(true),
        )
        .arg(
            Arg::new("log_level")
                .help("Log level (error, warn, info, debug, trace)")
                .short('d')
                .long("log-level")
                .value_name("level")
                .default_value("info"),
        )
        .get_matches();

    CliArgs {
        config_path: PathBuf::from(matches.get_one::<String>("config").expect("required")),
        log_level: matches.get_one::<String>("log_level").expect("has default").clone(),
    }
}
