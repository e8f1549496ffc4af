use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
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
        }
    }
}

/// Checks an appcast for a newer version and downloads it.
#[derive(Debug, Parser)]
#[command(name = "updatectl", version)]
pub struct Opt {
    /// Appcast URL
    pub url: String,

    /// Version of the installed module
    #[arg(long, default_value = "0.0.0")]
    pub module_version: String,

    /// Name shown in prompts
    #[arg(long, default_value = "updatectl")]
    pub module_name: String,

    /// Appcast platform entry (windows|osx|linux|android|ios); defaults to the host
    #[arg(long)]
    pub platform: Option<String>,

    /// Where downloads are saved; defaults to the user's downloads directory
    #[arg(long, env = "UPDATECTL_DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,

    #[arg(long)]
    pub user_agent: Option<String>,

    /// Stall timeout in seconds (0 disables it)
    #[arg(long, default_value_t = 30)]
    pub timeout_seconds: u64,

    /// Open the package URL in the browser instead of downloading it
    #[arg(long)]
    pub no_download: bool,

    /// Print the raw appcast instead of interpreting it
    #[arg(long)]
    pub custom_appcast: bool,

    /// Treat the update as mandatory unless the appcast says otherwise
    #[arg(long)]
    pub mandatory: bool,

    /// Stop after the download instead of offering to open the package
    #[arg(long)]
    pub no_install: bool,

    /// Answer every question with yes
    #[arg(short, long)]
    pub yes: bool,

    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,
}
