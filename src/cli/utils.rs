//! Utility functions for CLI operations.

use crate::channel::{ChannelEngine, Reply};
use crate::cli::args::GlobalOptions;
use crate::config::ServiceConfig;
use crate::Result;
use serde::Serialize;
use std::time::{Duration, UNIX_EPOCH};

/// Builds the configuration: file or environment, then command-line
/// overrides.
pub fn load_config(options: &GlobalOptions) -> Result<ServiceConfig> {
    let mut config = match &options.config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::from_env()?,
    };
    if let Some(data_dir) = &options.data_dir {
        config.data_dir = data_dir.clone();
    }
    Ok(config)
}

/// Opens the durable engine described by the options.
pub fn open_engine(options: &GlobalOptions) -> Result<ChannelEngine> {
    ChannelEngine::open(load_config(options)?)
}

/// Format a millisecond Unix timestamp as a human-readable string
pub fn format_timestamp(timestamp_ms: u64) -> String {
    let datetime = UNIX_EPOCH + Duration::from_millis(timestamp_ms);

    // Basic timestamp formatting for CLI display
    format!("{:?}", datetime)
}

/// Prints a command's outcome as a JSON reply.
pub fn print_json<T: Serialize>(result: Result<T>) -> Result<()> {
    println!("{}", Reply::from(result).to_json()?);
    Ok(())
}

/// Shortens text to `max` characters for one-line listings.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max.saturating_sub(1)).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_data_dir_override() {
        let options = GlobalOptions {
            data_dir: Some(PathBuf::from("/tmp/chansync-cli")),
            ..Default::default()
        };
        let config = load_config(&options).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/chansync-cli"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer line", 5), "a lo…");
    }
}
