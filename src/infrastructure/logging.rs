//! Tracing setup and log file helpers

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use super::config::LoggingConfig;

/// `RUST_LOG` wins over the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: stdout always, plus the configured file.
///
/// Returns the file open error, if any; stdout logging is installed regardless.
pub fn init(config: &LoggingConfig) -> io::Result<()> {
    let file = match &config.file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)),
        None => None,
    };

    let (file_layer, file_error) = match file {
        Some(Ok(file)) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();

    match file_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Last `lines` lines of a text file
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut window = VecDeque::with_capacity(lines + 1);
    for line in reader.lines() {
        window.push_back(line?);
        if window.len() > lines {
            window.pop_front();
        }
    }
    Ok(window.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tail_keeps_last_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 1..=20 {
            writeln!(file, "line {}", i).unwrap();
        }
        let tail = tail(file.path(), 3).unwrap();
        assert_eq!(tail, vec!["line 18", "line 19", "line 20"]);
    }

    #[test]
    fn tail_of_short_file_is_whole_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "only").unwrap();
        assert_eq!(tail(file.path(), 15).unwrap(), vec!["only"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(tail(Path::new("/definitely/not/here.log"), 5).is_err());
    }
}
