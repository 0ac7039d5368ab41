//! Tracing setup: rotated log file in the data directory, flushed per line.

use std::fs::{self, File};
use std::io::LineWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

const LOG_FILE: &str = "assistant.log";
const KEEP_ROTATED: u32 = 3;
const DEFAULT_FILTER: &str = "ie_assistant=info,warn";

/// Platform data directory for the assistant (`$XDG_DATA_HOME/ie-assistant`
/// on Linux), falling back to `~/.ie-assistant`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("ie-assistant");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ie-assistant")
}

/// Install the global subscriber writing to `<log_dir>/assistant.log`.
///
/// Previous logs are rotated (`assistant.log.1` .. `.3`). `RUST_LOG`
/// overrides the configured filter. Returns the log file path.
pub fn init_tracing(log_dir: &Path, config: &LoggingConfig) -> std::io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);
    rotate(&log_path, KEEP_ROTATED);

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let writer = line_flushed(log_file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.filter.as_deref().unwrap_or(DEFAULT_FILTER))
    });

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| std::io::Error::other(format!("tracing already initialized: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== IE Assistant starting ==="
    );
    Ok(log_path)
}

/// `assistant.log` with generation `n` appended: `assistant.log.<n>`.
fn rotated(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Age every log generation by one. The live file becomes `.1`; whatever sat
/// in `.keep` is overwritten.
fn rotate(path: &Path, keep: u32) {
    let generations: Vec<PathBuf> = std::iter::once(path.to_path_buf())
        .chain((1..=keep).map(|n| rotated(path, n)))
        .collect();
    for pair in generations.windows(2).rev() {
        let (from, to) = (&pair[0], &pair[1]);
        if from.exists() {
            let _ = fs::remove_file(to);
            let _ = fs::rename(from, to);
        }
    }
}

/// Log sink that pushes each completed line to disk.
fn line_flushed(file: File) -> Mutex<LineWriter<File>> {
    Mutex::new(LineWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn rotation_keeps_three_generations() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(LOG_FILE);
        for generation in 0..5 {
            fs::write(&base, format!("gen {generation}")).unwrap();
            rotate(&base, KEEP_ROTATED);
        }
        assert!(!base.exists());
        let read = |n: u32| fs::read_to_string(rotated(&base, n)).unwrap();
        assert_eq!(read(1), "gen 4");
        assert_eq!(read(2), "gen 3");
        assert_eq!(read(3), "gen 2");
        assert!(!rotated(&base, 4).exists());
    }

    #[test]
    fn rotation_without_a_live_log_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(LOG_FILE);
        fs::write(rotated(&base, 1), "old").unwrap();
        rotate(&base, KEEP_ROTATED);
        assert_eq!(fs::read_to_string(rotated(&base, 1)).unwrap(), "old");
        assert!(!rotated(&base, 2).exists());
    }

    #[test]
    fn rotated_names_append_the_generation() {
        assert_eq!(
            rotated(Path::new("/tmp/logs/assistant.log"), 2),
            PathBuf::from("/tmp/logs/assistant.log.2")
        );
    }

    #[test]
    fn completed_lines_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.log");
        let sink = line_flushed(File::create(&path).unwrap());
        sink.make_writer().write_all(b"line one\npartial").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "line one\n");
    }
}
