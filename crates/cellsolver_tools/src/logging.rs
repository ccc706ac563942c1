use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Maximum log file size before rotation (5 MB)
const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;
/// Size to keep after rotation (1 MB of most recent logs)
const KEEP_SIZE: u64 = 1024 * 1024;

const ROTATION_MARKER: &[u8] = b"--- Log rotated (older entries removed) ---\n";

/// Rotate log file if it exceeds the maximum size.
/// Keeps only the most recent KEEP_SIZE bytes.
fn rotate_log_if_needed(log_path: &Path) -> std::io::Result<()> {
    if !log_path.exists() {
        return Ok(());
    }

    let metadata = fs::metadata(log_path)?;
    if metadata.len() <= MAX_LOG_SIZE {
        return Ok(());
    }

    let mut file = File::open(log_path)?;
    let start_pos = metadata.len().saturating_sub(KEEP_SIZE);
    file.seek(SeekFrom::Start(start_pos))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    drop(file);

    // Skip to the first newline to avoid partial lines
    let skip = buffer
        .iter()
        .position(|&b| b == b'\n')
        .map_or(0, |i| i + 1);

    let mut file = File::create(log_path)?;
    file.write_all(ROTATION_MARKER)?;
    file.write_all(&buffer[skip..])?;
    Ok(())
}

/// Hands out writers to one shared log file.
#[derive(Clone)]
struct LogWriterFactory {
    file: Arc<Mutex<File>>,
}

struct LogWriter {
    file: Arc<Mutex<File>>,
}

impl LogWriter {
    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file: Arc::clone(&self.file),
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let default_filter = format!("cellsolver_tools={level},cellsolver_core={level}");
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Initialize logging.
///
/// With a `log_file`, logs are appended there with size-based rotation:
/// once the file exceeds 5MB, only its last 1MB is kept. Otherwise logs go
/// to stderr so stdout stays free for command output. `RUST_LOG` overrides
/// `level`.
pub fn init_logging(log_file: Option<&Path>, level: &str) -> color_eyre::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(level));

    match log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            if let Err(e) = rotate_log_if_needed(log_path) {
                eprintln!("Warning: Failed to rotate log file: {e}");
            }
            let file = OpenOptions::new().create(true).append(true).open(log_path)?;
            let writer_factory = LogWriterFactory {
                file: Arc::new(Mutex::new(file)),
            };
            registry
                .with(
                    fmt::layer()
                        .with_writer(writer_factory)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(false),
                )
                .init();
            tracing::info!(log_path = %log_path.display(), "logging initialized");
        }
        None => {
            registry
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_log_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellsolver.log");
        fs::write(&path, "line\n").unwrap();
        rotate_log_if_needed(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "line\n");

        rotate_log_if_needed(&dir.path().join("absent.log")).unwrap();
    }

    #[test]
    fn test_large_log_keeps_recent_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellsolver.log");
        let line = "x".repeat(99) + "\n";
        let content = line.repeat((MAX_LOG_SIZE as usize / line.len()) + 10);
        fs::write(&path, &content).unwrap();

        rotate_log_if_needed(&path).unwrap();
        let rotated = fs::read(&path).unwrap();
        assert!(rotated.starts_with(ROTATION_MARKER));
        let kept = &rotated[ROTATION_MARKER.len()..];
        assert!(kept.len() as u64 <= KEEP_SIZE);
        assert!(kept.split(|&b| b == b'\n').all(|l| l.is_empty() || l.len() == 99));
    }
}
