/// Plain-text file sink for log lines
///
/// The file is opened lazily on first write and kept open; the path comes from
/// the logger configuration so it can change at runtime.
use super::config::get_logger_config;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

static FILE_SINK: Lazy<Mutex<Option<FileSink>>> = Lazy::new(|| Mutex::new(None));

/// Open the configured log file (if any)
pub fn init_file_logging() {
    let Some(path) = get_logger_config().file_path else {
        return;
    };
    let mut sink = FILE_SINK.lock();
    *sink = open_sink(path);
}

fn open_sink(path: PathBuf) -> Option<FileSink> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(FileSink {
            path,
            writer: BufWriter::new(file),
        }),
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "Logger: cannot open {}: {}", path.display(), e);
            None
        }
    }
}

/// Append one line to the log file when file logging is configured
pub fn write_to_file(line: &str) {
    let Some(path) = get_logger_config().file_path else {
        return;
    };

    let mut sink = FILE_SINK.lock();
    let reopen = sink.as_ref().map(|s| s.path != path).unwrap_or(true);
    if reopen {
        *sink = open_sink(path);
    }

    if let Some(sink) = sink.as_mut() {
        let _ = writeln!(sink.writer, "{}", line);
    }
}

/// Flush pending writes to disk
pub fn flush_file_logging() {
    if let Some(sink) = FILE_SINK.lock().as_mut() {
        let _ = sink.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::config::update_logger_config;

    #[test]
    fn test_lines_are_appended_to_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("fabric.log");

        update_logger_config(|c| c.file_path = Some(path.clone()));
        write_to_file("first line");
        write_to_file("second line");
        flush_file_logging();
        update_logger_config(|c| c.file_path = None);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("first line"));
        assert!(content.contains("second line"));
    }
}
