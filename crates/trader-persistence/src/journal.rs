//! Append-only JSON Lines journal.
//!
//! Each line is one complete JSON event, so an interrupted write corrupts
//! at most the final line; `load` skips anything unparseable and keeps the
//! rest.

use crate::error::PersistenceResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append-only event journal over a single `.jsonl` file.
pub struct JsonlJournal {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and flush. Trades are rare; durability wins.
    pub fn append<T: Serialize>(&mut self, event: &T) -> PersistenceResult<()> {
        let line = serde_json::to_string(event)?;
        let writer = self.open_writer()?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    /// Replay every parseable event in file order.
    pub fn load<T: DeserializeOwned>(&self) -> PersistenceResult<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut events = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // A torn tail line is expected after a crash; anything
                    // else is worth the operator's attention.
                    warn!(path = %self.path.display(), line = line_no + 1, error = %e, "skipping unparseable journal line");
                }
            }
        }
        debug!(path = %self.path.display(), events = events.len(), "journal loaded");
        Ok(events)
    }

    fn open_writer(&mut self) -> PersistenceResult<&mut BufWriter<File>> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        Ok(self.writer.as_mut().expect("writer just set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Event {
        n: u32,
        tag: String,
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("trader-journal-{name}-{}.jsonl", std::process::id()))
    }

    #[test]
    fn test_append_then_load_round_trip() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        let mut journal = JsonlJournal::new(&path);
        journal.append(&Event { n: 1, tag: "a".into() }).unwrap();
        journal.append(&Event { n: 2, tag: "b".into() }).unwrap();

        let events: Vec<Event> = JsonlJournal::new(&path).load().unwrap();
        assert_eq!(
            events,
            vec![
                Event { n: 1, tag: "a".into() },
                Event { n: 2, tag: "b".into() }
            ]
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let journal = JsonlJournal::new(temp_path("missing-never-created"));
        let events: Vec<Event> = journal.load().unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let path = temp_path("torn");
        let _ = std::fs::remove_file(&path);

        let mut journal = JsonlJournal::new(&path);
        journal.append(&Event { n: 1, tag: "ok".into() }).unwrap();
        // Simulate a crash mid-write.
        {
            use std::io::Write as _;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            write!(file, "{{\"n\":2,\"tag\":\"tor").unwrap();
        }

        let events: Vec<Event> = JsonlJournal::new(&path).load().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].n, 1);
        let _ = std::fs::remove_file(&path);
    }
}
