//! Persistent device identifiers. Ids are handed out in the order they were
//! stored, so a device keeps its topics across restarts.
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub trait DeviceIdStore {
    /// Next stored id, or a freshly generated and persisted one.
    fn allocate_id(&mut self) -> anyhow::Result<String>;

    fn persist(&mut self, id: &str) -> anyhow::Result<()>;
}

/// Ids kept one per line in a plain text file.
pub struct FileIdStore {
    path: PathBuf,
    stored: VecDeque<String>,
}

impl FileIdStore {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut stored = VecDeque::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                let id = line.trim();
                if !id.is_empty() {
                    stored.push_back(id.to_string());
                }
            }
        }
        debug!("Loaded {} device ids from {}", stored.len(), path.display());
        Ok(Self { path, stored })
    }
}

pub fn generate_id() -> String {
    format!("0x{:016x}", rand::random::<u64>())
}

impl DeviceIdStore for FileIdStore {
    fn allocate_id(&mut self) -> anyhow::Result<String> {
        if let Some(id) = self.stored.pop_front() {
            return Ok(id);
        }
        let id = generate_id();
        self.persist(&id)?;
        info!("Generated new device id {}", id);
        Ok(id)
    }

    fn persist(&mut self, id: &str) -> anyhow::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", id)?;
        Ok(())
    }
}
