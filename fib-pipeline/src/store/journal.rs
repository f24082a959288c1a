//! File-backed durable log.
//!
//! Each submission is one JSON object per line (`{"number":10}`), appended
//! and synced to disk before the append is acknowledged. On open the file is
//! replayed into memory so reads never touch the disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{info, warn};

use super::DurableLog;
use crate::model::SubmissionRecord;

/// File name of the journal inside the data directory.
pub const JOURNAL_FILE: &str = "values.jsonl";

pub struct JournalLog {
    path: PathBuf,
    inner: Mutex<JournalState>,
}

struct JournalState {
    file: File,
    records: Vec<SubmissionRecord>,
    // Set when a write failed partway; the next record starts a fresh line.
    torn: bool,
}

impl JournalLog {
    /// Opens (or creates) the journal in `data_dir` and replays it.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let path = data_dir.join(JOURNAL_FILE);
        let (records, torn_tail) = replay(&path).await?;

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open journal {}", path.display()))?;

        // Terminate a torn tail so the next record starts on its own line.
        if torn_tail {
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        info!(path = %path.display(), records = records.len(), "journal opened");

        Ok(Self {
            path,
            inner: Mutex::new(JournalState {
                file,
                records,
                torn: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn replay(path: &Path) -> Result<(Vec<SubmissionRecord>, bool)> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read journal {}", path.display()));
        }
    };

    let records = parse_records(&contents);
    let torn_tail = !contents.is_empty() && !contents.ends_with('\n');
    Ok((records, torn_tail))
}

fn parse_records(contents: &str) -> Vec<SubmissionRecord> {
    let mut records = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SubmissionRecord>(line) {
            Ok(record) => records.push(record),
            // A torn final write after a crash is the only expected cause.
            Err(err) => warn!(line = line_no + 1, error = %err, "skipping unreadable journal line"),
        }
    }
    records
}

/// Writes one encoded record, terminating whatever a failed earlier write
/// left behind first.
async fn write_line<W>(writer: &mut W, line: &[u8], torn: &mut bool) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if *torn {
        writer.write_all(b"\n").await?;
        *torn = false;
    }
    let result = async {
        writer.write_all(line).await?;
        writer.flush().await
    }
    .await;
    if result.is_err() {
        *torn = true;
    }
    result
}

#[async_trait]
impl DurableLog for JournalLog {
    async fn append(&self, record: SubmissionRecord) -> Result<()> {
        let mut encoded = serde_json::to_vec(&record)?;
        encoded.push(b'\n');

        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        write_line(&mut state.file, &encoded, &mut state.torn)
            .await
            .context("failed to append to journal")?;
        state
            .file
            .sync_data()
            .await
            .context("failed to sync journal")?;
        state.records.push(record);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<SubmissionRecord>> {
        Ok(self.inner.lock().await.records.clone())
    }
}
