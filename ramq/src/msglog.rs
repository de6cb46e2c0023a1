//! Durable per-queue message log.
//!
//! Each durable queue owns a directory with two files: `queue_data.txt`, a
//! sequence of `[4 byte big-endian length][bincode record]` frames, and
//! `queue_stat.txt`, holding `"<total written>\t<live count>"`. Deletion is
//! logical: the record's valid flag is flipped in place, which never changes
//! the record length. Space is reclaimed by copy compaction once the file
//! holds more than [`COMPACT_MIN_TOTAL`] records and less than half of them
//! are live.
//!
//! Callers serialize all access to one queue's file pair through that queue's
//! lock; nothing here locks.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::anyhow;

use crate::types::Message;
use crate::Result;

const DATA_FILE: &str = "queue_data.txt";
const STAT_FILE: &str = "queue_stat.txt";
const COMPACT_FILE: &str = "queue_data_new.txt";

/// Compaction runs only after this many records have ever been written.
pub const COMPACT_MIN_TOTAL: u64 = 2000;
/// And only while live records make up less than this share of the file.
pub const COMPACT_LIVE_RATIO: f64 = 0.5;

/// Handle on the on-disk message logs of one virtual host.
#[derive(Debug, Clone)]
pub struct MessageLog {
    root: PathBuf,
}

impl MessageLog {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        MessageLog { root: root.into() }
    }

    #[inline]
    fn queue_dir(&self, queue: &str) -> PathBuf {
        self.root.join(queue)
    }

    #[inline]
    fn data_path(&self, queue: &str) -> PathBuf {
        self.queue_dir(queue).join(DATA_FILE)
    }

    #[inline]
    fn stat_path(&self, queue: &str) -> PathBuf {
        self.queue_dir(queue).join(STAT_FILE)
    }

    /// Creates the queue directory and an empty data/stat file pair. Files
    /// that already exist are left untouched, so re-declaring a durable queue
    /// after a restart keeps its backlog.
    pub fn create_queue_files(&self, queue: &str) -> Result<()> {
        let dir = self.queue_dir(queue);
        fs::create_dir_all(&dir)?;
        let data = dir.join(DATA_FILE);
        if !data.exists() {
            File::create(&data)?;
        }
        if !self.stat_path(queue).exists() {
            self.write_stat(queue, 0, 0)?;
        }
        Ok(())
    }

    pub fn remove_queue_files(&self, queue: &str) -> Result<()> {
        let dir = self.queue_dir(queue);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// `(total written, live count)` from the stat file.
    pub fn read_stat(&self, queue: &str) -> Result<(u64, u64)> {
        let content = fs::read_to_string(self.stat_path(queue))?;
        let mut parts = content.split_whitespace();
        let total = parts.next().and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        let live = parts.next().and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        Ok((total, live))
    }

    fn write_stat(&self, queue: &str, total: u64, live: u64) -> Result<()> {
        fs::write(self.stat_path(queue), format!("{}\t{}", total, live))?;
        Ok(())
    }

    /// Appends one record and fills in the message's byte offsets.
    pub fn append(&self, queue: &str, message: &mut Message) -> Result<()> {
        let payload = bincode::serialize(message)?;
        let mut f = OpenOptions::new().append(true).open(self.data_path(queue))?;
        let end = f.metadata()?.len();
        f.write_all(&(payload.len() as u32).to_be_bytes())?;
        f.write_all(&payload)?;
        f.flush()?;
        message.offset_begin = end + 4;
        message.offset_end = end + 4 + payload.len() as u64;

        let (total, live) = self.read_stat(queue)?;
        self.write_stat(queue, total + 1, live + 1)
    }

    /// Flips the record's valid flag in place using the message's offsets.
    pub fn mark_deleted(&self, queue: &str, message: &Message) -> Result<()> {
        if message.offset_end <= message.offset_begin {
            return Err(anyhow!("message '{}' has no stored location", message.id));
        }
        let len = (message.offset_end - message.offset_begin) as usize;
        let mut f = OpenOptions::new().read(true).write(true).open(self.data_path(queue))?;
        f.seek(SeekFrom::Start(message.offset_begin))?;
        let mut buf = vec![0u8; len];
        f.read_exact(&mut buf)?;
        let mut stored: Message = bincode::deserialize(&buf)?;
        stored.valid = 0;
        let rewritten = bincode::serialize(&stored)?;
        if rewritten.len() != len {
            return Err(anyhow!(
                "record length changed on rewrite, {} != {}, queue: {}",
                rewritten.len(),
                len,
                queue
            ));
        }
        // the read moved the cursor past the record
        f.seek(SeekFrom::Start(message.offset_begin))?;
        f.write_all(&rewritten)?;
        f.flush()?;

        let (total, live) = self.read_stat(queue)?;
        self.write_stat(queue, total, live.saturating_sub(1))
    }

    /// Reads every live record, oldest first, with offsets filled in.
    /// Deleted records are skipped; a truncated record at the tail ends the
    /// scan.
    pub fn load_all(&self, queue: &str) -> Result<Vec<Message>> {
        let mut data = Vec::new();
        File::open(self.data_path(queue))?.read_to_end(&mut data)?;

        let mut messages = Vec::new();
        let mut pos = 0usize;
        while pos + 4 <= data.len() {
            let len =
                u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
                    as usize;
            let begin = pos + 4;
            let end = begin + len;
            if end > data.len() {
                log::warn!("queue '{}' data file truncated at offset {}", queue, pos);
                break;
            }
            let mut message: Message = bincode::deserialize(&data[begin..end])?;
            if message.is_valid() {
                message.offset_begin = begin as u64;
                message.offset_end = end as u64;
                messages.push(message);
            }
            pos = end;
        }
        Ok(messages)
    }

    pub fn should_compact(&self, queue: &str) -> Result<bool> {
        let (total, live) = self.read_stat(queue)?;
        Ok(total > COMPACT_MIN_TOTAL && (live as f64) / (total as f64) < COMPACT_LIVE_RATIO)
    }

    /// Copies live records into a fresh file, then swaps it in. Returns the
    /// surviving messages with their new offsets so callers can refresh any
    /// in-memory copies.
    pub fn compact(&self, queue: &str) -> Result<Vec<Message>> {
        let start = Instant::now();
        let live = self.load_all(queue)?;

        let new_path = self.queue_dir(queue).join(COMPACT_FILE);
        let mut f = File::create(&new_path)?;
        let mut compacted = Vec::with_capacity(live.len());
        let mut pos = 0u64;
        for mut message in live {
            let payload = bincode::serialize(&message)?;
            f.write_all(&(payload.len() as u32).to_be_bytes())?;
            f.write_all(&payload)?;
            message.offset_begin = pos + 4;
            message.offset_end = message.offset_begin + payload.len() as u64;
            pos = message.offset_end;
            compacted.push(message);
        }
        f.flush()?;
        drop(f);

        let data_path = self.data_path(queue);
        fs::remove_file(&data_path)?;
        fs::rename(&new_path, &data_path)?;
        let count = compacted.len() as u64;
        self.write_stat(queue, count, count)?;

        log::info!(
            "queue '{}' compacted, {} live messages, cost time: {:?}",
            queue,
            count,
            start.elapsed()
        );
        Ok(compacted)
    }
}
