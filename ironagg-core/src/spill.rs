// ironagg-core/src/spill.rs
// Spilling group state to temporary files when over the memory budget
//
// Record format: [len: u32 LE][crc32: u32 LE][bincode(SpilledGroup)]
// The checksum covers the length bytes and the payload.

use crate::error::{IronAggError, Result};
use crate::group::GroupState;
use crate::options::GroupOptions;
use crate::value::Value;
use crate::{log_debug, log_info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::iter::Peekable;
use std::path::PathBuf;

/// Record header: 4 (len) + 4 (crc)
pub const SPILL_HEADER_SIZE: usize = 8;

/// Upper bound on a single record, guards against reading garbage lengths
pub const MAX_SPILL_RECORD_SIZE: usize = 1024 * 1024 * 1024;

type GroupStream = Box<dyn Iterator<Item = Result<SpilledGroup>>>;

/// One group as written to a spill file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpilledGroup {
    /// First-seen position of the group, used to restore output order
    pub ordinal: u64,
    pub key: Value,
    pub state: GroupState,
}

/// A written spill run; the file is removed when the handle is dropped
#[derive(Debug)]
pub struct SpillHandle {
    file: File,
    records: usize,
    bytes: u64,
}

impl SpillHandle {
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

fn checksum(len_bytes: &[u8; 4], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(len_bytes);
    hasher.update(payload);
    hasher.finalize()
}

fn spill_error(context: &str, err: impl std::fmt::Display) -> IronAggError {
    IronAggError::SpillFailed(format!("{}: {}", context, err))
}

/// Streaming reader over one spill run
pub struct SpillReader {
    reader: BufReader<File>,
    done: bool,
}

impl SpillReader {
    fn read_next(&mut self) -> Result<Option<SpilledGroup>> {
        let mut header = [0u8; SPILL_HEADER_SIZE];
        let mut filled = 0;
        while filled < SPILL_HEADER_SIZE {
            let read = self
                .reader
                .read(&mut header[filled..])
                .map_err(|e| spill_error("reading spill record header", e))?;
            if read == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(IronAggError::Corruption(
                    "truncated spill record header".to_string(),
                ));
            }
            filled += read;
        }

        let len_bytes = [header[0], header[1], header[2], header[3]];
        let len = u32::from_le_bytes(len_bytes) as usize;
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if len > MAX_SPILL_RECORD_SIZE {
            return Err(IronAggError::Corruption(format!(
                "spill record length {} exceeds limit",
                len
            )));
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                IronAggError::Corruption("truncated spill record".to_string())
            } else {
                spill_error("reading spill record", e)
            }
        })?;

        if checksum(&len_bytes, &payload) != expected {
            return Err(IronAggError::Corruption(
                "spill record checksum mismatch".to_string(),
            ));
        }

        bincode::deserialize(&payload)
            .map(Some)
            .map_err(|e| IronAggError::Corruption(format!("undecodable spill record: {}", e)))
    }
}

impl Iterator for SpillReader {
    type Item = Result<SpilledGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(group)) => Some(Ok(group)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decides when to spill, writes runs, and merges them back at finalization
///
/// Each run holds groups sorted by ordinal, so runs can be merged back as a
/// stream without loading them whole.
#[derive(Debug)]
pub struct SpillCoordinator {
    max_memory_bytes: usize,
    allow_disk_use: bool,
    spill_dir: Option<PathBuf>,
    handles: Vec<SpillHandle>,
    spilled_bytes: u64,
}

impl SpillCoordinator {
    pub fn new(options: &GroupOptions) -> Self {
        SpillCoordinator {
            max_memory_bytes: options.max_memory_bytes,
            allow_disk_use: options.allow_disk_use,
            spill_dir: options.spill_dir.clone(),
            handles: Vec::new(),
            spilled_bytes: 0,
        }
    }

    /// True if `memory_used` is over budget and state must be spilled
    ///
    /// Fails with `QueryExceededMemoryLimitNoDiskUseAllowed` when over budget
    /// and spilling is not allowed.
    pub fn should_spill(&self, memory_used: usize) -> Result<bool> {
        if memory_used <= self.max_memory_bytes {
            return Ok(false);
        }
        if !self.allow_disk_use {
            return Err(IronAggError::QueryExceededMemoryLimitNoDiskUseAllowed {
                used: memory_used,
                limit: self.max_memory_bytes,
            });
        }
        Ok(true)
    }

    fn create_file(&self) -> Result<File> {
        match &self.spill_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(|e| spill_error("creating spill file", e))
    }

    /// Write one run; `groups` must be sorted by ordinal
    pub fn spill(&mut self, groups: Vec<SpilledGroup>) -> Result<&SpillHandle> {
        let file = self.create_file()?;
        let mut writer = BufWriter::new(file);
        let mut bytes = 0u64;
        let records = groups.len();

        for group in &groups {
            let payload = bincode::serialize(group)
                .map_err(|e| spill_error("encoding group state", e))?;
            if payload.len() > MAX_SPILL_RECORD_SIZE {
                return Err(IronAggError::SpillFailed(format!(
                    "group state of {} bytes is too large to spill",
                    payload.len()
                )));
            }
            let len_bytes = (payload.len() as u32).to_le_bytes();
            let crc = checksum(&len_bytes, &payload);

            writer
                .write_all(&len_bytes)
                .and_then(|_| writer.write_all(&crc.to_le_bytes()))
                .and_then(|_| writer.write_all(&payload))
                .map_err(|e| spill_error("writing spill file", e))?;
            bytes += (SPILL_HEADER_SIZE + payload.len()) as u64;
        }

        let file = writer
            .into_inner()
            .map_err(|e| spill_error("flushing spill file", e.error()))?;

        self.spilled_bytes += bytes;
        log_info!(
            "Spilled {} groups ({} bytes) to run #{}",
            records,
            bytes,
            self.handles.len()
        );

        self.handles.push(SpillHandle {
            file,
            records,
            bytes,
        });
        let last = self.handles.len() - 1;
        Ok(&self.handles[last])
    }

    /// Open a run for reading from the start
    pub fn reload(handle: &SpillHandle) -> Result<SpillReader> {
        let mut file = handle
            .file
            .try_clone()
            .map_err(|e| spill_error("reopening spill file", e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| spill_error("rewinding spill file", e))?;
        Ok(SpillReader {
            reader: BufReader::new(file),
            done: false,
        })
    }

    pub fn handles(&self) -> &[SpillHandle] {
        &self.handles
    }

    pub fn spill_count(&self) -> usize {
        self.handles.len()
    }

    pub fn spilled_bytes(&self) -> u64 {
        self.spilled_bytes
    }

    /// Merge every run with the in-memory groups, emitting each group once
    /// in ordinal order
    ///
    /// States of the same group are combined oldest run first, then memory.
    /// `memory` must be sorted by ordinal.
    pub fn merge_spilled(
        &self,
        memory: Vec<SpilledGroup>,
        mut emit: impl FnMut(SpilledGroup) -> Result<()>,
    ) -> Result<()> {
        let mut sources: Vec<Peekable<GroupStream>> = Vec::with_capacity(self.handles.len() + 1);
        for handle in &self.handles {
            let reader: GroupStream = Box::new(Self::reload(handle)?);
            sources.push(reader.peekable());
        }
        let memory: GroupStream = Box::new(memory.into_iter().map(Ok));
        sources.push(memory.peekable());

        log_debug!("Merging {} spill runs with memory", self.handles.len());

        loop {
            let mut next_ordinal: Option<u64> = None;
            for source in sources.iter_mut() {
                if matches!(source.peek(), Some(Err(_))) {
                    if let Some(Err(e)) = source.next() {
                        return Err(e);
                    }
                }
                if let Some(Ok(group)) = source.peek() {
                    next_ordinal = Some(next_ordinal.map_or(group.ordinal, |o| o.min(group.ordinal)));
                }
            }

            let Some(ordinal) = next_ordinal else {
                return Ok(());
            };

            let mut merged: Option<SpilledGroup> = None;
            for source in sources.iter_mut() {
                let matches = matches!(source.peek(), Some(Ok(group)) if group.ordinal == ordinal);
                if !matches {
                    continue;
                }
                if let Some(Ok(group)) = source.next() {
                    match merged.as_mut() {
                        Some(existing) => existing.state.merge(group.state)?,
                        None => merged = Some(group),
                    }
                }
            }

            if let Some(group) = merged {
                emit(group)?;
            }
        }
    }
}
