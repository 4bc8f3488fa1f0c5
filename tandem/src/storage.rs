//! # Summary
//!
//! Append-only stable storage. Two record kinds share one file per
//! replica: 5-byte instance metadata (little-endian ballot plus a
//! status byte) and bincode-encoded commands. Records are written at
//! protocol checkpoints and flushed with `sync`; replay scans the file
//! sequentially.

use std::io;
use std::io::Read;
use std::io::Write;
use std::path;

use crate::instance;
use crate::message::Ballot;
use crate::state;

pub struct Log {
    file: std::fs::File,
}

/// One replayed checkpoint: the metadata record and the command that
/// followed it.
#[derive(Debug, PartialEq, Eq)]
pub struct Record {
    pub ballot: Ballot,
    pub status: u8,
    pub cmd: state::Command,
}

impl Log {
    pub fn new<P: AsRef<path::Path>>(path: P) -> Self {
        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .expect("[STORAGE ERROR]: could not create stable storage");
        Log { file }
    }

    /// Append a 5-byte instance metadata record.
    pub fn record_instance_metadata(&mut self, ballot: Ballot, status: instance::Status) {
        let mut record = [0u8; 5];
        record[0..4].copy_from_slice(&ballot.to_le_bytes());
        record[4] = status.as_byte();
        self.file
            .write_all(&record)
            .expect("[STORAGE ERROR]: failed to append instance metadata");
    }

    /// Append the slot's commands to the command stream.
    pub fn record_commands(&mut self, cmds: &[state::Command]) {
        for cmd in cmds {
            bincode::serialize_into(&mut self.file, cmd)
                .expect("[STORAGE ERROR]: failed to append command");
        }
    }

    /// Flush appended records to stable media.
    pub fn sync(&mut self) {
        self.file
            .sync_data()
            .expect("[STORAGE ERROR]: failed to sync stable storage");
    }

    /// Scan a log file back into its checkpoint records. Each
    /// checkpoint is a metadata record followed by one command, which
    /// is how the engine writes them.
    pub fn replay<P: AsRef<path::Path>>(path: P) -> io::Result<Vec<Record>> {
        let mut file = std::fs::File::open(path)?;
        let mut records = Vec::new();
        loop {
            let mut header = [0u8; 5];
            match file.read_exact(&mut header) {
                Ok(()) => (),
                Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(error) => return Err(error),
            }
            let ballot = Ballot::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let cmd = bincode::deserialize_from(&mut file)
                .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
            records.push(Record { ballot, status: header[4], cmd });
        }
        Ok(records)
    }
}
