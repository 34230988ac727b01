//! JSON-lines recording of received snapshots

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::time::unix_millis;
use crate::world::WorldSnapshot;

use super::PeerError;

/// One line of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    /// Unix millis at which the consumer received the update
    pub received_at: u64,
    pub state: WorldSnapshot,
}

pub struct Recorder {
    writer: BufWriter<File>,
    frames: u64,
}

impl Recorder {
    /// Create (or truncate) the recording file
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PeerError> {
        let file = File::create(path).map_err(PeerError::Record)?;
        Ok(Self {
            writer: BufWriter::new(file),
            frames: 0,
        })
    }

    pub fn record(&mut self, state: &WorldSnapshot) -> Result<(), PeerError> {
        let frame = RecordedFrame {
            received_at: unix_millis(),
            state: state.clone(),
        };
        serde_json::to_writer(&mut self.writer, &frame)
            .map_err(|e| PeerError::Record(e.into()))?;
        self.writer.write_all(b"\n").map_err(PeerError::Record)?;
        self.writer.flush().map_err(PeerError::Record)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Load every frame of a recording. Blank lines are skipped; a corrupt line
/// is an error carrying its line number.
pub fn read_recording(path: impl AsRef<Path>) -> Result<Vec<RecordedFrame>, PeerError> {
    let file = File::open(path).map_err(PeerError::Record)?;
    let mut frames = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(PeerError::Record)?;
        if line.trim().is_empty() {
            continue;
        }
        let frame = serde_json::from_str(&line).map_err(|source| PeerError::CorruptRecording {
            line: index + 1,
            source,
        })?;
        frames.push(frame);
    }

    Ok(frames)
}
