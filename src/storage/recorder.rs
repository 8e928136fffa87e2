// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-session measurement log in JSON Lines format.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::bluetooth::Measurement;

/// Appends one serialized [`Measurement`] per line to
/// `<data_dir>/sessions/<start>.jsonl`.
pub struct SessionRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    count: usize,
}

impl SessionRecorder {
    /// Create the recording file for a session started at `started_at`.
    pub fn create(data_dir: &Path, started_at: DateTime<Utc>) -> Result<Self> {
        let dir = data_dir.join("sessions");
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.jsonl", started_at.format("%Y%m%dT%H%M%S%.3fZ")));
        let file = File::create(&path)?;
        info!("Recording session to {:?}", path);

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            count: 0,
        })
    }

    pub fn record(&mut self, measurement: &Measurement) -> Result<()> {
        serde_json::to_writer(&mut self.writer, measurement)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.count += 1;
        debug!("Recorded {} measurement #{}", measurement.kind().as_str(), self.count);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Flush and close. Returns the file path and number of lines written.
    pub fn finish(mut self) -> Result<(PathBuf, usize)> {
        self.writer.flush()?;
        info!("Session recording closed: {} measurements in {:?}", self.count, self.path);
        Ok((self.path, self.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{gatt_uuids, BatteryMeasurement, Reading};
    use tempfile::tempdir;

    #[test]
    fn test_records_one_line_per_measurement() {
        let dir = tempdir().unwrap();
        let mut recorder = SessionRecorder::create(dir.path(), Utc::now()).unwrap();

        for level in [90, 89] {
            let measurement = Measurement::new(
                gatt_uuids::BATTERY_LEVEL,
                Reading::Battery(BatteryMeasurement { level }),
            );
            recorder.record(&measurement).unwrap();
        }

        let (path, count) = recorder.finish().unwrap();
        assert_eq!(count, 2);
        assert!(path.starts_with(dir.path().join("sessions")));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jsonl"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "battery");
        assert_eq!(first["level"], 90);
    }

    #[test]
    fn test_empty_session_leaves_empty_file() {
        let dir = tempdir().unwrap();
        let recorder = SessionRecorder::create(dir.path(), Utc::now()).unwrap();
        let (path, count) = recorder.finish().unwrap();

        assert_eq!(count, 0);
        assert_eq!(std::fs::read_to_string(path).unwrap(), "");
    }
}
