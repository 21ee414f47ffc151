//! # Replay Files
//!
//! A replay file is a JSON description of one recorded session: the events,
//! the machine (threads, maps, symbol tables) and the raw samples.
//!
//! ```json
//! {
//!   "events": ["cycles"],
//!   "threads": [{ "pid": 10, "tid": 10, "comm": "app" }],
//!   "maps": [{
//!     "pid": 10, "start": 4096, "end": 8192, "dso": "/usr/bin/app",
//!     "symbols": [{ "start": 0, "end": 256, "name": "main" }]
//!   }],
//!   "samples": [{ "pid": 10, "tid": 10, "ip": 4100, "period": 1000 }]
//! }
//! ```
//!
//! Maps without a `pid` are kernel maps, shared by every thread. Symbol and
//! line addresses are relative to the DSO.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use perfhist_common::RawSample;
use serde::{Deserialize, Serialize};

use crate::domain::{ExportError, Pid, ReplayError, Tid};
use crate::machine::StaticMachine;

fn default_events() -> Vec<String> {
    vec!["cycles".to_string()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDesc {
    pub pid: i32,
    pub tid: i32,
    pub comm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDesc {
    pub start: u64,
    pub end: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDesc {
    pub start: u64,
    pub srcline: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDesc {
    /// Owning process; `None` for kernel maps.
    #[serde(default)]
    pub pid: Option<i32>,
    pub start: u64,
    pub end: u64,
    #[serde(default)]
    pub pgoff: u64,
    pub dso: String,
    #[serde(default)]
    pub symbols: Vec<SymbolDesc>,
    #[serde(default)]
    pub lines: Vec<LineDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFile {
    #[serde(default = "default_events")]
    pub events: Vec<String>,
    #[serde(default)]
    pub threads: Vec<ThreadDesc>,
    #[serde(default)]
    pub maps: Vec<MapDesc>,
    #[serde(default)]
    pub samples: Vec<RawSample>,
}

impl Default for ReplayFile {
    fn default() -> Self {
        Self {
            events: default_events(),
            threads: Vec::new(),
            maps: Vec::new(),
            samples: Vec::new(),
        }
    }
}

impl ReplayFile {
    /// Read and validate a replay file.
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let reader = BufReader::new(File::open(path)?);
        let replay: Self = serde_json::from_reader(reader)?;
        replay.validate()?;
        info!(
            "loaded {}: {} events, {} threads, {} maps, {} samples",
            path.display(),
            replay.events.len(),
            replay.threads.len(),
            replay.maps.len(),
            replay.samples.len()
        );
        Ok(replay)
    }

    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        let replay: Self = serde_json::from_str(json)?;
        replay.validate()?;
        Ok(replay)
    }

    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Every sample must name a declared event.
    pub fn validate(&self) -> Result<(), ReplayError> {
        let count = self.events.len();
        match self.samples.iter().position(|s| s.event >= count) {
            Some(sample) => Err(ReplayError::UnknownEvent {
                sample,
                event: self.samples[sample].event,
                count,
            }),
            None => Ok(()),
        }
    }

    /// Build the machine model described by the file.
    pub fn machine(&self) -> Result<StaticMachine, ReplayError> {
        let mut machine = StaticMachine::new();
        for thread in &self.threads {
            machine.add_thread(Pid(thread.pid), Tid(thread.tid), &thread.comm);
        }
        for map in &self.maps {
            machine.add_map(map.pid.map(Pid), map.start, map.end, map.pgoff, &map.dso)?;
            for sym in &map.symbols {
                machine.add_symbol(&map.dso, sym.start, sym.end, &sym.name);
            }
            for line in &map.lines {
                machine.add_line(&map.dso, line.start, &line.srcline);
            }
        }
        Ok(machine)
    }
}
