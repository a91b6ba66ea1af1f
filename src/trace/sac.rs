// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! SAC binary files and the day-directory reader

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::traits::{
    offset_time, ContinuousTrace, InstrumentDescription, LoadedUnit, StationId, StationLocation,
    TraceReader, UnitHandle, UnitSource,
};
use crate::error::{SetupError, SkipReason, UnitResult};

const HEADER_LEN: usize = 632;
const INT_OFFSET: usize = 280;
const CHAR_OFFSET: usize = 440;
const UNDEF_F: f32 = -12345.0;
const UNDEF_I: i32 = -12345;
const UNDEF_K: &str = "-12345";

// float header words
const DELTA: usize = 0;
const SCALE: usize = 3;
const B: usize = 5;
const E: usize = 6;
const STLA: usize = 31;
const STLO: usize = 32;
const STEL: usize = 33;

// integer header words
const NZYEAR: usize = 0;
const NZJDAY: usize = 1;
const NZHOUR: usize = 2;
const NZMIN: usize = 3;
const NZSEC: usize = 4;
const NZMSEC: usize = 5;
const NVHDR: usize = 6;
const NPTS: usize = 9;
const IFTYPE: usize = 15;
const LEVEN: usize = 35;

// character header byte ranges
const KSTNM: (usize, usize) = (0, 8);
const KHOLE: (usize, usize) = (24, 8);
const KCMPNM: (usize, usize) = (160, 8);
const KNETWK: (usize, usize) = (168, 8);

/// An evenly sampled SAC time series
#[derive(Debug, Clone, PartialEq)]
pub struct SacFile {
    pub delta: f32,
    pub b: f32,
    pub stla: Option<f32>,
    pub stlo: Option<f32>,
    pub stel: Option<f32>,
    /// Reference time; the first sample is at `reference + b`
    pub reference: DateTime<Utc>,
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub data: Vec<f32>,
}

#[derive(Clone, Copy)]
enum Endian {
    Little,
    Big,
}

struct HeaderView<'a> {
    bytes: &'a [u8],
    endian: Endian,
}

impl<'a> HeaderView<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            bail!("file too short for a SAC header ({} bytes)", bytes.len());
        }
        let word = word_at(bytes, INT_OFFSET + NVHDR * 4);
        let endian = if i32::from_le_bytes(word) == 6 {
            Endian::Little
        } else if i32::from_be_bytes(word) == 6 {
            Endian::Big
        } else {
            bail!("not a SAC file: header version is not 6");
        };
        Ok(Self { bytes, endian })
    }

    fn float(&self, index: usize) -> f32 {
        let word = word_at(self.bytes, index * 4);
        match self.endian {
            Endian::Little => f32::from_le_bytes(word),
            Endian::Big => f32::from_be_bytes(word),
        }
    }

    fn int(&self, index: usize) -> i32 {
        let word = word_at(self.bytes, INT_OFFSET + index * 4);
        match self.endian {
            Endian::Little => i32::from_le_bytes(word),
            Endian::Big => i32::from_be_bytes(word),
        }
    }

    fn chars(&self, (offset, len): (usize, usize)) -> String {
        let start = CHAR_OFFSET + offset;
        let raw = String::from_utf8_lossy(&self.bytes[start..start + len]);
        let value = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if value == UNDEF_K {
            String::new()
        } else {
            value.to_string()
        }
    }

    fn defined_float(&self, index: usize) -> Option<f32> {
        let value = self.float(index);
        (value != UNDEF_F && value.is_finite()).then_some(value)
    }
}

fn word_at(bytes: &[u8], offset: usize) -> [u8; 4] {
    [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]
}

impl SacFile {
    /// Read a whole file
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes).map_err(|e| anyhow!("{}: {}", path.display(), e))
    }

    /// Read only the header; data is left empty
    pub fn read_header(path: &Path) -> Result<Self> {
        use std::io::Read;
        let mut file = std::fs::File::open(path)?;
        let mut bytes = vec![0u8; HEADER_LEN];
        file.read_exact(&mut bytes)?;
        Self::parse(&bytes, false)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes, true)
    }

    fn parse(bytes: &[u8], with_data: bool) -> Result<Self> {
        let header = HeaderView::new(bytes)?;

        let npts = header.int(NPTS);
        if npts < 0 {
            bail!("negative npts {}", npts);
        }
        let npts = npts as usize;

        let delta = header.float(DELTA);
        if !(delta.is_finite() && delta > 0.0) {
            bail!("invalid sample interval {}", delta);
        }

        let reference = reference_time(&header)?;
        let b = header.defined_float(B).unwrap_or(0.0);

        let data = if with_data {
            let end = HEADER_LEN + npts * 4;
            if bytes.len() < end {
                bail!("truncated data: expected {} samples", npts);
            }
            bytes[HEADER_LEN..end]
                .chunks_exact(4)
                .map(|c| {
                    let word = [c[0], c[1], c[2], c[3]];
                    match header.endian {
                        Endian::Little => f32::from_le_bytes(word),
                        Endian::Big => f32::from_be_bytes(word),
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            delta,
            b,
            stla: header.defined_float(STLA),
            stlo: header.defined_float(STLO),
            stel: header.defined_float(STEL),
            reference,
            network: header.chars(KNETWK),
            station: header.chars(KSTNM),
            location: header.chars(KHOLE),
            channel: header.chars(KCMPNM),
            data,
        })
    }

    /// Serialize as a little-endian SAC file
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut floats = [UNDEF_F; 70];
        let mut ints = [UNDEF_I; 40];

        floats[DELTA] = self.delta;
        floats[SCALE] = 1.0;
        floats[B] = self.b;
        floats[E] = self.b + self.delta * self.data.len().saturating_sub(1) as f32;
        floats[STLA] = self.stla.unwrap_or(UNDEF_F);
        floats[STLO] = self.stlo.unwrap_or(UNDEF_F);
        floats[STEL] = self.stel.unwrap_or(UNDEF_F);

        use chrono::{Datelike, Timelike};
        let t = self.reference;
        ints[NZYEAR] = t.year();
        ints[NZJDAY] = t.ordinal() as i32;
        ints[NZHOUR] = t.hour() as i32;
        ints[NZMIN] = t.minute() as i32;
        ints[NZSEC] = t.second() as i32;
        ints[NZMSEC] = (t.nanosecond() / 1_000_000) as i32;
        ints[NVHDR] = 6;
        ints[NPTS] = self.data.len() as i32;
        ints[IFTYPE] = 1;
        ints[LEVEN] = 1;

        let mut chars = vec![b' '; 192];
        let mut put = |(offset, len): (usize, usize), value: &str| {
            let value = if value.is_empty() { UNDEF_K } else { value };
            for (i, byte) in value.bytes().take(len).enumerate() {
                chars[offset + i] = byte;
            }
        };
        put((8, 16), "");
        put(KSTNM, &self.station);
        put(KHOLE, &self.location);
        put(KCMPNM, &self.channel);
        put(KNETWK, &self.network);

        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        for f in floats {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        for i in ints {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        bytes.extend_from_slice(&chars);
        for x in &self.data {
            bytes.extend_from_slice(&x.to_le_bytes());
        }
        bytes
    }

    pub fn starttime(&self) -> DateTime<Utc> {
        offset_time(self.reference, self.b as f64)
    }

    pub fn station_id(&self) -> StationId {
        StationId::new(&self.network, &self.station, &self.location)
    }

    /// Convert to a trace labelled with the given station identity
    pub fn into_trace(self, id: StationId) -> ContinuousTrace {
        let starttime = self.starttime();
        let rate = 1.0 / self.delta as f64;
        let data = self.data.into_iter().map(f64::from).collect();
        ContinuousTrace::new(id, &self.channel, starttime, rate, data)
    }
}

fn reference_time(header: &HeaderView<'_>) -> Result<DateTime<Utc>> {
    let fields = [
        header.int(NZYEAR),
        header.int(NZJDAY),
        header.int(NZHOUR),
        header.int(NZMIN),
        header.int(NZSEC),
        header.int(NZMSEC),
    ];
    if fields.iter().any(|&v| v == UNDEF_I || v < 0) {
        bail!("reference time is undefined");
    }
    let [year, jday, hour, min, sec, msec] = fields;
    NaiveDate::from_yo_opt(year, jday as u32)
        .and_then(|d| d.and_hms_milli_opt(hour as u32, min as u32, sec as u32, msec as u32))
        .map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("invalid reference time {:?}", fields))
}

/// Reads day directories of SAC files, one unit per station-day-channel
pub struct SacDirectoryReader {
    root: PathBuf,
    stations: Vec<StationLocation>,
    by_id: HashMap<StationId, StationLocation>,
}

impl SacDirectoryReader {
    pub fn new(root: &Path, stations: Vec<StationLocation>) -> Result<Self, SetupError> {
        if stations.is_empty() {
            return Err(SetupError::EmptyStationTable(root.to_path_buf()));
        }
        let by_id = stations.iter().map(|s| (s.id.clone(), s.clone())).collect();
        Ok(Self {
            root: root.to_path_buf(),
            stations,
            by_id,
        })
    }

    fn day_dirs(&self) -> Result<Vec<PathBuf>, SetupError> {
        let scan_err = |source| SetupError::Scan {
            path: self.root.clone(),
            source,
        };
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(scan_err)? {
            let path = entry.map_err(scan_err)?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// Does the file name carry the station code as one of its dotted tokens
fn names_station(path: &Path, station: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.split(['.', '_']).any(|token| token == station))
        .unwrap_or(false)
}

impl TraceReader for SacDirectoryReader {
    fn name(&self) -> &'static str {
        "sac"
    }

    fn list_units(&self) -> Result<Vec<UnitHandle>, SetupError> {
        let dirs = self.day_dirs()?;
        if dirs.is_empty() {
            return Err(SetupError::NoInput(self.root.clone()));
        }

        let mut units = Vec::new();
        for station in &self.stations {
            for dir in &dirs {
                let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
                    .map_err(|source| SetupError::Scan {
                        path: dir.clone(),
                        source,
                    })?
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && names_station(p, &station.id.station))
                    .collect();
                files.sort();

                if files.is_empty() {
                    debug!("{} has no SAC file in {:?}", station.id, dir);
                    continue;
                }

                // Pieces of one channel are merged; unreadable headers stay on their own
                let mut by_channel: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
                for file in files {
                    let key = match SacFile::read_header(&file) {
                        Ok(header) => header.channel,
                        Err(_) => format!("?{}", file.display()),
                    };
                    by_channel.entry(key).or_default().push(file);
                }

                let day = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                for (channel, paths) in by_channel {
                    units.push(UnitHandle {
                        station: station.id.clone(),
                        label: format!("{} {}", day, channel.trim_start_matches('?')),
                        source: UnitSource::SacFiles { paths },
                    });
                }
            }
        }

        if units.is_empty() {
            return Err(SetupError::NoInput(self.root.clone()));
        }
        Ok(units)
    }

    fn load(&self, unit: &UnitHandle) -> UnitResult<LoadedUnit> {
        let paths = match &unit.source {
            UnitSource::SacFiles { paths } => paths,
            other => {
                return Err(SkipReason::Unreadable(format!(
                    "SAC reader cannot load {:?}",
                    other
                )))
            }
        };

        let mut pieces = Vec::with_capacity(paths.len());
        for path in paths {
            match SacFile::read(path) {
                Ok(sac) => pieces.push(sac.into_trace(unit.station.clone())),
                Err(e) => {
                    warn!("Unreadable SAC file {:?}: {}", path, e);
                    return Err(SkipReason::Unreadable(e.to_string()));
                }
            }
        }
        let trace = ContinuousTrace::merge(pieces)?;

        let location = self
            .by_id
            .get(&unit.station)
            .cloned()
            .ok_or_else(|| SkipReason::Unreadable(format!("{} not in station table", unit.station)))?;

        Ok(LoadedUnit {
            trace,
            location,
            instrument: InstrumentDescription::without_response(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_sac(channel: &str, b: f32, data: Vec<f32>) -> SacFile {
        SacFile {
            delta: 0.1,
            b,
            stla: Some(-41.28),
            stlo: Some(174.77),
            stel: Some(138.0),
            reference: Utc.with_ymd_and_hms(2018, 5, 1, 0, 0, 0).unwrap(),
            network: "NZ".to_string(),
            station: "WEL".to_string(),
            location: "10".to_string(),
            channel: channel.to_string(),
            data,
        }
    }

    fn wel() -> StationLocation {
        StationLocation {
            id: StationId::new("NZ", "WEL", "10"),
            latitude: -41.28,
            longitude: 174.77,
            elevation: 138.0,
        }
    }

    #[test]
    fn test_sac_bytes_round_trip() {
        let sac = sample_sac("HHZ", 0.0, vec![1.0, -2.0, 3.5]);
        let parsed = SacFile::from_bytes(&sac.to_bytes()).unwrap();
        assert_eq!(parsed, sac);
    }

    #[test]
    fn test_sac_big_endian_header_detected() {
        let mut bytes = sample_sac("HHZ", 0.0, vec![]).to_bytes();
        for word in bytes[..HEADER_LEN - 192].chunks_exact_mut(4) {
            word.reverse();
        }
        let parsed = SacFile::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.channel, "HHZ");
        assert!((parsed.delta - 0.1).abs() < 1e-7);
    }

    #[test]
    fn test_sac_rejects_truncated_data() {
        let bytes = sample_sac("HHZ", 0.0, vec![1.0; 10]).to_bytes();
        assert!(SacFile::from_bytes(&bytes[..bytes.len() - 4]).is_err());
        assert!(SacFile::from_bytes(&bytes[..100]).is_err());
    }

    #[test]
    fn test_station_token_match() {
        assert!(names_station(Path::new("/d/NZ.WEL.10.HHZ.sac"), "WEL"));
        assert!(!names_station(Path::new("/d/NZ.WELL.10.HHZ.sac"), "WEL"));
    }

    #[test]
    fn test_reader_groups_channel_pieces() {
        let root = tempfile::tempdir().unwrap();
        let day = root.path().join("Event_2018_05_01");
        std::fs::create_dir_all(&day).unwrap();

        let first = sample_sac("HHZ", 0.0, vec![1.0; 10]);
        let second = sample_sac("HHZ", 2.0, vec![2.0; 10]);
        let east = sample_sac("HHE", 0.0, vec![3.0; 10]);
        std::fs::write(day.join("NZ.WEL.10.HHZ.0.sac"), first.to_bytes()).unwrap();
        std::fs::write(day.join("NZ.WEL.10.HHZ.1.sac"), second.to_bytes()).unwrap();
        std::fs::write(day.join("NZ.WEL.10.HHE.sac"), east.to_bytes()).unwrap();
        std::fs::write(day.join("NZ.WEL.10.broken.sac"), b"garbage").unwrap();

        let reader = SacDirectoryReader::new(root.path(), vec![wel()]).unwrap();
        let units = reader.list_units().unwrap();
        assert_eq!(units.len(), 3);

        let hhz = units.iter().find(|u| u.label.ends_with("HHZ")).unwrap();
        let loaded = reader.load(hhz).unwrap();
        assert_eq!(loaded.trace.npts(), 30);
        assert_eq!(&loaded.trace.data[..10], &[1.0; 10]);
        assert_eq!(&loaded.trace.data[10..20], &[0.0; 10]);
        assert_eq!(&loaded.trace.data[20..], &[2.0; 10]);
        assert!(!loaded.instrument.has_response());

        let broken = units.iter().find(|u| u.label.contains("broken")).unwrap();
        assert!(matches!(reader.load(broken), Err(SkipReason::Unreadable(_))));
    }

    #[test]
    fn test_reader_requires_stations() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            SacDirectoryReader::new(root.path(), vec![]),
            Err(SetupError::EmptyStationTable(_))
        ));
    }
}
