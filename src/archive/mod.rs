// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Per-station archive container
//!
//! One SQLite file per `NET.STA.LOC` holding the station inventory, tagged raw
//! waveforms (the archival input format) and auxiliary FFT datasets keyed by
//! component and day, each with a JSON parameter dictionary.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use ndarray::Array2;
use num_complex::Complex32;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::NormMode;
use crate::trace::{ContinuousTrace, InstrumentDescription, StationId, StationLocation};

/// Processing settings that travel with every frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSettings {
    pub dt: f64,
    pub window_length: f64,
    pub step: f64,
    pub nfft: usize,
    pub time_norm: NormMode,
    pub whitening: NormMode,
    pub freqmin: f64,
    pub freqmax: f64,
    pub smooth_n: usize,
}

/// Everything written for one station-day-component
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub location: StationLocation,
    pub instrument: InstrumentDescription,
    pub component: String,
    pub date_label: String,
    /// `num_windows x nfft/2` half spectra
    pub spectra: Array2<Complex32>,
    /// `num_windows x 2` start/end seconds since epoch
    pub timestamps: Array2<f64>,
    /// `num_windows x 3` max/MAD, max/STD, nonzero fraction
    pub metrics: Array2<f64>,
    /// True sample count of each window
    pub npts: Vec<usize>,
    pub settings: FrameSettings,
}

/// Parameter dictionary attached to each FFT dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FftParameters {
    pub dt: f64,
    pub twin: f64,
    pub step: f64,
    pub nseg: usize,
    pub nfft: usize,
    pub data_t: Vec<f64>,
    pub data_t_end: Vec<f64>,
    pub npts: Vec<usize>,
    pub mad: Vec<f64>,
    pub std: Vec<f64>,
    pub nonzero: Vec<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_in_m: f64,
    pub component: String,
    pub time_norm: String,
    pub whitening: String,
    pub freqmin: f64,
    pub freqmax: f64,
    pub smooth_n: usize,
}

impl FftParameters {
    pub fn from_record(record: &FrameRecord) -> Self {
        let column = |m: &Array2<f64>, j: usize| m.column(j).to_vec();
        let s = &record.settings;
        Self {
            dt: s.dt,
            twin: s.window_length,
            step: s.step,
            nseg: record.spectra.nrows(),
            nfft: s.nfft,
            data_t: column(&record.timestamps, 0),
            data_t_end: column(&record.timestamps, 1),
            npts: record.npts.clone(),
            mad: column(&record.metrics, 0),
            std: column(&record.metrics, 1),
            nonzero: column(&record.metrics, 2),
            latitude: record.location.latitude,
            longitude: record.location.longitude,
            elevation_in_m: record.location.elevation,
            component: record.component.clone(),
            time_norm: s.time_norm.to_string(),
            whitening: s.whitening.to_string(),
            freqmin: s.freqmin,
            freqmax: s.freqmax,
            smooth_n: s.smooth_n,
        }
    }
}

/// An FFT dataset read back from an archive
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub component: String,
    pub date_label: String,
    pub spectra: Array2<Complex32>,
    pub parameters: FftParameters,
}

/// Accepts finished frames; one call per station-day-component
pub trait FrameSink: Send + Sync {
    fn write_frame(&self, record: &FrameRecord) -> Result<()>;
}

/// One station's archive file
pub struct StationArchive {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl StationArchive {
    /// Open or create; safe to call on an existing archive
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let archive = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        };
        archive.create_tables()?;

        debug!("Archive opened at {:?}", path);
        Ok(archive)
    }

    /// Open an archive that must already exist; never creates tables
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("archive {:?} does not exist", path);
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Station inventory, written once
            CREATE TABLE IF NOT EXISTS station (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                network TEXT NOT NULL,
                station TEXT NOT NULL,
                location TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                elevation REAL NOT NULL,
                instrument TEXT NOT NULL
            );

            -- Tagged raw waveforms
            CREATE TABLE IF NOT EXISTS waveforms (
                tag TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                starttime TEXT NOT NULL,
                sample_rate REAL NOT NULL,
                npts INTEGER NOT NULL,
                data BLOB NOT NULL
            );

            -- FFT datasets
            CREATE TABLE IF NOT EXISTS auxiliary (
                data_type TEXT NOT NULL,
                path TEXT NOT NULL,
                rows INTEGER NOT NULL,
                cols INTEGER NOT NULL,
                data BLOB NOT NULL,
                parameters TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (data_type, path)
            );
        "#,
        )?;

        Ok(())
    }

    /// Store the station inventory unless one is already present
    pub fn add_station(&self, location: &StationLocation, instrument: &InstrumentDescription) -> Result<bool> {
        let conn = self.conn.lock();
        insert_station(&conn, location, instrument)
    }

    pub fn station(&self) -> Result<Option<(StationLocation, InstrumentDescription)>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT network, station, location, latitude, longitude, elevation, instrument
                 FROM station WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((net, sta, loc, latitude, longitude, elevation, instrument)) => {
                let instrument: InstrumentDescription = serde_json::from_str(&instrument)?;
                Ok(Some((
                    StationLocation {
                        id: StationId::new(&net, &sta, &loc),
                        latitude,
                        longitude,
                        elevation,
                    },
                    instrument,
                )))
            }
        }
    }

    /// Store a raw waveform under a tag, replacing any previous one
    pub fn add_waveform(&self, tag: &str, trace: &ContinuousTrace) -> Result<()> {
        let conn = self.conn.lock();
        let samples: Vec<f32> = trace.data.iter().map(|&x| x as f32).collect();
        let data = bincode::serialize(&samples)?;

        conn.execute(
            "INSERT OR REPLACE INTO waveforms (tag, channel, starttime, sample_rate, npts, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tag,
                trace.channel,
                trace.starttime.to_rfc3339_opts(SecondsFormat::Nanos, true),
                trace.sample_rate,
                trace.npts() as i64,
                data
            ],
        )?;
        Ok(())
    }

    pub fn waveform_tags(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT tag FROM waveforms ORDER BY tag")?;
        let tags = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Load a waveform, labelled with the given station identity
    pub fn waveform(&self, tag: &str, id: &StationId) -> Result<ContinuousTrace> {
        let conn = self.conn.lock();
        let (channel, starttime, sample_rate, npts, data) = conn
            .query_row(
                "SELECT channel, starttime, sample_rate, npts, data FROM waveforms WHERE tag = ?1",
                params![tag],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| anyhow!("no waveform tagged '{}'", tag))?;

        let samples: Vec<f32> = bincode::deserialize(&data)?;
        if samples.len() as i64 != npts {
            bail!("waveform '{}' holds {} samples, header says {}", tag, samples.len(), npts);
        }
        let starttime = DateTime::parse_from_rfc3339(&starttime)?.with_timezone(&Utc);

        Ok(ContinuousTrace::new(
            id.clone(),
            &channel,
            starttime,
            sample_rate,
            samples.into_iter().map(f64::from).collect(),
        ))
    }

    /// Write one FFT dataset and, on first write, the station inventory.
    /// Everything lands in one transaction.
    pub fn write_frame(&self, record: &FrameRecord) -> Result<()> {
        let (rows, cols) = record.spectra.dim();
        let parameters = serde_json::to_string(&FftParameters::from_record(record))?;
        let interleaved: Vec<f32> = record.spectra.iter().flat_map(|c| [c.re, c.im]).collect();
        let data = bincode::serialize(&interleaved)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_station(&tx, &record.location, &record.instrument)?;
        tx.execute(
            "INSERT OR REPLACE INTO auxiliary (data_type, path, rows, cols, data, parameters)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.component,
                record.date_label,
                rows as i64,
                cols as i64,
                data,
                parameters
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// `(component, date)` keys of stored FFT datasets
    pub fn frame_keys(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data_type, path FROM auxiliary ORDER BY data_type, path")?;
        let keys = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    pub fn read_frame(&self, component: &str, date_label: &str) -> Result<Option<StoredFrame>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT rows, cols, data, parameters FROM auxiliary WHERE data_type = ?1 AND path = ?2",
                params![component, date_label],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((rows, cols, data, parameters)) = row else {
            return Ok(None);
        };

        let interleaved: Vec<f32> = bincode::deserialize(&data)?;
        let values: Vec<Complex32> = interleaved
            .chunks_exact(2)
            .map(|c| Complex32::new(c[0], c[1]))
            .collect();
        let spectra = Array2::from_shape_vec((rows as usize, cols as usize), values)?;

        Ok(Some(StoredFrame {
            component: component.to_string(),
            date_label: date_label.to_string(),
            spectra,
            parameters: serde_json::from_str(&parameters)?,
        }))
    }
}

fn insert_station(
    conn: &Connection,
    location: &StationLocation,
    instrument: &InstrumentDescription,
) -> Result<bool> {
    let instrument = serde_json::to_string(instrument)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO station (id, network, station, location, latitude, longitude, elevation, instrument)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            location.id.network,
            location.id.station,
            location.id.location,
            location.latitude,
            location.longitude,
            location.elevation,
            instrument
        ],
    )?;
    Ok(inserted > 0)
}

/// Directory of station archives; the output sink of a run.
///
/// Archives are opened per write and closed when the write returns. A worker
/// owns every day of its stations, so no archive is written from two threads.
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        info!("Writing station archives to {:?}", dir);
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn archive_path(&self, id: &StationId) -> PathBuf {
        self.dir.join(format!("{}.db", id))
    }

    /// Open the station's archive, creating it if needed
    pub fn ensure_archive(&self, id: &StationId) -> Result<StationArchive> {
        StationArchive::open(&self.archive_path(id))
    }
}

impl FrameSink for ArchiveStore {
    fn write_frame(&self, record: &FrameRecord) -> Result<()> {
        let archive = self.ensure_archive(&record.location.id)?;
        archive.write_frame(record)
    }
}
