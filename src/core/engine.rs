//! Pipeline driver - one station-day-channel from raw trace to stored spectra

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use ndarray::Array2;
use num_complex::Complex32;
use tracing::{debug, info, warn};

use super::scheduler::WorkerPool;
use super::{PipelineStage, RunSummary};
use crate::analysis::{
    half_spectrum, time_normalize, DayStatistics, PackedFrame, ResponseRemover, Segmenter,
    SpectralPreprocessor, Whitener,
};
use crate::archive::{FrameRecord, FrameSettings, FrameSink};
use crate::config::{Config, PreprocessingConfig};
use crate::error::{SkipReason, UnitResult};
use crate::trace::{ContinuousTrace, TraceReader, UnitHandle};

/// Half spectra of every window of one unit plus what describes them
#[derive(Debug, Clone)]
pub struct SpectralFrame {
    /// `num_windows x nfft/2`
    pub spectra: Array2<Complex32>,
    pub timestamps: Array2<f64>,
    pub metrics: Array2<f64>,
    pub npts: Vec<usize>,
    pub nfft: usize,
    /// Sample interval of the transformed rows
    pub dt: f64,
    pub stats: DayStatistics,
}

impl SpectralFrame {
    pub fn windows(&self) -> usize {
        self.spectra.nrows()
    }
}

/// Run metrics, segmentation, packing, time normalization and the
/// transform on one trace
pub fn compute_spectra(trace: &ContinuousTrace, params: &PreprocessingConfig) -> UnitResult<SpectralFrame> {
    trace.validate()?;
    let mut clock = Instant::now();
    let mut lap = |stage: PipelineStage| {
        debug!("{}.{}: {} in {:.3}s", trace.id, trace.channel, stage, clock.elapsed().as_secs_f64());
        clock = Instant::now();
    };

    let stats = DayStatistics::compute(&trace.data)?;
    lap(PipelineStage::MetricsOk);

    let windows = Segmenter::new(params.window_length, params.step).segment(trace, &stats)?;
    lap(PipelineStage::Segmented);

    let packed = PackedFrame::pack(&windows);
    lap(PipelineStage::Packed);

    let normalized = time_normalize(&packed.data, params.time_norm, params.smooth_n);
    lap(PipelineStage::TimeNormalized);

    let full = Whitener::for_trace(params, trace.delta()).apply(&normalized)?;
    if full.iter().any(|c| !(c.re.is_finite() && c.im.is_finite())) {
        return Err(SkipReason::NonFinite("spectrum"));
    }
    let spectra = half_spectrum(&full);
    lap(PipelineStage::SpectrumComputed);

    Ok(SpectralFrame {
        spectra,
        nfft: packed.width(),
        dt: trace.delta(),
        timestamps: packed.timestamps,
        metrics: packed.metrics,
        npts: packed.npts,
        stats,
    })
}

/// How a unit ended
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Written {
        unit: String,
        windows: usize,
        nfft: usize,
    },
    Skipped(SkipReason),
}

/// Drives units from a reader into a sink
pub struct Engine {
    pub config: Arc<Config>,
    reader: Arc<dyn TraceReader>,
    sink: Arc<dyn FrameSink>,
    preprocessor: Option<Arc<dyn ResponseRemover>>,
}

impl Engine {
    pub fn new(config: Arc<Config>, reader: Arc<dyn TraceReader>, sink: Arc<dyn FrameSink>) -> Self {
        let preprocessor: Option<Arc<dyn ResponseRemover>> = if config.preprocessing.preprocess {
            Some(Arc::new(SpectralPreprocessor::from_config(&config.preprocessing)))
        } else {
            None
        };

        Self {
            config,
            reader,
            sink,
            preprocessor,
        }
    }

    /// Replace the raw-trace step
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn ResponseRemover>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Process one unit to completion. Skips are logged and returned, never
    /// raised.
    pub fn process_unit(&self, unit: &UnitHandle) -> UnitOutcome {
        match self.try_unit(unit) {
            Ok(outcome) => {
                debug!("{}: {}", unit, PipelineStage::Done);
                outcome
            }
            Err(reason) => {
                warn!("{} {}: {}", unit, PipelineStage::Skipped, reason);
                UnitOutcome::Skipped(reason)
            }
        }
    }

    fn try_unit(&self, unit: &UnitHandle) -> UnitResult<UnitOutcome> {
        let params = &self.config.preprocessing;
        let loaded = self.reader.load(unit)?;

        let trace = match &self.preprocessor {
            Some(pre) => pre.remove_response(&loaded.trace, &loaded.instrument, params.pre_filt)?,
            None => loaded.trace,
        };

        let frame = compute_spectra(&trace, params)?;
        let windows = frame.windows();
        let nfft = frame.nfft;
        let dt = frame.dt;

        let record = FrameRecord {
            location: loaded.location,
            instrument: loaded.instrument,
            component: trace.channel.clone(),
            date_label: trace.day_label(),
            spectra: frame.spectra,
            timestamps: frame.timestamps,
            metrics: frame.metrics,
            npts: frame.npts,
            settings: FrameSettings {
                dt,
                window_length: params.window_length,
                step: params.step,
                nfft,
                time_norm: params.time_norm,
                whitening: params.whitening,
                freqmin: params.freqmin,
                freqmax: params.freqmax,
                smooth_n: params.smooth_n,
            },
        };

        self.sink
            .write_frame(&record)
            .map_err(|e| SkipReason::Sink(format!("{:#}", e)))?;

        info!(
            "Wrote {} {} {}: {} windows, nfft={}",
            record.location.id, record.component, record.date_label, windows, nfft
        );
        Ok(UnitOutcome::Written {
            unit: unit.to_string(),
            windows,
            nfft,
        })
    }

    /// Distribute the units over the configured workers and wait for all of
    /// them
    pub fn run(&self, units: Vec<UnitHandle>) -> Result<RunSummary> {
        info!(
            "Processing {} units from {} input with {} workers",
            units.len(),
            self.reader.name(),
            self.config.workers
        );
        WorkerPool::new(self.config.workers).run(units, |unit| self.process_unit(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FftParameters;
    use crate::config::NormMode;
    use crate::error::SetupError;
    use crate::trace::{
        demo_instrument, flat_trace, InstrumentDescription, LoadedUnit, StationId,
        StationLocation, TraceSimulator, UnitSource,
    };
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct MemorySink {
        frames: Mutex<Vec<FrameRecord>>,
    }

    impl FrameSink for MemorySink {
        fn write_frame(&self, record: &FrameRecord) -> Result<()> {
            self.frames.lock().push(record.clone());
            Ok(())
        }
    }

    struct MemoryReader {
        units: Vec<(UnitHandle, UnitResult<LoadedUnit>)>,
    }

    impl MemoryReader {
        fn new() -> Self {
            Self { units: Vec::new() }
        }

        fn add(&mut self, trace: ContinuousTrace, instrument: InstrumentDescription) -> UnitHandle {
            let handle = UnitHandle {
                station: trace.id.clone(),
                label: format!("{} {} #{}", trace.day_label(), trace.channel, self.units.len()),
                source: UnitSource::SacFiles {
                    paths: vec![PathBuf::from(format!("mem{}", self.units.len()))],
                },
            };
            let location = StationLocation {
                id: trace.id.clone(),
                latitude: 10.0,
                longitude: 20.0,
                elevation: 30.0,
            };
            self.units.push((
                handle.clone(),
                Ok(LoadedUnit {
                    trace,
                    location,
                    instrument,
                }),
            ));
            handle
        }

        fn add_broken(&mut self, id: StationId) -> UnitHandle {
            let handle = UnitHandle {
                station: id,
                label: "broken".into(),
                source: UnitSource::SacFiles {
                    paths: vec![PathBuf::from("broken")],
                },
            };
            self.units
                .push((handle.clone(), Err(SkipReason::Unreadable("truncated header".into()))));
            handle
        }
    }

    impl TraceReader for MemoryReader {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn list_units(&self) -> Result<Vec<UnitHandle>, SetupError> {
            Ok(self.units.iter().map(|(h, _)| h.clone()).collect())
        }

        fn load(&self, unit: &UnitHandle) -> UnitResult<LoadedUnit> {
            self.units
                .iter()
                .find(|(h, _)| h == unit)
                .map(|(_, loaded)| loaded.clone())
                .unwrap_or_else(|| Err(SkipReason::Unreadable(unit.to_string())))
        }
    }

    fn hour_trace(station: &str, seed: u64) -> ContinuousTrace {
        let start = Utc.with_ymd_and_hms(2018, 5, 1, 0, 0, 0).unwrap();
        TraceSimulator::seeded(10.0, seed).noise_trace(StationId::new("DM", station, "00"), "HHZ", start, 3600.0)
    }

    fn config(window_length: f64, step: f64) -> Config {
        let mut config = Config::default();
        config.workers = 2;
        config.preprocessing.window_length = window_length;
        config.preprocessing.step = step;
        config
    }

    fn run_one(config: Config, trace: ContinuousTrace) -> (UnitOutcome, Vec<FrameRecord>) {
        let mut reader = MemoryReader::new();
        let handle = reader.add(trace, InstrumentDescription::without_response());
        let sink = Arc::new(MemorySink::default());
        let engine = Engine::new(Arc::new(config), Arc::new(reader), sink.clone());
        let outcome = engine.process_unit(&handle);
        let frames = sink.frames.lock().clone();
        (outcome, frames)
    }

    #[test]
    fn test_one_hour_single_window() {
        let (outcome, frames) = run_one(config(3600.0, 1800.0), hour_trace("S00", 1));
        assert!(matches!(outcome, UnitOutcome::Written { windows: 1, nfft: 36_000, .. }));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].spectra.dim(), (1, 18_000));
        assert_eq!(frames[0].npts, vec![36_000]);
        assert_eq!(frames[0].date_label, "2018_05_01");
        assert_eq!(frames[0].component, "HHZ");
    }

    #[test]
    fn test_one_hour_two_disjoint_windows() {
        let (outcome, frames) = run_one(config(1800.0, 1800.0), hour_trace("S00", 2));
        assert!(matches!(outcome, UnitOutcome::Written { windows: 2, .. }));
        let frame = &frames[0];
        assert_eq!(frame.spectra.nrows(), 2);
        assert_eq!(frame.settings.nfft, 18_000);
        assert_eq!(frame.timestamps[[1, 0]] - frame.timestamps[[0, 0]], 1800.0);
    }

    #[test]
    fn test_one_hour_three_overlapping_windows() {
        let (outcome, frames) = run_one(config(1800.0, 900.0), hour_trace("S00", 3));
        assert!(matches!(outcome, UnitOutcome::Written { windows: 3, .. }));
        let starts: Vec<f64> = frames[0].timestamps.column(0).to_vec();
        let t0 = starts[0];
        assert_eq!(starts, vec![t0, t0 + 900.0, t0 + 1800.0]);
        assert!(frames[0].metrics.column(2).iter().all(|&f| f > 0.99));
    }

    #[test]
    fn test_constant_trace_is_skipped_without_output() {
        let start = Utc.with_ymd_and_hms(2018, 5, 1, 0, 0, 0).unwrap();
        let dead = flat_trace(StationId::new("DM", "S00", "00"), "HHE", start, 3600.0, 10.0, 3.0);
        let (outcome, frames) = run_one(config(3600.0, 1800.0), dead);
        assert!(matches!(
            outcome,
            UnitOutcome::Skipped(SkipReason::DegenerateTrace { .. })
        ));
        assert!(frames.is_empty());
    }

    #[test]
    fn test_short_trace_has_no_windows() {
        let mut trace = hour_trace("S00", 4);
        trace.data.truncate(20_000);
        let (outcome, frames) = run_one(config(3600.0, 1800.0), trace);
        assert!(matches!(
            outcome,
            UnitOutcome::Skipped(SkipReason::NoUsableWindows { npts: 20_000, .. })
        ));
        assert!(frames.is_empty());
    }

    #[test]
    fn test_normalized_and_whitened_output_is_finite() {
        let mut config = config(1800.0, 900.0);
        config.preprocessing.time_norm = NormMode::RunningMean;
        config.preprocessing.whitening = NormMode::RunningMean;
        config.preprocessing.smooth_n = 20;

        let frame = compute_spectra(&hour_trace("S01", 5), &config.preprocessing).unwrap();
        assert_eq!(frame.windows(), 3);
        assert!(frame.spectra.iter().all(|c| c.re.is_finite() && c.im.is_finite()));
        // DC removed by whitening
        assert!(frame.spectra.column(0).iter().all(|c| c.norm() == 0.0));

        config.preprocessing.time_norm = NormMode::OneBit;
        config.preprocessing.whitening = NormMode::OneBit;
        let frame = compute_spectra(&hour_trace("S01", 5), &config.preprocessing).unwrap();
        assert!(frame.spectra.iter().all(|c| c.norm() <= 1.0 + 1e-6));
    }

    fn twenty_hz_trace(seed: u64) -> ContinuousTrace {
        let start = Utc.with_ymd_and_hms(2018, 5, 1, 0, 0, 0).unwrap();
        TraceSimulator::seeded(20.0, seed).noise_trace(StationId::new("DM", "S03", "00"), "HHZ", start, 3600.0)
    }

    #[test]
    fn test_whitening_band_uses_trace_rate() {
        // raw data at 20 Hz, target rate left at 10 Hz, no resampling
        let mut config = config(1800.0, 900.0);
        config.preprocessing.whitening = NormMode::OneBit;
        config.preprocessing.freqmin = 1.0;
        config.preprocessing.freqmax = 2.0;
        config.preprocessing.taper_bins = 100;

        let frame = compute_spectra(&twenty_hz_trace(9), &config.preprocessing).unwrap();
        assert_eq!(frame.nfft, 36_000);
        assert_eq!(frame.dt, 0.05);

        // bin k sits at k / (nfft * dt) = k / 1800 Hz
        let amp = |k: usize| frame.spectra[[0, k]].norm();
        for k in [1_900, 2_700, 3_500] {
            assert!((amp(k) - 1.0).abs() < 1e-4, "bin {} at {} Hz", k, k as f64 / 1800.0);
        }
        for k in [1_000, 4_000, 6_000] {
            assert_eq!(amp(k), 0.0, "bin {} at {} Hz", k, k as f64 / 1800.0);
        }
    }

    #[test]
    fn test_stored_interval_matches_data() {
        let (outcome, frames) = run_one(config(1800.0, 1800.0), twenty_hz_trace(10));
        assert!(matches!(outcome, UnitOutcome::Written { windows: 2, nfft: 36_000, .. }));

        let record = &frames[0];
        assert_eq!(record.settings.dt, 0.05);
        assert_eq!(record.npts, vec![36_000, 36_000]);
        let parameters = FftParameters::from_record(record);
        assert_eq!(parameters.dt, 0.05);
        assert_eq!(parameters.nfft, 36_000);
    }

    struct CountingPreprocessor {
        calls: Mutex<usize>,
    }

    impl ResponseRemover for CountingPreprocessor {
        fn remove_response(
            &self,
            trace: &ContinuousTrace,
            _instrument: &InstrumentDescription,
            _pre_filt: [f64; 4],
        ) -> UnitResult<ContinuousTrace> {
            *self.calls.lock() += 1;
            let mut out = trace.clone();
            out.data.iter_mut().for_each(|x| *x *= 2.0);
            Ok(out)
        }
    }

    #[test]
    fn test_custom_preprocessor_runs_before_windowing() {
        let mut reader = MemoryReader::new();
        let handle = reader.add(hour_trace("S00", 11), InstrumentDescription::default());
        let sink = Arc::new(MemorySink::default());
        let pre = Arc::new(CountingPreprocessor { calls: Mutex::new(0) });

        let engine = Engine::new(Arc::new(config(3600.0, 1800.0)), Arc::new(reader), sink.clone())
            .with_preprocessor(pre.clone());
        assert!(matches!(engine.process_unit(&handle), UnitOutcome::Written { windows: 1, .. }));
        assert_eq!(*pre.calls.lock(), 1);
        assert_eq!(sink.frames.lock().len(), 1);
    }

    #[test]
    fn test_missing_response_skips_when_required() {
        let mut config = config(1800.0, 1800.0);
        config.preprocessing.preprocess = true;
        config.preprocessing.remove_response = true;

        let (outcome, frames) = run_one(config.clone(), hour_trace("S00", 6));
        assert!(matches!(
            outcome,
            UnitOutcome::Skipped(SkipReason::MissingInstrumentMetadata(_))
        ));
        assert!(frames.is_empty());

        let mut reader = MemoryReader::new();
        let handle = reader.add(hour_trace("S00", 6), demo_instrument());
        let sink = Arc::new(MemorySink::default());
        let engine = Engine::new(Arc::new(config), Arc::new(reader), sink.clone());
        assert!(matches!(
            engine.process_unit(&handle),
            UnitOutcome::Written { windows: 2, .. }
        ));
    }

    #[test]
    fn test_run_continues_past_failures() {
        let mut reader = MemoryReader::new();
        let start = Utc.with_ymd_and_hms(2018, 5, 1, 0, 0, 0).unwrap();
        reader.add(hour_trace("S00", 7), InstrumentDescription::default());
        reader.add_broken(StationId::new("DM", "S01", "00"));
        reader.add(
            flat_trace(StationId::new("DM", "S01", "00"), "HHE", start, 3600.0, 10.0, 0.0),
            InstrumentDescription::default(),
        );
        reader.add(hour_trace("S02", 8), InstrumentDescription::default());
        let units = reader.list_units().unwrap();

        let sink = Arc::new(MemorySink::default());
        let engine = Engine::new(Arc::new(config(1800.0, 900.0)), Arc::new(reader), sink.clone());
        let summary = engine.run(units).unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.windows, 6);
        assert_eq!(summary.skip_kinds["unreadable"], 1);
        assert_eq!(summary.skip_kinds["degenerate"], 1);
        assert_eq!(sink.frames.lock().len(), 2);
    }
}
