//! Trace module - data model, format readers and synthetic data

mod traits;
mod sac;
mod station_table;
mod archive_reader;
mod simulator;

pub use traits::*;
pub use sac::{SacDirectoryReader, SacFile};
pub use station_table::{parse_station_table, read_station_table};
pub use archive_reader::ArchiveReader;
pub use simulator::{demo_instrument, flat_trace, write_demo_archives, TraceSimulator};

use std::path::PathBuf;
use tracing::info;

use crate::config::{Config, InputFormat};
use crate::error::SetupError;

/// Build the reader for the selected format. Directory formats load the
/// station table here so an empty table aborts before any work starts.
pub fn open_reader(config: &Config, format: InputFormat) -> Result<Box<dyn TraceReader>, SetupError> {
    let root = &config.data.input_root;
    if !root.is_dir() {
        return Err(SetupError::NoInput(root.clone()));
    }

    let reader: Box<dyn TraceReader> = match format {
        InputFormat::Archive => Box::new(ArchiveReader::new(root)),
        InputFormat::Sac => {
            let stations = read_station_table(&config.data.station_list)?;
            info!("Station table lists {} stations", stations.len());
            Box::new(SacDirectoryReader::new(root, stations)?)
        }
    };
    info!("Reading {} data from {:?}", reader.name(), root);
    Ok(reader)
}

/// Everything a run needs once setup has succeeded
pub struct RunPlan {
    pub reader: Box<dyn TraceReader>,
    pub units: Vec<UnitHandle>,
    /// Where the run parameters were recorded
    pub metadata: PathBuf,
}

/// Validate, open the input and discover units. The parameter record is
/// written only after discovery succeeds, so a failed setup leaves the
/// output directory untouched.
pub fn prepare_run(config: &Config) -> anyhow::Result<RunPlan> {
    let format = config.validate()?;
    let reader = open_reader(config, format)?;
    let units = reader.list_units()?;
    info!("Discovered {} units with the {} reader", units.len(), reader.name());

    let metadata = config.write_metadata()?;
    info!("Run parameters recorded in {:?}", metadata);
    Ok(RunPlan {
        reader,
        units,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.data.input_root = dir.join("raw");
        config.data.output_dir = dir.join("fft");
        config
    }

    #[test]
    fn test_failed_discovery_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.data.input_root).unwrap();

        let err = prepare_run(&config).err().unwrap();
        assert!(matches!(err.downcast_ref::<SetupError>(), Some(SetupError::NoInput(_))));
        assert!(!config.data.output_dir.exists());
        assert!(!config.data.metadata_path().exists());
    }

    #[test]
    fn test_missing_root_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        assert!(prepare_run(&config).is_err());
        assert!(!config.data.output_dir.exists());
    }

    #[test]
    fn test_prepared_run_records_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_demo_archives(&config.data.input_root, 1, 1, 3600.0, 10.0, 3).unwrap();

        let plan = prepare_run(&config).unwrap();
        assert!(!plan.units.is_empty());
        assert_eq!(plan.metadata, config.data.metadata_path());
        let saved = Config::load(&plan.metadata).unwrap();
        assert_eq!(saved.preprocessing.window_length, config.preprocessing.window_length);
    }
}
