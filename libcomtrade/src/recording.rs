use std::path::Path;

use super::cfg::{parse_cfg, ComtradeConfig};
use super::dat::{parse_dat, Dataset};
use super::error::LoadError;
use super::pairing::FilePair;

/// A decoded CFG/DAT pair
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComtradeFile {
    pub name: String,
    pub cfg: ComtradeConfig,
    pub data: Dataset,
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::IOError {
        path: path.to_path_buf(),
        source,
    })
}

impl ComtradeFile {
    pub fn new(name: &str, cfg: ComtradeConfig, data: Dataset) -> Self {
        Self {
            name: name.to_string(),
            cfg,
            data,
        }
    }

    /// Read and decode both files of a pair
    pub fn load(pair: &FilePair) -> Result<Self, LoadError> {
        let cfg_bytes = read_bytes(&pair.cfg_path)?;
        // Station names are not always UTF-8
        let cfg = parse_cfg(&String::from_utf8_lossy(&cfg_bytes)).map_err(|source| {
            LoadError::Cfg {
                path: pair.cfg_path.clone(),
                source,
            }
        })?;
        let dat_bytes = read_bytes(&pair.dat_path)?;
        log::info!(
            "Decoding {} ({} {} DAT)",
            pair.stem,
            human_bytes::human_bytes(dat_bytes.len() as f64),
            cfg.file_type
        );
        let data = parse_dat(&dat_bytes, &cfg, cfg.file_type).map_err(|source| LoadError::Dat {
            path: pair.dat_path.clone(),
            source,
        })?;
        let name = pair
            .cfg_path
            .file_stem()
            .map_or(pair.stem.clone(), |s| s.to_string_lossy().to_string());
        Ok(Self::new(&name, cfg, data))
    }

    /// Acquisition start, in seconds on a common axis
    pub fn timestamp(&self) -> f64 {
        self.cfg.start.epoch_seconds()
    }

    pub fn sample_count(&self) -> usize {
        self.data.len()
    }
}
