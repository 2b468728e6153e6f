use std::path::{Path, PathBuf};

use super::error::PairingError;

/// A CFG file and the DAT file sharing its stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub stem: String,
    pub cfg_path: PathBuf,
    pub dat_path: PathBuf,
}

/// Complete pairs plus a failure entry for every CFG or DAT left without a partner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairingReport {
    pub pairs: Vec<FilePair>,
    pub failures: Vec<PairingError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Cfg,
    Dat,
}

fn classify(path: &Path) -> Option<(String, Kind)> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    let kind = match ext.as_str() {
        "cfg" => Kind::Cfg,
        "dat" => Kind::Dat,
        _ => return None,
    };
    let stem = path.file_stem()?.to_string_lossy().to_lowercase();
    Some((stem, kind))
}

/// Pair `.cfg` and `.dat` files whose stems match, ignoring case.
///
/// Pairs come out in the order their CFG files were given. Files with other extensions
/// are ignored; when a stem appears more than once for one kind, the first file is used.
pub fn match_file_pairs(files: &[PathBuf]) -> PairingReport {
    let mut cfgs: Vec<(String, &PathBuf)> = Vec::new();
    let mut dats: Vec<(String, &PathBuf)> = Vec::new();
    for path in files {
        match classify(path) {
            Some((stem, Kind::Cfg)) if !cfgs.iter().any(|(s, _)| *s == stem) => {
                cfgs.push((stem, path))
            }
            Some((stem, Kind::Dat)) if !dats.iter().any(|(s, _)| *s == stem) => {
                dats.push((stem, path))
            }
            _ => (),
        }
    }

    let mut report = PairingReport::default();
    for (stem, cfg_path) in cfgs.iter() {
        match dats.iter().find(|(s, _)| s == stem) {
            Some((_, dat_path)) => report.pairs.push(FilePair {
                stem: stem.clone(),
                cfg_path: (*cfg_path).clone(),
                dat_path: (*dat_path).clone(),
            }),
            None => report
                .failures
                .push(PairingError::MissingDat((*cfg_path).clone())),
        }
    }
    for (stem, dat_path) in dats.iter() {
        if !cfgs.iter().any(|(s, _)| s == stem) {
            report
                .failures
                .push(PairingError::MissingCfg((*dat_path).clone()));
        }
    }
    for failure in report.failures.iter() {
        log::warn!("Excluding unpaired file: {failure}");
    }
    report
}

/// Pair the COMTRADE files found directly inside `dir`
pub fn read_dir_pairs(dir: &Path) -> Result<PairingReport, std::io::Error> {
    let mut files = Vec::new();
    for item in dir.read_dir()? {
        let path = item?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(match_file_pairs(&files))
}
