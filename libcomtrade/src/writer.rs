use std::path::Path;

use super::cfg::ComtradeConfig;
use super::constants::REVISION_2013;
use super::dat::Dataset;
use super::error::ProcessorError;
use super::merger::{prepare_combined_file, FileGroup};

/// Text of an emitted CFG/DAT pair
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportedFile {
    pub cfg_text: String,
    pub dat_text: String,
}

impl ExportedFile {
    /// Write `<stem>.cfg` and `<stem>.dat` into `dir`
    pub fn write_to(&self, dir: &Path, stem: &str) -> Result<(), ProcessorError> {
        let cfg_path = dir.join(format!("{stem}.cfg"));
        let dat_path = dir.join(format!("{stem}.dat"));
        std::fs::write(&cfg_path, &self.cfg_text)?;
        std::fs::write(&dat_path, &self.dat_text)?;
        log::info!(
            "Wrote {} and {} ({})",
            cfg_path.display(),
            dat_path.display(),
            human_bytes::human_bytes((self.cfg_text.len() + self.dat_text.len()) as f64)
        );
        Ok(())
    }
}

/// Render a config as a 2013 ASCII CFG
pub fn render_cfg(cfg: &ComtradeConfig) -> String {
    let mut lines = Vec::with_capacity(cfg.analog.len() + cfg.digital.len() + 12);
    lines.push(format!("{},{},{}", cfg.station, cfg.device, REVISION_2013));
    lines.push(format!("{},{}", cfg.analog.len(), cfg.digital.len()));
    for (n, def) in cfg.analog.iter().enumerate() {
        lines.push(format!(
            "{},{},,,{},{},{},{},{},{},{},{},{}",
            n + 1,
            def.id,
            def.unit,
            def.multiplier,
            def.offset,
            def.skew,
            def.min,
            def.max,
            def.primary,
            def.secondary,
            def.reference
        ));
    }
    for (n, def) in cfg.digital.iter().enumerate() {
        lines.push(format!("{},{},,,{}", n + 1, def.id, u8::from(def.normal_state)));
    }
    lines.push(format!("{}", cfg.line_frequency));
    lines.push(format!("{}", cfg.sampling_rates.len()));
    for rate in cfg.sampling_rates.iter() {
        lines.push(format!("{},{}", rate.rate, rate.end_sample));
    }
    lines.push(cfg.start.format_cfg());
    lines.push(cfg.trigger.format_cfg());
    lines.push(String::from("ASCII"));
    // Readers take a zero multiplier as 1
    lines.push(String::from("0"));
    lines.push(String::from("0,0"));
    lines.push(String::from("0,0"));
    lines.join("\n")
}

/// Render samples as ASCII DAT rows: 1-based sample number, integer microseconds, analog
/// values, digital states
pub fn render_dat(data: &Dataset) -> String {
    let mut lines = Vec::with_capacity(data.len());
    for (i, t) in data.time.iter().enumerate() {
        let mut line = format!("{},{}", i + 1, t.round() as i64);
        for column in data.analog.iter() {
            line.push_str(&format!(",{}", column[i]));
        }
        for column in data.digital.iter() {
            line.push_str(&format!(",{}", column[i]));
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Combine a group's files and render the result
pub fn export_group(group: &FileGroup) -> ExportedFile {
    let combined = prepare_combined_file(group);
    ExportedFile {
        cfg_text: render_cfg(&combined.cfg),
        dat_text: render_dat(&combined.data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{parse_cfg, FileType};
    use crate::dat::parse_dat;
    use crate::merger::tests::recording;
    use crate::merger::{merge, MergeOptions};

    #[test]
    fn test_exported_pair_parses_back() {
        let files = vec![recording(
            "solo",
            "12:30:00.250000",
            &["IA", "VA"],
            "1,0,1.5,-2\n2,1000,3,4\n3,2000,5,6.25\n",
        )];
        let groups = merge(&files, &MergeOptions::default());
        let exported = export_group(&groups[0]);
        assert!(!exported.cfg_text.ends_with('\n'));
        assert!(!exported.dat_text.ends_with('\n'));
        let cfg_lines: Vec<&str> = exported.cfg_text.lines().collect();
        assert_eq!(cfg_lines[1], "2,0");
        assert_eq!(cfg_lines[cfg_lines.len() - 4..], ["ASCII", "0", "0,0", "0,0"]);

        let cfg = match parse_cfg(&exported.cfg_text) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(cfg.revision, "2013");
        assert_eq!(cfg.analog_ids(), files[0].cfg.analog_ids());
        let units: Vec<&str> = cfg.analog.iter().map(|d| d.unit.as_str()).collect();
        assert_eq!(units, vec!["A", "A"]);
        assert_eq!(cfg.digital.len(), 0);
        assert_eq!(cfg.declared_samples(), 3);
        assert_eq!(cfg.start, files[0].cfg.start);
        assert_eq!(cfg.time_multiplier, 1.0);

        let data = match parse_dat(exported.dat_text.as_bytes(), &cfg, FileType::Ascii) {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(data.len(), 3);
        assert_eq!(data.analog, files[0].data.analog);
        assert_eq!(data.time, files[0].data.time);
    }

    #[test]
    fn test_dat_rows() {
        let data = Dataset {
            time: vec![0.0, 125.0],
            analog: vec![vec![1.0, 2.5]],
            digital: vec![vec![0, 1]],
            ..Default::default()
        };
        assert_eq!(render_dat(&data), "1,0,1,0\n2,125,2.5,1");
    }
}
