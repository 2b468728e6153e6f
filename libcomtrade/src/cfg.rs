use std::fmt;
use std::str::FromStr;

use super::computed::ComputedChannel;
use super::constants::*;
use super::error::{CfgError, DatError};
use super::timestamp::ComtradeTimestamp;

/// Encoding of the samples in the DAT file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    Ascii,
    Binary,
}

impl FromStr for FileType {
    type Err = DatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if upper == "ASCII" {
            Ok(Self::Ascii)
        } else if upper == "BINARY" {
            Ok(Self::Binary)
        } else {
            Err(DatError::UnsupportedFileType(s.trim().to_string()))
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascii => write!(f, "ASCII"),
            Self::Binary => write!(f, "BINARY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalogChannelDef {
    pub index: usize,
    pub id: String,
    pub phase: String,
    pub component: String,
    pub unit: String,
    pub multiplier: f64,
    pub offset: f64,
    pub skew: f64,
    pub min: i64,
    pub max: i64,
    pub primary: f64,
    pub secondary: f64,
    pub reference: String,
    /// Display group, once one has been assigned
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DigitalChannelDef {
    pub index: usize,
    pub id: String,
    pub phase: String,
    pub component: String,
    pub normal_state: bool,
    pub group: Option<String>,
}

/// One entry of the sampling-rate schedule. `end_sample` is the last sample using `rate`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SamplingRate {
    pub rate: f64,
    pub end_sample: u64,
}

/// The decoded CFG header of a COMTRADE recording.
///
/// Created once by [`parse_cfg`] and not modified afterwards, except that computed channels
/// may be appended to `computed`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComtradeConfig {
    pub station: String,
    pub device: String,
    pub revision: String,
    pub analog: Vec<AnalogChannelDef>,
    pub digital: Vec<DigitalChannelDef>,
    pub line_frequency: f64,
    pub sampling_rates: Vec<SamplingRate>,
    pub start: ComtradeTimestamp,
    pub trigger: ComtradeTimestamp,
    pub file_type: FileType,
    pub time_multiplier: f64,
    pub time_code: Option<String>,
    pub local_code: Option<String>,
    pub tmq_code: Option<String>,
    pub leap_sec: Option<String>,
    pub computed: Vec<ComputedChannel>,
}

impl ComtradeConfig {
    /// Microseconds since midnight of the first sample
    pub fn base_microseconds(&self) -> u64 {
        self.start.total_microseconds
    }

    pub fn analog_ids(&self) -> Vec<String> {
        self.analog.iter().map(|ch| ch.id.clone()).collect()
    }

    pub fn digital_ids(&self) -> Vec<String> {
        self.digital.iter().map(|ch| ch.id.clone()).collect()
    }

    /// Samples declared by the sampling-rate schedule
    pub fn declared_samples(&self) -> u64 {
        self.sampling_rates.last().map_or(0, |r| r.end_sample)
    }

    /// Byte size of one binary DAT record
    pub fn binary_record_size(&self) -> usize {
        BINARY_LEADING_BYTES + 2 * self.analog.len() + 2 * self.digital.len().div_ceil(DIGITAL_WORD_BITS)
    }

    pub fn is_2013(&self) -> bool {
        self.revision == REVISION_2013
    }
}

/// A CFG text split into trimmed rows, walked front to back
struct CfgRows<'a> {
    rows: Vec<&'a str>,
    cursor: usize,
}

impl<'a> CfgRows<'a> {
    fn new(text: &'a str) -> Self {
        let mut rows: Vec<&str> = text.lines().map(|line| line.trim()).collect();
        while rows.last().is_some_and(|row| row.is_empty()) {
            rows.pop();
        }
        Self { rows, cursor: 0 }
    }

    fn peek(&self, ahead: usize) -> Option<&'a str> {
        self.rows.get(self.cursor + ahead).copied()
    }

    fn next(&mut self) -> Option<(usize, &'a str)> {
        let row = self.rows.get(self.cursor).copied()?;
        self.cursor += 1;
        Some((self.cursor - 1, row))
    }
}

fn cells(row: &str) -> Vec<&str> {
    row.split(',').map(|cell| cell.trim()).collect()
}

fn looks_like_date(row: &str) -> bool {
    row.contains('/') || row.contains(':')
}

fn looks_like_rate_pair(row: &str) -> bool {
    let cs = cells(row);
    cs.len() == 2 && cs.iter().all(|c| c.parse::<f64>().is_ok())
}

fn parse_required<T: FromStr>(row: usize, field: &'static str, cell: &str) -> Result<T, CfgError> {
    cell.parse::<T>().map_err(|_| CfgError::BadNumber {
        row,
        field,
        value: cell.to_string(),
    })
}

fn parse_or(cells: &[&str], idx: usize, default: f64) -> f64 {
    cells
        .get(idx)
        .and_then(|c| c.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn text_at(cells: &[&str], idx: usize) -> String {
    cells.get(idx).map_or(String::new(), |c| c.to_string())
}

/// Strip the A/D suffix of a channel count cell
fn parse_count(row: usize, field: &'static str, cell: &str) -> Result<usize, CfgError> {
    let digits = cell.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    parse_required(row, field, digits)
}

fn parse_analog(row: usize, line: &str) -> Result<AnalogChannelDef, CfgError> {
    let cs = cells(line);
    // 1991/1999 recorders may leave off primary, secondary and reference
    if cs.len() < ANALOG_DEF_FIELDS - 3 {
        return Err(CfgError::BadChannelDefinition(row, ANALOG_DEF_FIELDS - 3));
    }
    Ok(AnalogChannelDef {
        index: parse_required(row, "analog channel index", cs[0])?,
        id: text_at(&cs, 1),
        phase: text_at(&cs, 2),
        component: text_at(&cs, 3),
        unit: text_at(&cs, 4),
        multiplier: parse_or(&cs, 5, 1.0),
        offset: parse_or(&cs, 6, 0.0),
        skew: parse_or(&cs, 7, 0.0),
        min: parse_or(&cs, 8, 0.0) as i64,
        max: parse_or(&cs, 9, 0.0) as i64,
        primary: parse_or(&cs, 10, 1.0),
        secondary: parse_or(&cs, 11, 1.0),
        reference: cs.get(12).map_or(String::from("P"), |c| c.to_string()),
        group: None,
    })
}

fn parse_digital(row: usize, line: &str) -> Result<DigitalChannelDef, CfgError> {
    let cs = cells(line);
    if cs.len() < 3 {
        return Err(CfgError::BadChannelDefinition(row, 3));
    }
    let index = parse_required(row, "digital channel index", cs[0])?;
    // 1999 and later use n,id,ph,ccbm,y; older files use n,id,y
    let (phase, component, state) = if cs.len() >= DIGITAL_DEF_FIELDS {
        (text_at(&cs, 2), text_at(&cs, 3), cs[4])
    } else {
        (String::new(), String::new(), cs[cs.len() - 1])
    };
    Ok(DigitalChannelDef {
        index,
        id: text_at(&cs, 1),
        phase,
        component,
        normal_state: state == "1",
        group: None,
    })
}

fn parse_rate(row: usize, line: &str) -> Result<SamplingRate, CfgError> {
    let cs = cells(line);
    if cs.len() < 2 {
        return Err(CfgError::BadNumber {
            row,
            field: "sampling rate",
            value: line.to_string(),
        });
    }
    let rate: f64 = parse_required(row, "sampling rate", cs[0])?;
    let end: f64 = parse_required(row, "end sample", cs[1])?;
    Ok(SamplingRate {
        rate,
        end_sample: end.max(0.0) as u64,
    })
}

fn parse_timestamp(
    rows: &mut CfgRows,
    which: &'static str,
) -> Result<ComtradeTimestamp, CfgError> {
    let (row, line) = rows
        .next()
        .ok_or_else(|| CfgError::MalformedHeader(format!("missing {which} timestamp row")))?;
    line.parse::<ComtradeTimestamp>()
        .map_err(|source| CfgError::InvalidDateTime { row, which, source })
}

fn split_pair(line: &str) -> (Option<String>, Option<String>) {
    let cs = cells(line);
    let first = cs.first().filter(|c| !c.is_empty()).map(|c| c.to_string());
    let second = cs.get(1).filter(|c| !c.is_empty()).map(|c| c.to_string());
    (first, second)
}

/// Parse the text of a CFG file.
///
/// Rows are read in order: identification, channel counts, analog and digital definitions,
/// line frequency, sampling-rate schedule, start and trigger timestamps, file type, time
/// multiplier and the 2013 time-code rows. Rows after the timestamps may be missing, in
/// which case the defaults are ASCII, a multiplier of 1 and no time codes.
pub fn parse_cfg(text: &str) -> Result<ComtradeConfig, CfgError> {
    let mut rows = CfgRows::new(text);
    let mut config = ComtradeConfig {
        line_frequency: DEFAULT_LINE_FREQUENCY,
        time_multiplier: 1.0,
        ..Default::default()
    };

    let (_, id_row) = rows
        .next()
        .ok_or_else(|| CfgError::MalformedHeader(String::from("CFG is empty")))?;
    let id_cells = cells(id_row);
    config.station = text_at(&id_cells, 0);
    config.device = text_at(&id_cells, 1);
    config.revision = id_cells
        .get(2)
        .filter(|c| !c.is_empty())
        .map_or(String::from(REVISION_1999), |c| c.to_string());

    let (count_row, count_line) = rows
        .next()
        .filter(|(_, line)| !line.is_empty())
        .ok_or_else(|| CfgError::MalformedHeader(String::from("missing channel count row")))?;
    let count_cells = cells(count_line);
    let (n_analog, n_digital) = match count_cells.len() {
        2 => (
            parse_count(count_row, "analog count", count_cells[0])?,
            parse_count(count_row, "digital count", count_cells[1])?,
        ),
        n if n >= 3 => (
            parse_count(count_row, "analog count", count_cells[1])?,
            parse_count(count_row, "digital count", count_cells[2])?,
        ),
        _ => {
            return Err(CfgError::MalformedHeader(format!(
                "row {count_row} is not a channel count row: {count_line:?}"
            )))
        }
    };

    for n in 0..n_analog {
        let (row, line) = rows.next().ok_or_else(|| {
            CfgError::MalformedHeader(format!("expected {n_analog} analog definitions, found {n}"))
        })?;
        config.analog.push(parse_analog(row, line)?);
    }
    for n in 0..n_digital {
        let (row, line) = rows.next().ok_or_else(|| {
            CfgError::MalformedHeader(format!(
                "expected {n_digital} digital definitions, found {n}"
            ))
        })?;
        config.digital.push(parse_digital(row, line)?);
    }

    // Line frequency row, which some writers omit
    match (rows.peek(0), rows.peek(1)) {
        (Some(freq), Some(after)) if looks_like_rate_pair(freq) && looks_like_date(after) => {
            // No frequency and no nrates: the row is the only rate entry
            let (row, line) = rows.next().ok_or(CfgError::MalformedHeader(String::from(
                "missing sampling rate row",
            )))?;
            config.sampling_rates.push(parse_rate(row, line)?);
        }
        (Some(first), Some(second)) => {
            let first_is_scalar = cells(first).len() == 1;
            let second_is_scalar = cells(second).len() == 1 && !looks_like_date(second);
            if first_is_scalar && second_is_scalar {
                match rows.next() {
                    Some((_, line)) if line.trim().is_empty() => log::warn!(
                        "CFG line frequency is blank, using {} Hz",
                        config.line_frequency
                    ),
                    Some((row, line)) => {
                        config.line_frequency = parse_required(row, "line frequency", line)?;
                    }
                    None => (),
                }
            }
            read_rate_schedule(&mut rows, &mut config)?;
        }
        _ => {
            return Err(CfgError::MalformedHeader(String::from(
                "missing sampling rate rows",
            )))
        }
    }

    config.start = parse_timestamp(&mut rows, "start")?;
    config.trigger = parse_timestamp(&mut rows, "trigger")?;

    if let Some((_, line)) = rows.next().filter(|(_, line)| !line.is_empty()) {
        config.file_type = line.parse::<FileType>()?;
    }
    if let Some((_, line)) = rows.next() {
        let multiplier = line.parse::<f64>().unwrap_or(1.0);
        config.time_multiplier = if multiplier == 0.0 { 1.0 } else { multiplier };
    }
    if config.is_2013() {
        if let Some((_, line)) = rows.next() {
            (config.time_code, config.local_code) = split_pair(line);
        }
        if let Some((_, line)) = rows.next() {
            (config.tmq_code, config.leap_sec) = split_pair(line);
        }
    }

    Ok(config)
}

fn read_rate_schedule(rows: &mut CfgRows, config: &mut ComtradeConfig) -> Result<(), CfgError> {
    let (row, line) = rows
        .next()
        .ok_or_else(|| CfgError::MalformedHeader(String::from("missing nrates row")))?;
    let n_rates: i64 = parse_required(row, "number of sampling rates", line)?;
    if n_rates <= 0 {
        if let Some(fallback) = rows.peek(0).filter(|r| !looks_like_date(r)) {
            if let Ok(rate) = parse_rate(row + 1, fallback) {
                config.sampling_rates.push(rate);
                rows.next();
            }
        }
        return Ok(());
    }
    for _ in 0..n_rates {
        match rows.peek(0) {
            Some(next) if !looks_like_date(next) => {
                if let Some((row, line)) = rows.next() {
                    config.sampling_rates.push(parse_rate(row, line)?);
                }
            }
            _ => {
                log::warn!(
                    "CFG declares {n_rates} sampling rates but only {} were present",
                    config.sampling_rates.len()
                );
                break;
            }
        }
    }
    Ok(())
}
