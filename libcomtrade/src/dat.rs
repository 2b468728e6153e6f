use bitvec::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use time::PrimitiveDateTime;

use super::cfg::{ComtradeConfig, FileType, SamplingRate};
use super::constants::*;
use super::error::{DatError, TimestampError};
use super::timestamp::ComtradeTimestamp;

/// Unit used to present the time axis. Datasets always store microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    #[default]
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    pub fn convert_micros(&self, micros: f64) -> f64 {
        match self {
            Self::Microseconds => micros,
            Self::Milliseconds => micros / 1.0e3,
            Self::Seconds => micros / MICROS_PER_SECOND,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    rate: f64,
    prev_end: u64,
    end: u64,
    prev_seconds: f64,
}

/// Reconstructs the time of a sample from its index and the sampling-rate schedule.
///
/// Time stamps written in the DAT file are never consulted. Within a rate segment the
/// spacing is exactly `1/rate`, and each segment starts where the previous one ended.
#[derive(Debug, Clone)]
pub struct SampleClock {
    segments: Vec<Segment>,
}

impl SampleClock {
    pub fn new(schedule: &[SamplingRate]) -> Self {
        let mut segments = Vec::with_capacity(schedule.len());
        let mut prev_end = 0;
        let mut prev_seconds = 0.0;
        for entry in schedule {
            let seg = Segment {
                rate: entry.rate,
                prev_end,
                end: entry.end_sample,
                prev_seconds,
            };
            prev_seconds += seg.seconds_until(seg.end);
            prev_end = entry.end_sample;
            segments.push(seg);
        }
        if schedule.iter().any(|r| r.rate <= 0.0) {
            log::warn!("Sampling rate schedule has non-positive rates; those segments use 1 us spacing");
        }
        Self { segments }
    }

    /// Seconds from the first sample to sample `index` (zero based)
    pub fn seconds_at(&self, index: u64) -> f64 {
        if self.segments.is_empty() {
            return index as f64 / MICROS_PER_SECOND;
        }
        let pos = self.segments.partition_point(|seg| seg.end < index);
        let seg = self.segments[pos.min(self.segments.len() - 1)];
        seg.prev_seconds + seg.seconds_until(index)
    }

    pub fn micros_at(&self, index: u64) -> f64 {
        self.seconds_at(index) * MICROS_PER_SECOND
    }
}

impl Segment {
    fn seconds_until(&self, index: u64) -> f64 {
        let steps = index as f64 - self.prev_end as f64;
        if self.rate > 0.0 {
            steps / self.rate
        } else {
            steps / MICROS_PER_SECOND
        }
    }
}

/// Decoded samples of a recording.
///
/// `time` is in microseconds from the first sample. `analog[k]` and `digital[k]` are
/// parallel to `time`. Missing analog samples hold [`MISSING_SAMPLE`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub time: Vec<f64>,
    pub analog: Vec<Vec<f64>>,
    pub digital: Vec<Vec<u8>>,
    pub start_date: ComtradeTimestamp,
    /// Values of computed channels, parallel to the config's computed list
    pub computed_data: Vec<Vec<f64>>,
}

impl Dataset {
    fn with_channels(config: &ComtradeConfig, capacity: usize) -> Self {
        Self {
            time: Vec::with_capacity(capacity),
            analog: vec![Vec::with_capacity(capacity); config.analog.len()],
            digital: vec![Vec::with_capacity(capacity); config.digital.len()],
            start_date: config.start,
            computed_data: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time_in(&self, unit: TimeUnit) -> Vec<f64> {
        self.time.iter().map(|t| unit.convert_micros(*t)).collect()
    }

    /// Wall-clock time of sample `index`
    pub fn absolute_time(&self, index: usize) -> Result<PrimitiveDateTime, TimestampError> {
        let micros = self.time.get(index).copied().unwrap_or(0.0).max(0.0);
        self.start_date.offset_by_micros(micros.round() as u64)
    }
}

/// Decode a DAT file using the channel layout and schedule of its CFG.
pub fn parse_dat(
    content: &[u8],
    config: &ComtradeConfig,
    file_type: FileType,
) -> Result<Dataset, DatError> {
    let clock = SampleClock::new(&config.sampling_rates);
    match file_type {
        FileType::Ascii => Ok(parse_ascii(content, config, &clock)),
        FileType::Binary => parse_binary(content, config, &clock),
    }
}

fn parse_ascii(content: &[u8], config: &ComtradeConfig, clock: &SampleClock) -> Dataset {
    let text = String::from_utf8_lossy(content);
    let n_analog = config.analog.len();
    let n_digital = config.digital.len();
    let expected = DAT_LEADING_FIELDS + n_analog + n_digital;
    let line_count = text.lines().count();
    let declared = usize::try_from(config.declared_samples()).unwrap_or(usize::MAX);
    let mut data = Dataset::with_channels(config, declared.min(line_count));

    let mut skipped = 0;
    for line in text.lines().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields.len() < expected {
            skipped += 1;
            continue;
        }
        data.time.push(clock.micros_at(data.time.len() as u64));
        let analog_fields = &fields[DAT_LEADING_FIELDS..DAT_LEADING_FIELDS + n_analog];
        for (column, field) in data.analog.iter_mut().zip(analog_fields) {
            let value = field.parse::<f64>().unwrap_or(f64::NAN);
            column.push(if value.is_nan() { MISSING_SAMPLE } else { value });
        }
        let digital_fields = &fields[DAT_LEADING_FIELDS + n_analog..expected];
        for (column, field) in data.digital.iter_mut().zip(digital_fields) {
            column.push(u8::from(field.parse::<i64>() == Ok(1)));
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} DAT lines with fewer than {expected} fields");
    }
    data
}

fn parse_binary(
    content: &[u8],
    config: &ComtradeConfig,
    clock: &SampleClock,
) -> Result<Dataset, DatError> {
    let record_size = config.binary_record_size();
    let n_words = config.digital.len().div_ceil(DIGITAL_WORD_BITS);
    let mut data = Dataset::with_channels(config, content.len() / record_size);
    let mut cursor = Cursor::new(content);

    while (cursor.position() as usize) < content.len() {
        let offset = cursor.position() as usize;
        if content.len() - offset < record_size {
            return Err(DatError::TruncatedRecord {
                offset,
                record_size,
            });
        }
        let _sample_number = cursor.read_u32::<LittleEndian>()?;
        let _timestamp = cursor.read_u32::<LittleEndian>()?;
        data.time.push(clock.micros_at(data.time.len() as u64));

        for column in data.analog.iter_mut() {
            let raw = cursor.read_i16::<LittleEndian>()?;
            column.push(if raw == BINARY_MISSING_RAW {
                MISSING_SAMPLE
            } else {
                raw as f64
            });
        }
        for word_idx in 0..n_words {
            let word = cursor.read_u16::<LittleEndian>()?;
            let bits = word.view_bits::<Lsb0>();
            let first = word_idx * DIGITAL_WORD_BITS;
            for (bit, column) in data.digital.iter_mut().skip(first).take(DIGITAL_WORD_BITS).enumerate() {
                column.push(u8::from(bits[bit]));
            }
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::parse_cfg;
    use crate::cfg::tests::SAMPLE_CFG_2013;

    fn four_analog_cfg() -> ComtradeConfig {
        let text = "S,D,1999\n4,4A,0D\n\
            1,IA,,,A,1,0,0,0,0,1,1,P\n\
            2,IB,,,A,1,0,0,0,0,1,1,P\n\
            3,IC,,,A,1,0,0,0,0,1,1,P\n\
            4,IN,,,A,1,0,0,0,0,1,1,P\n\
            50\n1\n8000,4\n01/01/2020,00:00:00\n01/01/2020,00:00:00\nASCII\n1\n";
        match parse_cfg(text) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        }
    }

    #[test]
    fn test_single_rate_ascii() {
        let cfg = four_analog_cfg();
        let dat = "1,0,1,2,3,4\n2,999,5,6,7,8\n3,0,9,10,11,12\n4,0,13,14,15,16\n";
        let data = match parse_dat(dat.as_bytes(), &cfg, FileType::Ascii) {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(data.time, vec![0.0, 125.0, 250.0, 375.0]);
        assert_eq!(data.analog[0], vec![1.0, 5.0, 9.0, 13.0]);
        assert_eq!(data.analog[3], vec![4.0, 8.0, 12.0, 16.0]);
        for column in data.analog.iter() {
            assert_eq!(column.len(), data.time.len());
        }
    }

    #[test]
    fn test_ascii_blanks_and_short_lines() {
        let cfg = match parse_cfg(SAMPLE_CFG_2013) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        let dat = "1,0,1,,3,4,1,0\r\n2,0,1,2\r\n\r\n3,0,1,2,3,4,x,1\r\n";
        let data = match parse_dat(dat.as_bytes(), &cfg, FileType::Ascii) {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(data.len(), 2);
        assert_eq!(data.analog[1], vec![MISSING_SAMPLE, 2.0]);
        assert_eq!(data.digital[0], vec![1, 0]);
        assert_eq!(data.digital[1], vec![0, 1]);
        assert_eq!(data.start_date, cfg.start);
    }

    #[test]
    fn test_overstated_sample_count() {
        let text = "S,D,1999\n1,1A,0D\n1,IA,,,A,1,0,0,0,0,1,1,P\n50\n1\n\
            1000,100000000000000000000\n01/01/2020,00:00:00\n01/01/2020,00:00:00\nASCII\n1\n";
        let cfg = match parse_cfg(text) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(cfg.declared_samples(), u64::MAX);
        let data = match parse_dat(b"1,0,5\n", &cfg, FileType::Ascii) {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(data.len(), 1);
        assert_eq!(data.analog[0], vec![5.0]);
        assert_eq!(data.time, vec![0.0]);
    }

    #[test]
    fn test_multi_rate_boundary() {
        let clock = SampleClock::new(&[
            SamplingRate {
                rate: 4000.0,
                end_sample: 10000,
            },
            SamplingRate {
                rate: 1000.0,
                end_sample: 20000,
            },
        ]);
        assert!((clock.seconds_at(10000) - 2.5).abs() < 1e-12);
        assert!((clock.seconds_at(10001) - 2.501).abs() < 1e-12);
        assert!((clock.seconds_at(20000) - 12.5).abs() < 1e-12);
        // Past the schedule the last rate continues
        assert!((clock.seconds_at(20001) - 12.501).abs() < 1e-12);
        assert!((clock.micros_at(1) - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_spacing() {
        let clock = SampleClock::new(&[SamplingRate {
            rate: 1920.0,
            end_sample: 500,
        }]);
        let step = 1.0e6 / 1920.0;
        for i in 0..499 {
            let dt = clock.micros_at(i + 1) - clock.micros_at(i);
            assert!((dt - step).abs() < 1e-6);
        }
    }

    fn binary_record(sample: u32, analog: &[i16], words: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&sample.to_le_bytes());
        bytes.extend_from_slice(&12345u32.to_le_bytes());
        for a in analog {
            bytes.extend_from_slice(&a.to_le_bytes());
        }
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_binary_sentinel_and_bits() {
        let cfg = match parse_cfg(SAMPLE_CFG_2013) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        let mut content = binary_record(1, &[10, i16::MIN, -3, 7], &[0b10]);
        content.extend(binary_record(2, &[11, 12, 13, 14], &[0b01]));
        let data = match parse_dat(&content, &cfg, FileType::Binary) {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(data.len(), 2);
        assert_eq!(data.analog[1], vec![MISSING_SAMPLE, 12.0]);
        assert_eq!(data.analog[2], vec![-3.0, 13.0]);
        assert_eq!(data.digital[0], vec![0, 1]);
        assert_eq!(data.digital[1], vec![1, 0]);
        assert_eq!(data.time, vec![0.0, 125.0]);
    }

    #[test]
    fn test_binary_truncated() {
        let cfg = match parse_cfg(SAMPLE_CFG_2013) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        let mut content = binary_record(1, &[1, 2, 3, 4], &[0]);
        content.extend_from_slice(&[1, 0, 0]);
        match parse_dat(&content, &cfg, FileType::Binary) {
            Err(DatError::TruncatedRecord {
                offset,
                record_size,
            }) => {
                assert_eq!(offset, 18);
                assert_eq!(record_size, 18);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_time_units() {
        assert_eq!(TimeUnit::Milliseconds.convert_micros(2500.0), 2.5);
        assert_eq!(TimeUnit::Seconds.convert_micros(2.5e6), 2.5);
    }
}
