/// Analog value stored in place of a missing sample
pub const MISSING_SAMPLE: f64 = 99999.0;
/// Raw int16 marker for a missing analog sample in binary DAT files
pub const BINARY_MISSING_RAW: i16 = i16::MIN;

/// Number of fields in a CFG analog channel definition
pub const ANALOG_DEF_FIELDS: usize = 13;
/// Number of fields in a CFG digital channel definition
pub const DIGITAL_DEF_FIELDS: usize = 5;
/// Leading fields of every DAT record (sample number, timestamp)
pub const DAT_LEADING_FIELDS: usize = 2;
/// Bytes of the leading fields of a binary DAT record
pub const BINARY_LEADING_BYTES: usize = 8;
/// Digital channels packed in one binary status word
pub const DIGITAL_WORD_BITS: usize = 16;

pub const REVISION_1999: &str = "1999";
pub const REVISION_2013: &str = "2013";

pub const DEFAULT_LINE_FREQUENCY: f64 = 50.0;
pub const DEFAULT_WINDOW_SECONDS: f64 = 2.0;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;

pub const SIMILARITY_TYPE_WEIGHT: f64 = 0.3;
pub const SIMILARITY_UNIT_WEIGHT: f64 = 0.2;
pub const SIMILARITY_NAME_WEIGHT: f64 = 0.5;

/// The evaluation worker reports progress every this many samples
pub const PROGRESS_INTERVAL: usize = 5000;
/// Non-binary results tolerated before a digital hint is overruled
pub const DIGITAL_OUTLIER_LIMIT: usize = 3;
/// Results inspected when deciding if a computed channel is binary
pub const DIGITAL_PROBE_SAMPLES: usize = 1000;

pub const MICROS_PER_SECOND: f64 = 1.0e6;
