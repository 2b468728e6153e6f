use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TimestampError {
    #[error("Timestamp {0:?} does not match D/M/Y,H:M:S.micro")]
    BadFormat(String),
    #[error("Timestamp {0:?} does not name a valid calendar date and time")]
    OutOfRange(String),
}

#[derive(Debug, Error)]
pub enum CfgError {
    #[error("CFG header is malformed: {0}")]
    MalformedHeader(String),
    #[error("CFG row {row} has an invalid {which} timestamp: {source}")]
    InvalidDateTime {
        row: usize,
        which: &'static str,
        source: TimestampError,
    },
    #[error("CFG row {row} could not parse {field} from {value:?}")]
    BadNumber {
        row: usize,
        field: &'static str,
        value: String,
    },
    #[error("CFG row {0} is not a valid channel definition; expected at least {1} fields")]
    BadChannelDefinition(usize, usize),
    #[error("CFG declares an unsupported file type: {0}")]
    FileType(#[from] DatError),
}

#[derive(Debug, Error)]
pub enum DatError {
    #[error("DAT file type {0:?} is not supported; expected ASCII or BINARY")]
    UnsupportedFileType(String),
    #[error("Binary DAT ended mid-record at byte offset {offset}; record size is {record_size} bytes")]
    TruncatedRecord { offset: usize, record_size: usize },
    #[error("DAT failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PairingError {
    #[error("CFG file {0:?} has no matching DAT file")]
    MissingDat(PathBuf),
    #[error("DAT file {0:?} has no matching CFG file")]
    MissingCfg(PathBuf),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Expression is empty")]
    Empty,
    #[error("Unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("Unexpected token {0} at offset {1}")]
    UnexpectedToken(String, usize),
    #[error("Expression ended unexpectedly")]
    UnexpectedEnd,
    #[error("Unknown function {0}")]
    UnknownFunction(String),
    #[error("Unknown identifier {0}; it names no channel or constant")]
    UnknownIdentifier(String),
    #[error("Function {0} takes {1} argument(s) but was given {2}")]
    BadArity(String, &'static str, usize),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Evaluation worker failed: {message}")]
    Failed { message: String, stack: String },
    #[error("Evaluation worker disconnected before completing the task")]
    Disconnected,
    #[error("Evaluation worker result buffer has {0} bytes; expected {1}")]
    BadResultBuffer(usize, usize),
}

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("Computed channel expression failed to compile: {0}")]
    Expression(#[from] ExpressionError),
    #[error("Computed channel evaluation failed in worker: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Computed channel registry failed to convert JSON: {0}")]
    ParsingError(#[from] serde_json::Error),
    #[error("Computed channel registry failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to load {path:?}: {source}")]
    IOError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse CFG {path:?}: {source}")]
    Cfg { path: PathBuf, source: CfgError },
    #[error("Failed to decode DAT {path:?}: {source}")]
    Dat { path: PathBuf, source: DatError },
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to file load error: {0}")]
    LoadError(#[from] LoadError),
    #[error("Processor failed due to registry error: {0}")]
    RegistryError(#[from] RegistryError),
    #[error("Processor failed due to computed channel error: {0}")]
    EvaluatorError(#[from] EvaluatorError),
    #[error("Processor failed to write the merge report: {0}")]
    ReportError(#[from] serde_yaml::Error),
    #[error("Processor failed because no complete CFG/DAT pairs were found in {0:?}")]
    NoPairs(PathBuf),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
