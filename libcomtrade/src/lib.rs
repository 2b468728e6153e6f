//! # libcomtrade
//!
//! libcomtrade is the core of a COMTRADE (IEEE C37.111) waveform viewer and merger,
//! written in Rust. It reads the CFG/DAT file pairs written by protective relays and
//! disturbance recorders, reconstructs their time axis, sorts their channels into display
//! groups, evaluates user defined computed channels and merges recordings taken close
//! together in time into single 2013 revision files.
//!
//! ## Building & Install
//!
//! To build and install the command line merger use `cargo install --path ./comtrade_merger_cli`
//! from the top level repository. The library can be used on its own by adding it as a path
//! or git dependency.
//!
//! ## Reading recordings
//!
//! A recording is a `.cfg` file describing the channels and sampling schedule, and a `.dat`
//! file holding the samples, either as ASCII rows or as binary records. Files are matched
//! by stem, ignoring case ([`pairing::match_file_pairs`]). [`cfg::parse_cfg`] accepts the
//! 1991, 1999 and 2013 revisions, including the shortened rows some writers produce.
//! [`dat::parse_dat`] decodes the samples and rebuilds a uniform time axis from the
//! sampling-rate schedule; the timestamps stored in the DAT itself are not used. Time is
//! kept in microseconds from the first sample and can be converted with
//! [`dat::TimeUnit`].
//!
//! Missing analog samples (an unparsable ASCII field, or `-32768` in a binary record) are
//! stored as `99999`.
//!
//! ## Channel groups
//!
//! [`grouping::auto_group_channels`] sorts channels into groups `G0`, `G1`, ... by matching
//! their names against a fixed, ordered list of patterns (phase currents, voltages, relay
//! word bits, protection signals, ...). Groups given in the CFG take precedence.
//!
//! ## Computed channels
//!
//! A computed channel is a per-sample expression over existing channels, written in
//! LaTeX-like editor syntax (`\sqrt{IA^2+IB^2}`, `\frac{VA}{IA}`) or plain infix. The
//! expression is normalized ([`expression::normalize_latex`]), compiled once against the
//! recording's channel names and then evaluated for each sample, either inline
//! ([`evaluator::evaluate_computed_channel`]) or on a background thread
//! ([`worker::EvaluationWorker`]) that reports progress every 5000 samples. Definitions can
//! be stored as JSON through [`registry::ComputedChannelRegistry`].
//!
//! ## Merging
//!
//! [`merger::merge`] clusters recordings whose start times fall within a window (2 s by
//! default) of the first file of the cluster, removes repeated channels and optionally
//! collapses channels with near identical names, units and kinds. [`writer::export_group`]
//! renders each cluster as a 2013 ASCII CFG/DAT pair, with samples of later files appended
//! after those of earlier ones.
//!
//! ## Configuration
//!
//! The merger is driven by a YAML file, read with [`config::Config::read_config_file`]:
//!
//! ```yml
//! input_path: /path/to/recordings
//! output_path: /path/to/merged
//! window_seconds: 2.0
//! remove_duplicates: true
//! remove_similar: false
//! similarity_threshold: 0.95
//! computed_channels_path: null
//! ```
//!
//! Missing fields take the defaults shown. If `computed_channels_path` names a JSON file
//! written by the registry, every stored channel is re-evaluated against each merged
//! recording.
//!
//! ## Output
//!
//! [`process::process`] writes, into `output_path`:
//!
//! ```text
//! merged_0.cfg
//! merged_0.dat
//! merged_0_computed.json   (only with computed_channels_path)
//! merged_1.cfg
//! ...
//! merge_report.yml         (unpaired files, load failures, removed channels per group)
//! ```
pub mod cfg;
pub mod computed;
pub mod config;
pub mod constants;
pub mod dat;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod grouping;
pub mod merger;
pub mod pairing;
pub mod process;
pub mod recording;
pub mod registry;
pub mod timestamp;
pub mod worker;
pub mod worker_status;
pub mod writer;
