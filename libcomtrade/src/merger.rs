use bit_set::BitSet;
use ndarray::Array2;
use serde::Serialize;
use std::fmt;

use super::cfg::{AnalogChannelDef, ComtradeConfig, DigitalChannelDef, FileType, SamplingRate};
use super::constants::*;
use super::dat::{Dataset, SampleClock};
use super::recording::ComtradeFile;

/// Controls for [`merge`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeOptions {
    pub window_seconds: f64,
    pub remove_duplicates: bool,
    pub remove_similar: bool,
    pub similarity_threshold: f64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            remove_duplicates: true,
            remove_similar: false,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Analog,
    Digital,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analog => write!(f, "analog"),
            Self::Digital => write!(f, "digital"),
        }
    }
}

/// A channel of the merged output, pointing back at the file and definition it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub unit: String,
    /// Position of the source file within its group
    pub source_file: usize,
    /// Position of the definition within the source file's analog or digital list
    pub source_index: usize,
}

/// Why something was left out of a merged group
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AuditEntry {
    EmptyFile {
        file: String,
    },
    DuplicateChannel {
        file: String,
        channel: String,
        kind: ChannelKind,
    },
    SimilarChannel {
        file: String,
        channel: String,
        kept: String,
        score: f64,
    },
}

/// Record of what a group dropped
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeAudit {
    pub entries: Vec<AuditEntry>,
}

/// Files recorded close together in time, with the channel list they merge into
#[derive(Debug, Clone)]
pub struct FileGroup<'a> {
    pub files: Vec<&'a ComtradeFile>,
    /// Start of the first file, seconds on the common axis
    pub start_time: f64,
    pub time_span: f64,
    pub file_count: usize,
    pub merged_channels: Vec<MergedChannel>,
    pub duplicates_removed: usize,
    pub similar_removed: usize,
    pub audit: MergeAudit,
}

/// Indices of files recorded within one window, in start order
#[derive(Debug, Clone, PartialEq)]
pub struct TimeCluster {
    pub members: Vec<usize>,
    pub start_time: f64,
    pub time_span: f64,
}

/// Cluster recordings by start time.
///
/// Files are taken in start order. A file joins the open cluster if it starts within
/// `window_seconds` of the cluster's first file, otherwise it opens a new cluster. A
/// cluster spans from its first to its last member.
pub fn group_by_time_window(timestamps: &[f64], window_seconds: f64) -> Vec<TimeCluster> {
    let mut order: Vec<usize> = (0..timestamps.len()).collect();
    order.sort_by(|a, b| timestamps[*a].total_cmp(&timestamps[*b]));

    let mut clusters: Vec<TimeCluster> = Vec::new();
    for idx in order {
        let ts = timestamps[idx];
        match clusters.last_mut() {
            Some(open) if ts - open.start_time <= window_seconds => {
                open.members.push(idx);
                open.time_span = ts - open.start_time;
            }
            _ => clusters.push(TimeCluster {
                members: vec![idx],
                start_time: ts,
                time_span: 0.0,
            }),
        }
    }
    clusters
}

/// Minimum number of single-character edits turning `a` into `b`
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized name similarity in [0, 1], ignoring case
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    (longest - levenshtein(&a, &b)) as f64 / longest as f64
}

/// Weighted similarity of two channels: kind 0.3, unit 0.2, name 0.5
pub fn channel_similarity(a: &MergedChannel, b: &MergedChannel) -> f64 {
    let kind = if a.kind == b.kind { 1.0 } else { 0.0 };
    let unit = if a.unit == b.unit { 1.0 } else { 0.0 };
    SIMILARITY_TYPE_WEIGHT * kind
        + SIMILARITY_UNIT_WEIGHT * unit
        + SIMILARITY_NAME_WEIGHT * name_similarity(&a.name, &b.name)
}

/// Split channels into the first of each (name, kind) and the later repeats
pub fn find_duplicate_channels(
    channels: &[MergedChannel],
) -> (Vec<MergedChannel>, Vec<MergedChannel>) {
    let mut kept: Vec<MergedChannel> = Vec::new();
    let mut removed = Vec::new();
    for channel in channels {
        if kept
            .iter()
            .any(|k| k.name == channel.name && k.kind == channel.kind)
        {
            removed.push(channel.clone());
        } else {
            kept.push(channel.clone());
        }
    }
    (kept, removed)
}

/// A channel removed for being too close to an earlier one
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    pub removed: MergedChannel,
    pub kept: String,
    pub score: f64,
}

/// Collapse channels whose similarity to an earlier kept channel reaches `threshold`.
///
/// Pairs are visited as (i, j) with i < j. A removed channel neither removes others nor is
/// compared again.
pub fn find_similar_channels(
    channels: &[MergedChannel],
    threshold: f64,
) -> (Vec<MergedChannel>, Vec<SimilarMatch>) {
    let mut dropped = BitSet::with_capacity(channels.len());
    let mut matches = Vec::new();
    for i in 0..channels.len() {
        if dropped.contains(i) {
            continue;
        }
        for j in (i + 1)..channels.len() {
            if dropped.contains(j) {
                continue;
            }
            let score = channel_similarity(&channels[i], &channels[j]);
            if score >= threshold {
                dropped.insert(j);
                matches.push(SimilarMatch {
                    removed: channels[j].clone(),
                    kept: channels[i].name.clone(),
                    score,
                });
            }
        }
    }
    let kept = channels
        .iter()
        .enumerate()
        .filter(|(idx, _)| !dropped.contains(*idx))
        .map(|(_, ch)| ch.clone())
        .collect();
    (kept, matches)
}

fn collect_channels(files: &[&ComtradeFile]) -> Vec<MergedChannel> {
    let mut channels = Vec::new();
    for (source_file, file) in files.iter().enumerate() {
        for (source_index, def) in file.cfg.analog.iter().enumerate() {
            channels.push(MergedChannel {
                name: def.id.trim().to_string(),
                kind: ChannelKind::Analog,
                unit: def.unit.clone(),
                source_file,
                source_index,
            });
        }
        for (source_index, def) in file.cfg.digital.iter().enumerate() {
            channels.push(MergedChannel {
                name: def.id.trim().to_string(),
                kind: ChannelKind::Digital,
                unit: String::new(),
                source_file,
                source_index,
            });
        }
    }
    channels
}

/// Cluster files by start time and work out each cluster's merged channel list.
///
/// Inputs are not modified. Files without samples stay in their cluster, contribute no
/// samples and are noted in the group's audit.
pub fn merge<'a>(files: &'a [ComtradeFile], options: &MergeOptions) -> Vec<FileGroup<'a>> {
    let timestamps: Vec<f64> = files.iter().map(|f| f.timestamp()).collect();
    let clusters = group_by_time_window(&timestamps, options.window_seconds);
    log::info!(
        "Clustered {} files into {} groups using a {} s window",
        files.len(),
        clusters.len(),
        options.window_seconds
    );

    let mut groups = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        let members: Vec<&ComtradeFile> = cluster.members.iter().map(|idx| &files[*idx]).collect();
        let mut audit = MergeAudit::default();
        for file in members.iter().filter(|f| f.data.is_empty()) {
            log::warn!("File {} has no samples; it contributes nothing to its group", file.name);
            audit.entries.push(AuditEntry::EmptyFile {
                file: file.name.clone(),
            });
        }

        let mut channels = collect_channels(&members);
        let mut duplicates_removed = 0;
        if options.remove_duplicates {
            let (kept, removed) = find_duplicate_channels(&channels);
            duplicates_removed = removed.len();
            for ch in removed {
                audit.entries.push(AuditEntry::DuplicateChannel {
                    file: members[ch.source_file].name.clone(),
                    channel: ch.name,
                    kind: ch.kind,
                });
            }
            channels = kept;
        }
        let mut similar_removed = 0;
        if options.remove_similar {
            let (kept, matches) = find_similar_channels(&channels, options.similarity_threshold);
            similar_removed = matches.len();
            for m in matches {
                audit.entries.push(AuditEntry::SimilarChannel {
                    file: members[m.removed.source_file].name.clone(),
                    channel: m.removed.name,
                    kept: m.kept,
                    score: m.score,
                });
            }
            channels = kept;
        }
        log::info!(
            "Group of {} files: {} channels kept, {} duplicates and {} similar channels removed",
            members.len(),
            channels.len(),
            duplicates_removed,
            similar_removed
        );

        groups.push(FileGroup {
            file_count: members.len(),
            files: members,
            start_time: cluster.start_time,
            time_span: cluster.time_span,
            merged_channels: channels,
            duplicates_removed,
            similar_removed,
            audit,
        });
    }
    groups
}

/// Column of `file` feeding merged channel `channel`, if any
fn source_column(
    group: &FileGroup,
    file_idx: usize,
    channel: &MergedChannel,
) -> Option<usize> {
    if group.files.len() == 1 {
        return Some(channel.source_index);
    }
    let cfg = &group.files[file_idx].cfg;
    match channel.kind {
        ChannelKind::Analog => cfg.analog.iter().position(|d| d.id.trim() == channel.name),
        ChannelKind::Digital => cfg.digital.iter().position(|d| d.id.trim() == channel.name),
    }
}

/// Build the combined recording for a group.
///
/// Samples of the member files are laid end to end in start order. Merged channels a file
/// does not have are filled with zero for that file's samples. The combined schedule is a
/// single segment at the first file's first rate.
pub fn prepare_combined_file(group: &FileGroup) -> ComtradeFile {
    let Some(first) = group.files.first() else {
        return ComtradeFile::default();
    };
    let analog: Vec<&MergedChannel> = group
        .merged_channels
        .iter()
        .filter(|c| c.kind == ChannelKind::Analog)
        .collect();
    let digital: Vec<&MergedChannel> = group
        .merged_channels
        .iter()
        .filter(|c| c.kind == ChannelKind::Digital)
        .collect();

    let mut cfg = ComtradeConfig {
        station: first.cfg.station.clone(),
        device: first.cfg.device.clone(),
        revision: String::from(REVISION_2013),
        line_frequency: first.cfg.line_frequency,
        start: first.cfg.start,
        trigger: first.cfg.trigger,
        file_type: FileType::Ascii,
        time_multiplier: 1.0,
        ..Default::default()
    };
    for (n, ch) in analog.iter().enumerate() {
        let source = &group.files[ch.source_file].cfg.analog[ch.source_index];
        cfg.analog.push(AnalogChannelDef {
            index: n + 1,
            id: ch.name.clone(),
            phase: String::new(),
            component: String::new(),
            group: None,
            ..source.clone()
        });
    }
    for (n, ch) in digital.iter().enumerate() {
        let source = &group.files[ch.source_file].cfg.digital[ch.source_index];
        cfg.digital.push(DigitalChannelDef {
            index: n + 1,
            id: ch.name.clone(),
            phase: String::new(),
            component: String::new(),
            normal_state: source.normal_state,
            group: None,
        });
    }

    let total: usize = group.files.iter().map(|f| f.sample_count()).sum();
    let rate = first
        .cfg
        .sampling_rates
        .first()
        .map_or(0.0, |r| r.rate);
    cfg.sampling_rates.push(SamplingRate {
        rate,
        end_sample: total as u64,
    });

    let mut analog_matrix = Array2::<f64>::zeros([total, analog.len()]);
    let mut digital_matrix = Array2::<u8>::zeros([total, digital.len()]);
    let mut offset = 0;
    for (file_idx, file) in group.files.iter().enumerate() {
        let n = file.sample_count();
        for (col, ch) in analog.iter().enumerate() {
            if let Some(src) = source_column(group, file_idx, ch) {
                for (i, value) in file.data.analog[src].iter().enumerate() {
                    analog_matrix[[offset + i, col]] = *value;
                }
            }
        }
        for (col, ch) in digital.iter().enumerate() {
            if let Some(src) = source_column(group, file_idx, ch) {
                for (i, value) in file.data.digital[src].iter().enumerate() {
                    digital_matrix[[offset + i, col]] = *value;
                }
            }
        }
        offset += n;
    }

    let clock = SampleClock::new(&cfg.sampling_rates);
    let data = Dataset {
        time: (0..total as u64).map(|i| clock.micros_at(i)).collect(),
        analog: analog_matrix.columns().into_iter().map(|c| c.to_vec()).collect(),
        digital: digital_matrix.columns().into_iter().map(|c| c.to_vec()).collect(),
        start_date: cfg.start,
        computed_data: Vec::new(),
    };
    let name = format!("{}_merged", first.name);
    ComtradeFile::new(&name, cfg, data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cfg::parse_cfg;
    use crate::dat::parse_dat;

    fn channel(name: &str, kind: ChannelKind, unit: &str) -> MergedChannel {
        MergedChannel {
            name: name.to_string(),
            kind,
            unit: unit.to_string(),
            source_file: 0,
            source_index: 0,
        }
    }

    pub(crate) fn recording(name: &str, time: &str, channels: &[&str], dat: &str) -> ComtradeFile {
        let mut text = format!("S,{name},2013\n{},{}A,0D\n", channels.len(), channels.len());
        for (i, ch) in channels.iter().enumerate() {
            text.push_str(&format!("{},{ch},,,A,1,0,0,-32767,32767,1,1,P\n", i + 1));
        }
        let samples = dat.lines().count();
        text.push_str(&format!("50\n1\n1000,{samples}\n01/01/2021,{time}\n01/01/2021,{time}\nASCII\n1\n"));
        let cfg = match parse_cfg(&text) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        let data = match parse_dat(dat.as_bytes(), &cfg, FileType::Ascii) {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        ComtradeFile::new(name, cfg, data)
    }

    #[test]
    fn test_time_window_clusters() {
        let t = 1_000.0;
        let clusters = group_by_time_window(&[t + 5.0, t, t + 1.0], 2.0);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![1, 2]);
        assert_eq!(clusters[0].time_span, 1.0);
        assert_eq!(clusters[1].members, vec![0]);
        assert_eq!(clusters[1].time_span, 0.0);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_similarity_properties() {
        let a = channel("Ia", ChannelKind::Analog, "A");
        let b = channel("IA", ChannelKind::Analog, "A");
        let c = channel("VAB", ChannelKind::Digital, "");
        assert_eq!(channel_similarity(&a, &b), 1.0);
        assert_eq!(channel_similarity(&a, &a), 1.0);
        assert_eq!(channel_similarity(&a, &c), channel_similarity(&c, &a));
        let (kept, matches) = find_similar_channels(&[a.clone(), b, c.clone()], 1.0);
        assert_eq!(kept, vec![a, c]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].kept, "Ia");
    }

    #[test]
    fn test_duplicates_idempotent() {
        let list = vec![
            channel("IA", ChannelKind::Analog, "A"),
            channel("IA", ChannelKind::Digital, ""),
            channel("IA", ChannelKind::Analog, "kA"),
            channel("IB", ChannelKind::Analog, "A"),
        ];
        let (once, removed) = find_duplicate_channels(&list);
        assert_eq!(once.len(), 3);
        assert_eq!(removed.len(), 1);
        let (twice, removed_again) = find_duplicate_channels(&once);
        assert_eq!(twice, once);
        assert!(removed_again.is_empty());
    }

    #[test]
    fn test_merge_concatenates_by_name() {
        let files = vec![
            recording("one", "00:00:00.000000", &["IA", "IB"], "1,0,1,2\n2,0,3,4\n"),
            recording("two", "00:00:01.000000", &["IB", "IC"], "1,0,5,6\n"),
            recording("late", "00:10:00.000000", &["IA"], "1,0,9\n"),
        ];
        let groups = merge(&files, &MergeOptions::default());
        assert_eq!(groups.len(), 2);
        let group = &groups[0];
        assert_eq!(group.file_count, 2);
        assert_eq!(group.duplicates_removed, 1);
        let names: Vec<&str> = group.merged_channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["IA", "IB", "IC"]);

        let combined = prepare_combined_file(group);
        assert_eq!(combined.data.len(), 3);
        assert_eq!(combined.data.analog[0], vec![1.0, 3.0, 0.0]);
        assert_eq!(combined.data.analog[1], vec![2.0, 4.0, 5.0]);
        assert_eq!(combined.data.analog[2], vec![0.0, 0.0, 6.0]);
        assert_eq!(combined.data.time, vec![0.0, 1000.0, 2000.0]);
        assert_eq!(combined.cfg.sampling_rates[0].end_sample, 3);
        assert_eq!(groups[1].file_count, 1);
        assert_eq!(groups[1].time_span, 0.0);
    }

    #[test]
    fn test_empty_file_is_audited() {
        let files = vec![
            recording("full", "00:00:00.000000", &["IA"], "1,0,1\n"),
            recording("empty", "00:00:00.500000", &["IA"], ""),
        ];
        let groups = merge(&files, &MergeOptions::default());
        assert_eq!(groups.len(), 1);
        assert!(groups[0].audit.entries.contains(&AuditEntry::EmptyFile {
            file: String::from("empty")
        }));
        assert_eq!(prepare_combined_file(&groups[0]).data.len(), 1);
    }
}
