use serde::Serialize;
use std::path::Path;
use std::sync::mpsc::Sender;

use super::computed::attach_computed_channel;
use super::config::Config;
use super::error::{EvaluatorError, ProcessorError};
use super::evaluator::{evaluate_on_worker, ComputedChannelRequest};
use super::grouping::group_config;
use super::merger::{merge, prepare_combined_file, FileGroup, MergeAudit};
use super::pairing::read_dir_pairs;
use super::recording::ComtradeFile;
use super::registry::ComputedChannelRegistry;
use super::worker::EvaluationWorker;
use super::worker_status::{Stage, WorkerStatus};
use super::writer::{render_cfg, render_dat, ExportedFile};

const REPORT_FILE_NAME: &str = "merge_report.yml";

#[derive(Debug, Clone, Default, Serialize)]
struct GroupReport {
    output: String,
    files: Vec<String>,
    start_time: f64,
    time_span: f64,
    channels: usize,
    samples: usize,
    duplicates_removed: usize,
    similar_removed: usize,
    computed_channels: usize,
    audit: MergeAudit,
}

/// Everything a merge run skipped or dropped, written next to the merged files
#[derive(Debug, Clone, Default, Serialize)]
struct RunReport {
    unpaired: Vec<String>,
    load_failures: Vec<String>,
    groups: Vec<GroupReport>,
}

/// Load every pair in the input directory. Pairs that fail to load are logged and skipped
fn load_files(
    config: &Config,
    report: &mut RunReport,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<ComtradeFile>, ProcessorError> {
    let pairing = read_dir_pairs(&config.input_path)?;
    report.unpaired = pairing.failures.iter().map(|e| e.to_string()).collect();
    if pairing.pairs.is_empty() {
        return Err(ProcessorError::NoPairs(config.input_path.clone()));
    }
    log::info!(
        "Found {} CFG/DAT pairs in {}",
        pairing.pairs.len(),
        config.input_path.display()
    );

    let total = pairing.pairs.len();
    let mut files = Vec::with_capacity(total);
    tx.send(WorkerStatus::new(0.0, 0, worker_id, Stage::Loading))?;
    for (idx, pair) in pairing.pairs.iter().enumerate() {
        match ComtradeFile::load(pair) {
            Ok(file) => files.push(file),
            Err(e) => {
                log::error!("Skipping {}: {e}", pair.stem);
                report.load_failures.push(e.to_string());
            }
        }
        tx.send(WorkerStatus::new(
            (idx + 1) as f32 / total as f32,
            0,
            worker_id,
            Stage::Loading,
        ))?;
    }
    Ok(files)
}

/// Re-create the stored computed channels against a merged recording. Definitions that
/// do not compile against this group's channels are skipped.
fn evaluate_restored_channels(
    restored: &ComputedChannelRegistry,
    combined: &mut ComtradeFile,
    worker: &mut EvaluationWorker,
    group_index: usize,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<ComputedChannelRegistry, ProcessorError> {
    group_config(&mut combined.cfg);
    let n_channels = restored.len();
    for (idx, stored) in restored.get_all().into_iter().enumerate() {
        let request = ComputedChannelRequest::from(stored);
        let evaluated = evaluate_on_worker(
            worker,
            &request,
            &combined.cfg,
            &combined.data,
            |_, _, percent| {
                let progress = (idx as f32 + percent / 100.0) / n_channels as f32;
                // The receiver only renders progress; losing an update is harmless
                let _ = tx.send(WorkerStatus::new(
                    progress,
                    group_index,
                    worker_id,
                    Stage::Computing,
                ));
            },
        );
        match evaluated {
            Ok(channel) => {
                attach_computed_channel(&mut combined.cfg, &mut combined.data, channel);
            }
            Err(EvaluatorError::Expression(e)) => {
                log::warn!(
                    "Computed channel {} does not apply to group {group_index}: {e}",
                    stored.name
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut registry = ComputedChannelRegistry::new();
    for channel in combined.cfg.computed.iter() {
        registry.set(channel.clone());
    }
    Ok(registry)
}

fn write_group(
    config: &Config,
    group: &FileGroup,
    group_index: usize,
    restored: Option<&ComputedChannelRegistry>,
    worker: &mut EvaluationWorker,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<GroupReport, ProcessorError> {
    let mut combined = prepare_combined_file(group);
    let stem = Config::get_output_stem(group_index);
    let exported = ExportedFile {
        cfg_text: render_cfg(&combined.cfg),
        dat_text: render_dat(&combined.data),
    };
    exported.write_to(&config.output_path, &stem)?;

    let mut computed_channels = 0;
    if let Some(restored) = restored {
        let registry =
            evaluate_restored_channels(restored, &mut combined, worker, group_index, tx, worker_id)?;
        computed_channels = registry.len();
        registry.save(&config.output_path.join(format!("{stem}_computed.json")))?;
    }

    Ok(GroupReport {
        output: stem,
        files: group.files.iter().map(|f| f.name.clone()).collect(),
        start_time: group.start_time,
        time_span: group.time_span,
        channels: group.merged_channels.len(),
        samples: combined.sample_count(),
        duplicates_removed: group.duplicates_removed,
        similar_removed: group.similar_removed,
        computed_channels,
        audit: group.audit.clone(),
    })
}

fn write_report(output: &Path, report: &RunReport) -> Result<(), ProcessorError> {
    std::fs::write(output.join(REPORT_FILE_NAME), serde_yaml::to_string(report)?)?;
    Ok(())
}

/// The main loop of the merger.
///
/// Pairs the files of the input directory, decodes them, clusters them by start time and
/// writes one merged 2013 ASCII recording per cluster to the output directory. Stored
/// computed channels, if configured, are re-evaluated on every merged recording.
/// Progress is reported over `tx`.
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<(), ProcessorError> {
    let output = config.get_output_directory()?.to_path_buf();
    let restored = match config.computed_channels_path.as_deref() {
        Some(path) => {
            let registry = ComputedChannelRegistry::load(path)?;
            log::info!("Restored {} computed channel definitions", registry.len());
            Some(registry)
        }
        None => None,
    };

    let mut report = RunReport::default();
    let files = load_files(&config, &mut report, &tx, worker_id)?;
    let groups = merge(&files, &config.merge_options());

    let mut worker = EvaluationWorker::spawn();
    let n_groups = groups.len();
    for (idx, group) in groups.iter().enumerate() {
        log::info!("Writing group {idx} ({} files)...", group.file_count);
        let group_report = write_group(
            &config,
            group,
            idx,
            restored.as_ref().filter(|r| !r.is_empty()),
            &mut worker,
            &tx,
            worker_id,
        )?;
        report.groups.push(group_report);
        tx.send(WorkerStatus::new(
            (idx + 1) as f32 / n_groups as f32,
            idx,
            worker_id,
            Stage::Merging,
        ))?;
    }
    worker.terminate();

    write_report(&output, &report)?;
    log::info!(
        "Merged {} files into {} recordings in {}",
        files.len(),
        n_groups,
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::parse_cfg;
    use crate::computed::ComputedChannel;
    use std::path::PathBuf;
    use std::sync::mpsc;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("libcomtrade_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        match std::fs::create_dir_all(&dir) {
            Ok(()) => dir,
            Err(e) => panic!("{e}"),
        }
    }

    fn write_pair(dir: &Path, stem: &str, time: &str) {
        let cfg = format!(
            "S,D,1999\n2,2A,0D\n1,IA,,,A,1,0,0,-32767,32767,1,1,P\n\
             2,IB,,,A,1,0,0,-32767,32767,1,1,P\n50\n1\n1000,2\n\
             01/01/2021,{time}\n01/01/2021,{time}\nASCII\n1\n"
        );
        let writes = [
            std::fs::write(dir.join(format!("{stem}.cfg")), cfg),
            std::fs::write(dir.join(format!("{stem}.dat")), "1,0,1,2\n2,1000,3,4\n"),
        ];
        for w in writes {
            if let Err(e) = w {
                panic!("{e}");
            }
        }
    }

    #[test]
    fn test_process_directory() {
        let input = scratch_dir("process_in");
        let output = scratch_dir("process_out");
        write_pair(&input, "a", "00:00:00.000000");
        write_pair(&input, "b", "00:00:01.000000");
        write_pair(&input, "c", "01:00:00.000000");
        if let Err(e) = std::fs::write(input.join("orphan.cfg"), "") {
            panic!("{e}");
        }

        let mut registry = ComputedChannelRegistry::new();
        registry.set(ComputedChannel {
            id: String::from("sum"),
            name: String::from("Sum"),
            equation: String::from("IA+IB"),
            ..Default::default()
        });
        registry.set(ComputedChannel {
            id: String::from("bad"),
            name: String::from("Bad"),
            equation: String::from("IZ*2"),
            ..Default::default()
        });
        let registry_path = input.join("computed.json");
        if let Err(e) = registry.save(&registry_path) {
            panic!("{e}");
        }

        let config = Config {
            input_path: input.clone(),
            output_path: output.clone(),
            computed_channels_path: Some(registry_path),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel();
        if let Err(e) = process(config, tx, 0) {
            panic!("{e}");
        }
        assert!(rx.iter().any(|s| s.stage == Stage::Merging && s.progress == 1.0));

        let cfg_text = match std::fs::read_to_string(output.join("merged_0.cfg")) {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        };
        let cfg = match parse_cfg(&cfg_text) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(cfg.analog_ids(), vec!["IA", "IB"]);
        assert_eq!(cfg.declared_samples(), 4);
        assert!(output.join("merged_1.dat").exists());

        let computed = match ComputedChannelRegistry::load(&output.join("merged_0_computed.json")) {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(computed.len(), 1);
        assert!(computed.get_by_name("Sum").is_some());

        let report = match std::fs::read_to_string(output.join(REPORT_FILE_NAME)) {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        };
        assert!(report.contains("orphan"));
        assert!(report.contains("duplicate_channel"));

        let _ = std::fs::remove_dir_all(&input);
        let _ = std::fs::remove_dir_all(&output);
    }

    #[test]
    fn test_process_requires_pairs() {
        let input = scratch_dir("empty_in");
        let config = Config {
            input_path: input.clone(),
            output_path: input.clone(),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel();
        match process(config, tx, 0) {
            Err(ProcessorError::NoPairs(_)) => (),
            _ => panic!(),
        }
        let _ = std::fs::remove_dir_all(&input);
    }
}
