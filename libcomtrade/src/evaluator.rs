use super::cfg::ComtradeConfig;
use super::computed::{ChannelStats, ComputedChannel, MadeFrom};
use super::constants::{DIGITAL_OUTLIER_LIMIT, DIGITAL_PROBE_SAMPLES};
use super::dat::Dataset;
use super::error::EvaluatorError;
use super::expression::{normalize_latex, Binding, ChannelScope, CompiledExpression, SampleSource};
use super::grouping::next_group_index;
use super::worker::{EvaluationTask, EvaluationWorker, WorkerMessage};

const DEFAULT_COLOR: &str = "#4f8cff";

/// What the user asked for when creating a computed channel
#[derive(Debug, Clone, Default)]
pub struct ComputedChannelRequest {
    pub name: String,
    /// Expression in editor (LaTeX) form; plain infix is accepted as is
    pub equation: String,
    pub unit: String,
    pub color: Option<String>,
    /// "analog" or "digital"; anything else is treated as analog
    pub made_from: Option<String>,
}

impl From<&ComputedChannel> for ComputedChannelRequest {
    /// Request that re-creates a stored definition against another recording
    fn from(channel: &ComputedChannel) -> Self {
        Self {
            name: channel.name.clone(),
            equation: channel.equation.clone(),
            unit: channel.unit.clone(),
            color: Some(channel.color.clone()).filter(|c| !c.is_empty()),
            made_from: Some(channel.made_from.to_string()),
        }
    }
}

impl SampleSource for Dataset {
    fn analog(&self, channel: usize, sample: usize) -> Option<f64> {
        self.analog.get(channel).and_then(|c| c.get(sample)).copied()
    }

    fn digital(&self, channel: usize, sample: usize) -> Option<f64> {
        self.digital
            .get(channel)
            .and_then(|c| c.get(sample))
            .map(|v| *v as f64)
    }
}

/// Min and max over finite values, mean over finite non-zero values, and the scaling
/// factor used by the display (largest finite non-zero magnitude / 1000, or 1).
pub fn compute_stats(values: &[f64]) -> (ChannelStats, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut n_nonzero = 0usize;
    let mut peak: f64 = 0.0;
    for &v in values.iter().filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
        if v != 0.0 {
            sum += v;
            n_nonzero += 1;
            peak = peak.max(v.abs());
        }
    }
    if min > max {
        min = 0.0;
        max = 0.0;
    }
    let mean = if n_nonzero > 0 {
        sum / n_nonzero as f64
    } else {
        0.0
    };
    let scaling_factor = if peak > 0.0 { peak / 1000.0 } else { 1.0 };
    (ChannelStats { min, max, mean }, scaling_factor)
}

/// Decide whether a computed channel is shown as analog or digital.
///
/// The hint wins when given, except that a digital hint is overruled when more than a few
/// of the inspected values are not 0 or 1. Without a hint the channel is digital only if
/// every referenced channel is digital.
pub fn classify_made_from(hint: Option<&str>, references: &[Binding], values: &[f64]) -> MadeFrom {
    let preferred = match hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(h) => h.parse::<MadeFrom>().unwrap_or(MadeFrom::Analog),
        None => {
            if !references.is_empty() && references.iter().all(|r| matches!(r, Binding::Digital(_))) {
                MadeFrom::Digital
            } else {
                MadeFrom::Analog
            }
        }
    };
    if preferred == MadeFrom::Digital {
        let stride = (values.len() / DIGITAL_PROBE_SAMPLES).max(1);
        let outliers = values
            .iter()
            .step_by(stride)
            .filter(|v| **v != 0.0 && **v != 1.0)
            .count();
        if outliers > DIGITAL_OUTLIER_LIMIT {
            log::warn!("Computed channel has {outliers} non-binary values; routing it as analog");
            return MadeFrom::Analog;
        }
    }
    preferred
}

/// Group for a computed channel: the most common group among its referenced channels,
/// first seen winning ties, or a fresh `G<k>` after every id in use.
pub fn assign_group(references: &[Binding], config: &ComtradeConfig) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for binding in references {
        let group = match binding {
            Binding::Analog(k) => config.analog.get(*k).and_then(|c| c.group.as_deref()),
            Binding::Digital(k) => config.digital.get(*k).and_then(|c| c.group.as_deref()),
        };
        if let Some(group) = group {
            match counts.iter_mut().find(|(g, _)| *g == group) {
                Some((_, n)) => *n += 1,
                None => counts.push((group, 1)),
            }
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (group, n) in counts {
        match best {
            Some((_, top)) if n <= top => (),
            _ => best = Some((group, n)),
        }
    }
    if let Some((group, _)) = best {
        return group.to_string();
    }

    let in_use = config
        .analog
        .iter()
        .filter_map(|c| c.group.as_deref())
        .chain(config.digital.iter().filter_map(|c| c.group.as_deref()))
        .chain(config.computed.iter().map(|c| c.group.as_str()));
    format!("G{}", next_group_index(in_use))
}

fn created_at_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Assemble the channel record from evaluated values
fn finish_channel(
    request: &ComputedChannelRequest,
    config: &ComtradeConfig,
    normalized: String,
    references: &[Binding],
    values: Vec<f64>,
) -> ComputedChannel {
    let (stats, scaling_factor) = compute_stats(&values);
    let made_from = classify_made_from(request.made_from.as_deref(), references, &values);
    let group = assign_group(references, config);
    let created_at = created_at_millis();
    ComputedChannel {
        id: format!("computed_{}_{}", created_at, config.computed.len()),
        name: request.name.clone(),
        group,
        made_from,
        unit: request.unit.clone(),
        color: request
            .color
            .clone()
            .unwrap_or_else(|| String::from(DEFAULT_COLOR)),
        equation: request.equation.clone(),
        normalized_expression: normalized,
        values,
        stats,
        scaling_factor,
        created_at,
    }
}

/// Normalize and compile a request against the recording's channel names
pub fn compile_request(
    request: &ComputedChannelRequest,
    config: &ComtradeConfig,
) -> Result<(String, CompiledExpression), EvaluatorError> {
    let normalized = normalize_latex(&request.equation)?;
    let scope = ChannelScope::new(&config.analog_ids(), &config.digital_ids());
    let compiled = CompiledExpression::compile(&normalized, &scope)?;
    Ok((normalized, compiled))
}

/// Evaluate a computed channel on the calling thread.
///
/// Compile errors fail the call; per-sample failures are stored as 0.
pub fn evaluate_computed_channel(
    request: &ComputedChannelRequest,
    config: &ComtradeConfig,
    dataset: &Dataset,
) -> Result<ComputedChannel, EvaluatorError> {
    let (normalized, compiled) = compile_request(request, config)?;
    let values: Vec<f64> = (0..dataset.len())
        .map(|i| compiled.evaluate(dataset, i))
        .collect();
    log::info!(
        "Evaluated computed channel {} over {} samples",
        request.name,
        values.len()
    );
    Ok(finish_channel(
        request,
        config,
        normalized,
        compiled.references(),
        values,
    ))
}

/// Evaluate a computed channel on an evaluation worker, blocking until it finishes.
///
/// The expression is compiled here first so that errors surface before any buffer is
/// handed over. `on_progress` receives `(processed, total, percent)`.
pub fn evaluate_on_worker<F: FnMut(usize, usize, f32)>(
    worker: &mut EvaluationWorker,
    request: &ComputedChannelRequest,
    config: &ComtradeConfig,
    dataset: &Dataset,
    mut on_progress: F,
) -> Result<ComputedChannel, EvaluatorError> {
    let (normalized, compiled) = compile_request(request, config)?;
    let task = EvaluationTask::from_dataset(&normalized, config, dataset);
    let task_id = worker.submit(task);
    let values = worker.wait_for(task_id, |message| {
        if let WorkerMessage::Progress {
            processed,
            total,
            percent,
            ..
        } = message
        {
            on_progress(*processed, *total, *percent)
        }
    })?;
    Ok(finish_channel(
        request,
        config,
        normalized,
        compiled.references(),
        values,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{parse_cfg, tests::SAMPLE_CFG_2013};
    use crate::dat::parse_dat;
    use crate::error::ExpressionError;
    use crate::grouping::group_config;

    fn recording() -> (ComtradeConfig, Dataset) {
        let mut cfg = match parse_cfg(SAMPLE_CFG_2013) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        group_config(&mut cfg);
        let dat = "1,0,3,4,0,100,1,0\n2,0,3,4,0,110,0,1\n3,0,-3,-4,0,120,1,1\n";
        let data = match parse_dat(dat.as_bytes(), &cfg, cfg.file_type) {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        (cfg, data)
    }

    fn request(equation: &str, made_from: Option<&str>) -> ComputedChannelRequest {
        ComputedChannelRequest {
            name: String::from("test"),
            equation: equation.to_string(),
            unit: String::from("A"),
            color: None,
            made_from: made_from.map(String::from),
        }
    }

    #[test]
    fn test_three_phase_magnitude() {
        let (cfg, data) = recording();
        let channel =
            match evaluate_computed_channel(&request("\\sqrt{I_{A}^2+I_{B}^2+I_{C}^2}", None), &cfg, &data) {
                Ok(c) => c,
                Err(e) => panic!("{e}"),
            };
        assert_eq!(channel.values, vec![5.0, 5.0, 5.0]);
        assert_eq!(channel.made_from, MadeFrom::Analog);
        assert_eq!(channel.stats.max, 5.0);
        assert_eq!(channel.stats.mean, 5.0);
        assert_eq!(channel.normalized_expression, "sqrt(IA^2+IB^2+IC^2)");
        assert_eq!(Some(channel.group.as_str()), cfg.analog[0].group.as_deref());
    }

    #[test]
    fn test_digital_hint_overruled() {
        let (cfg, data) = recording();
        let binary = match evaluate_computed_channel(&request("TRIP*52A", Some("digital")), &cfg, &data) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(binary.made_from, MadeFrom::Digital);
        assert_eq!(binary.values, vec![0.0, 0.0, 1.0]);

        let values: Vec<f64> = (0..20).map(|v| v as f64).collect();
        assert_eq!(classify_made_from(Some("digital"), &[], &values), MadeFrom::Analog);
        assert_eq!(classify_made_from(Some("weird"), &[], &[0.0]), MadeFrom::Analog);
        assert_eq!(
            classify_made_from(None, &[Binding::Digital(0)], &[0.0, 1.0]),
            MadeFrom::Digital
        );
    }

    #[test]
    fn test_stats_skip_zero_in_mean() {
        let (stats, scale) = compute_stats(&[0.0, 2.0, 4.0, f64::NAN, -3000.0]);
        assert_eq!(stats.min, -3000.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, (2.0 + 4.0 - 3000.0) / 3.0);
        assert_eq!(scale, 3.0);
        let (empty, scale) = compute_stats(&[0.0, 0.0]);
        assert_eq!(empty.mean, 0.0);
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn test_fresh_group_without_references() {
        let (cfg, data) = recording();
        let channel = match evaluate_computed_channel(&request("42", None), &cfg, &data) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        let in_use = cfg
            .analog
            .iter()
            .filter_map(|c| c.group.as_deref())
            .chain(cfg.digital.iter().filter_map(|c| c.group.as_deref()));
        assert_eq!(channel.group, format!("G{}", next_group_index(in_use)));
    }

    #[test]
    fn test_group_tie_goes_to_first_reference() {
        let (mut cfg, _) = recording();
        cfg.analog[0].group = Some(String::from("G0"));
        cfg.analog[3].group = Some(String::from("G1"));
        cfg.digital[0].group = Some(String::from("G1"));
        let tied = [Binding::Analog(0), Binding::Analog(3)];
        assert_eq!(assign_group(&tied, &cfg), "G0");
        let reversed = [Binding::Analog(3), Binding::Analog(0)];
        assert_eq!(assign_group(&reversed, &cfg), "G1");
        let majority = [Binding::Analog(0), Binding::Analog(3), Binding::Digital(0)];
        assert_eq!(assign_group(&majority, &cfg), "G1");
    }

    #[test]
    fn test_compile_error_surfaces() {
        let (cfg, data) = recording();
        match evaluate_computed_channel(&request("IA + NOPE", None), &cfg, &data) {
            Err(EvaluatorError::Expression(ExpressionError::UnknownIdentifier(name))) => {
                assert_eq!(name, "NOPE")
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_worker_matches_inline() {
        let (cfg, data) = recording();
        let req = request("IA*2 + TRIP", None);
        let inline = match evaluate_computed_channel(&req, &cfg, &data) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        let mut worker = EvaluationWorker::spawn();
        let mut last_percent = 0.0;
        let threaded = match evaluate_on_worker(&mut worker, &req, &cfg, &data, |_, _, p| {
            last_percent = p
        }) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(inline.values, threaded.values);
        assert_eq!(inline.stats, threaded.stats);
        assert_eq!(last_percent, 100.0);
    }
}
