use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::cfg::ComtradeConfig;
use super::dat::Dataset;

/// Which kind of trace a computed channel is rendered as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MadeFrom {
    #[default]
    Analog,
    Digital,
}

impl FromStr for MadeFrom {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analog" => Ok(Self::Analog),
            "digital" => Ok(Self::Digital),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for MadeFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analog => write!(f, "analog"),
            Self::Digital => write!(f, "digital"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
    /// Mean over finite, non-zero values. Zeros are excluded because failed samples are
    /// stored as zero.
    pub mean: f64,
}

/// A channel derived from an expression over a recording's channels.
///
/// `values` is not persisted; restoring a definition means evaluating it again.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComputedChannel {
    pub id: String,
    pub name: String,
    pub group: String,
    pub made_from: MadeFrom,
    pub unit: String,
    pub color: String,
    /// Expression as entered, in LaTeX form
    pub equation: String,
    pub normalized_expression: String,
    #[serde(skip)]
    pub values: Vec<f64>,
    pub stats: ChannelStats,
    pub scaling_factor: f64,
    /// Unix time in milliseconds
    pub created_at: i64,
}

/// Append a computed channel to a recording.
///
/// The values move into `dataset.computed_data` at the same position as the definition in
/// `config.computed`. Existing channels are left untouched.
pub fn attach_computed_channel(
    config: &mut ComtradeConfig,
    dataset: &mut Dataset,
    mut channel: ComputedChannel,
) -> usize {
    dataset.computed_data.push(std::mem::take(&mut channel.values));
    config.computed.push(channel);
    config.computed.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_keeps_parallel_lists() {
        let mut config = ComtradeConfig::default();
        let mut dataset = Dataset::default();
        let channel = ComputedChannel {
            id: String::from("c0"),
            values: vec![1.0, 2.0],
            ..Default::default()
        };
        let idx = attach_computed_channel(&mut config, &mut dataset, channel);
        assert_eq!(idx, 0);
        assert_eq!(config.computed.len(), dataset.computed_data.len());
        assert_eq!(dataset.computed_data[0], vec![1.0, 2.0]);
    }

    #[test]
    fn test_made_from_hint() {
        assert_eq!("Digital".parse::<MadeFrom>(), Ok(MadeFrom::Digital));
        assert!("bogus".parse::<MadeFrom>().is_err());
    }
}
