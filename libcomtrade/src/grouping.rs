use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use super::cfg::ComtradeConfig;

/// Channel classes in the order they are tried. The first class whose pattern matches a
/// channel id claims the channel.
const GROUP_PATTERNS: &[(&str, &str)] = &[
    (
        "phase currents",
        r"^(?:I[ABCN]|I_[ABCN]|IL[1-9N])(?:_\w*)?$|^CUR_\w*$",
    ),
    (
        "voltages",
        r"^(?:V[ABCN]|VAB|VBC|VCA|UL[1-9N])(?:_\w*)?$",
    ),
    ("harmonics", r"^HARM\d{1,2}"),
    ("voltage events", r"^(?:SAG|SW|INT|ITIC)\w*$"),
    ("inputs and outputs", r"^(?:OUT|IN)[1-4]\d{2}$"),
    ("remote and transmit bits", r"^(?:RMB|TMB|RB)\w*$"),
    ("variables", r"^(?:SV|SET|RST|LT)\w*$"),
    ("scada", r"^SC\w*(?:QU|QD|R|LD|CU|CD)$"),
    ("data points", r"^DP\d+$"),
    ("virtual bits 1-99", r"^VB0?\d{1,2}$"),
    ("virtual bits 100+", r"^VB\d{3,}$"),
    ("leds equations pushbuttons", r"^(?:LED|EQ|PB|TLED)\w*$"),
    ("time sync and quality", r"^(?:TSOK|TSYNC|TQUAL|IRIG|SNTP|PTP|TQ)\w*$"),
    (
        "alarms triggers status",
        r"^(?:ALARM|ALM|HALARM|SALARM|TRIG|TRGTR|ER|STATUS|STAT)\w*$",
    ),
    (
        "protection",
        r"^TRIP\w*$|^\w*FAULT$|^(?:BLOCK|BLK|FLTBLK)\w*$|^52[AB]$",
    ),
];

static COMPILED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    GROUP_PATTERNS
        .iter()
        .map(|(_, pattern)| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("group patterns are valid")
        })
        .collect()
});

static GROUP_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^G[AD]?(\d+)$").expect("group id pattern is valid"));

/// An ordered partition of channel indices into display groups.
///
/// Groups hold indices into a channel list, never the channels themselves. Every index
/// appears in exactly one group and no group is empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelGroups {
    groups: Vec<(String, Vec<usize>)>,
}

impl ChannelGroups {
    fn push(&mut self, id: &str, index: usize) {
        match self.groups.iter_mut().find(|(gid, _)| gid == id) {
            Some((_, members)) => members.push(index),
            None => self.groups.push((id.to_string(), vec![index])),
        }
    }

    pub fn get(&self, id: &str) -> Option<&[usize]> {
        self.groups
            .iter()
            .find(|(gid, _)| gid == id)
            .map(|(_, members)| members.as_slice())
    }

    /// The group holding channel `index`
    pub fn group_of(&self, index: usize) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, members)| members.contains(&index))
            .map(|(gid, _)| gid.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(gid, _)| gid.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.groups
            .iter()
            .map(|(gid, members)| (gid.as_str(), members.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Shift every numbered id by `offset` so that two partitions can share one id space
    fn offset_ids(&mut self, offset: usize) {
        for (gid, _) in self.groups.iter_mut() {
            if let Some(n) = group_number(gid) {
                *gid = format!("G{}", n + offset);
            }
        }
    }
}

/// Number of a `Gn` id (also accepting the `GAn`/`GDn` display forms)
pub fn group_number(id: &str) -> Option<usize> {
    GROUP_ID
        .captures(id.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Normalize a recorded group id, folding `GAn`/`GDn` into `Gn`
pub fn normalize_group_id(id: &str) -> String {
    match group_number(id) {
        Some(n) => format!("G{n}"),
        None => id.trim().to_string(),
    }
}

/// Index for a fresh `G<k>` id: one past the largest numbered id in use, 0 if none is
pub fn next_group_index<'a>(ids: impl IntoIterator<Item = &'a str>) -> usize {
    ids.into_iter()
        .filter_map(group_number)
        .max()
        .map_or(0, |n| n + 1)
}

pub fn has_user_assignments(assignments: &[String]) -> bool {
    assignments.iter().any(|a| !a.trim().is_empty())
}

/// Group channels, preferring the user's assignments when there are any.
///
/// `assignments[i]` is the group chosen for `channels[i]`, empty for none. Channels left
/// unassigned while others are assigned share one new group.
pub fn build_channel_groups(assignments: &[String], channels: &[String]) -> ChannelGroups {
    if !has_user_assignments(assignments) {
        return auto_group_channels(channels);
    }

    let mut groups = ChannelGroups::default();
    let mut unassigned = Vec::new();
    for index in 0..channels.len() {
        let assigned = assignments
            .get(index)
            .map(|a| normalize_group_id(a))
            .unwrap_or_default();
        if assigned.is_empty() {
            unassigned.push(index);
        } else {
            groups.push(&assigned, index);
        }
    }
    if !unassigned.is_empty() {
        let id = format!("G{}", next_group_index(groups.ids()));
        for index in unassigned {
            groups.push(&id, index);
        }
    }
    groups
}

/// Group channels by classifying their ids. Unclassified channels share a final group
pub fn auto_group_channels(channels: &[String]) -> ChannelGroups {
    let mut claimed = vec![false; channels.len()];
    let mut groups = ChannelGroups::default();

    for pattern in COMPILED_PATTERNS.iter() {
        let id = format!("G{}", groups.len());
        for (index, channel) in channels.iter().enumerate() {
            if !claimed[index] && pattern.is_match(channel.trim()) {
                claimed[index] = true;
                groups.push(&id, index);
            }
        }
    }

    let id = format!("G{}", groups.len());
    for (index, _) in claimed.iter().enumerate().filter(|(_, c)| !**c) {
        groups.push(&id, index);
    }
    groups
}

/// Group the analog and digital channels of a recording and record each channel's group
/// on its definition. Existing group fields act as user assignments.
///
/// Analog and digital groups share one id space; automatic digital ids continue after the
/// analog ones.
pub fn group_config(config: &mut ComtradeConfig) -> (ChannelGroups, ChannelGroups) {
    let analog_assign: Vec<String> = config
        .analog
        .iter()
        .map(|ch| ch.group.clone().unwrap_or_default())
        .collect();
    let digital_assign: Vec<String> = config
        .digital
        .iter()
        .map(|ch| ch.group.clone().unwrap_or_default())
        .collect();

    let analog_groups = build_channel_groups(&analog_assign, &config.analog_ids());
    let mut digital_groups = build_channel_groups(&digital_assign, &config.digital_ids());
    if !has_user_assignments(&digital_assign) {
        digital_groups.offset_ids(next_group_index(analog_groups.ids()));
    }

    for (gid, members) in analog_groups.iter() {
        for &index in members {
            config.analog[index].group = Some(gid.to_string());
        }
    }
    for (gid, members) in digital_groups.iter() {
        for &index in members {
            config.digital[index].group = Some(gid.to_string());
        }
    }
    log::info!(
        "Grouped {} analog channels into {} groups and {} digital channels into {} groups",
        config.analog.len(),
        analog_groups.len(),
        config.digital.len(),
        digital_groups.len()
    );
    (analog_groups, digital_groups)
}
