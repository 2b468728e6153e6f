use fxhash::FxHashMap;
use std::path::Path;

use super::computed::ComputedChannel;
use super::error::RegistryError;

/// Insertion-ordered store of computed channel definitions keyed by id.
///
/// Setting an existing id replaces the entry in place. This is a convenience for
/// applications; the `computed` list on a `ComtradeConfig` stays the source of truth.
#[derive(Debug, Clone, Default)]
pub struct ComputedChannelRegistry {
    order: Vec<String>,
    channels: FxHashMap<String, ComputedChannel>,
}

impl ComputedChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, channel: ComputedChannel) {
        if !self.channels.contains_key(&channel.id) {
            self.order.push(channel.id.clone());
        }
        self.channels.insert(channel.id.clone(), channel);
    }

    pub fn get(&self, id: &str) -> Option<&ComputedChannel> {
        self.channels.get(id)
    }

    pub fn get_all(&self) -> Vec<&ComputedChannel> {
        self.order
            .iter()
            .filter_map(|id| self.channels.get(id))
            .collect()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ComputedChannel> {
        self.get_all().into_iter().find(|c| c.name == name)
    }

    pub fn get_by_group(&self, group: &str) -> Vec<&ComputedChannel> {
        self.get_all()
            .into_iter()
            .filter(|c| c.group == group)
            .collect()
    }

    pub fn delete(&mut self, id: &str) -> Option<ComputedChannel> {
        let removed = self.channels.remove(id)?;
        self.order.retain(|other| other != id);
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.channels.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// JSON array of the definitions in insertion order. Sample values are not written
    pub fn to_json(&self) -> Result<String, RegistryError> {
        Ok(serde_json::to_string_pretty(&self.get_all())?)
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let channels: Vec<ComputedChannel> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for channel in channels {
            registry.set(channel);
        }
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
