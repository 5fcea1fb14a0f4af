use std::collections::HashMap;
use std::sync::Arc;

use crate::{errors::ConfigurationError, flags::flag_models::FlagDefinition};

/// Every flag the process declares. Built once at startup and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct FlagRegistry {
    flags: Vec<Arc<dyn FlagDefinition>>,
    by_id: HashMap<String, usize>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a flag and hands back a shared handle to it, so callers can keep the typed value
    /// around for evaluation. Declaring the same id twice is a configuration error.
    pub fn register<F: FlagDefinition + 'static>(
        &mut self,
        flag: F,
    ) -> Result<Arc<F>, ConfigurationError> {
        if self.by_id.contains_key(flag.id()) {
            return Err(ConfigurationError::DuplicateFlag(flag.id().to_string()));
        }

        let flag = Arc::new(flag);
        let definition: Arc<dyn FlagDefinition> = flag.clone();
        self.by_id
            .insert(definition.id().to_string(), self.flags.len());
        self.flags.push(definition);
        Ok(flag)
    }

    pub fn get(&self, flag_id: &str) -> Option<&Arc<dyn FlagDefinition>> {
        self.by_id.get(flag_id).map(|&index| &self.flags[index])
    }

    pub fn contains(&self, flag_id: &str) -> bool {
        self.by_id.contains_key(flag_id)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flags in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FlagDefinition>> {
        self.flags.iter()
    }

    /// `(id, display_name)` pairs sorted by display name.
    pub fn choices(&self) -> Vec<(&str, &str)> {
        let mut choices: Vec<(&str, &str)> = self
            .flags
            .iter()
            .map(|flag| (flag.id(), flag.display_name()))
            .collect();
        choices.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        choices
    }
}
