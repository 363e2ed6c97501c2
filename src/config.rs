use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::verifier::VerifyOptions;

/// Settings read from the optional JSON config file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Cap on diagnostic message length in bytes.
    #[serde(default)]
    pub(crate) message_limit: Option<usize>,
    /// Arena budget per method in bytes.
    #[serde(default)]
    pub(crate) arena_limit: Option<usize>,
    /// Internal-name prefixes of input classes that are not verified.
    #[serde(default)]
    pub(crate) exclude: Vec<String>,
}

impl Config {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    fn parse(text: &str) -> Result<Self> {
        let deserializer = &mut serde_json::Deserializer::from_str(text);
        serde_path_to_error::deserialize(deserializer).map_err(|error| {
            let path = error.path().to_string();
            anyhow::anyhow!("at {path}: {}", error.into_inner())
        })
    }

    /// Verifier options with CLI values taking precedence over the file.
    pub(crate) fn options(
        &self,
        message_limit: Option<usize>,
        arena_limit: Option<usize>,
    ) -> VerifyOptions {
        let defaults = VerifyOptions::default();
        VerifyOptions {
            message_limit: message_limit
                .or(self.message_limit)
                .unwrap_or(defaults.message_limit),
            arena_limit: arena_limit
                .or(self.arena_limit)
                .unwrap_or(defaults.arena_limit),
        }
    }

    pub(crate) fn is_excluded(&self, class_name: &str) -> bool {
        self.exclude
            .iter()
            .any(|prefix| class_name.starts_with(prefix.as_str()))
    }
}
