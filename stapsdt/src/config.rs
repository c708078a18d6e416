//! Runtime configuration of providers.

// Copyright 2024 Oxide Computer Company
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::Deserialize;

use crate::EnabledCheck;

/// Environment variable selecting the [`EnabledCheck`] used by [`ProviderConfig::from_env`].
pub const ENABLED_CHECK_VAR: &str = "STAPSDT_ENABLED_CHECK";

/// Settings applied to a provider and every probe added to it.
///
/// This may be deserialized as part of an application's own configuration, e.g.
/// `{ "enabled-check": "native" }`. Missing keys take their default values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProviderConfig {
    pub enabled_check: EnabledCheck,
}

impl ProviderConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ProviderConfig::default();
        if let Some(value) = lookup(ENABLED_CHECK_VAR) {
            match value.parse() {
                Ok(check) => config.enabled_check = check,
                Err(e) => log::warn!("ignoring {}: {}", ENABLED_CHECK_VAR, e),
            }
        }
        config
    }

    pub fn enabled_check(mut self, check: EnabledCheck) -> Self {
        self.enabled_check = check;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{ "enabled-check": "native" }"#).unwrap();
        assert_eq!(config.enabled_check, EnabledCheck::Native);

        let config: ProviderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ProviderConfig::default());

        assert!(serde_json::from_str::<ProviderConfig>(r#"{ "enabled-check": "fast" }"#).is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = ProviderConfig::from_lookup(|key| {
            assert_eq!(key, ENABLED_CHECK_VAR);
            Some(String::from("NATIVE"))
        });
        assert_eq!(config.enabled_check, EnabledCheck::Native);

        let config = ProviderConfig::from_lookup(|_| Some(String::from("bogus")));
        assert_eq!(config, ProviderConfig::default());

        let config = ProviderConfig::from_lookup(|_| None);
        assert_eq!(config, ProviderConfig::default());
    }

    #[test]
    fn test_builder() {
        let config = ProviderConfig::default().enabled_check(EnabledCheck::Native);
        assert_eq!(config.enabled_check, EnabledCheck::Native);
    }
}
