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

use std::alloc::{handle_alloc_error, Layout};
use std::ffi::CString;
use std::fmt;
use std::ops::Index;
use std::ptr::NonNull;
use std::sync::Arc;

use stapsdt_sys::{SDTProvider_t, MAX_ARGUMENTS};

use crate::backend;
use crate::{ArgType, Error, Probe, ProbeId, ProviderConfig};

/// The lifecycle state of a [`Provider`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Probes may be added, and none of them can be traced.
    Unloaded,
    /// The probes are published and tracers may attach to them.
    Loaded,
}

/// A named collection of probes.
///
/// Probes are added while the provider is unloaded. Loading the provider publishes all of them at
/// once, and unloading it detaches any tracers. Dropping the provider (or calling
/// [`Provider::dispose`]) unloads it if needed and releases every native resource, including
/// those of its probes.
pub struct Provider {
    raw: NonNull<SDTProvider_t>,
    name: Arc<str>,
    probes: Vec<Probe>,
    state: State,
    config: ProviderConfig,
}

// See the note on `Probe`. Every mutation of the native provider goes through `&mut self`.
unsafe impl Send for Provider {}
unsafe impl Sync for Provider {}

impl Provider {
    /// Create a provider, configured from the environment.
    ///
    /// See [`ProviderConfig::from_env`].
    pub fn new(name: &str) -> Result<Self, Error> {
        Self::with_config(name, ProviderConfig::from_env())
    }

    pub fn with_config(name: &str, config: ProviderConfig) -> Result<Self, Error> {
        let c_name = CString::new(name).map_err(|_| Error::InteriorNul {
            what: "provider",
            name: name.to_string(),
        })?;
        let raw = match backend::provider_init(&c_name) {
            Some(raw) => raw,
            // libstapsdt only fails here if it can't allocate.
            None => handle_alloc_error(Layout::new::<SDTProvider_t>()),
        };
        log::debug!(
            "created provider \"{}\" ({:?} enabled check)",
            name,
            config.enabled_check
        );
        Ok(Provider {
            raw,
            name: Arc::from(name),
            probes: Vec::new(),
            state: State::Unloaded,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == State::Loaded
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Add a probe taking arguments of the given types.
    ///
    /// At most [`MAX_ARGUMENTS`] types may be given. Probes should only be added while the
    /// provider is unloaded: the native library accepts them afterwards, but they won't be
    /// published until the provider is unloaded and loaded again.
    pub fn add_probe(&mut self, name: &str, types: &[ArgType]) -> Result<ProbeId, Error> {
        if types.len() > MAX_ARGUMENTS {
            return Err(Error::TooManyArguments {
                probe: name.to_string(),
                count: types.len(),
            });
        }
        let c_name = CString::new(name).map_err(|_| Error::InteriorNul {
            what: "probe",
            name: name.to_string(),
        })?;
        if self.is_loaded() {
            log::warn!(
                "adding probe \"{}\" to provider \"{}\" while it is loaded",
                name,
                self.name
            );
        }
        let raw = unsafe { backend::provider_add_probe(self.raw, &c_name, types) }
            .ok_or_else(|| unsafe { Error::from_provider(self.raw) })?;
        let id = ProbeId(self.probes.len());
        self.probes.push(Probe::new(
            raw,
            name,
            Arc::clone(&self.name),
            types,
            self.config.enabled_check,
        ));
        log::debug!("added probe {}", self.probes[id.0]);
        Ok(id)
    }

    /// Publish every probe of this provider.
    ///
    /// On failure the provider stays unloaded, and the error carries the native library's code
    /// and message. Loading a provider that's already loaded does nothing.
    pub fn load(&mut self) -> Result<(), Error> {
        if self.is_loaded() {
            log::warn!("provider \"{}\" is already loaded", self.name);
            return Ok(());
        }
        if unsafe { backend::provider_load(self.raw) } != 0 {
            let err = unsafe { Error::from_provider(self.raw) };
            log::debug!("failed to load provider \"{}\": {}", self.name, err);
            return Err(err);
        }
        self.state = State::Loaded;
        log::debug!(
            "loaded provider \"{}\" with {} probes",
            self.name,
            self.probes.len()
        );
        Ok(())
    }

    /// Withdraw every probe of this provider, detaching any tracers.
    pub fn unload(&mut self) {
        if !self.is_loaded() {
            log::warn!("provider \"{}\" is not loaded", self.name);
            return;
        }
        unsafe { backend::provider_unload(self.raw) };
        self.state = State::Unloaded;
        log::debug!("unloaded provider \"{}\"", self.name);
    }

    /// Release the provider and all of its probes.
    ///
    /// This is the same as dropping the provider.
    pub fn dispose(self) {}

    pub fn probe(&self, id: ProbeId) -> Option<&Probe> {
        self.probes.get(id.0)
    }

    /// Return the first probe with the given name.
    pub fn probe_by_name(&self, name: &str) -> Option<&Probe> {
        self.probes.iter().find(|probe| probe.name() == name)
    }

    pub fn probes(&self) -> impl Iterator<Item = &Probe> {
        self.probes.iter()
    }
}

impl Index<ProbeId> for Provider {
    type Output = Probe;

    fn index(&self, id: ProbeId) -> &Probe {
        &self.probes[id.0]
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        if self.is_loaded() {
            self.unload();
        }
        // The probes point into the native provider, get rid of them first.
        self.probes.clear();
        unsafe { backend::provider_destroy(self.raw) };
        log::debug!("destroyed provider \"{}\"", self.name);
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("probes", &self.probes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_new_provider() {
        let provider = Provider::new("provider-new").unwrap();
        assert_eq!(provider.name(), "provider-new");
        assert_eq!(provider.state(), State::Unloaded);
        assert!(!provider.is_loaded());
        assert_eq!(provider.probes().count(), 0);
    }

    #[test]
    fn test_interior_nul() {
        let err = Provider::new("provider\0nul").unwrap_err();
        assert!(matches!(err, Error::InteriorNul { what: "provider", .. }));

        let mut provider = Provider::new("provider-nul").unwrap();
        let err = provider.add_probe("ba\0r", &[]).unwrap_err();
        assert!(matches!(err, Error::InteriorNul { what: "probe", .. }));
        assert!(err.code().is_none());
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(MAX_ARGUMENTS)]
    fn test_add_probe(#[case] count: usize) {
        let mut provider = Provider::new(&format!("provider-add-{}", count)).unwrap();
        let types = vec![ArgType::Int64; count];
        let id = provider.add_probe("bar", &types).unwrap();
        assert_eq!(provider[id].arg_count(), count);
        assert_eq!(provider.probe(id).unwrap().name(), "bar");
    }

    #[test]
    fn test_too_many_arguments() {
        let mut provider = Provider::new("provider-too-many").unwrap();
        let err = provider
            .add_probe("bar", &[ArgType::Int8; MAX_ARGUMENTS + 1])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyArguments { ref probe, count: 7 } if probe == "bar"
        ));
        assert_eq!(err.code(), Some(crate::TOO_MANY_ARGUMENTS));
        assert_eq!(provider.probes().count(), 0);
    }

    #[test]
    fn test_probe_lookup() {
        let mut provider = Provider::new("provider-lookup").unwrap();
        let first = provider.add_probe("first", &[]).unwrap();
        let second = provider.add_probe("second", &[ArgType::BOOL]).unwrap();
        assert_ne!(first, second);
        assert_eq!(provider.probe_by_name("second").unwrap().arg_count(), 1);
        assert!(provider.probe_by_name("third").is_none());
        assert!(provider.probe(ProbeId(2)).is_none());
        let names: Vec<_> = provider.probes().map(Probe::name).collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn test_lifecycle() {
        let mut provider = Provider::new("provider-lifecycle").unwrap();
        let id = provider.add_probe("bar", &[ArgType::Uint32]).unwrap();
        provider.load().unwrap();
        assert_eq!(provider.state(), State::Loaded);
        // Loading twice is tolerated.
        provider.load().unwrap();
        assert!(!provider[id].enabled());

        provider.unload();
        assert_eq!(provider.state(), State::Unloaded);
        provider.unload();
        assert_eq!(provider.state(), State::Unloaded);

        provider.load().unwrap();
        provider.dispose();
    }
}
