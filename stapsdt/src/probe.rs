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

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use stapsdt_sys::SDTProbe_t;

use crate::backend;
use crate::enabled::trampoline_is_enabled;
use crate::marshal::Slots;
use crate::{Arg, ArgType, EnabledCheck};

/// Handle to a probe within a [`Provider`](crate::Provider).
///
/// Probes are only created through [`Provider::add_probe`](crate::Provider::add_probe), and live
/// exactly as long as the provider that owns them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub(crate) usize);

/// A single USDT probe.
///
/// A probe has a fixed name and a fixed list of argument types. It is inert until its provider is
/// loaded, and reports itself as enabled only while a tracer is attached to it.
pub struct Probe {
    raw: NonNull<SDTProbe_t>,
    name: String,
    provider: Arc<str>,
    types: Vec<ArgType>,
    check: EnabledCheck,
}

// The native probe is only mutated by its provider's lifecycle calls, which take the provider by
// `&mut`. Enablement checks and firings only read it, and may run on any number of threads.
unsafe impl Send for Probe {}
unsafe impl Sync for Probe {}

impl Probe {
    pub(crate) fn new(
        raw: NonNull<SDTProbe_t>,
        name: &str,
        provider: Arc<str>,
        types: &[ArgType],
        check: EnabledCheck,
    ) -> Self {
        Probe {
            raw,
            name: name.to_string(),
            provider,
            types: types.to_vec(),
            check,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the name of the provider this probe belongs to.
    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    pub fn arg_types(&self) -> &[ArgType] {
        &self.types
    }

    pub fn arg_count(&self) -> usize {
        self.types.len()
    }

    /// Return the strategy [`Probe::enabled`] uses.
    pub fn enabled_check(&self) -> EnabledCheck {
        self.check
    }

    /// Return true if a tracer is currently attached to this probe.
    ///
    /// This is always false while the provider isn't loaded.
    #[inline]
    pub fn enabled(&self) -> bool {
        match self.check {
            EnabledCheck::Trampoline => self.enabled_by_trampoline(),
            EnabledCheck::Native => self.enabled_by_native(),
        }
    }

    /// Check for a tracer by inspecting the probe's trampoline.
    ///
    /// See [`EnabledCheck::Trampoline`] for the conditions under which this is accurate.
    #[inline]
    pub fn enabled_by_trampoline(&self) -> bool {
        unsafe { trampoline_is_enabled(self.raw.as_ptr()) }
    }

    /// Ask the native library whether a tracer is attached.
    pub fn enabled_by_native(&self) -> bool {
        unsafe { backend::probe_is_enabled(self.raw) }
    }

    /// Fire the probe with the given arguments.
    ///
    /// Nothing happens unless the probe is enabled. The firing is also dropped, without any
    /// indication to the caller, if the number of arguments differs from the number of declared
    /// types, or if any argument can't be passed in its slot.
    #[inline]
    pub fn fire(&self, args: &[Arg<'_>]) {
        if self.enabled() {
            self.fire_enabled(args);
        }
    }

    /// Fire the probe with arguments built by `args`, which is only called if the probe is
    /// enabled.
    ///
    /// This is what the [`fire!`](crate::fire) macro expands to.
    #[inline]
    pub fn fire_with<'a, F, A>(&self, args: F)
    where
        F: FnOnce() -> A,
        A: AsRef<[Arg<'a>]>,
    {
        if self.enabled() {
            self.fire_enabled(args().as_ref());
        }
    }

    #[cold]
    #[inline(never)]
    fn fire_enabled(&self, args: &[Arg<'_>]) {
        if args.len() != self.types.len() {
            log::trace!(
                "dropping firing of {}:{}, expected {} arguments but got {}",
                self.provider,
                self.name,
                self.types.len(),
                args.len(),
            );
            return;
        }
        match Slots::marshal(&self.types, args) {
            Some(slots) => unsafe { backend::probe_fire(self.raw, slots.as_slice()) },
            None => log::trace!(
                "dropping firing of {}:{}, arguments ({}) don't match ({})",
                self.provider,
                self.name,
                args.iter().map(Arg::kind).collect::<Vec<_>>().join(", "),
                self.types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        }
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("types", &self.types)
            .field("check", &self.check)
            .finish()
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}(", self.provider, self.name)?;
        for (i, typ) in self.types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", typ)?;
        }
        f.write_str(")")
    }
}

/// Fire a probe, converting each argument with [`Arg::from`](crate::Arg).
///
/// The arguments are only evaluated if the probe is enabled.
///
/// ```no_run
/// use stapsdt::{fire, ArgType, Provider};
///
/// let mut provider = Provider::new("my-app")?;
/// let id = provider.add_probe("request", &[ArgType::Uint64, ArgType::String])?;
/// provider.load()?;
/// let path = String::from("/index.html");
/// fire!(provider[id], 42_u64, &path);
/// # Ok::<(), stapsdt::Error>(())
/// ```
#[macro_export]
macro_rules! fire {
    ($probe:expr $(,)?) => {
        $probe.fire(&[])
    };
    ($probe:expr, $($arg:expr),+ $(,)?) => {
        $probe.fire_with(|| [$($crate::Arg::from($arg)),+])
    };
}

#[cfg(test)]
mod tests {
    use crate::{ArgType, EnabledCheck, Provider, ProviderConfig};

    #[test]
    fn test_probe_accessors() {
        let mut provider = Provider::new("probe-accessors").unwrap();
        let id = provider
            .add_probe("bar", &[ArgType::Int32, ArgType::ERROR, ArgType::String])
            .unwrap();
        let probe = &provider[id];
        assert_eq!(probe.name(), "bar");
        assert_eq!(probe.provider_name(), "probe-accessors");
        assert_eq!(probe.arg_count(), 3);
        assert_eq!(
            probe.arg_types(),
            &[ArgType::Int32, ArgType::String, ArgType::String]
        );
        assert_eq!(
            probe.to_string(),
            "probe-accessors:bar(int32_t, char *, char *)"
        );
    }

    #[test]
    fn test_enabled_check_from_config() {
        let config = ProviderConfig::default().enabled_check(EnabledCheck::Native);
        let mut provider = Provider::with_config("probe-check", config).unwrap();
        let id = provider.add_probe("bar", &[]).unwrap();
        assert_eq!(provider[id].enabled_check(), EnabledCheck::Native);
        assert!(!provider[id].enabled());
    }

    #[test]
    fn test_fire_args_not_built_while_disabled() {
        let mut provider = Provider::new("probe-lazy").unwrap();
        let id = provider.add_probe("bar", &[ArgType::Uint8]).unwrap();
        provider.load().unwrap();
        let mut built = false;
        provider[id].fire_with(|| {
            built = true;
            [crate::Arg::from(1_u8)]
        });
        assert!(!built);
    }
}
