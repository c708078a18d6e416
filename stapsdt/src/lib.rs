//! Define and fire SystemTap USDT probes at runtime.
//!
//! Statically-defined tracing (USDT) probes are points in a program that a tracer such as `bpftrace`
//! or BCC's `trace` can attach to while the program runs. Probes are normally compiled into the
//! program. This crate instead builds them at runtime with [libstapsdt], so their names and
//! argument types can be decided by the program itself.
//!
//! Probes are grouped into a [`Provider`]. A provider is created, probes are added to it, and it
//! is then loaded, which publishes all of its probes at once:
//!
//! ```no_run
//! use stapsdt::{fire, ArgType, Provider};
//!
//! let mut provider = Provider::new("my-app")?;
//! let start = provider.add_probe("start-work", &[ArgType::Uint64, ArgType::String])?;
//! let done = provider.add_probe("done", &[ArgType::Int32, ArgType::ERROR])?;
//! provider.load()?;
//!
//! let job = String::from("reindex");
//! fire!(provider[start], 17_u64, &job);
//! let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
//! provider[done].fire(&[(-1_i32).into(), stapsdt::Arg::error(&err)]);
//! # Ok::<(), stapsdt::Error>(())
//! ```
//!
//! The probes can then be listed and traced from outside the process, e.g.
//!
//! ```bash
//! $ tplist -p $PID
//! $ trace -p $PID 'u::my-app:start-work "%d %s", arg1, arg2'
//! ```
//!
//! Firing a probe is meant to be cheap enough to leave in hot paths. When no tracer is attached,
//! [`Probe::fire`] costs a single load and branch, and the arguments passed through [`fire!`] are
//! not even evaluated. See [`EnabledCheck`] for how that check is done.
//!
//! Firing never fails. A firing whose arguments don't match the probe's declared types is dropped.
//!
//! [libstapsdt]: https://github.com/linux-usdt/libstapsdt
//!
//! # Backends
//!
//! When libstapsdt is found at build time on Linux, probes are created with it. Otherwise, or
//! when the `emulated` feature is enabled, an in-process emulation of the library is used. Its
//! probes behave the same way but are only visible from within the process, through the
//! `emulated` module.

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

mod arg;
mod config;
mod enabled;
mod error;
mod marshal;
pub mod notes;
mod probe;
mod provider;

#[cfg(stapsdt_backend_native)]
mod native;

#[cfg(stapsdt_backend_emulated)]
pub mod emulated;

#[cfg(stapsdt_backend_native)]
use crate::native as backend;

#[cfg(stapsdt_backend_emulated)]
use crate::emulated as backend;

pub use crate::arg::{Arg, ArgType};
pub use crate::config::{ProviderConfig, ENABLED_CHECK_VAR};
pub use crate::enabled::{EnabledCheck, NOP};
pub use crate::error::{Error, TOO_MANY_ARGUMENTS};
pub use crate::probe::{Probe, ProbeId};
pub use crate::provider::{Provider, State};
pub use stapsdt_sys::MAX_ARGUMENTS;

/// Return true if probes are created by libstapsdt, rather than emulated in-process.
pub const fn is_native() -> bool {
    cfg!(stapsdt_backend_native)
}
