//! Checks for whether a tracer is attached to a probe.
//!
//! libstapsdt publishes each probe as a small trampoline in a generated shared object. The
//! unpatched trampoline starts with a `nop` (`0x90`) instruction, which a tracer replaces with a
//! breakpoint when it attaches to the probe. Inspecting that byte directly avoids a call into the
//! library and is roughly two orders of magnitude cheaper than `probeIsEnabled`. It relies on
//! libstapsdt's code layout and on the x86 encoding, so the library's own query remains available
//! and is the default on every other architecture.

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

use std::ptr::addr_of;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Deserialize;
use stapsdt_sys::SDTProbe_t;

/// The x86 `nop` instruction found at the start of an untraced trampoline.
pub const NOP: u8 = 0x90;

/// How a probe decides whether it is being traced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnabledCheck {
    /// Inspect the first byte of the probe's trampoline.
    Trampoline,
    /// Ask the native library.
    Native,
}

impl Default for EnabledCheck {
    fn default() -> Self {
        if cfg!(any(target_arch = "x86_64", target_arch = "x86")) {
            EnabledCheck::Trampoline
        } else {
            EnabledCheck::Native
        }
    }
}

impl FromStr for EnabledCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trampoline" => Ok(EnabledCheck::Trampoline),
            "native" => Ok(EnabledCheck::Native),
            other => Err(format!("unknown enabled check \"{}\"", other)),
        }
    }
}

/// Return true if the trampoline of `probe` exists and has been patched.
///
/// A probe whose provider isn't loaded has no trampoline.
///
/// # Safety
///
/// `probe` must point to a live probe, and if its trampoline is set it must be readable.
#[inline(always)]
pub(crate) unsafe fn trampoline_is_enabled(probe: *const SDTProbe_t) -> bool {
    let fire = addr_of!((*probe)._fire).read() as *const AtomicU8;
    // Tracers patch this byte from another process, so always read it from memory.
    !fire.is_null() && (*fire).load(Ordering::Relaxed) & NOP != NOP
}
