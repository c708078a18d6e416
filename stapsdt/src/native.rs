//! The libstapsdt implementation of the probe backend.
//!
//! libstapsdt's `providerAddProbe` and `probeFire` are variadic, with the number of arguments
//! given by the probe's argument count. Each arity is spelled out here, up to the library's
//! maximum of six.

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

use std::ffi::CStr;
use std::ptr::{null_mut, NonNull};

use libc::c_int;
use stapsdt_sys::{
    probeFire, probeIsEnabled, providerAddProbe, providerDestroy, providerInit, providerLoad,
    providerUnload, ArgType_t, SDTProbe_t, SDTProvider_t, MAX_ARGUMENTS,
};

use crate::ArgType;

pub(crate) fn provider_init(name: &CStr) -> Option<NonNull<SDTProvider_t>> {
    NonNull::new(unsafe { providerInit(name.as_ptr()) })
}

pub(crate) unsafe fn provider_add_probe(
    provider: NonNull<SDTProvider_t>,
    name: &CStr,
    types: &[ArgType],
) -> Option<NonNull<SDTProbe_t>> {
    if types.len() > MAX_ARGUMENTS {
        return None;
    }
    let p = provider.as_ptr();
    let name = name.as_ptr();
    let mut codes: [ArgType_t; MAX_ARGUMENTS] = [0; MAX_ARGUMENTS];
    for (code, typ) in codes.iter_mut().zip(types) {
        *code = typ.native();
    }
    let raw = match codes[..types.len()] {
        [] => providerAddProbe(p, name, 0),
        [a] => providerAddProbe(p, name, 1, a),
        [a, b] => providerAddProbe(p, name, 2, a, b),
        [a, b, c] => providerAddProbe(p, name, 3, a, b, c),
        [a, b, c, d] => providerAddProbe(p, name, 4, a, b, c, d),
        [a, b, c, d, e] => providerAddProbe(p, name, 5, a, b, c, d, e),
        [a, b, c, d, e, f] => providerAddProbe(p, name, 6, a, b, c, d, e, f),
        _ => null_mut(),
    };
    NonNull::new(raw)
}

pub(crate) unsafe fn provider_load(provider: NonNull<SDTProvider_t>) -> c_int {
    providerLoad(provider.as_ptr())
}

pub(crate) unsafe fn provider_unload(provider: NonNull<SDTProvider_t>) {
    if providerUnload(provider.as_ptr()) != 0 {
        log::warn!("libstapsdt failed to unload provider");
    }
}

pub(crate) unsafe fn provider_destroy(provider: NonNull<SDTProvider_t>) {
    providerDestroy(provider.as_ptr())
}

pub(crate) unsafe fn probe_is_enabled(probe: NonNull<SDTProbe_t>) -> bool {
    probeIsEnabled(probe.as_ptr()) == 1
}

// The library reads every argument as a 64-bit value.
pub(crate) unsafe fn probe_fire(probe: NonNull<SDTProbe_t>, args: &[usize]) {
    let p = probe.as_ptr();
    match *args {
        [] => probeFire(p),
        [a] => probeFire(p, a as u64),
        [a, b] => probeFire(p, a as u64, b as u64),
        [a, b, c] => probeFire(p, a as u64, b as u64, c as u64),
        [a, b, c, d] => probeFire(p, a as u64, b as u64, c as u64, d as u64),
        [a, b, c, d, e] => probeFire(p, a as u64, b as u64, c as u64, d as u64, e as u64),
        [a, b, c, d, e, f] => probeFire(
            p, a as u64, b as u64, c as u64, d as u64, e as u64, f as u64,
        ),
        _ => {}
    }
}
