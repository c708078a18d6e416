//! Raw bindings to `libstapsdt`, the library used to create SystemTap USDT probes at runtime.
//!
//! The structures here mirror the public part of `libstapsdt.h`. Only the leading fields of
//! [`SDTProvider_t`] and [`SDTProbe_t`] are read by Rust code; the trailing private fields are
//! declared so that the layout matches what the library allocates.

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

#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals)]

use libc::{c_char, c_int, c_void};

/// The maximum number of arguments a single probe may declare.
pub const MAX_ARGUMENTS: usize = 6;

/// The type of a single probe argument, as understood by the library.
///
/// The magnitude is the width in bytes, negative values are signed.
pub type ArgType_t = c_int;

pub const noarg: ArgType_t = 0;
pub const uint8: ArgType_t = 1;
pub const int8: ArgType_t = -1;
pub const uint16: ArgType_t = 2;
pub const int16: ArgType_t = -2;
pub const uint32: ArgType_t = 4;
pub const int32: ArgType_t = -4;
pub const uint64: ArgType_t = 8;
pub const int64: ArgType_t = -8;

/// Error codes stored in [`SDTProvider_t::errno`].
pub type SDTError_t = c_int;

pub const noError: SDTError_t = -1;
pub const elfCreationError: SDTError_t = 0;
pub const tmpCreationError: SDTError_t = 1;
pub const sharedLibraryOpenError: SDTError_t = 2;
pub const symbolLoadingError: SDTError_t = 3;
pub const sharedLibraryCloseError: SDTError_t = 4;

#[repr(C)]
#[derive(Debug)]
pub struct SDTProbe_t {
    pub name: *mut c_char,
    pub argFmt: [ArgType_t; MAX_ARGUMENTS],
    /// Address of the probe's trampoline once the provider is loaded, null otherwise.
    pub _fire: *mut c_void,
    pub provider: *mut SDTProvider_t,
    pub argCount: c_int,
}

#[repr(C)]
#[derive(Debug)]
pub struct SDTProbeList_t {
    pub probe: SDTProbe_t,
    pub next: *mut SDTProbeList_t,
}

#[repr(C)]
#[derive(Debug)]
pub struct SDTProvider_t {
    pub name: *mut c_char,
    pub probes: *mut SDTProbeList_t,
    pub errno: SDTError_t,
    pub error: *mut c_char,
    pub _handle: *mut c_void,
    pub _filename: *mut c_char,
    pub _memfd: c_int,
}

extern "C" {
    pub fn providerInit(name: *const c_char) -> *mut SDTProvider_t;

    pub fn providerAddProbe(
        provider: *mut SDTProvider_t,
        name: *const c_char,
        argCount: c_int,
        ...
    ) -> *mut SDTProbe_t;

    pub fn providerLoad(provider: *mut SDTProvider_t) -> c_int;

    pub fn providerUnload(provider: *mut SDTProvider_t) -> c_int;

    pub fn providerDestroy(provider: *mut SDTProvider_t);

    pub fn probeFire(probe: *mut SDTProbe_t, ...);

    pub fn probeIsEnabled(probe: *mut SDTProbe_t) -> c_int;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_layout() {
        assert_eq!(size_of::<SDTProbe_t>(), 56);
        assert_eq!(size_of::<SDTProbeList_t>(), 64);
        assert_eq!(size_of::<SDTProvider_t>(), 56);
    }

    #[test]
    fn test_arg_type_widths() {
        for (code, width) in [(uint8, 1), (uint16, 2), (uint32, 4), (uint64, 8)] {
            assert_eq!(code, width);
            assert_eq!(-code, -width);
        }
        assert_eq!(int8, -uint8);
        assert_eq!(int64, -uint64);
    }
}
