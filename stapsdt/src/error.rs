//! Errors reported while defining, loading, or inspecting probes.

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
use std::ptr::NonNull;

use stapsdt_sys::{SDTProvider_t, MAX_ARGUMENTS};
use thiserror::Error;

/// Code reported with [`Error::TooManyArguments`]. libstapsdt has no dedicated code for this, and
/// refuses such probes before touching the provider's error state.
pub const TOO_MANY_ARGUMENTS: i32 = -2;

/// Type representing errors that occur while creating providers and probes.
///
/// Note that firing a probe never produces an error: mismatched arity or unsupported argument
/// types cause the firing to be silently dropped.
#[derive(Error, Debug)]
pub enum Error {
    #[error("probe \"{probe}\" declares {count} arguments, at most {MAX_ARGUMENTS} are supported")]
    TooManyArguments { probe: String, count: usize },
    #[error("libstapsdt error [{code}]: {message}")]
    Native { code: i32, message: String },
    #[error("{what} name {name:?} contains an interior NUL byte")]
    InteriorNul { what: &'static str, name: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("not a valid object file: {0}")]
    InvalidFile(String),
}

impl Error {
    /// Return the numeric error code associated with this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::TooManyArguments { .. } => Some(TOO_MANY_ARGUMENTS),
            Error::Native { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Construct an error from the error state recorded in a native provider.
    ///
    /// # Safety
    ///
    /// `provider` must point to a live provider.
    pub(crate) unsafe fn from_provider(provider: NonNull<SDTProvider_t>) -> Self {
        let provider = provider.as_ref();
        let message = if provider.error.is_null() {
            String::from("unknown error")
        } else {
            CStr::from_ptr(provider.error).to_string_lossy().into_owned()
        };
        Error::Native {
            code: provider.errno,
            message,
        }
    }
}
