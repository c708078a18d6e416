//! Probe argument types and the values used to fire probes.

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

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use stapsdt_sys::ArgType_t;

/// The type of a single probe argument slot.
///
/// Every slot is passed to the native layer as a pointer-sized value. Integers are stored by
/// value, strings as a pointer to a NUL-terminated copy of the text which lives for the duration
/// of the firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    String,
}

impl ArgType {
    /// Booleans are passed as 0 or 1 in an 8-bit slot.
    pub const BOOL: ArgType = ArgType::Uint8;

    pub const BYTE: ArgType = ArgType::Uint8;

    /// Errors are passed as their formatted message.
    pub const ERROR: ArgType = ArgType::String;

    /// Return the libstapsdt code for this type.
    ///
    /// libstapsdt has no string type. Strings are declared as 64-bit unsigned integers holding the
    /// address of the text, and tracers are told to read them as strings.
    pub fn native(&self) -> ArgType_t {
        match self {
            ArgType::Uint8 => stapsdt_sys::uint8,
            ArgType::Int8 => stapsdt_sys::int8,
            ArgType::Uint16 => stapsdt_sys::uint16,
            ArgType::Int16 => stapsdt_sys::int16,
            ArgType::Uint32 => stapsdt_sys::uint32,
            ArgType::Int32 => stapsdt_sys::int32,
            ArgType::Uint64 | ArgType::String => stapsdt_sys::uint64,
            ArgType::Int64 => stapsdt_sys::int64,
        }
    }

    /// Return the width of the slot's value in bytes.
    pub fn size(&self) -> usize {
        self.native().unsigned_abs() as usize
    }

    pub fn is_signed(&self) -> bool {
        self.native() < 0
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ArgType::String)
    }

    /// Return the SystemTap argument size for this type, e.g., `"-4"` for an `Int32`.
    pub fn stap_size(&self) -> &'static str {
        match self {
            ArgType::Uint8 => "1",
            ArgType::Int8 => "-1",
            ArgType::Uint16 => "2",
            ArgType::Int16 => "-2",
            ArgType::Uint32 => "4",
            ArgType::Int32 => "-4",
            ArgType::Uint64 | ArgType::String => "8",
            ArgType::Int64 => "-8",
        }
    }

    /// Parse a SystemTap argument size back into a type.
    ///
    /// Note that an unsigned 8-byte size is reported as `Uint64`, since a string argument cannot be
    /// distinguished from an integer by its size alone.
    pub fn from_stap_size(size: &str) -> Option<ArgType> {
        let typ = match size {
            "1" => ArgType::Uint8,
            "-1" => ArgType::Int8,
            "2" => ArgType::Uint16,
            "-2" => ArgType::Int16,
            "4" => ArgType::Uint32,
            "-4" => ArgType::Int32,
            "8" => ArgType::Uint64,
            "-8" => ArgType::Int64,
            _ => return None,
        };
        Some(typ)
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgType::Uint8 => "uint8_t",
            ArgType::Int8 => "int8_t",
            ArgType::Uint16 => "uint16_t",
            ArgType::Int16 => "int16_t",
            ArgType::Uint32 => "uint32_t",
            ArgType::Int32 => "int32_t",
            ArgType::Uint64 => "uint64_t",
            ArgType::Int64 => "int64_t",
            ArgType::String => "char *",
        };
        f.write_str(name)
    }
}

/// A single value passed when firing a probe.
///
/// Values are usually built with `From`, e.g. `Arg::from(3_i32)` or `"text".into()`. Anything that
/// can't be represented in a probe slot converts to [`Arg::Unsupported`], which causes the whole
/// firing to be dropped.
#[derive(Debug, Clone)]
pub enum Arg<'a> {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Usize(usize),
    Isize(isize),
    Str(Cow<'a, str>),
    Error(&'a (dyn std::error::Error + 'a)),
    /// A value of a type that can't be passed to a probe, named by the contained string.
    Unsupported(&'static str),
}

impl<'a> Arg<'a> {
    /// Pass the formatted message of an error.
    pub fn error<E: std::error::Error>(err: &'a E) -> Self {
        Arg::Error(err)
    }

    /// Pass any serializable value as a JSON string.
    ///
    /// Serialization is fallible, so the value is wrapped in an object mapping the outcome to the
    /// keys `"ok"` and `"err"`, e.g. `{"ok":[1,2]}` or `{"err":"some message"}`.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Arg<'static> {
        let json = match serde_json::to_string(value) {
            Ok(json) => format!("{{\"ok\":{}}}", json),
            Err(e) => format!("{{\"err\":{}}}", serde_json::Value::from(e.to_string())),
        };
        Arg::Str(Cow::Owned(json))
    }

    /// Return a short name for the kind of value held, used when logging dropped firings.
    pub fn kind(&self) -> &'static str {
        match self {
            Arg::Bool(_) => "bool",
            Arg::U8(_) => "u8",
            Arg::I8(_) => "i8",
            Arg::U16(_) => "u16",
            Arg::I16(_) => "i16",
            Arg::U32(_) => "u32",
            Arg::I32(_) => "i32",
            Arg::U64(_) => "u64",
            Arg::I64(_) => "i64",
            Arg::Usize(_) => "usize",
            Arg::Isize(_) => "isize",
            Arg::Str(_) => "str",
            Arg::Error(_) => "error",
            Arg::Unsupported(name) => name,
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Arg<'_> {
                fn from(value: $ty) -> Self {
                    Arg::$variant(value)
                }
            }

            impl From<&$ty> for Arg<'_> {
                fn from(value: &$ty) -> Self {
                    Arg::$variant(*value)
                }
            }
        )*
    };
}

impl_from_value! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    usize => Usize,
    isize => Isize,
}

macro_rules! impl_from_unsupported {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg<'_> {
                fn from(_: $ty) -> Self {
                    Arg::Unsupported(stringify!($ty))
                }
            }
        )*
    };
}

impl_from_unsupported!(f32, f64, char, ());

impl<'a> From<&'a str> for Arg<'a> {
    fn from(value: &'a str) -> Self {
        Arg::Str(Cow::Borrowed(value))
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(value: &'a String) -> Self {
        Arg::Str(Cow::Borrowed(value.as_str()))
    }
}

impl From<String> for Arg<'_> {
    fn from(value: String) -> Self {
        Arg::Str(Cow::Owned(value))
    }
}

impl<'a> From<Cow<'a, str>> for Arg<'a> {
    fn from(value: Cow<'a, str>) -> Self {
        Arg::Str(value)
    }
}
