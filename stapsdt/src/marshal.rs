//! Conversion of probe arguments into the pointer-sized slots passed to the native layer.

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

use std::ffi::CString;

use stapsdt_sys::MAX_ARGUMENTS;

use crate::{Arg, ArgType};

/// The marshalled arguments of a single firing.
///
/// String arguments are copied into NUL-terminated buffers owned by this value. The slots holding
/// their addresses are only valid while it is alive, so it must outlive the native fire call, and
/// dropping it releases every buffer no matter how the firing ended.
#[derive(Debug)]
pub(crate) struct Slots {
    values: [usize; MAX_ARGUMENTS],
    len: usize,
    strings: Vec<CString>,
}

impl Slots {
    /// Convert `args` according to the declared `types`.
    ///
    /// Returns `None` if the counts differ, or if any argument can't be stored in its slot. In that
    /// case nothing at all should be fired.
    pub(crate) fn marshal(types: &[ArgType], args: &[Arg<'_>]) -> Option<Slots> {
        if types.len() != args.len() || types.len() > MAX_ARGUMENTS {
            return None;
        }
        let mut slots = Slots {
            values: [0; MAX_ARGUMENTS],
            len: types.len(),
            strings: Vec::new(),
        };
        for (i, (typ, arg)) in types.iter().zip(args).enumerate() {
            slots.values[i] = slots.convert(*typ, arg)?;
        }
        Some(slots)
    }

    // Integers are widened into the slot, with sign extension for signed values. Strings may only
    // be passed in string slots, and nothing else may be: the tracer dereferences string slots.
    fn convert(&mut self, typ: ArgType, arg: &Arg<'_>) -> Option<usize> {
        let value = match (typ, arg) {
            (ArgType::String, Arg::Str(text)) => self.hold(text.as_bytes()),
            (ArgType::String, Arg::Error(err)) => self.hold(err.to_string().as_bytes()),
            (ArgType::String, _) => return None,
            (_, Arg::Bool(value)) => usize::from(*value),
            (_, Arg::U8(value)) => *value as usize,
            (_, Arg::I8(value)) => *value as isize as usize,
            (_, Arg::U16(value)) => *value as usize,
            (_, Arg::I16(value)) => *value as isize as usize,
            (_, Arg::U32(value)) => *value as usize,
            (_, Arg::I32(value)) => *value as isize as usize,
            (_, Arg::U64(value)) => *value as usize,
            (_, Arg::I64(value)) => *value as isize as usize,
            (_, Arg::Usize(value)) => *value,
            (_, Arg::Isize(value)) => *value as usize,
            (_, Arg::Str(_) | Arg::Error(_) | Arg::Unsupported(_)) => return None,
        };
        Some(value)
    }

    // Copy the text into a transient C string, returning its address. Text after an interior NUL
    // would be invisible to the tracer, so it isn't copied.
    fn hold(&mut self, text: &[u8]) -> usize {
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        let text = CString::new(&text[..end]).unwrap_or_default();
        let addr = text.as_ptr() as usize;
        self.strings.push(text);
        addr
    }

    pub(crate) fn as_slice(&self) -> &[usize] {
        &self.values[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::ffi::CStr;

    fn read_str(addr: usize) -> String {
        unsafe { CStr::from_ptr(addr as *const libc::c_char) }
            .to_string_lossy()
            .into_owned()
    }

    #[rstest]
    #[case(ArgType::Uint8, Arg::U8(0xff), 0xff)]
    #[case(ArgType::Uint8, Arg::Bool(true), 1)]
    #[case(ArgType::Uint8, Arg::Bool(false), 0)]
    #[case(ArgType::Int8, Arg::I8(-1), usize::MAX)]
    #[case(ArgType::Int16, Arg::I16(-2), usize::MAX - 1)]
    #[case(ArgType::Uint32, Arg::U32(u32::MAX), u32::MAX as usize)]
    #[case(ArgType::Int32, Arg::I32(3), 3)]
    #[case(ArgType::Uint64, Arg::Usize(42), 42)]
    #[case(ArgType::Int64, Arg::Isize(-42), (-42_isize) as usize)]
    fn test_integer_slots(#[case] typ: ArgType, #[case] arg: Arg<'static>, #[case] expected: usize) {
        let slots = Slots::marshal(&[typ], &[arg]).unwrap();
        assert_eq!(slots.as_slice(), &[expected]);
        assert!(slots.strings.is_empty());
    }

    #[test]
    fn test_string_slots() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "An error: 3");
        let slots = Slots::marshal(
            &[ArgType::String, ArgType::Int32, ArgType::ERROR],
            &[Arg::from("bar"), Arg::from(3), Arg::error(&err)],
        )
        .unwrap();
        let values = slots.as_slice();
        assert_eq!(values.len(), 3);
        assert_eq!(read_str(values[0]), "bar");
        assert_eq!(values[1], 3);
        assert_eq!(read_str(values[2]), "An error: 3");
        assert_eq!(slots.strings.len(), 2);
    }

    #[test]
    fn test_string_with_interior_nul() {
        let slots = Slots::marshal(&[ArgType::String], &[Arg::from("foo\0bar")]).unwrap();
        assert_eq!(read_str(slots.as_slice()[0]), "foo");
    }

    #[test]
    fn test_arity_mismatch() {
        assert!(Slots::marshal(&[ArgType::String, ArgType::Int32], &[Arg::from("bar")]).is_none());
        assert!(Slots::marshal(&[], &[Arg::from(1)]).is_none());
        assert!(Slots::marshal(&[], &[]).unwrap().as_slice().is_empty());
    }

    #[test]
    fn test_unsupported_drops_everything() {
        assert!(Slots::marshal(
            &[ArgType::Int32, ArgType::Int32],
            &[Arg::from(1), Arg::from(1.5_f32)]
        )
        .is_none());
        assert!(Slots::marshal(&[ArgType::String], &[Arg::from(())]).is_none());
    }

    #[test]
    fn test_kind_mismatch() {
        // Integers can't be passed where the tracer expects the address of a string ...
        assert!(Slots::marshal(&[ArgType::String], &[Arg::from(3_u64)]).is_none());
        // ... and strings can't be passed as integers.
        assert!(Slots::marshal(&[ArgType::Uint64], &[Arg::from("3")]).is_none());
    }

    #[test]
    fn test_too_many_slots() {
        let types = [ArgType::Int8; MAX_ARGUMENTS + 1];
        let args = vec![Arg::I8(0); MAX_ARGUMENTS + 1];
        assert!(Slots::marshal(&types, &args).is_none());
    }
}
