//! Reading SystemTap probe notes from object files.
//!
//! Each USDT probe is described by an ELF note of type `NT_STAPSDT`, owned by `"stapsdt"` and
//! normally found in the `.note.stapsdt` section. libstapsdt generates a small shared object
//! holding one such note per probe of a provider, which is how tracers discover runtime probes.
//! This module is used by the `probe-list` tool to show them.

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
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use goblin::elf::Elf;
use memmap2::Mmap;
use serde::Serialize;

use crate::{ArgType, Error};

/// The note type of SystemTap probe descriptors.
pub const NT_STAPSDT: u32 = 3;

/// The owner name of SystemTap probe descriptors.
pub const NOTE_OWNER: &str = "stapsdt";

pub const NOTE_SECTION: &str = ".note.stapsdt";

/// A single probe described in an object file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeNote {
    pub provider: String,
    pub name: String,
    /// Address of the probe site.
    pub location: u64,
    /// Link-time address of the `.stapsdt.base` section, used to adjust `location` for prelinking.
    pub base: u64,
    /// Address of the probe's semaphore, or zero if it has none.
    pub semaphore: u64,
    pub arguments: Vec<NoteArgument>,
}

impl fmt::Display for ProbeNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.name)
    }
}

/// One argument of a probe, in SystemTap's `SIZE@OPERAND` form, e.g. `-4@%edi`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NoteArgument {
    /// Width of the argument in bytes.
    pub size: u8,
    pub signed: bool,
    /// Assembler operand from which the argument is read.
    pub operand: String,
}

impl NoteArgument {
    /// Parse a single argument.
    ///
    /// An argument without a size is an 8-byte unsigned value.
    pub fn parse(text: &str) -> Option<Self> {
        let Some((size, operand)) = text.split_once('@') else {
            return (!text.is_empty()).then(|| NoteArgument {
                size: 8,
                signed: false,
                operand: text.to_string(),
            });
        };
        let size: i8 = size.parse().ok()?;
        if !matches!(size.unsigned_abs(), 1 | 2 | 4 | 8) || operand.is_empty() {
            return None;
        }
        Some(NoteArgument {
            size: size.unsigned_abs(),
            signed: size < 0,
            operand: operand.to_string(),
        })
    }

    /// Return the type of a runtime probe argument with this size.
    ///
    /// String arguments are declared as unsigned 8-byte values, so they are reported as
    /// [`ArgType::Uint64`].
    pub fn arg_type(&self) -> Option<ArgType> {
        let size = if self.signed {
            -i16::from(self.size)
        } else {
            i16::from(self.size)
        };
        ArgType::from_stap_size(&size.to_string())
    }
}

impl fmt::Display for NoteArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.signed { "-" } else { "" };
        write!(f, "{}{}@{}", sign, self.size, self.operand)
    }
}

/// Parse the arguments string of a probe note.
pub fn parse_arguments(args: &str) -> Result<Vec<NoteArgument>, Error> {
    args.split_whitespace()
        .map(|text| {
            NoteArgument::parse(text)
                .ok_or_else(|| Error::InvalidFile(format!("invalid probe argument \"{}\"", text)))
        })
        .collect()
}

/// Read the probe notes of the ELF file at `path`.
///
/// A file without probes yields an empty list.
pub fn read_notes<P: AsRef<Path>>(path: P) -> Result<Vec<ProbeNote>, Error> {
    let file = File::open(path)?;
    let map = unsafe { Mmap::map(&file)? };
    parse_notes(&map)
}

/// Parse the probe notes contained in the bytes of an ELF file.
pub fn parse_notes(data: &[u8]) -> Result<Vec<ProbeNote>, Error> {
    let elf = Elf::parse(data).map_err(|e| Error::InvalidFile(e.to_string()))?;

    // The section headers may have been stripped, in which case fall back to the program headers.
    let notes = match elf.iter_note_sections(data, Some(NOTE_SECTION)) {
        Some(notes) => notes,
        None => match elf.iter_note_headers(data) {
            Some(notes) => notes,
            None => return Ok(Vec::new()),
        },
    };

    let mut probes = Vec::new();
    for note in notes {
        let note = note.map_err(|e| Error::InvalidFile(e.to_string()))?;
        if note.n_type != NT_STAPSDT || note.name.trim_end_matches('\0') != NOTE_OWNER {
            continue;
        }
        probes.push(parse_desc(note.desc, elf.is_64, elf.little_endian)?);
    }
    Ok(probes)
}

// A descriptor holds three addresses of the file's width, followed by the NUL-terminated
// provider, probe and arguments strings.
fn parse_desc(desc: &[u8], is_64: bool, little_endian: bool) -> Result<ProbeNote, Error> {
    let width = if is_64 { 8 } else { 4 };
    if desc.len() < 3 * width {
        return Err(Error::InvalidFile(String::from("truncated probe note")));
    }
    let mut buf = desc;
    let location = read_addr(&mut buf, is_64, little_endian)?;
    let base = read_addr(&mut buf, is_64, little_endian)?;
    let semaphore = read_addr(&mut buf, is_64, little_endian)?;

    let mut strings = buf
        .split(|&b| b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned());
    let provider = strings.next().unwrap_or_default();
    let name = strings.next().unwrap_or_default();
    if provider.is_empty() || name.is_empty() {
        return Err(Error::InvalidFile(String::from(
            "probe note without provider or probe name",
        )));
    }
    let arguments = parse_arguments(&strings.next().unwrap_or_default())?;

    Ok(ProbeNote {
        provider,
        name,
        location,
        base,
        semaphore,
        arguments,
    })
}

fn read_addr(buf: &mut &[u8], is_64: bool, little_endian: bool) -> std::io::Result<u64> {
    match (is_64, little_endian) {
        (true, true) => buf.read_u64::<LittleEndian>(),
        (true, false) => buf.read_u64::<BigEndian>(),
        (false, true) => buf.read_u32::<LittleEndian>().map(u64::from),
        (false, false) => buf.read_u32::<BigEndian>().map(u64::from),
    }
}

/// A file mapped into a process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedObject {
    pub path: PathBuf,
    pub start: u64,
    pub end: u64,
    pub offset: u64,
}

impl MappedObject {
    /// Return a path from which the mapped file can be read.
    ///
    /// Files that have been deleted since they were mapped, including the memory files libstapsdt
    /// creates, are read through `/proc/<pid>/map_files`.
    pub fn readable_path(&self, pid: u32) -> PathBuf {
        let deleted = self.path.to_string_lossy().ends_with(" (deleted)");
        if !deleted && self.path.exists() {
            self.path.clone()
        } else {
            PathBuf::from(format!(
                "/proc/{}/map_files/{:x}-{:x}",
                pid, self.start, self.end
            ))
        }
    }
}

/// List the files mapped into the process `pid`, once each, in address order.
pub fn mapped_objects(pid: u32) -> Result<Vec<MappedObject>, Error> {
    let maps = fs::read_to_string(format!("/proc/{}/maps", pid))?;
    Ok(parse_maps(&maps))
}

fn parse_maps(maps: &str) -> Vec<MappedObject> {
    let mut objects: Vec<MappedObject> = Vec::new();
    for object in maps.lines().filter_map(parse_maps_line) {
        if !objects.iter().any(|seen| seen.path == object.path) {
            objects.push(object);
        }
    }
    objects
}

// Lines look like `7f1c2a000000-7f1c2a022000 r--p 00000000 08:01 1234   /usr/lib/libc.so.6`.
fn parse_maps_line(line: &str) -> Option<MappedObject> {
    let mut fields = line.splitn(6, ' ');
    let range = fields.next()?;
    let _perms = fields.next()?;
    let offset = fields.next()?;
    let _device = fields.next()?;
    let inode = fields.next()?;
    let path = fields.next()?.trim_start();
    if inode == "0" || !path.starts_with('/') {
        return None;
    }
    let (start, end) = range.split_once('-')?;
    Some(MappedObject {
        path: PathBuf::from(path),
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use rstest::rstest;

    fn desc(addrs: [u64; 3], strings: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for addr in addrs {
            buf.write_u64::<LittleEndian>(addr).unwrap();
        }
        for s in strings {
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn test_parse_desc() {
        let data = desc(
            [0x260, 0x2f8, 0],
            &["stapsdt-demo", "p1", "-4@%edi 8@%rsi 8@%rdx"],
        );
        let note = parse_desc(&data, true, true).unwrap();
        assert_eq!(note.provider, "stapsdt-demo");
        assert_eq!(note.name, "p1");
        assert_eq!(note.location, 0x260);
        assert_eq!(note.base, 0x2f8);
        assert_eq!(note.semaphore, 0);
        assert_eq!(note.to_string(), "stapsdt-demo:p1");
        let types: Vec<_> = note
            .arguments
            .iter()
            .map(|arg| arg.arg_type().unwrap())
            .collect();
        assert_eq!(types, [ArgType::Int32, ArgType::Uint64, ArgType::Uint64]);
    }

    #[test]
    fn test_parse_desc_32_bit() {
        let mut data = Vec::new();
        for addr in [0x1000_u32, 0x2000, 0x3000] {
            data.write_u32::<BigEndian>(addr).unwrap();
        }
        data.extend_from_slice(b"prov\0probe\0\0");
        let note = parse_desc(&data, false, false).unwrap();
        assert_eq!(note.location, 0x1000);
        assert_eq!(note.semaphore, 0x3000);
        assert_eq!(note.name, "probe");
        assert!(note.arguments.is_empty());
    }

    #[test]
    fn test_parse_desc_without_arguments_string() {
        let data = desc([1, 2, 3], &["prov", "probe"]);
        let note = parse_desc(&data, true, true).unwrap();
        assert!(note.arguments.is_empty());
    }

    #[test]
    fn test_parse_desc_invalid() {
        assert!(matches!(
            parse_desc(&[0; 10], true, true),
            Err(Error::InvalidFile(_))
        ));
        let data = desc([1, 2, 3], &[]);
        assert!(matches!(
            parse_desc(&data, true, true),
            Err(Error::InvalidFile(_))
        ));
        let data = desc([1, 2, 3], &["prov", "probe", "3@%eax"]);
        assert!(parse_desc(&data, true, true).is_err());
    }

    #[rstest]
    #[case("-4@%edi", 4, true, "%edi")]
    #[case("8@%rax", 8, false, "%rax")]
    #[case("1@-1(%rbp)", 1, false, "-1(%rbp)")]
    #[case("-2@$5", 2, true, "$5")]
    #[case("%rdi", 8, false, "%rdi")]
    fn test_parse_argument(
        #[case] text: &str,
        #[case] size: u8,
        #[case] signed: bool,
        #[case] operand: &str,
    ) {
        let arg = NoteArgument::parse(text).unwrap();
        assert_eq!(arg.size, size);
        assert_eq!(arg.signed, signed);
        assert_eq!(arg.operand, operand);
    }

    #[rstest]
    #[case("")]
    #[case("3@%eax")]
    #[case("x@%eax")]
    #[case("4@")]
    fn test_parse_bad_argument(#[case] text: &str) {
        assert!(NoteArgument::parse(text).is_none());
    }

    #[test]
    fn test_argument_display() {
        let args = parse_arguments("  -4@%edi   8@8(%rsp) ").unwrap();
        let specs: Vec<_> = args.iter().map(ToString::to_string).collect();
        assert_eq!(specs, ["-4@%edi", "8@8(%rsp)"]);
    }

    #[test]
    fn test_not_elf() {
        assert!(matches!(
            parse_notes(b"definitely not an object file"),
            Err(Error::InvalidFile(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_notes("/this/file/does/not/exist"),
            Err(Error::Io(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_current_exe() {
        let exe = std::env::current_exe().unwrap();
        read_notes(exe).unwrap();
    }

    #[test]
    fn test_parse_maps() {
        let maps = "\
55d0c0a00000-55d0c0a02000 r--p 00000000 08:01 1311  /usr/bin/cat
55d0c0a02000-55d0c0a07000 r-xp 00002000 08:01 1311  /usr/bin/cat
55d0c1e8e000-55d0c1eaf000 rw-p 00000000 00:00 0     [heap]
7f6e4d000000-7f6e4d001000 r-xp 00000000 00:01 4096  /memfd:stapsdt-demo (deleted)
7ffd2f1ff000-7ffd2f220000 rw-p 00000000 00:00 0     [stack]
";
        let objects = parse_maps(maps);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].path, Path::new("/usr/bin/cat"));
        assert_eq!(objects[0].start, 0x55d0c0a00000);
        assert_eq!(objects[0].offset, 0);
        assert_eq!(
            objects[1].readable_path(42),
            Path::new("/proc/42/map_files/7f6e4d000000-7f6e4d001000")
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_mappings() {
        let objects = mapped_objects(std::process::id()).unwrap();
        assert!(!objects.is_empty());
    }
}
