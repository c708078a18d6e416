//! An in-process emulation of libstapsdt.
//!
//! Used when libstapsdt isn't available at build time, or when the `emulated` feature is
//! enabled. Providers and probes are laid out exactly like the library's own structures, and
//! loading a provider publishes a trampoline (`nop; ret`) for each of its probes. Nothing is
//! visible outside the process; instead this module plays the part of the tracer, see [`attach`].

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

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::ptr::{null_mut, NonNull};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libc::{c_char, c_int, c_void};
use stapsdt_sys::{SDTError_t, SDTProbe_t, SDTProvider_t, MAX_ARGUMENTS};

use crate::enabled::NOP;
use crate::ArgType;

/// The x86 breakpoint instruction written over the `nop` by an attached tracer.
pub const BREAKPOINT: u8 = 0xcc;

const RET: u8 = 0xc3;

// The probe sites of every loaded provider, by provider name.
static LOADED: Mutex<BTreeMap<String, Vec<Arc<Site>>>> = Mutex::new(BTreeMap::new());

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[repr(C)]
struct EmulatedProvider {
    raw: SDTProvider_t,
    name: CString,
    error: Option<CString>,
    probes: Vec<NonNull<EmulatedProbe>>,
    loaded: bool,
}

impl EmulatedProvider {
    fn set_error(&mut self, code: SDTError_t, message: String) {
        let message = CString::new(message).unwrap_or_default();
        self.raw.errno = code;
        self.raw.error = message.as_ptr() as *mut c_char;
        self.error = Some(message);
    }
}

#[repr(C)]
struct EmulatedProbe {
    raw: SDTProbe_t,
    name: CString,
    types: Vec<ArgType>,
    site: Option<Arc<Site>>,
}

type Sink = Arc<Mutex<Vec<Firing>>>;

// A published probe. This lives as long as its provider stays loaded, or as long as an observer
// still refers to it.
struct Site {
    provider: String,
    probe: String,
    types: Vec<ArgType>,
    trampoline: [AtomicU8; 2],
    sinks: Mutex<Vec<Sink>>,
}

impl Site {
    fn new(provider: &str, probe: &EmulatedProbe) -> Self {
        Site {
            provider: provider.to_string(),
            probe: probe.name.to_string_lossy().into_owned(),
            types: probe.types.clone(),
            trampoline: [AtomicU8::new(NOP), AtomicU8::new(RET)],
            sinks: Mutex::new(Vec::new()),
        }
    }

    fn is_attached(&self) -> bool {
        !lock(&self.sinks).is_empty()
    }

    // The slots are only valid for the duration of the firing, so strings are copied out here.
    unsafe fn hit(&self, args: &[usize]) {
        let sinks = lock(&self.sinks);
        if sinks.is_empty() {
            return;
        }
        let firing = Firing {
            provider: self.provider.clone(),
            probe: self.probe.clone(),
            args: self
                .types
                .iter()
                .zip(args)
                .map(|(typ, slot)| decode(*typ, *slot))
                .collect(),
        };
        for sink in sinks.iter() {
            lock(sink).push(firing.clone());
        }
    }
}

unsafe fn decode(typ: ArgType, slot: usize) -> Value {
    match typ {
        ArgType::Uint8 => Value::Uint(u64::from(slot as u8)),
        ArgType::Int8 => Value::Int(i64::from(slot as u8 as i8)),
        ArgType::Uint16 => Value::Uint(u64::from(slot as u16)),
        ArgType::Int16 => Value::Int(i64::from(slot as u16 as i16)),
        ArgType::Uint32 => Value::Uint(u64::from(slot as u32)),
        ArgType::Int32 => Value::Int(i64::from(slot as u32 as i32)),
        ArgType::Uint64 => Value::Uint(slot as u64),
        ArgType::Int64 => Value::Int(slot as u64 as i64),
        ArgType::String if slot == 0 => Value::Str(String::new()),
        ArgType::String => Value::Str(
            CStr::from_ptr(slot as *const c_char)
                .to_string_lossy()
                .into_owned(),
        ),
    }
}

/// A single argument value, as read by the tracer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Str(String),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// One firing of a probe seen by an [`Observer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Firing {
    pub provider: String,
    pub probe: String,
    pub args: Vec<Value>,
}

/// A tracer attached to a single probe.
///
/// While any observer of a probe exists, its trampoline is patched and the probe reports itself
/// as enabled. Dropping the last observer restores the trampoline.
pub struct Observer {
    site: Arc<Site>,
    sink: Sink,
}

impl Observer {
    /// Remove and return the firings seen so far.
    pub fn take(&self) -> Vec<Firing> {
        std::mem::take(&mut *lock(&self.sink))
    }

    pub fn provider(&self) -> &str {
        &self.site.provider
    }

    pub fn probe(&self) -> &str {
        &self.site.probe
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let mut sinks = lock(&self.site.sinks);
        sinks.retain(|sink| !Arc::ptr_eq(sink, &self.sink));
        if sinks.is_empty() {
            self.site.trampoline[0].store(NOP, Ordering::Relaxed);
        }
    }
}

/// Attach a tracer to the named probe.
///
/// Returns `None` unless a provider with that name is currently loaded and has such a probe.
pub fn attach(provider: &str, probe: &str) -> Option<Observer> {
    let site = lock(&LOADED)
        .get(provider)?
        .iter()
        .find(|site| site.probe == probe)?
        .clone();
    let sink = Sink::default();
    {
        let mut sinks = lock(&site.sinks);
        sinks.push(sink.clone());
        site.trampoline[0].store(BREAKPOINT, Ordering::Relaxed);
    }
    log::debug!("attached to {}:{}", provider, probe);
    Some(Observer { site, sink })
}

/// Return true if a provider with this name is currently loaded.
pub fn is_loaded(provider: &str) -> bool {
    lock(&LOADED).contains_key(provider)
}

unsafe fn emulated<'a>(provider: NonNull<SDTProvider_t>) -> &'a mut EmulatedProvider {
    &mut *provider.as_ptr().cast::<EmulatedProvider>()
}

pub(crate) fn provider_init(name: &CStr) -> Option<NonNull<SDTProvider_t>> {
    let name = name.to_owned();
    let provider = Box::new(EmulatedProvider {
        raw: SDTProvider_t {
            name: name.as_ptr() as *mut c_char,
            probes: null_mut(),
            errno: stapsdt_sys::noError,
            error: null_mut(),
            _handle: null_mut(),
            _filename: null_mut(),
            _memfd: -1,
        },
        name,
        error: None,
        probes: Vec::new(),
        loaded: false,
    });
    NonNull::new(Box::into_raw(provider).cast())
}

pub(crate) unsafe fn provider_add_probe(
    provider: NonNull<SDTProvider_t>,
    name: &CStr,
    types: &[ArgType],
) -> Option<NonNull<SDTProbe_t>> {
    if types.len() > MAX_ARGUMENTS {
        return None;
    }
    let provider = emulated(provider);
    let mut arg_fmt = [stapsdt_sys::noarg; MAX_ARGUMENTS];
    for (code, typ) in arg_fmt.iter_mut().zip(types) {
        *code = typ.native();
    }
    let name = name.to_owned();
    let probe = Box::new(EmulatedProbe {
        raw: SDTProbe_t {
            name: name.as_ptr() as *mut c_char,
            argFmt: arg_fmt,
            _fire: null_mut(),
            provider: &mut provider.raw,
            argCount: types.len() as c_int,
        },
        name,
        types: types.to_vec(),
        site: None,
    });
    let probe = NonNull::from(Box::leak(probe));
    provider.probes.push(probe);
    Some(probe.cast())
}

pub(crate) unsafe fn provider_load(provider: NonNull<SDTProvider_t>) -> c_int {
    let provider = emulated(provider);
    let name = provider.name.to_string_lossy().into_owned();
    let mut loaded = lock(&LOADED);
    if provider.loaded || loaded.contains_key(&name) {
        provider.set_error(
            stapsdt_sys::sharedLibraryOpenError,
            format!("a provider named \"{}\" is already loaded", name),
        );
        return -1;
    }
    let sites = provider
        .probes
        .iter()
        .map(|probe| {
            let probe = &mut *probe.as_ptr();
            let site = Arc::new(Site::new(&name, probe));
            probe.raw._fire = site.trampoline.as_ptr() as *mut c_void;
            probe.site = Some(Arc::clone(&site));
            site
        })
        .collect();
    loaded.insert(name, sites);
    provider.loaded = true;
    0
}

pub(crate) unsafe fn provider_unload(provider: NonNull<SDTProvider_t>) {
    let provider = emulated(provider);
    if !provider.loaded {
        return;
    }
    for probe in provider.probes.iter() {
        let probe = &mut *probe.as_ptr();
        probe.raw._fire = null_mut();
        probe.site = None;
    }
    let name = provider.name.to_string_lossy().into_owned();
    lock(&LOADED).remove(&name);
    provider.loaded = false;
}

pub(crate) unsafe fn provider_destroy(provider: NonNull<SDTProvider_t>) {
    provider_unload(provider);
    let provider = Box::from_raw(provider.as_ptr().cast::<EmulatedProvider>());
    for probe in provider.probes.iter() {
        drop(Box::from_raw(probe.as_ptr()));
    }
}

pub(crate) unsafe fn probe_is_enabled(probe: NonNull<SDTProbe_t>) -> bool {
    let probe = &*probe.as_ptr().cast::<EmulatedProbe>();
    probe.site.as_ref().map_or(false, |site| site.is_attached())
}

pub(crate) unsafe fn probe_fire(probe: NonNull<SDTProbe_t>, args: &[usize]) {
    let probe = &*probe.as_ptr().cast::<EmulatedProbe>();
    if probe.raw._fire.is_null() {
        return;
    }
    if let Some(site) = &probe.site {
        site.hit(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn test_layout_prefix() {
        let provider = provider_init(&cstr("emulated-layout")).unwrap();
        unsafe {
            let raw = provider.as_ref();
            assert_eq!(CStr::from_ptr(raw.name).to_str().unwrap(), "emulated-layout");
            assert_eq!(raw.errno, stapsdt_sys::noError);

            let probe =
                provider_add_probe(provider, &cstr("bar"), &[ArgType::Int8, ArgType::String])
                    .unwrap();
            let raw_probe = probe.as_ref();
            assert_eq!(CStr::from_ptr(raw_probe.name).to_str().unwrap(), "bar");
            assert_eq!(raw_probe.argCount, 2);
            assert_eq!(raw_probe.argFmt[0], stapsdt_sys::int8);
            assert_eq!(raw_probe.argFmt[1], stapsdt_sys::uint64);
            assert_eq!(raw_probe.provider, provider.as_ptr());
            assert!(raw_probe._fire.is_null());
            provider_destroy(provider);
        }
    }

    #[test]
    fn test_load_publishes_trampolines() {
        let provider = provider_init(&cstr("emulated-trampolines")).unwrap();
        unsafe {
            let probe = provider_add_probe(provider, &cstr("bar"), &[]).unwrap();
            assert_eq!(provider_load(provider), 0);
            assert!(is_loaded("emulated-trampolines"));
            let fire = probe.as_ref()._fire as *const u8;
            assert!(!fire.is_null());
            assert_eq!(*fire, NOP);
            assert_eq!(*fire.add(1), RET);

            provider_unload(provider);
            assert!(probe.as_ref()._fire.is_null());
            assert!(!is_loaded("emulated-trampolines"));
            provider_destroy(provider);
        }
    }

    #[test]
    fn test_duplicate_load_fails() {
        let first = provider_init(&cstr("emulated-duplicate")).unwrap();
        let second = provider_init(&cstr("emulated-duplicate")).unwrap();
        unsafe {
            assert_eq!(provider_load(first), 0);
            assert_eq!(provider_load(second), -1);
            let raw = second.as_ref();
            assert_eq!(raw.errno, stapsdt_sys::sharedLibraryOpenError);
            assert!(CStr::from_ptr(raw.error)
                .to_str()
                .unwrap()
                .contains("already loaded"));

            // Unloading the provider that failed must not unregister the other one.
            provider_unload(second);
            assert!(is_loaded("emulated-duplicate"));
            provider_destroy(second);
            provider_destroy(first);
        }
        assert!(!is_loaded("emulated-duplicate"));
    }

    #[test]
    fn test_decode() {
        unsafe {
            assert_eq!(decode(ArgType::Int8, usize::MAX), Value::Int(-1));
            assert_eq!(decode(ArgType::Uint8, 0x1ff), Value::Uint(0xff));
            assert_eq!(decode(ArgType::Int32, (-7_isize) as usize), Value::Int(-7));
            assert_eq!(decode(ArgType::Uint64, 12), Value::Uint(12));
            let text = cstr("hello");
            assert_eq!(
                decode(ArgType::String, text.as_ptr() as usize),
                Value::from("hello")
            );
            assert_eq!(decode(ArgType::String, 0), Value::from(""));
        }
    }

    #[test]
    fn test_attach_requires_loaded_provider() {
        assert!(attach("emulated-never-loaded", "bar").is_none());
        let provider = provider_init(&cstr("emulated-attach")).unwrap();
        unsafe {
            let probe = provider_add_probe(provider, &cstr("bar"), &[ArgType::Uint16]).unwrap();
            assert!(attach("emulated-attach", "bar").is_none());
            assert_eq!(provider_load(provider), 0);
            assert!(attach("emulated-attach", "baz").is_none());

            let observer = attach("emulated-attach", "bar").unwrap();
            assert_eq!(observer.provider(), "emulated-attach");
            assert_eq!(observer.probe(), "bar");
            assert!(probe_is_enabled(probe));
            assert_eq!(*(probe.as_ref()._fire as *const u8), BREAKPOINT);

            probe_fire(probe, &[0x10002]);
            assert_eq!(
                observer.take(),
                vec![Firing {
                    provider: String::from("emulated-attach"),
                    probe: String::from("bar"),
                    args: vec![Value::Uint(2)],
                }]
            );
            assert!(observer.take().is_empty());

            drop(observer);
            assert!(!probe_is_enabled(probe));
            assert_eq!(*(probe.as_ref()._fire as *const u8), NOP);
            provider_destroy(provider);
        }
    }
}
