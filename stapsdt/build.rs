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
//

use std::env;

#[derive(Copy, Clone)]
enum Backend {
    // Probes are created by libstapsdt
    Native,
    // Probes are created by the in-process emulation of libstapsdt
    Emulated,
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-check-cfg=cfg(stapsdt_backend_native)");
    println!("cargo:rustc-check-cfg=cfg(stapsdt_backend_emulated)");

    // Set by stapsdt-sys when it found and linked libstapsdt.
    let have_native = env::var_os("DEP_STAPSDT_FOUND").is_some();
    let feat_emulated = env::var_os("CARGO_FEATURE_EMULATED").is_some();

    let backend = match env::var("CARGO_CFG_TARGET_OS").ok().as_deref() {
        Some("linux") if have_native && !feat_emulated => Backend::Native,
        _ => Backend::Emulated,
    };

    match backend {
        Backend::Native => {
            println!("cargo:rustc-cfg=stapsdt_backend_native");
        }
        Backend::Emulated => {
            println!("cargo:rustc-cfg=stapsdt_backend_emulated");
        }
    }
}
