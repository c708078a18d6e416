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
use std::path::{Path, PathBuf};

const SEARCH_DIRS: &[&str] = &[
    "/usr/local/lib",
    "/usr/local/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/usr/lib/x86_64-linux-gnu",
    "/usr/lib/aarch64-linux-gnu",
];

fn has_library(dir: &Path) -> bool {
    ["libstapsdt.so", "libstapsdt.a"]
        .iter()
        .any(|name| dir.join(name).is_file())
}

// Return the directory containing a linkable libstapsdt, if there is one.
fn find_library() -> Option<PathBuf> {
    let from_env = env::var_os("LIBSTAPSDT_LIB_DIR").map(PathBuf::from);
    from_env
        .into_iter()
        .chain(SEARCH_DIRS.iter().map(PathBuf::from))
        .find(|dir| has_library(dir))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=LIBSTAPSDT_LIB_DIR");
    println!("cargo:rerun-if-env-changed=LIBSTAPSDT_NO_NATIVE");

    // libstapsdt only exists on Linux. Everywhere else the bindings are declared but never
    // referenced, so nothing needs to be linked.
    if env::var("CARGO_CFG_TARGET_OS").ok().as_deref() != Some("linux") {
        return;
    }
    if env::var_os("LIBSTAPSDT_NO_NATIVE").is_some() {
        return;
    }

    if let Some(dir) = find_library() {
        println!("cargo:rustc-link-search=native={}", dir.display());
        if dir.join("libstapsdt.so").is_file() {
            println!("cargo:rustc-link-lib=stapsdt");
        } else {
            // The static library still needs libelf to generate the probes' shared object.
            println!("cargo:rustc-link-lib=static=stapsdt");
            println!("cargo:rustc-link-lib=elf");
        }
        // Exposed to dependents' build scripts as `DEP_STAPSDT_FOUND`.
        println!("cargo:found=1");
    }
}
