//! Tool to list the SystemTap USDT probes of object files and processes.

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

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use stapsdt::notes::{self, ProbeNote};
use stapsdt::Error;

/// List the SystemTap USDT probes in object files or in a running process.
#[derive(Debug, Parser)]
struct Cmd {
    /// The object files to inspect
    files: Vec<PathBuf>,

    /// Inspect every file mapped into this process, including runtime providers
    #[arg(short, long)]
    pid: Option<u32>,

    /// Print the addresses and arguments of each probe
    #[arg(short, long)]
    verbose: bool,
}

struct Target {
    label: String,
    path: PathBuf,
    // Files mapped into a process are often not ELF objects at all, e.g., locale archives.
    mapped: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let cmd = Cmd::parse();

    let mut targets: Vec<Target> = cmd
        .files
        .iter()
        .map(|path| Target {
            label: path.display().to_string(),
            path: path.clone(),
            mapped: false,
        })
        .collect();
    if let Some(pid) = cmd.pid {
        match notes::mapped_objects(pid) {
            Ok(objects) => targets.extend(objects.iter().map(|object| Target {
                label: object.path.display().to_string(),
                path: object.readable_path(pid),
                mapped: true,
            })),
            Err(e) => {
                log::error!("failed to list the files mapped by process {}: {}", pid, e);
                return ExitCode::FAILURE;
            }
        }
    }
    if targets.is_empty() {
        log::error!("no object files or process to inspect");
        return ExitCode::FAILURE;
    }

    let mut status = ExitCode::SUCCESS;
    for target in targets {
        match notes::read_notes(&target.path) {
            Ok(probes) => {
                for probe in probes {
                    print_probe(&target.label, &probe, cmd.verbose);
                }
            }
            Err(Error::InvalidFile(e)) if target.mapped => {
                log::debug!("skipping {}: {}", target.label, e);
            }
            Err(e) => {
                log::error!("failed to read probes from {}: {}", target.label, e);
                status = ExitCode::FAILURE;
            }
        }
    }
    status
}

fn print_probe(label: &str, probe: &ProbeNote, verbose: bool) {
    println!("{} {}", label, probe);
    if !verbose {
        return;
    }
    println!(
        "  location {:#x}, base {:#x}, semaphore {:#x}",
        probe.location, probe.base, probe.semaphore
    );
    println!("  {} argument(s)", probe.arguments.len());
    for (i, arg) in probe.arguments.iter().enumerate() {
        match arg.arg_type() {
            Some(typ) => println!("    #{} {} ({})", i + 1, arg, typ),
            None => println!("    #{} {}", i + 1, arg),
        }
    }
}
