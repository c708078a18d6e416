//! Demo program which defines a provider at runtime and fires its probes periodically.

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

use std::thread;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use stapsdt::{fire, Arg, ArgType, EnabledCheck, Provider, ProviderConfig};

const PROVIDER: &str = "stapsdt-demo";

/// Fire two USDT probes periodically, for a tracer to attach to.
#[derive(Debug, Parser)]
struct Cmd {
    /// Number of times to fire the probes, forever if not given
    #[arg(short, long)]
    count: Option<u64>,

    /// Milliseconds between firings
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,

    /// How probes check for a tracer, `trampoline` or `native`
    #[arg(long)]
    enabled_check: Option<EnabledCheck>,
}

#[derive(Debug, thiserror::Error)]
#[error("An error: {0}")]
struct DemoError(i8);

fn usage(pid: u32) {
    println!("List the probes in this demo with");
    println!("\tsudo tplist -vp {} \"{}*\"", pid, PROVIDER);
    println!("or");
    println!("\tprobe-list -v --pid {}", pid);
    println!("Trace this process with");
    println!(
        "\tsudo trace -p {} 'u::p1 \"i=%d err=`%s` date=`%s`\", arg1, arg2, arg3' \
         'u::p2 \"j=%d flag=%d\", arg1, arg2'",
        pid
    );
    println!("or");
    println!(
        "\tsudo trace -p {} 'u::p1 (arg1 % 2 == 0) \"i=%d err=`%s`\", arg1, arg2'",
        pid
    );
}

fn main() -> Result<(), stapsdt::Error> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cmd = Cmd::parse();

    let mut config = ProviderConfig::from_env();
    if let Some(check) = cmd.enabled_check {
        config = config.enabled_check(check);
    }
    let mut provider = Provider::with_config(PROVIDER, config)?;
    let p1 = provider.add_probe("p1", &[ArgType::Int32, ArgType::ERROR, ArgType::String])?;
    let p2 = provider.add_probe("p2", &[ArgType::BYTE, ArgType::BOOL])?;
    provider.load()?;

    if !stapsdt::is_native() {
        log::warn!("libstapsdt is not available, probes are only visible within this process");
    }
    usage(std::process::id());

    let interval = Duration::from_millis(cmd.interval_ms);
    let (mut i, mut j) = (0_i8, 0_i8);
    let mut fired = 0;
    while cmd.count.map_or(true, |count| fired < count) {
        thread::sleep(interval);
        let now = chrono::Local::now().to_rfc2822();
        let err = DemoError(i);
        fire!(provider[p1], i, Arg::error(&err), &now);
        fire!(provider[p2], j, j % 4 == 0);
        log::debug!("fired round {} (p1 enabled: {})", fired, provider[p1].enabled());
        i = i.wrapping_add(1);
        j = j.wrapping_add(2);
        fired += 1;
    }

    provider.unload();
    provider.dispose();
    Ok(())
}
