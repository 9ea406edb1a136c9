// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use clap::Parser;
use snake_ebpf::run;
use snake_ebpf::Opts;

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let llv = match &opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };

    let mut config_builder = simplelog::ConfigBuilder::new();
    let _ = config_builder.set_time_offset_to_local();

    simplelog::TermLogger::init(
        llv,
        config_builder
            .set_time_level(simplelog::LevelFilter::Error)
            .set_location_level(simplelog::LevelFilter::Off)
            .set_target_level(simplelog::LevelFilter::Off)
            .set_thread_level(simplelog::LevelFilter::Off)
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    run(opts)
}
