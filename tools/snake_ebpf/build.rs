// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::path::PathBuf;

use libbpf_cargo::SkeletonBuilder;

const SRC: &str = "src/bpf/main.bpf.c";

fn main() {
    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").expect("OUT_DIR not set"));
    let obj = out_dir.join("snake.bpf.o");

    // Debian-style multiarch hosts keep asm/types.h under the triplet directory.
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let multiarch = format!("/usr/include/{}-linux-gnu", arch);

    // The kprobe object is optional at build time: hosts without clang can
    // still build the userspace side and point --bpf-object at a prebuilt one.
    match SkeletonBuilder::new()
        .source(SRC)
        .obj(&obj)
        .clang_args(["-I", multiarch.as_str(), "-Wno-unused-function"])
        .build()
    {
        Ok(_) => {
            println!("cargo:rustc-env=SNAKE_EBPF_BUILT_OBJECT={}", obj.display());
        }
        Err(e) => {
            println!("cargo:warning=failed to compile {SRC}: {e:#}");
            println!("cargo:warning=pass --bpf-object to load a prebuilt object");
        }
    }

    println!("cargo:rerun-if-changed={SRC}");
    println!("cargo:rerun-if-changed=src/bpf/intf.h");
}
