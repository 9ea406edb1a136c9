// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Loading the kprobe object and reading its maps.

use std::path::Path;
use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use libbpf_rs::Link;
use libbpf_rs::MapCore;
use libbpf_rs::MapFlags;
use libbpf_rs::MapHandle;
use libbpf_rs::Object;
use libbpf_rs::ObjectBuilder;
use libbpf_rs::PrintLevel;
use log::{debug, info, warn};

use crate::probe::attach_all;
use crate::probe::AttachReport;
use crate::probe::ProbeBinder;
use crate::probe::ProbeSpec;
use crate::probe::PROBES;
use crate::telemetry::Slot;
use crate::telemetry::TelemetrySource;

/// Every telemetry map is a single-slot array read at this key.
const COUNTER_KEY: u32 = 0;

const FALLBACK_OBJECT_PATHS: [&str; 3] = [
    "bpf/snake.bpf.o",
    "../bpf/snake.bpf.o",
    "./bpf/snake.bpf.o",
];

/// Object paths in the order they are tried.
pub fn object_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = explicit {
        paths.push(p.to_path_buf());
    }
    if let Some(built) = option_env!("SNAKE_EBPF_BUILT_OBJECT") {
        paths.push(PathBuf::from(built));
    }
    paths.extend(FALLBACK_OBJECT_PATHS.iter().map(PathBuf::from));
    paths
}

fn first_existing(candidates: &[PathBuf]) -> Result<PathBuf> {
    match candidates.iter().find(|p| p.is_file()) {
        Some(p) => Ok(p.clone()),
        None => bail!(
            "no BPF object found (tried paths: {})",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn libbpf_print(level: PrintLevel, msg: String) {
    let msg = msg.trim_end();
    match level {
        PrintLevel::Warn => warn!("libbpf: {}", msg),
        PrintLevel::Info => info!("libbpf: {}", msg),
        PrintLevel::Debug => debug!("libbpf: {}", msg),
    }
}

/// Route libbpf's own messages through `log`.
pub fn init_libbpf_logging() {
    libbpf_rs::set_print(Some((PrintLevel::Debug, libbpf_print)));
}

fn bump_memlock_rlimit() {
    use nix::sys::resource::{setrlimit, Resource};

    if let Err(e) = setrlimit(
        Resource::RLIMIT_MEMLOCK,
        libc::RLIM_INFINITY,
        libc::RLIM_INFINITY,
    ) {
        warn!("failed to raise RLIMIT_MEMLOCK: {}", e);
    }
}

/// Attaches handlers from a loaded object as kprobes.
pub struct KprobeBinder<'a> {
    obj: &'a mut Object,
}

impl ProbeBinder for KprobeBinder<'_> {
    type Link = Link;

    fn bind(&mut self, spec: &ProbeSpec, symbol: &str) -> Result<Link> {
        let prog = self
            .obj
            .progs_mut()
            .find(|p| p.name() == spec.program)
            .ok_or_else(|| anyhow!("program {} missing from object", spec.program))?;
        prog.attach_kprobe(false, symbol)
            .with_context(|| format!("kprobe {} -> {}", spec.program, symbol))
    }
}

/// The six telemetry maps of a loaded object.
pub struct BpfTelemetry {
    maps: [Option<MapHandle>; 6],
}

impl BpfTelemetry {
    fn from_object(obj: &Object) -> Self {
        let maps = Slot::ALL.map(|slot| {
            let map = obj.maps().find(|m| m.name() == slot.map_name());
            match map.map(|m| MapHandle::try_from(&m)) {
                Some(Ok(handle)) => Some(handle),
                Some(Err(e)) => {
                    warn!("{}: failed to open map handle: {}", slot.map_name(), e);
                    None
                }
                None => {
                    warn!("{}: map not found, reading as 0", slot.map_name());
                    None
                }
            }
        });
        Self { maps }
    }

    fn handle(&self, slot: Slot) -> Result<&MapHandle> {
        self.maps[slot.index()]
            .as_ref()
            .ok_or_else(|| anyhow!("map {} not available", slot.map_name()))
    }

    /// Store 0 in every slot, as the loader always did before attaching.
    fn zero_all(&self) -> Result<()> {
        let key = COUNTER_KEY.to_ne_bytes();
        let zero = 0u64.to_ne_bytes();
        for slot in Slot::ALL {
            if let Ok(map) = self.handle(slot) {
                map.update(&key, &zero, MapFlags::ANY)
                    .with_context(|| format!("failed to initialize {} map", slot.map_name()))?;
            }
        }
        Ok(())
    }
}

impl TelemetrySource for BpfTelemetry {
    fn read(&self, slot: Slot) -> Result<u64> {
        let map = self.handle(slot)?;
        let bytes = map
            .lookup(&COUNTER_KEY.to_ne_bytes(), MapFlags::ANY)?
            .ok_or_else(|| anyhow!("{}: key {} not present", slot.map_name(), COUNTER_KEY))?;
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("{}: unexpected value size {}", slot.map_name(), bytes.len()))?;
        Ok(u64::from_ne_bytes(raw))
    }
}

/// Loaded and attached kprobe tracer.
///
/// Field order matters: links detach before the object is closed.
pub struct BpfTracer {
    links: Vec<Link>,
    telemetry: BpfTelemetry,
    _obj: Object,
}

impl BpfTracer {
    pub fn load(explicit: Option<&Path>, verbose: bool) -> Result<Self> {
        if !nix::unistd::Uid::effective().is_root() {
            warn!("not running as root, loading kprobes will likely fail");
        }
        bump_memlock_rlimit();

        let path = first_existing(&object_candidates(explicit))?;
        info!("loading BPF object {}", path.display());

        let mut builder = ObjectBuilder::default();
        builder.debug(verbose);
        let open = builder
            .open_file(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut obj = open
            .load()
            .with_context(|| format!("failed to load {}", path.display()))?;

        let telemetry = BpfTelemetry::from_object(&obj);
        telemetry.zero_all()?;

        let report: AttachReport<Link> = {
            let mut binder = KprobeBinder { obj: &mut obj };
            attach_all(&mut binder, &PROBES).context("failed to attach kprobes")?
        };
        info!("kprobe bindings:\n{}", report);

        Ok(Self {
            links: report.links,
            telemetry,
            _obj: obj,
        })
    }

    pub fn nr_links(&self) -> usize {
        self.links.len()
    }

    pub fn telemetry(&self) -> &BpfTelemetry {
        &self.telemetry
    }
}
