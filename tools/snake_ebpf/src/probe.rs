// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Best-effort probe attachment.
//!
//! Kernel entry points move between releases and architectures, so each event
//! class carries an ordered list of candidate symbols. The first one that
//! binds wins; a class with no bindable candidate is left dark and the rest of
//! the tracer keeps going. Only a tracer with nothing attached at all is an
//! error.

use std::fmt;

use anyhow::bail;
use anyhow::Result;
use log::{debug, info, warn};

use crate::counters::EventClass;

/// Where a class can be hooked and which handler serves it.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSpec {
    pub class: EventClass,
    pub program: &'static str,
    pub candidates: &'static [&'static str],
}

pub const PROBES: [ProbeSpec; 5] = [
    ProbeSpec {
        class: EventClass::Exec,
        program: "handle_execve",
        candidates: &[
            "sys_enter_execve",
            "__x64_sys_execve",
            "__arm64_sys_execve",
            "__s390x_sys_execve",
            "__x86_sys_execve",
        ],
    },
    ProbeSpec {
        class: EventClass::FileOpen,
        program: "handle_file_open",
        candidates: &["do_sys_openat2", "do_sys_open", "__x64_sys_openat"],
    },
    ProbeSpec {
        class: EventClass::NetConnect,
        program: "handle_network_connect",
        candidates: &["tcp_v4_connect", "tcp_v6_connect"],
    },
    ProbeSpec {
        class: EventClass::Fork,
        program: "handle_process_fork",
        candidates: &["_do_fork", "kernel_clone", "__x64_sys_clone"],
    },
    ProbeSpec {
        class: EventClass::ContextSwitch,
        program: "handle_context_switch",
        candidates: &["__schedule"],
    },
];

/// Something that can hook a handler onto a named kernel symbol.
pub trait ProbeBinder {
    /// Keeps the probe attached for as long as it lives.
    type Link;

    fn bind(&mut self, spec: &ProbeSpec, symbol: &str) -> Result<Self::Link>;
}

/// Outcome of attaching one class.
#[derive(Debug)]
pub enum BindStatus {
    Bound(&'static str),
    /// Every candidate failed; one error string per candidate, in order.
    Unbound(Vec<(&'static str, String)>),
}

#[derive(Debug)]
pub struct ClassReport {
    pub class: EventClass,
    pub status: BindStatus,
}

/// Per-class attach outcome plus the links that keep bound probes alive.
pub struct AttachReport<L> {
    pub classes: Vec<ClassReport>,
    pub links: Vec<L>,
}

impl<L> AttachReport<L> {
    pub fn bound_symbol(&self, class: EventClass) -> Option<&'static str> {
        self.classes
            .iter()
            .find(|r| r.class == class)
            .and_then(|r| match r.status {
                BindStatus::Bound(sym) => Some(sym),
                BindStatus::Unbound(_) => None,
            })
    }

    pub fn is_bound(&self, class: EventClass) -> bool {
        self.bound_symbol(class).is_some()
    }

    pub fn nr_bound(&self) -> usize {
        self.links.len()
    }

    pub fn degraded(&self) -> impl Iterator<Item = EventClass> + '_ {
        self.classes
            .iter()
            .filter(|r| matches!(r.status, BindStatus::Unbound(_)))
            .map(|r| r.class)
    }
}

impl<L> fmt::Display for AttachReport<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.classes {
            match &r.status {
                BindStatus::Bound(sym) => writeln!(f, "  {:<15} -> {}", r.class, sym)?,
                BindStatus::Unbound(errs) => {
                    writeln!(f, "  {:<15} -> (none)", r.class)?;
                    for (sym, err) in errs {
                        writeln!(f, "      {}: {}", sym, err)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Bind every probe in `specs`, trying candidates in order.
pub fn attach_all<B: ProbeBinder>(
    binder: &mut B,
    specs: &[ProbeSpec],
) -> Result<AttachReport<B::Link>> {
    let mut report = AttachReport {
        classes: Vec::with_capacity(specs.len()),
        links: Vec::with_capacity(specs.len()),
    };

    for spec in specs {
        let mut failures = Vec::new();
        let mut bound = None;

        for &symbol in spec.candidates {
            match binder.bind(spec, symbol) {
                Ok(link) => {
                    debug!("{}: {} attached to {}", spec.class, spec.program, symbol);
                    report.links.push(link);
                    bound = Some(symbol);
                    break;
                }
                Err(e) => {
                    debug!("{}: {} failed: {:#}", spec.class, symbol, e);
                    failures.push((symbol, format!("{:#}", e)));
                }
            }
        }

        let status = match bound {
            Some(sym) => BindStatus::Bound(sym),
            None => {
                warn!(
                    "{}: no candidate symbol attached ({}), class stays at zero",
                    spec.class,
                    spec.candidates.join(", ")
                );
                BindStatus::Unbound(failures)
            }
        };
        report.classes.push(ClassReport {
            class: spec.class,
            status,
        });
    }

    if report.links.is_empty() {
        bail!("failed to attach any probes:\n{}", report);
    }

    info!("attached {}/{} probes", report.nr_bound(), specs.len());
    Ok(report)
}
