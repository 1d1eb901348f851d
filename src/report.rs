//! Runs one report mode over one or all controllers.

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use log::{debug, warn};

use crate::descriptor;
use crate::device::ConfigIndex;
use crate::enumerate::{self, ScanOutcome, ScanSession, Target};
use crate::error::{Error, QueryError, Result};
use crate::Controller;

/// The report printed for each controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// One line per device, more with higher verbosity.
    #[default]
    Summary,
    DeviceDescriptor,
    ConfigDescriptor(ConfigIndex),
    /// Every record of a configuration's full descriptor set.
    FullDump(ConfigIndex),
    Stats,
}

/// Everything one invocation asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportConfig {
    pub mode: Mode,
    /// Report only this controller instead of every one found.
    pub controller: Option<PathBuf>,
    pub address: Option<u8>,
    pub verbosity: u8,
}

pub struct Report<W: Write> {
    out: W,
    config: ReportConfig,
    session: ScanSession,
}

impl<W: Write> Report<W> {
    pub fn new(out: W, config: ReportConfig) -> Self {
        Self {
            out,
            config,
            session: ScanSession::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Reports the configured controller, or every controller the platform
    /// lists. Failing to reach a named controller fails the whole run.
    pub fn run(&mut self) -> anyhow::Result<()> {
        match self.config.controller.clone() {
            Some(path) => {
                let ctrl = crate::open_controller(&path)
                    .with_context(|| format!("cannot open {}", path.display()))?;
                self.controller(ctrl.as_ref())?;
            }
            None => {
                let all = crate::controllers().context("cannot list USB controllers")?;
                if all.is_empty() && self.config.verbosity > 0 {
                    writeln!(self.out, "usbdevs: no USB controllers found")?;
                }
                for ctrl in &all {
                    self.controller(ctrl.as_ref())?;
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }

    /// Runs the configured mode against a single controller.
    pub fn controller(&mut self, ctrl: &dyn Controller) -> Result<ScanOutcome> {
        debug!("reporting {:?} for {}", self.config.mode, ctrl.name());
        self.session.reset();

        let target = Target::from(self.config.address);
        let Self {
            out,
            config,
            session,
        } = self;

        if config.mode != Mode::Stats && target == Target::All {
            writeln!(out, "Controller {}:", ctrl.name())?;
        }

        let verbosity = config.verbosity;
        match config.mode {
            Mode::Stats => {
                stats(out, ctrl)?;
                Ok(ScanOutcome::default())
            }
            Mode::Summary => enumerate::scan(target, session, true, |addr, session| {
                let info = ctrl
                    .device_info(addr, session)
                    .map_err(|e| Error::query(addr, e))?;
                emit(out, |s| info.render(verbosity, s))
            }),
            Mode::DeviceDescriptor => enumerate::scan(target, session, false, |addr, _| {
                let dd = ctrl
                    .device_descriptor(addr)
                    .map_err(|e| Error::query(addr, e))?;
                emit(out, |s| dd.render(addr, s))
            }),
            Mode::ConfigDescriptor(index) => enumerate::scan(target, session, false, |addr, _| {
                let cd = ctrl
                    .config_descriptor(addr, index)
                    .map_err(|e| Error::query(addr, e))?;
                emit(out, |s| cd.render(addr, s))
            }),
            Mode::FullDump(index) => enumerate::scan(target, session, false, |addr, _| {
                full_dump(out, ctrl, addr, index)
            }),
        }
    }
}

/// Sizes the buffer from the configuration descriptor, fetches the full
/// set into it and prints every record. Nothing is fetched when the size
/// query fails.
pub fn full_dump<W: Write>(
    out: &mut W,
    ctrl: &dyn Controller,
    addr: u8,
    config: ConfigIndex,
) -> Result<()> {
    let cd = ctrl
        .config_descriptor(addr, config)
        .map_err(|e| Error::query(addr, e))?;

    let size = cd.total_length as usize;
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| Error::AllocationFailed { size })?;
    buf.resize(size, 0);

    ctrl.full_descriptor(addr, config, &mut buf)
        .map_err(|e| Error::query(addr, e))?;

    write!(out, "addr {:02}, ", addr)?;
    let dumped = descriptor::dump(&buf, size, out);
    // Nothing after the prefix yet, so the line is still open.
    if matches!(dumped, Ok(0) | Err(Error::MalformedDescriptor { offset: 0 })) {
        writeln!(out)?;
    }
    dumped.map(drop)
}

fn stats<W: Write>(out: &mut W, ctrl: &dyn Controller) -> Result<()> {
    write!(out, "Controller {}:", ctrl.name())?;
    match ctrl.stats() {
        Ok(stats) => emit(out, |s| stats.render(s)),
        Err(err) => {
            writeln!(out)?;
            if !matches!(err, QueryError::NoDevice) {
                warn!("controller {}: {}", ctrl.name(), err);
            }
            Ok(())
        }
    }
}

/// Formats a fixed record and writes it out in one piece.
fn emit<W, F>(out: &mut W, render: F) -> Result<()>
where
    W: Write,
    F: FnOnce(&mut String) -> fmt::Result,
{
    let mut text = String::new();
    render(&mut text).map_err(|_| io::Error::other("formatting failed"))?;
    out.write_all(text.as_bytes())?;
    Ok(())
}
