//! Walking the address space of one controller.
//! 遍历一个控制器下的全部设备地址。

use log::{trace, warn};

use crate::error::{Error, Result};

/// Addresses are `1..MAX_DEVICE_ADDRESS`; 0 is the unaddressed default.
pub const MAX_DEVICE_ADDRESS: u8 = 128;

/// Addresses already reported during one controller scan.
#[derive(Debug, Clone)]
pub struct ScanSession {
    visited: [bool; MAX_DEVICE_ADDRESS as usize],
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            visited: [false; MAX_DEVICE_ADDRESS as usize],
        }
    }

    pub fn reset(&mut self) {
        self.visited = [false; MAX_DEVICE_ADDRESS as usize];
    }

    pub fn mark_visited(&mut self, addr: u8) {
        if let Some(slot) = self.visited.get_mut(addr as usize) {
            *slot = true;
        }
    }

    pub fn is_visited(&self, addr: u8) -> bool {
        self.visited.get(addr as usize).copied().unwrap_or(false)
    }

    pub fn visited(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_DEVICE_ADDRESS).filter(|&addr| self.is_visited(addr))
    }
}

/// Which addresses an operation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Address(u8),
}

impl From<Option<u8>> for Target {
    /// `None` and the zero address both mean "every address".
    fn from(addr: Option<u8>) -> Self {
        match addr {
            Some(addr) if addr != 0 => Target::Address(addr),
            _ => Target::All,
        }
    }
}

/// What happened across one scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Addresses the operation succeeded for, in visiting order.
    pub found: Vec<u8>,
    pub absent: usize,
    /// Addresses whose failure was reported.
    pub failed: Vec<u8>,
}

/// Runs `op` for every address of `target` in ascending order.
///
/// With `dedup` set, addresses already in `session` are skipped and each
/// address `op` succeeds for is marked visited. Per-address failures are
/// logged and never end the scan; an absent device is only worth a warning
/// when it was the single address asked for. Output errors are returned.
pub fn scan<F>(target: Target, session: &mut ScanSession, dedup: bool, mut op: F) -> Result<ScanOutcome>
where
    F: FnMut(u8, &mut ScanSession) -> Result<()>,
{
    let (addrs, single) = match target {
        Target::All => (1..=MAX_DEVICE_ADDRESS - 1, false),
        Target::Address(addr) => (addr..=addr, true),
    };

    let mut outcome = ScanOutcome::default();
    for addr in addrs {
        if dedup && session.is_visited(addr) {
            trace!("addr {}: already reported", addr);
            continue;
        }

        match op(addr, session) {
            Ok(()) => {
                if dedup {
                    session.mark_visited(addr);
                }
                outcome.found.push(addr);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err @ Error::DeviceAbsent { .. }) => {
                outcome.absent += 1;
                if single {
                    warn!("{}", err);
                } else {
                    trace!("{}", err);
                }
            }
            Err(err) => {
                match err {
                    Error::QueryFailed { .. } => warn!("{}", err),
                    _ => warn!("addr {}: {}", addr, err),
                }
                outcome.failed.push(addr);
            }
        }
    }
    Ok(outcome)
}
