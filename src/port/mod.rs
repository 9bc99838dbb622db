//! TCP port allocation.
//!
//! The allocator only answers "which port looks free right now"; it holds
//! nothing open afterwards. Callers act on the returned port immediately and
//! rely on [`crate::orchestrator::start_with_retry`] to recover when another
//! process wins the bind race.

use crate::container::ContainerManager;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, TcpListener};

/// Inclusive port range scanned when the preferred port is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

/// Result of an allocation. `is_default` is true iff `port` is the caller's
/// preferred port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocation {
    pub port: u16,
    pub is_default: bool,
}

/// Finds TCP ports that are free at the OS level and not claimed by a
/// running managed container.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: IpAddr,
}

impl PortAllocator {
    /// Allocator probing on 127.0.0.1.
    pub fn new() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    /// Check whether `port` can be bound.
    ///
    /// Only `EADDRINUSE` counts as unavailable. Any other bind error (e.g.
    /// permission denied on a privileged port) is treated as available so an
    /// ambiguous OS answer never blocks startup. Probe sockets are dropped
    /// before returning.
    pub fn is_available(&self, port: u16) -> bool {
        if !Self::probe(self.host, port) {
            return false;
        }
        // Also probe the wildcard address: on macOS a 127.0.0.1 bind can
        // succeed while another process holds 0.0.0.0:PORT.
        Self::probe(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    fn probe(host: IpAddr, port: u16) -> bool {
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => false,
            Err(e) => {
                tracing::debug!("Ambiguous bind error on {}:{}: {}", host, port, e);
                true
            }
        }
    }

    /// Try `preferred`, then scan `range` in ascending order skipping
    /// `preferred`. The lowest free port wins.
    pub fn find_available(&self, preferred: u16, range: PortRange) -> Result<PortAllocation> {
        self.find_available_excluding(preferred, range, &HashSet::new())
    }

    /// Like [`find_available`](Self::find_available), but never returns a port
    /// in `excluded`.
    pub fn find_available_excluding(
        &self,
        preferred: u16,
        range: PortRange,
        excluded: &HashSet<u16>,
    ) -> Result<PortAllocation> {
        if preferred != 0 && !excluded.contains(&preferred) && self.is_available(preferred) {
            return Ok(PortAllocation {
                port: preferred,
                is_default: true,
            });
        }

        if range.start <= range.end {
            for port in range.start..=range.end {
                if port == 0 || port == preferred || excluded.contains(&port) {
                    continue;
                }
                if self.is_available(port) {
                    tracing::debug!(
                        "Preferred port {} unavailable, allocated {}",
                        preferred,
                        port
                    );
                    return Ok(PortAllocation {
                        port,
                        is_default: false,
                    });
                }
            }
        }

        Err(Error::NoAvailablePort {
            start: range.start,
            end: range.end,
        })
    }

    /// Allocate while skipping ports recorded by containers whose persisted
    /// status is `running`. Stopped containers do not reserve their port.
    pub fn find_available_excluding_managed(
        &self,
        preferred: u16,
        range: PortRange,
        containers: &ContainerManager,
    ) -> Result<PortAllocation> {
        let managed = containers.running_ports()?;
        if !managed.is_empty() {
            tracing::debug!("Excluding {} managed port(s): {:?}", managed.len(), managed);
        }
        self.find_available_excluding(preferred, range, &managed)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}
