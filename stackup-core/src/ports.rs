//! Port checker: is a declared port free, ours from a prior run, or held by a stranger?

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use tracing::debug;

use crate::process::Liveness;
use crate::registry::{PidRegistry, ProcessRecord, RecordHandle};

#[derive(Debug, Clone, PartialEq)]
pub enum PortStatus {
    Free,
    /// Held by a process a previous run of this orchestrator started and still owns.
    OwnedByPriorRun(ProcessRecord),
    /// Held by something we did not start (or cannot prove we started).
    Foreign,
}

/// Whether something is listening on `port` on this host.
///
/// Binding is the probe: a bind that fails with `AddrInUse` on the loopback or
/// the wildcard address means the port is held.
pub fn port_in_use(port: u16) -> bool {
    let candidates = [
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
    ];
    candidates.iter().any(|addr| match TcpListener::bind(addr) {
        Ok(_) => false,
        Err(e) if e.kind() == ErrorKind::AddrInUse => true,
        Err(e) => {
            debug!("Bind probe on {} failed: {}", addr, e);
            false
        }
    })
}

/// Classify `port` against the registry.
///
/// Ownership is never decided by name: a process record must be alive with a
/// matching fingerprint. Backend-managed records (containers) are trusted as
/// owners because the backend scopes them to this stack's project.
pub fn check_port(port: u16, registry: &PidRegistry) -> PortStatus {
    if !port_in_use(port) {
        return PortStatus::Free;
    }

    let Some(record) = registry.by_port(port) else {
        debug!("Port {} is held and no registry record claims it", port);
        return PortStatus::Foreign;
    };

    match &record.handle {
        RecordHandle::Managed { .. } => PortStatus::OwnedByPriorRun(record.clone()),
        RecordHandle::Process { .. } => match record.liveness() {
            Liveness::Alive => PortStatus::OwnedByPriorRun(record.clone()),
            verdict => {
                debug!(
                    "Port {} claimed by record '{}' but its process is {}",
                    port,
                    record.service,
                    verdict.as_str()
                );
                PortStatus::Foreign
            }
        },
    }
}
