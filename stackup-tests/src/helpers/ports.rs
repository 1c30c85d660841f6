//! Port allocation for tests that need a real listener

use std::net::{Ipv4Addr, TcpListener};

/// A loopback port that was free a moment ago
pub fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("allocate a free port")
}

/// Hold `port` on loopback as an unrelated process would
pub fn occupy_port(port: u16) -> TcpListener {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).expect("bind test listener")
}
