/* src/debug.rs */

use std::net::IpAddr;

use serde::Serialize;

/// Who is asking for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// Privileged operator allowed to see resolution internals.
    Operator,
    Anonymous,
}

/// Read-only snapshot of one resolution, for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugReport {
    pub remote_addr: String,
    pub from_trusted_proxy: bool,
    pub resolved_real_ip: IpAddr,
    pub require_trusted_proxy: bool,
    pub cdn_cache_size: usize,
}
