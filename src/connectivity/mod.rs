//! Online/offline detection.

mod oracle;
mod probe;

pub use oracle::{ConnectivityConfig, ConnectivityOracle, ConnectivityState, EXTERNAL_PROBE_URL};
pub use probe::{HttpProbe, ProbeOutcome, ReachabilityProbe};

pub use oracle::secs;
