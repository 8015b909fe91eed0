//! Packet processing core of the load balancer: the header parser, the
//! forwarding stages, connection tracking, the flow cache and the deparser
//! working over the tables programmed by the control plane.

pub mod csum;
pub mod ct;
pub mod ctx;
pub mod deparse;
pub mod devif;
pub mod fc;
pub mod hdr;
pub mod l2fwd;
pub mod l3fwd;
pub mod maps;
pub mod nat;
pub mod parser;
pub mod pdi;
pub mod pipeline;
pub mod policer;
pub mod sess;
pub mod tables;
pub mod xfi;

#[cfg(test)]
mod testutil;

pub use ctx::{PktCtx, PktError, PortHint};
pub use maps::{Dataplane, MapEntry, MapKey};
pub use pipeline::{ktime_get_ns, process, process_at, Verdict};
