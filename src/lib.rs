//! srpd
//!
//! An SRP ([Service Registration Protocol]) server for mesh networks.
//!
//! Constrained clients register a host (name, IPv6 addresses, ECDSA-P256
//! key) and its service instances with a single signed [DNS UPDATE]
//! message. The server grants bounded leases, keeps the registry in memory
//! until they expire, hands every accepted update to an external
//! service-update handler (e.g. an mDNS advertising proxy), and answers the
//! client only once the handler confirms. Deleted names stay reserved for
//! their key until the KEY-LEASE runs out.
//!
//! [Service Registration Protocol]: https://datatracker.ietf.org/doc/draft-ietf-dnssd-srp/
//! [DNS UPDATE]: https://www.rfc-editor.org/rfc/rfc2136
//!
#![warn(clippy::pedantic)]

pub mod api;
pub mod config;
pub mod error;
pub mod handler;
pub mod lease;
pub mod name;
pub mod registry;
pub mod server;
pub mod time;
mod update;

pub use api::new as new_api;
pub use config::{Config, SharedConfig};
pub use error::Error;
pub use handler::{
    CompletionSender, DynServiceUpdateHandler, ServiceUpdateHandler, ServiceUpdateId, UpdateResult,
};
pub use lease::{LeaseConfig, TtlConfig};
pub use registry::{
    Description, DescriptionHandle, Host, KeyRecord, LeaseInfo, Service, ServiceFlags,
};
pub use server::udp::{new as new_udp, SharedSrpServer, UdpServer};
pub use server::{AddressMode, OutboundResponse, ResponseCounters, SrpServer, State};
pub use time::{Clock, TimeMilli};
