//! Read-only HTTP API for inspecting the SRP server.
//!
//! # API Endpoints
//!
//! ## `/healthcheck` (GET)
//!
//!   Returns HTTP 200 (OK) and the JSON body `{"ok":"healthy"}` when the
//!   service is operational.
//!
//! ## `/hosts` (GET)
//!
//!   Returns the registered hosts (soft-deleted ones included) with their
//!   addresses, lease info, and services:
//!
//!   ```json
//!   [
//!     {
//!       "full_name": "thermo.default.service.arpa.",
//!       "addresses": ["fd00::1"],
//!       "is_deleted": false,
//!       "ttl": 3600,
//!       "lease_info": { "lease": 3600, "key_lease": 7200,
//!                       "remaining_lease": 3599000, "remaining_key_lease": 7199000 },
//!       "services": [ { "service_name": "_thermo._udp.default.service.arpa.", "...": "..." } ]
//!     }
//!   ]
//!   ```
//!
//! ## `/counters` (GET)
//!
//!   Returns the server state, bound port, and per-class response counters.
//!
//! Registrations only ever arrive through the DNS UPDATE path; this API
//! mutates nothing.

mod model;
mod routes;
pub mod server;

pub use server::new;
