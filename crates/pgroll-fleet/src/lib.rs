//! pgroll-fleet: client side of the fleet management API.
//!
//! Resolves clusters and their live members, and manages node leases.
//!
//! # Architecture
//!
//! ```text
//! FleetApi (HTTP/JSON over hyper)
//!   ├── MembershipResolver
//!   │   ├── lookup()     → Cluster (org, backend kind)
//!   │   ├── list_nodes() → leased backend, filtered by state
//!   │   └── app_status() → legacy backend allocations
//!   └── LeaseService
//!       ├── acquire() / renew() / release()
//!       └── wrapped by LeaseCoordinator (all-or-nothing, re-validation)
//! ```

pub mod client;
pub mod error;
pub mod lease;
pub mod membership;

pub use client::FleetApi;
pub use error::{FleetError, FleetResult};
pub use lease::{LeaseCoordinator, LeaseError, LeaseService, LeaseSet};
pub use membership::MembershipResolver;
