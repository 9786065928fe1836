//! Client library for the sixpool lease API.
//!
//! [`PoolClient`] speaks the lease protocol: pick an address from the
//! tenant's mirror, use it, report its status back. [`LeasedClient`]
//! couples a lease with a `reqwest` client bound to the leased address,
//! so outbound requests actually originate from it.

pub mod client;
pub mod error;
pub mod session;

pub use client::{PoolClient, PoolClientConfig};
pub use error::{ClientError, ClientResult};
pub use session::{bound_client, LeasedClient};
