//! Addressing & sockets, and group-socket (multi-destination, multicast-aware UDP).
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`endpoint`] | [`Endpoint`] / [`GroupEndpointId`] address values. |
//! | [`socket`] | Low-level socket creation and option setting. |
//! | [`groupsock`] | [`groupsock::GroupSocket`] — UDP fd + destination list. |

pub mod endpoint;
pub mod groupsock;
pub mod socket;

pub use endpoint::{Endpoint, GroupEndpointId};
pub use groupsock::GroupSocket;
