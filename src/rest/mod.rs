//! Wire plumbing shared by the public [`Client`](crate::Client) and
//! [`Server`](crate::Server): request bodies, response decoding and the axum
//! handlers.

pub(crate) mod client;
pub(crate) mod server;
