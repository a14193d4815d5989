//! RTSP control plane (RFC 2326): request/response wire types, Digest
//! authentication, method dispatch, and the server and client state
//! machines built on top of them (components K, L).

pub mod client;
pub mod digest;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use client::{RegisterListener, RtspClient, RtspClientResponse};
pub use digest::{DigestAuthenticator, DigestCredential};
pub use handler::MethodHandler;
pub use request::RtspRequest;
pub use response::RtspResponse;
pub use server::{RtspServer, ServerConfig};
