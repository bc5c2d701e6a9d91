//! Clients for the cloud provider APIs.
//!
//! Each resource kind gets a small capability trait over the provider's
//! REST API plus an HTTP implementation:
//! - Cloud DNS: managed zones and their change operations
//! - Cloud Run: services, long-running operations and invoker IAM policy
//!
//! All clients classify failures into [`RemoteError`](crate::RemoteError)
//! variants so reconcilers never look at HTTP status codes.

pub mod dns;
pub mod http;
pub mod run;

pub use dns::{CloudDnsClient, DnsApi};
pub use http::GcpHttp;
pub use run::{CloudRunClient, RunApi, ServiceName};
