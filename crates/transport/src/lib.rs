mod api;
mod bridge;
mod http;
#[cfg(any(test, feature = "stub-server"))]
pub mod stub;

pub use api::{Endpoints, HttpBackend};
pub use bridge::AuthBridge;
pub use http::{HttpTransport, Method, RequestBody, RequestOptions};
