//! Service implementations

pub mod http_upstream;
pub mod route_source;

pub use http_upstream::HttpUpstream;
pub use route_source::FileRouteSource;
