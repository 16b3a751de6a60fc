/// Account JWT resolver
///
/// Stores account tokens signed by trusted operators, serves them over
/// HTTP with conditional caching, and announces every change on a
/// notification bus.

pub mod api;
pub mod bus;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod jwt;
pub mod metrics;
pub mod resolver;
pub mod server;
pub mod store;
pub mod trust;

pub use context::AppContext;
pub use error::{ResolverError, ResolverResult};
pub use resolver::{FetchOptions, FetchOutcome, ResolverService};
