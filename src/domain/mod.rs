//! Plain values shared by the engine, the runtime adapters, and the binary.

pub mod error;
pub mod http;
pub mod outcome;

pub use error::DomainError;
pub use http::{CachedResponse, HeaderList, Request};
pub use outcome::{ErrorKind, RequestContext, RequestResult, ResultSource, synthesize_error};
