pub mod request;
pub mod response;

pub use request::{PreparedRequest, Request, RequestDefaults, RequestState};
pub use response::{Failure, Response};
