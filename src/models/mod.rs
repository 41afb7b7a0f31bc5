// Data models for requests and normalized responses

pub mod request;
pub mod response;

pub use request::{HttpMethod, Operation, RequestBody, RequestSpec, AUTH_PATH_PREFIX};
pub use response::{Failure, ResponseBody, ResponseEnvelope};
