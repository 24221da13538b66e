mod headers;
mod line;
mod request;
mod response;

pub(crate) use request::{Http1RequestHead, read_http1_request_head};
pub(crate) use response::{encode_response_head, error_response};
