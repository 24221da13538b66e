#![allow(dead_code)]

mod harness;
mod http_utils;
mod net;
mod origin;

pub use harness::*;
pub use http_utils::*;
pub use net::*;
pub use origin::*;
