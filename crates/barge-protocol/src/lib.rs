//! The Git Smart HTTP wire protocol for Barge.
//!
//! Three entry points, one per endpoint: [`advertise`] for
//! `GET info/refs?service=…`, [`upload_pack`] for the v2 command stream
//! (`ls-refs`, `fetch`), and [`receive_pack`] for pushes.

mod advertise;
mod error;
mod receive;
mod upload;

pub use advertise::{advertise, Service};
pub use error::ProtocolError;
pub use receive::{
    apply_and_report, build_request as build_receive_request, receive_pack,
    unpack_failure_report, ReceiveRequest,
};
pub use upload::{
    build_request as build_upload_request, split_response, upload_pack, FetchArgs,
};

/// Agent string advertised on the wire.
pub const AGENT: &str = concat!("barge/", env!("CARGO_PKG_VERSION"));

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
