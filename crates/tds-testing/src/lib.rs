//! # tds-testing
//!
//! Test support for the TDS connection pipeline: a scripted mock server
//! speaking the packet layer over real TCP sockets. Used by the
//! integration tests of `tds-conn`; not intended for production code.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;

pub use mock_server::{BatchBehavior, MockServer, MockServerBuilder, ServerScript};
