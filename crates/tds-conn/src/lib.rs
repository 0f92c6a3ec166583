//! # tds-conn
//!
//! The TDS connection pipeline: a single-writer request dispatcher over
//! one duplex byte stream, with the in-band cleartext→TLS upgrade that
//! TDS 7.x performs inside its prelogin exchange.
//!
//! ```text
//! submit ──► [request queue] ──► start/respond ──► packets ──► codec ──► (TLS) ──► bytes
//!        ◄── completion      ◄── dispatcher     ◄── packets ◄── codec ◄── (TLS) ◄── bytes
//! ```
//!
//! One driver task per connection owns everything: the queue, the
//! lifecycle state, the codec, and the TLS engine handle. Requests run
//! strictly one at a time; the head of the queue is the only delegate
//! that sees inbound packets. Closing the connection fails every queued
//! request with [`Error::ConnectionClosed`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_conn::{Config, Connection, PreloginRequest};
//! use tds_wire::EncryptionLevel;
//!
//! let stream = TcpStream::connect("db.example.com:1433").await?;
//! let conn = Connection::spawn(stream, Config::new("db.example.com"));
//! conn.submit(Box::new(PreloginRequest::new(EncryptionLevel::Required))).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod conn;
pub mod error;
pub mod request;
pub mod requests;
pub mod state;

pub use config::Config;
pub use conn::{Completion, Connection};
pub use error::{Error, Result};
pub use request::Request;
pub use requests::{LoginRequest, PreloginRequest};
pub use state::ConnectionState;
