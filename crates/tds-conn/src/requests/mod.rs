//! Requests the pipeline itself knows how to drive.
//!
//! Anything above login is supplied by the upper layer as a [`crate::Request`]
//! implementation.

pub mod login;
pub mod prelogin;

pub use login::LoginRequest;
pub use prelogin::PreloginRequest;
