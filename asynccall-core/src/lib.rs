//! Status vocabulary for asynccall.
//!
//! This crate provides the types shared by the call object library
//! (`asynccall`) and anything implementing a transport for it.
//!
//! ## Modules
//!
//! - [`code`]: Terminal status codes
//! - [`status`]: The terminal status of a call

mod code;
mod status;

pub use code::*;
pub use status::*;
