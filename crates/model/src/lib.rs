//! The protocol between the agent runtime and hosted language models.
//!
//! A model provider turns a [`ModelRequest`] (history messages plus tool
//! declarations) into a stream of [`ModelResponseEvent`]s. The agent only
//! talks to providers through the traits in this crate, so the Gemini
//! client and the scripted test model are interchangeable.
//!
//! Nothing here performs I/O. Provider crates implement the traits, and
//! the agent crate drives them.

#![deny(missing_docs)]

mod error;
mod opaque;
mod provider;
mod request;
mod response;

pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;
