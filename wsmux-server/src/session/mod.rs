//! Session management
//!
//! A session is one shell on a PTY, its replay buffer, and the set of
//! connections currently attached to it. The [`SessionRegistry`] owns all
//! of them; connections only ever hold a session id and their queue.

mod buffer;
mod client;
mod idle;
mod record;
mod registry;
mod supervisor;

pub use client::{client_channel, ClientId};
pub use registry::SessionRegistry;
