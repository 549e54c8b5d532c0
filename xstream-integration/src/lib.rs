#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Transport-layer primitives shared by every exchange adapter: the
//! [`awaitable::Awaitables`] cooperative task set, the [`session::Session`]
//! HTTP/WebSocket client, the cursor-based [`chain::CursorList`] a
//! self-pruning pre-processor chain is built from, and the synchronous
//! [`pipeline::Pipeline`] post-processor chain.

pub mod awaitable;
pub mod chain;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod session;

pub use awaitable::{AwaitResult, Awaitables};
pub use chain::CursorList;
pub use error::DataError;
pub use pipeline::{Flow, Pipeline, Processor};
pub use session::Session;
