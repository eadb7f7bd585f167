//! Sprite batching.
//!
//! Draw requests are pooled as [`BatchItem`]s during a session. At flush the
//! [`SpriteBatcher`] orders them by [`SortMode`], splits the ordered sequence
//! into runs sharing a texture and issues one draw call per run.

mod batcher;
mod pool;

pub use batcher::*;
pub use pool::*;
