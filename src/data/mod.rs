//! Data structures and serialization for input logs

mod events;
pub(crate) mod format;

pub use events::*;
pub use format::*;
