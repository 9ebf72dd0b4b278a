//! Games module - tracked games, name value decoding, move extraction and
//! notification payloads

mod registry;
mod value;
mod extract;
mod message;

pub use registry::*;
pub use value::*;
pub use extract::*;
pub use message::*;
