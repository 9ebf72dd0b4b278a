//! Chain module - blocks, transactions, history access and the in-memory engine

mod block;
mod transaction;
mod view;
mod listener;
mod memory;

pub use block::*;
pub use transaction::*;
pub use view::*;
pub use listener::*;
pub use memory::*;
