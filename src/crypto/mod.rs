//! Hash primitives shared by the chain model and the notifiers

mod hash;

pub use hash::*;
