//! JSON-RPC API module
//!
//! HTTP interface for game clients and for driving the regtest chain.

mod methods;
mod server;

pub use methods::*;
pub use server::*;
