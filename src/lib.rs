//! XML-RPC server and client.
//!
//! The server side is a method `Registry` driven by a `Dispatcher`, served
//! by a single-threaded non-blocking HTTP/1.x transport. The client side
//! encodes calls and hands them to a pluggable `Transport`.

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod xmlrpc;

pub use crate::config::{ClientConfig, ServerConfig};
pub use crate::error::{Error, Result};
pub use crate::server::XmlRpcServer;
pub use crate::xmlrpc::{
    Client, Dispatcher, Fault, MethodError, MethodInfo, Registry, Request, Response, Value,
};
