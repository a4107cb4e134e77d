// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

#![forbid(non_camel_case_types)]
#![allow(missing_docs)]

//! XML-RPC library, including both serialization and remote procedure calling
//!
//! # What is XML-RPC?
//!
//! A remote procedure call protocol which encodes its calls in XML and
//! carries them over HTTP POST. Values are one of a small set of scalar
//! types (`i4`, `i8`, `double`, `boolean`, `string`, `dateTime.iso8601`,
//! `base64`, `nil`) or the two containers `array` and `struct`.
//!
//! Basic documentation found on Wikipedia
//! http://en.wikipedia.org/wiki/XML-RPC
//!
//! Full specification of the XML-RPC protocol is found here:
//! http://xmlrpc.scripting.com/spec.html
//!
//! Additional errata and hints can be found here:
//! http://effbot.org/zone/xmlrpc-errata.htm
//!
//! Fault codes follow the interoperability table:
//! http://xmlrpc-epi.sourceforge.net/specs/rfc.fault_codes.php

pub mod client;
pub mod dispatcher;
pub mod encoding;
pub mod fault;
pub mod protocol;
pub mod registry;
pub mod typed;
pub mod value;

pub use self::client::{Client, ClientError, HyperTransport, MultiCall, Transport, TransportError};
pub use self::dispatcher::Dispatcher;
pub use self::encoding::{DecodeError, EncodeError};
pub use self::fault::{Fault, MethodError};
pub use self::protocol::{Request, Response};
pub use self::registry::{MethodInfo, Registry, RegistryError};
pub use self::typed::{ConversionError, FromValue, IntoReturn, ToValue, TypedMethod};
pub use self::value::{Array, Object, Value};
