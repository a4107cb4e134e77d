// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

//! Fault values and the interoperable fault code table.
//!
//! Codes follow the "specification for fault code interoperability"
//! (http://xmlrpc-epi.sourceforge.net/specs/rfc.fault_codes.php).

use std::collections::BTreeMap;

use thiserror::Error;

use crate::xmlrpc::value::Value;

pub const PARSE_ERROR_NOT_WELL_FORMED: i32 = -32700;
pub const PARSE_ERROR_UNSUPPORTED_ENCODING: i32 = -32701;
pub const PARSE_ERROR_INVALID_CHARACTER: i32 = -32702;
pub const SERVER_ERROR_INVALID_XML_RPC: i32 = -32600;
pub const SERVER_ERROR_METHOD_NOT_FOUND: i32 = -32601;
pub const SERVER_ERROR_INVALID_METHOD_PARAMS: i32 = -32602;
pub const SERVER_ERROR_INTERNAL_XML_RPC_ERROR: i32 = -32603;
pub const APPLICATION_ERROR: i32 = -32500;
pub const SYSTEM_ERROR: i32 = -32400;
pub const TRANSPORT_ERROR: i32 = -32300;

/// Returned in the slot of a `system.multicall` entry that itself names
/// `system.multicall`.
pub const MULTICALL_RECURSION_FORBIDDEN: i32 = -1;

pub const FAULT_CODE: &str = "faultCode";
pub const FAULT_STRING: &str = "faultString";

/// An XML-RPC fault: `{faultCode, faultString}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fault {code}: {message}")]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl Fault {
    pub fn new<S: Into<String>>(code: i32, message: S) -> Fault {
        Fault {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(name: &str) -> Fault {
        Fault::new(
            SERVER_ERROR_METHOD_NOT_FOUND,
            format!("method not found: {}", name),
        )
    }

    pub fn invalid_params<S: Into<String>>(message: S) -> Fault {
        Fault::new(SERVER_ERROR_INVALID_METHOD_PARAMS, message)
    }

    /// The struct carried inside `<fault><value>`.
    pub fn to_value(&self) -> Value {
        let mut members = BTreeMap::new();
        members.insert(FAULT_CODE.to_string(), Value::I32(self.code));
        members.insert(FAULT_STRING.to_string(), Value::String(self.message.clone()));
        Value::Struct(members)
    }

    /// Reads a fault back out of its struct form. The code may arrive under
    /// either integer width as long as it fits in 32 bits.
    pub fn from_value(value: &Value) -> Option<Fault> {
        let code = value.find(FAULT_CODE)?.as_i32()?;
        let message = value.find(FAULT_STRING)?.as_string()?;
        Some(Fault::new(code, message))
    }
}

/// What a method handler may fail with.
#[derive(Debug, Error)]
pub enum MethodError {
    /// Explicit application fault, sent to the caller unchanged.
    #[error(transparent)]
    Fault(#[from] Fault),

    /// Arity or type mismatch while converting parameters.
    #[error("invalid method parameters: {0}")]
    InvalidParams(String),

    /// Any other failure raised by the handler.
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },
}

impl MethodError {
    pub fn fault<S: Into<String>>(code: i32, message: S) -> MethodError {
        MethodError::Fault(Fault::new(code, message))
    }

    /// Wraps an arbitrary error, recording its type name as the kind.
    pub fn failed<E: std::error::Error>(err: E) -> MethodError {
        let type_name = std::any::type_name::<E>();
        let kind = type_name
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(type_name);
        MethodError::Failed {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }

    pub fn into_fault(self) -> Fault {
        match self {
            MethodError::Fault(fault) => fault,
            MethodError::InvalidParams(message) => Fault::invalid_params(message),
            err @ MethodError::Failed { .. } => Fault::new(APPLICATION_ERROR, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_fault_struct_shape() {
        let fault = Fault::new(4, "Too many parameters.");
        let value = fault.to_value();
        assert_eq!(value.find("faultCode"), Some(&Value::I32(4)));
        assert_eq!(value["faultString"].as_string(), Some("Too many parameters."));
        assert_eq!(Fault::from_value(&value), Some(fault));
    }

    #[test]
    fn test_from_value_rejects_incomplete_struct() {
        let mut members = BTreeMap::new();
        members.insert("faultCode".to_string(), Value::I32(1));
        assert_eq!(Fault::from_value(&Value::Struct(members)), None);
        assert_eq!(Fault::from_value(&Value::I32(1)), None);
    }

    #[test]
    fn test_method_error_mapping() {
        let fault = MethodError::fault(42, "nope").into_fault();
        assert_eq!(fault, Fault::new(42, "nope"));

        let fault = MethodError::InvalidParams("expected 2".into()).into_fault();
        assert_eq!(fault.code, SERVER_ERROR_INVALID_METHOD_PARAMS);

        let err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let fault = MethodError::failed(err).into_fault();
        assert_eq!(fault.code, APPLICATION_ERROR);
        assert_eq!(fault.message, "Error: disk on fire");
    }
}
