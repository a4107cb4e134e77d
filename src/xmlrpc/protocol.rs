// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

use crate::xmlrpc::encoding::{self, DecodeResult, EncodeResult};
use crate::xmlrpc::fault::Fault;
use crate::xmlrpc::typed::{ConversionError, FromValue};
use crate::xmlrpc::value::Value;

/// A `<methodCall>`: method name plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub params: Vec<Value>,
}

/// A `<methodResponse>`. When `is_fault` is set, `params` holds exactly the
/// fault struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub is_fault: bool,
    pub params: Vec<Value>,
}

impl Request {
    pub fn new(method: &str) -> Request {
        Request {
            method: method.to_string(),
            params: Vec::new(),
        }
    }

    pub fn argument<T: Into<Value>>(mut self, value: T) -> Request {
        self.params.push(value.into());
        self
    }

    pub fn to_xml(&self) -> EncodeResult<String> {
        encoding::encode_call(self)
    }

    pub fn from_xml(body: &str) -> DecodeResult<Request> {
        encoding::decode_call(body)
    }
}

impl Response {
    pub fn success(params: Vec<Value>) -> Response {
        Response {
            is_fault: false,
            params,
        }
    }

    pub fn from_fault(fault: Fault) -> Response {
        Response {
            is_fault: true,
            params: vec![fault.to_value()],
        }
    }

    pub fn to_xml(&self) -> EncodeResult<String> {
        encoding::encode_response(self)
    }

    pub fn from_xml(body: &str) -> DecodeResult<Response> {
        encoding::decode_response(body)
    }

    /// The fault carried by this response, if it is a well-formed one.
    pub fn fault(&self) -> Option<Fault> {
        if !self.is_fault {
            return None;
        }
        self.params.first().and_then(Fault::from_value)
    }

    pub fn into_result(self) -> Result<Vec<Value>, Fault> {
        match self.fault() {
            Some(fault) => Err(fault),
            None => Ok(self.params),
        }
    }

    /// Converts every returned value to `T`.
    pub fn result<T: FromValue>(&self) -> Result<Vec<T>, ConversionError> {
        self.params.iter().map(T::from_value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_encode() {
        let expected = "<?xml version=\"1.0\"?><methodCall><methodName>method_name_value</methodName><params><param><value><string>string_value</string></value></param><param><value><double>4.2</double></value></param><param><value><boolean>1</boolean></value></param></params></methodCall>";

        let request = Request::new("method_name_value")
            .argument("string_value")
            .argument(4.2)
            .argument(true);

        assert_eq!(expected, request.to_xml().unwrap());
    }

    #[test]
    fn test_decode() {
        let body = "<?xml version=\"1.0\" encoding=\"utf-8\"?>
                    <methodResponse>
                      <params>
                        <param><value><struct>
                          <member><name>key1</name><value><string>string_value</string></value></member>
                          <member><name>key2</name><value><double>4.2</double></value></member>
                        </struct></value></param>
                      </params>
                    </methodResponse>";

        let response = Response::from_xml(body).unwrap();
        let result = response.result::<BTreeMap<String, Value>>().unwrap();
        assert_eq!(result[0]["key1"], Value::String("string_value".into()));
        assert_eq!(result[0]["key2"], Value::F64(4.2));
    }

    #[test]
    fn test_fault_round_trip() {
        let response = Response::from_fault(Fault::new(-32601, "method not found: nope"));
        let decoded = Response::from_xml(&response.to_xml().unwrap()).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(
            decoded.into_result(),
            Err(Fault::new(-32601, "method not found: nope"))
        );
    }

    #[test]
    fn test_success_has_no_fault() {
        let response = Response::success(vec![Value::I32(1), Value::I32(2)]);
        assert_eq!(response.fault(), None);
        assert_eq!(response.result::<i32>().unwrap(), vec![1, 2]);
    }
}
