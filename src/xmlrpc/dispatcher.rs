// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

use crate::xmlrpc::encoding;
use crate::xmlrpc::fault::{
    Fault, SERVER_ERROR_INTERNAL_XML_RPC_ERROR, SERVER_ERROR_INVALID_XML_RPC,
};
use crate::xmlrpc::protocol::{Request, Response};
use crate::xmlrpc::registry::Registry;

/// Turns request documents into response documents using a `Registry`.
#[derive(Default)]
pub struct Dispatcher {
    registry: Registry,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Dispatcher {
        Dispatcher { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Handles one `<methodCall>` document. Always returns a well-formed
    /// `<methodResponse>`, a fault if anything went wrong.
    pub fn handle_request(&self, body: &str) -> String {
        trace!("XMLRPC request body: {}", body);
        let response = self.dispatch(body);
        let xml = match response.to_xml() {
            Ok(xml) => xml,
            Err(err) => {
                error!("failed to encode XMLRPC response: {}", err);
                encoding::encode_fault_document(
                    SERVER_ERROR_INTERNAL_XML_RPC_ERROR,
                    &format!("internal error while encoding response: {}", err),
                )
            }
        };
        trace!("XMLRPC response body: {}", xml);
        xml
    }

    /// Decodes, looks up and invokes, leaving the encoding to the caller.
    pub fn dispatch(&self, body: &str) -> Response {
        let request = match Request::from_xml(body) {
            Ok(request) => request,
            Err(err) => {
                debug!("rejecting undecodable request: {}", err);
                return Response::from_fault(Fault::new(
                    SERVER_ERROR_INVALID_XML_RPC,
                    format!("invalid XML-RPC request: {}", err),
                ));
            }
        };

        match self.registry.invoke(&request.method, &request.params) {
            Ok(values) => Response::success(values),
            Err(err) => {
                let fault = err.into_fault();
                debug!("{} failed with {}", request.method, fault);
                Response::from_fault(fault)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmlrpc::fault::{
        MethodError, APPLICATION_ERROR, SERVER_ERROR_INVALID_METHOD_PARAMS,
        SERVER_ERROR_METHOD_NOT_FOUND,
    };
    use crate::xmlrpc::value::Value;
    use std::fmt;
    use time::{Date, Month, PrimitiveDateTime, Time};

    #[derive(Debug)]
    struct Overheated;

    impl fmt::Display for Overheated {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("core temperature too high")
        }
    }

    impl std::error::Error for Overheated {}

    fn dispatcher() -> Dispatcher {
        let mut registry = Registry::new();
        registry
            .add_typed_method("swap", |a: i32, b: i32| (b, a))
            .unwrap();
        registry
            .add_method("overheat", |_: &[Value]| Err(MethodError::failed(Overheated)))
            .unwrap();
        registry
            .add_method("teapot", |_: &[Value]| Err(MethodError::fault(418, "I'm a teapot")))
            .unwrap();
        registry
            .add_method("ancient", |_: &[Value]| {
                let date = Date::from_calendar_date(-44, Month::March, 15)
                    .map_err(MethodError::failed)?;
                Ok(vec![Value::DateTime(PrimitiveDateTime::new(date, Time::MIDNIGHT))])
            })
            .unwrap();
        registry
            .add_method("bell", |_: &[Value]| Ok(vec![Value::String("bell\u{7}".into())]))
            .unwrap();
        Dispatcher::new(registry)
    }

    fn fault_of(xml: &str) -> Fault {
        Response::from_xml(xml).unwrap().fault().unwrap()
    }

    fn call(method: &str, params: Vec<Value>) -> String {
        Request { method: method.to_string(), params }.to_xml().unwrap()
    }

    #[test]
    fn test_swap() {
        let xml = dispatcher().handle_request(&call("swap", vec![Value::I32(123), Value::I32(456)]));
        let response = Response::from_xml(&xml).unwrap();
        assert_eq!(response.into_result(), Ok(vec![Value::I32(456), Value::I32(123)]));
    }

    #[test]
    fn test_broken_xml() {
        let xml = dispatcher().handle_request("I am broken XML. <phew>");
        assert_eq!(fault_of(&xml).code, SERVER_ERROR_INVALID_XML_RPC);
    }

    #[test]
    fn test_unknown_method() {
        let xml = dispatcher().handle_request(&call("nope", vec![]));
        assert_eq!(fault_of(&xml).code, SERVER_ERROR_METHOD_NOT_FOUND);
    }

    #[test]
    fn test_bad_params() {
        let d = dispatcher();
        let xml = d.handle_request(&call("swap", vec![Value::I32(1)]));
        assert_eq!(fault_of(&xml).code, SERVER_ERROR_INVALID_METHOD_PARAMS);

        let xml = d.handle_request(&call("swap", vec![Value::from("one"), Value::from("two")]));
        assert_eq!(fault_of(&xml).code, SERVER_ERROR_INVALID_METHOD_PARAMS);
    }

    #[test]
    fn test_application_fault_passes_through() {
        let xml = dispatcher().handle_request(&call("teapot", vec![]));
        assert_eq!(fault_of(&xml), Fault::new(418, "I'm a teapot"));
    }

    #[test]
    fn test_handler_error_is_wrapped() {
        let xml = dispatcher().handle_request(&call("overheat", vec![]));
        assert_eq!(
            fault_of(&xml),
            Fault::new(APPLICATION_ERROR, "Overheated: core temperature too high")
        );
    }

    #[test]
    fn test_unencodable_result_becomes_internal_fault() {
        let xml = dispatcher().handle_request(&call("ancient", vec![]));
        assert_eq!(fault_of(&xml).code, SERVER_ERROR_INTERNAL_XML_RPC_ERROR);
    }

    #[test]
    fn test_text_outside_xml_becomes_internal_fault() {
        let xml = dispatcher().handle_request(&call("bell", vec![]));
        let fault = fault_of(&xml);
        assert_eq!(fault.code, SERVER_ERROR_INTERNAL_XML_RPC_ERROR);
        assert!(fault.message.contains("U+0007"));
    }
}
