// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

//! Method registry.
//!
//! Maps method names to handlers plus their help text and signatures. The
//! `system.*` introspection methods and `system.multicall` are part of every
//! registry; they cannot be replaced or removed.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::error::panic_message;
use crate::xmlrpc::fault::{Fault, MethodError, MULTICALL_RECURSION_FORBIDDEN};
use crate::xmlrpc::value::Value;

pub const LIST_METHODS: &str = "system.listMethods";
pub const METHOD_HELP: &str = "system.methodHelp";
pub const METHOD_SIGNATURE: &str = "system.methodSignature";
pub const GET_CAPABILITIES: &str = "system.getCapabilities";
pub const MULTICALL: &str = "system.multicall";

/// The untyped handler contract: positional parameters in, positional
/// results out.
pub type MethodHandler = Box<dyn Fn(&[Value]) -> Result<Vec<Value>, MethodError> + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("method already registered: {0}")]
    MethodAlreadyRegistered(String),

    #[error("method name must not be empty")]
    EmptyMethodName,
}

/// Help text and type signatures reported through introspection. Each
/// signature lists the return type first, then the parameter types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodInfo {
    pub help: String,
    pub signatures: Vec<Vec<String>>,
}

impl MethodInfo {
    pub fn new<S: Into<String>>(help: S) -> MethodInfo {
        MethodInfo {
            help: help.into(),
            signatures: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: &[&str]) -> MethodInfo {
        self.signatures
            .push(signature.iter().map(|s| s.to_string()).collect());
        self
    }
}

struct MethodEntry {
    handler: MethodHandler,
    info: MethodInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    ListMethods,
    MethodHelp,
    MethodSignature,
    GetCapabilities,
    Multicall,
}

const BUILTINS: [(&str, Builtin); 5] = [
    (LIST_METHODS, Builtin::ListMethods),
    (METHOD_HELP, Builtin::MethodHelp),
    (METHOD_SIGNATURE, Builtin::MethodSignature),
    (GET_CAPABILITIES, Builtin::GetCapabilities),
    (MULTICALL, Builtin::Multicall),
];

impl Builtin {
    fn lookup(name: &str) -> Option<Builtin> {
        BUILTINS
            .iter()
            .find(|(builtin_name, _)| *builtin_name == name)
            .map(|(_, builtin)| *builtin)
    }

    fn info(self) -> MethodInfo {
        match self {
            Builtin::ListMethods => MethodInfo::new(
                "This method lists all the methods that the XML-RPC server knows how to dispatch",
            )
            .with_signature(&["array"]),
            Builtin::MethodHelp => {
                MethodInfo::new("Returns help text if defined for the method passed, otherwise returns an empty string")
                    .with_signature(&["string", "string"])
            }
            Builtin::MethodSignature => MethodInfo::new(
                "Returns an array of known signatures (an array of arrays) for the method name passed. \
                 If no signatures are known, returns a none-array (test for type != array to detect missing signature)",
            )
            .with_signature(&["array", "string"]),
            Builtin::GetCapabilities => {
                MethodInfo::new("Returns a struct describing the XML-RPC specifications supported by this server")
                    .with_signature(&["struct"])
            }
            Builtin::Multicall => MethodInfo::new(
                "Boxcarring: processes an array of calls, and returns an array of results. \
                 Each call is a struct {methodName, params}; each result is either a one-element \
                 array holding the return value or a fault struct",
            )
            .with_signature(&["array", "array"]),
        }
    }
}

/// Registry mapping method names to handlers.
#[derive(Default)]
pub struct Registry {
    methods: HashMap<String, MethodEntry>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers a handler under `name` with empty help and no signatures.
    pub fn add_method<F>(&mut self, name: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, MethodError> + Send + 'static,
    {
        self.add_method_with_info(name, handler, MethodInfo::default())
    }

    pub fn add_method_with_info<F>(
        &mut self,
        name: &str,
        handler: F,
        info: MethodInfo,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, MethodError> + Send + 'static,
    {
        if name.is_empty() {
            return Err(RegistryError::EmptyMethodName);
        }
        if self.contains(name) {
            return Err(RegistryError::MethodAlreadyRegistered(name.to_string()));
        }
        debug!("registering method {}", name);
        self.methods.insert(
            name.to_string(),
            MethodEntry {
                handler: Box::new(handler),
                info,
            },
        );
        Ok(())
    }

    /// Removes a user method. Returns false when nothing was removed,
    /// including for the built-in `system.*` methods.
    pub fn remove_method(&mut self, name: &str) -> bool {
        if Builtin::lookup(name).is_some() {
            warn!("refusing to remove built-in method {}", name);
            return false;
        }
        self.methods.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        Builtin::lookup(name).is_some() || self.methods.contains_key(name)
    }

    /// All callable names, built-ins included, sorted.
    pub fn list_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTINS
            .iter()
            .map(|(name, _)| name.to_string())
            .chain(self.methods.keys().cloned())
            .collect();
        names.sort();
        names
    }

    pub fn method_info(&self, name: &str) -> Option<MethodInfo> {
        match Builtin::lookup(name) {
            Some(builtin) => Some(builtin.info()),
            None => self.methods.get(name).map(|entry| entry.info.clone()),
        }
    }

    /// Calls `name` with `params`. A panicking handler is reported as a
    /// `Failed` error of kind `panic`.
    pub fn invoke(&self, name: &str, params: &[Value]) -> Result<Vec<Value>, MethodError> {
        if let Some(builtin) = Builtin::lookup(name) {
            return self.invoke_builtin(builtin, params);
        }

        let entry = self
            .methods
            .get(name)
            .ok_or_else(|| MethodError::Fault(Fault::method_not_found(name)))?;

        debug!("invoking {} with {} parameter(s)", name, params.len());
        match panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(params))) {
            Ok(result) => result,
            Err(payload) => Err(MethodError::Failed {
                kind: "panic".to_string(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    fn invoke_builtin(&self, builtin: Builtin, params: &[Value]) -> Result<Vec<Value>, MethodError> {
        match builtin {
            Builtin::ListMethods => {
                expect_no_params(params)?;
                let names = self.list_methods().into_iter().map(Value::String).collect();
                Ok(vec![Value::Array(names)])
            }
            Builtin::MethodHelp => {
                let name = method_name_param(params)?;
                let info = self
                    .method_info(name)
                    .ok_or_else(|| MethodError::Fault(Fault::method_not_found(name)))?;
                Ok(vec![Value::String(info.help)])
            }
            Builtin::MethodSignature => {
                let name = method_name_param(params)?;
                let info = self
                    .method_info(name)
                    .ok_or_else(|| MethodError::Fault(Fault::method_not_found(name)))?;
                if info.signatures.is_empty() {
                    return Ok(vec![Value::String("undef".to_string())]);
                }
                let signatures = info
                    .signatures
                    .into_iter()
                    .map(|signature| Value::Array(signature.into_iter().map(Value::String).collect()))
                    .collect();
                Ok(vec![Value::Array(signatures)])
            }
            Builtin::GetCapabilities => {
                expect_no_params(params)?;
                Ok(vec![capabilities()])
            }
            Builtin::Multicall => self.multicall(params),
        }
    }

    fn multicall(&self, params: &[Value]) -> Result<Vec<Value>, MethodError> {
        let calls = match params {
            [Value::Array(calls)] => calls,
            _ => {
                return Err(MethodError::InvalidParams(
                    "system.multicall expects one array of calls".to_string(),
                ))
            }
        };

        debug!("system.multicall with {} call(s)", calls.len());
        let results = calls
            .iter()
            .map(|call| match self.multicall_entry(call) {
                Ok(values) => Value::Array(values),
                Err(err) => err.into_fault().to_value(),
            })
            .collect();
        Ok(vec![Value::Array(results)])
    }

    fn multicall_entry(&self, call: &Value) -> Result<Vec<Value>, MethodError> {
        let name = call
            .find("methodName")
            .and_then(Value::as_string)
            .ok_or_else(|| {
                MethodError::InvalidParams("multicall entry has no methodName string".to_string())
            })?;
        if name == MULTICALL {
            return Err(MethodError::fault(
                MULTICALL_RECURSION_FORBIDDEN,
                "Recursive system.multicall forbidden",
            ));
        }
        let params: &[Value] = match call.find("params") {
            Some(Value::Array(params)) => params,
            None => &[],
            Some(_) => {
                return Err(MethodError::InvalidParams(
                    "multicall entry params must be an array".to_string(),
                ))
            }
        };
        self.invoke(name, params)
    }
}

fn expect_no_params(params: &[Value]) -> Result<(), MethodError> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(MethodError::InvalidParams(format!(
            "expected no parameters, got {}",
            params.len()
        )))
    }
}

fn method_name_param(params: &[Value]) -> Result<&str, MethodError> {
    match params {
        [Value::String(name)] => Ok(name.as_str()),
        _ => Err(MethodError::InvalidParams(
            "expected a single method name string".to_string(),
        )),
    }
}

fn capability(url: &str, version: i32) -> Value {
    let mut spec = BTreeMap::new();
    spec.insert("specUrl".to_string(), Value::String(url.to_string()));
    spec.insert("specVersion".to_string(), Value::I32(version));
    Value::Struct(spec)
}

fn capabilities() -> Value {
    let mut caps = BTreeMap::new();
    caps.insert(
        "xmlrpc".to_string(),
        capability("http://www.xmlrpc.com/spec", 1),
    );
    caps.insert(
        "introspection".to_string(),
        capability(
            "http://xmlrpc-c.sourceforge.net/xmlrpc-c/introspection.html",
            2,
        ),
    );
    caps.insert(
        MULTICALL.to_string(),
        capability("http://www.xmlrpc.com/discuss/msgReader$1208", 1),
    );
    Value::Struct(caps)
}
