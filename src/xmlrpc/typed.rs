// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

//! Typed conveniences over the untyped `&[Value] -> Vec<Value>` handler
//! contract.
//!
//! ```
//! use xmlrpc_httpd::xmlrpc::Registry;
//!
//! let mut registry = Registry::new();
//! registry
//!     .add_typed_method("swap", |a: i32, b: i32| (b, a))
//!     .unwrap();
//! ```

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use time::PrimitiveDateTime;

use crate::xmlrpc::fault::MethodError;
use crate::xmlrpc::registry::{MethodInfo, Registry, RegistryError};
use crate::xmlrpc::value::Value;

/// A value could not be converted to the requested Rust type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("expected {expected}, got {found}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: String,
}

impl ConversionError {
    fn new(expected: &'static str, value: &Value) -> ConversionError {
        let found = match *value {
            Value::String(ref s) => format!("string {:?}", s),
            ref other => other.type_name().to_string(),
        };
        ConversionError { expected, found }
    }
}

/// Conversion into a `Value`.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Conversion out of a `Value`.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, ConversionError>;
}

macro_rules! to_value_impl {
    ($($t:ty),+) => (
        $(impl ToValue for $t {
            fn to_value(&self) -> Value { Value::from(self.clone()) }
        })+
    )
}

to_value_impl! { i8, i16, i32, i64, u8, u16, u32, f32, f64, bool, String, PrimitiveDateTime }

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToValue for () {
    fn to_value(&self) -> Value {
        Value::Nil
    }
}

impl<'a, T: ToValue + ?Sized> ToValue for &'a T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl<A: ToValue> ToValue for [A] {
    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(|elt| elt.to_value()).collect())
    }
}

impl<A: ToValue> ToValue for Vec<A> {
    fn to_value(&self) -> Value {
        self.as_slice().to_value()
    }
}

impl<A: ToValue> ToValue for BTreeMap<String, A> {
    fn to_value(&self) -> Value {
        Value::Struct(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_value()))
                .collect(),
        )
    }
}

impl<A: ToValue> ToValue for HashMap<String, A> {
    fn to_value(&self) -> Value {
        Value::Struct(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_value()))
                .collect(),
        )
    }
}

impl<A: ToValue> ToValue for Option<A> {
    fn to_value(&self) -> Value {
        match *self {
            None => Value::Nil,
            Some(ref value) => value.to_value(),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

// Numbers sent as strings are accepted as long as they parse.
impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match *value {
            Value::String(ref s) => s.trim().parse().ok(),
            ref other => other.as_i32(),
        }
        .ok_or_else(|| ConversionError::new("int", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match *value {
            Value::String(ref s) => s.trim().parse().ok(),
            ref other => other.as_i64(),
        }
        .ok_or_else(|| ConversionError::new("i8", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match *value {
            Value::String(ref s) => s.trim().parse().ok(),
            ref other => other.as_f64(),
        }
        .ok_or_else(|| ConversionError::new("double", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_boolean()
            .ok_or_else(|| ConversionError::new("boolean", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_string()
            .map(str::to_string)
            .ok_or_else(|| ConversionError::new("string", value))
    }
}

impl FromValue for PrimitiveDateTime {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_datetime()
            .ok_or_else(|| ConversionError::new("dateTime.iso8601", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match *value {
            Value::Nil => Ok(None),
            ref other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_array()
            .ok_or_else(|| ConversionError::new("array", value))?
            .iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_struct()
            .ok_or_else(|| ConversionError::new("struct", value))?
            .iter()
            .map(|(key, member)| T::from_value(member).map(|v| (key.clone(), v)))
            .collect()
    }
}

/// What a typed handler may return: one value, several positional values
/// (tuples), none (`()`), or a `Result` of any of those.
pub trait IntoReturn {
    fn into_return(self) -> Result<Vec<Value>, MethodError>;
}

macro_rules! into_return_single {
    ($($t:ty),+) => (
        $(impl IntoReturn for $t {
            fn into_return(self) -> Result<Vec<Value>, MethodError> {
                Ok(vec![self.to_value()])
            }
        })+
    )
}

into_return_single! { i8, i16, i32, i64, u8, u16, u32, f32, f64, bool, String, PrimitiveDateTime, Value }

impl<'a> IntoReturn for &'a str {
    fn into_return(self) -> Result<Vec<Value>, MethodError> {
        Ok(vec![self.to_value()])
    }
}

impl<A: ToValue> IntoReturn for Vec<A> {
    fn into_return(self) -> Result<Vec<Value>, MethodError> {
        Ok(vec![self.to_value()])
    }
}

impl<A: ToValue> IntoReturn for Option<A> {
    fn into_return(self) -> Result<Vec<Value>, MethodError> {
        Ok(vec![self.to_value()])
    }
}

impl<A: ToValue> IntoReturn for BTreeMap<String, A> {
    fn into_return(self) -> Result<Vec<Value>, MethodError> {
        Ok(vec![self.to_value()])
    }
}

impl IntoReturn for () {
    fn into_return(self) -> Result<Vec<Value>, MethodError> {
        Ok(Vec::new())
    }
}

impl<T: IntoReturn> IntoReturn for Result<T, MethodError> {
    fn into_return(self) -> Result<Vec<Value>, MethodError> {
        self?.into_return()
    }
}

macro_rules! tuple_return_impl {
    ($($tyvar:ident),+) => {
        impl<$($tyvar: ToValue),+> IntoReturn for ($($tyvar,)+) {
            #[allow(non_snake_case)]
            fn into_return(self) -> Result<Vec<Value>, MethodError> {
                let ($($tyvar,)+) = self;
                Ok(vec![$($tyvar.to_value()),+])
            }
        }
    }
}

tuple_return_impl! {A, B}
tuple_return_impl! {A, B, C}
tuple_return_impl! {A, B, C, D}

/// A function whose parameters can be unmarshalled from `Value`s. `Args` is
/// the tuple of parameter types and only serves to tell the arities apart.
pub trait TypedMethod<Args>: Send + 'static {
    fn invoke(&self, params: &[Value]) -> Result<Vec<Value>, MethodError>;
}

fn argument<T: FromValue>(params: &[Value], position: usize) -> Result<T, MethodError> {
    let value = params.get(position).ok_or_else(|| {
        MethodError::InvalidParams(format!("missing parameter {}", position + 1))
    })?;
    T::from_value(value)
        .map_err(|e| MethodError::InvalidParams(format!("parameter {}: {}", position + 1, e)))
}

fn check_arity(params: &[Value], expected: usize) -> Result<(), MethodError> {
    if params.len() == expected {
        Ok(())
    } else {
        Err(MethodError::InvalidParams(format!(
            "expected {} parameter(s), got {}",
            expected,
            params.len()
        )))
    }
}

macro_rules! typed_method_impl {
    ($($tyvar:ident => $pos:tt),*) => {
        impl<Func, Ret, $($tyvar),*> TypedMethod<($($tyvar,)*)> for Func
        where
            Func: Fn($($tyvar),*) -> Ret + Send + 'static,
            Ret: IntoReturn,
            $($tyvar: FromValue,)*
        {
            #[allow(non_snake_case)]
            fn invoke(&self, params: &[Value]) -> Result<Vec<Value>, MethodError> {
                check_arity(params, <[&str]>::len(&[$(stringify!($tyvar)),*]))?;
                $(let $tyvar = argument::<$tyvar>(params, $pos)?;)*
                (self)($($tyvar),*).into_return()
            }
        }
    }
}

typed_method_impl! {}
typed_method_impl! {A => 0}
typed_method_impl! {A => 0, B => 1}
typed_method_impl! {A => 0, B => 1, C => 2}
typed_method_impl! {A => 0, B => 1, C => 2, D => 3}

impl Registry {
    /// Registers a plain Rust function, converting its parameters and
    /// return value. Conversion failures become `InvalidParams`.
    pub fn add_typed_method<Args, F>(&mut self, name: &str, method: F) -> Result<(), RegistryError>
    where
        Args: 'static,
        F: TypedMethod<Args>,
    {
        self.add_typed_method_with_info(name, method, MethodInfo::default())
    }

    pub fn add_typed_method_with_info<Args, F>(
        &mut self,
        name: &str,
        method: F,
        info: MethodInfo,
    ) -> Result<(), RegistryError>
    where
        Args: 'static,
        F: TypedMethod<Args>,
    {
        self.add_method_with_info(
            name,
            move |params: &[Value]| <F as TypedMethod<Args>>::invoke(&method, params),
            info,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmlrpc::fault::SERVER_ERROR_INVALID_METHOD_PARAMS;

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(i32::from_value(&Value::I32(5)), Ok(5));
        assert_eq!(i32::from_value(&Value::String(" 42 ".into())), Ok(42));
        assert_eq!(i32::from_value(&Value::I64(1 << 40)).unwrap_err().expected, "int");
        assert_eq!(f64::from_value(&Value::I32(2)), Ok(2.0));
        assert_eq!(i64::from_value(&Value::String("-7".into())), Ok(-7));
        assert!(i32::from_value(&Value::String("forty-two".into())).is_err());
        assert!(i32::from_value(&Value::Boolean(true)).is_err());
    }

    #[test]
    fn test_container_conversions() {
        let value = vec![1.5f64, 2.5].to_value();
        assert_eq!(value, Value::Array(vec![Value::F64(1.5), Value::F64(2.5)]));
        assert_eq!(Vec::<f64>::from_value(&value), Ok(vec![1.5, 2.5]));
        assert_eq!(Option::<i32>::from_value(&Value::Nil), Ok(None));
        assert_eq!(None::<i32>.to_value(), Value::Nil);

        let mut map = BTreeMap::new();
        map.insert("x".to_string(), 1i32);
        assert_eq!(BTreeMap::<String, i32>::from_value(&map.to_value()), Ok(map));
    }

    #[test]
    fn test_into_return() {
        assert_eq!((1i32, "two").into_return().unwrap(), vec![Value::I32(1), Value::from("two")]);
        assert!(().into_return().unwrap().is_empty());
        let failed: Result<i32, MethodError> = Err(MethodError::fault(7, "no"));
        assert_eq!(failed.into_return().unwrap_err().into_fault().code, 7);
    }

    #[test]
    fn test_typed_method_dispatch() {
        let mut registry = Registry::new();
        registry
            .add_typed_method("swap", |a: i32, b: i32| (b, a))
            .unwrap();
        registry.add_typed_method("answer", || 42i32).unwrap();

        let result = registry.invoke("swap", &[Value::I32(123), Value::I32(456)]);
        assert_eq!(result.unwrap(), vec![Value::I32(456), Value::I32(123)]);

        let result = registry.invoke("answer", &[]);
        assert_eq!(result.unwrap(), vec![Value::I32(42)]);
    }

    #[test]
    fn test_typed_method_rejects_bad_params() {
        let mut registry = Registry::new();
        registry
            .add_typed_method("swap", |a: i32, b: i32| (b, a))
            .unwrap();

        let fault = registry
            .invoke("swap", &[Value::I32(1)])
            .unwrap_err()
            .into_fault();
        assert_eq!(fault.code, SERVER_ERROR_INVALID_METHOD_PARAMS);

        let fault = registry
            .invoke("swap", &[Value::from("abc"), Value::from("def")])
            .unwrap_err()
            .into_fault();
        assert_eq!(fault.code, SERVER_ERROR_INVALID_METHOD_PARAMS);
        assert!(fault.message.contains("parameter 1"));
    }
}
