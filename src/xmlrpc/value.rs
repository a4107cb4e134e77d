// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use time::PrimitiveDateTime;

use crate::xmlrpc::encoding;

/// Represents an XML-RPC data value
#[derive(Clone, PartialEq, PartialOrd, Debug)]
pub enum Value {
    /// `<int>` / `<i4>`
    I32(i32),
    /// `<i8>` extension
    I64(i64),
    /// `<double>`
    F64(f64),
    /// `<boolean>`
    Boolean(bool),
    /// `<string>`, and the untagged default
    String(String),
    /// `<dateTime.iso8601>`, no timezone
    DateTime(PrimitiveDateTime),
    /// `<base64>`
    Base64(Vec<u8>),
    /// `<nil/>` extension
    Nil,
    Array(self::Array),
    Struct(self::Object),
}

pub type Array = Vec<Value>;
pub type Object = BTreeMap<String, Value>;

impl Value {
    /// The wire tag this value is encoded under.
    pub fn type_name(&self) -> &'static str {
        match *self {
            Value::I32(_) => "int",
            Value::I64(_) => "i8",
            Value::F64(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::DateTime(_) => "dateTime.iso8601",
            Value::Base64(_) => "base64",
            Value::Nil => "nil",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    /// If the value is a Struct, returns the value associated with the provided key.
    /// Otherwise, returns None.
    pub fn find<'a>(&'a self, key: &str) -> Option<&'a Value> {
        match *self {
            Value::Struct(ref map) => map.get(key),
            _ => None,
        }
    }

    /// Attempts to get a nested Struct for each key in `keys`.
    /// If any key is found not to exist, find_path will return None.
    /// Otherwise, it will return the value associated with the final key.
    pub fn find_path<'a>(&'a self, keys: &[&str]) -> Option<&'a Value> {
        let mut target = self;
        for key in keys {
            target = target.find(key)?;
        }
        Some(target)
    }

    pub fn is_struct(&self) -> bool {
        self.as_struct().is_some()
    }

    pub fn as_struct(&self) -> Option<&Object> {
        match *self {
            Value::Struct(ref map) => Some(map),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        self.as_array().is_some()
    }

    pub fn as_array(&self) -> Option<&Array> {
        match *self {
            Value::Array(ref array) => Some(array),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        self.as_string().is_some()
    }

    pub fn as_string(&self) -> Option<&str> {
        match *self {
            Value::String(ref s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for either integer width and for doubles.
    pub fn is_number(&self) -> bool {
        matches!(*self, Value::I32(_) | Value::I64(_) | Value::F64(_))
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::I32(n) => Some(n),
            Value::I64(n) => num::cast(n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I32(n) => Some(i64::from(n)),
            Value::I64(n) => Some(n),
            _ => None,
        }
    }

    /// If the value is a number, return or cast it to a f64.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::I32(n) => Some(f64::from(n)),
            Value::I64(n) => num::cast(n),
            Value::F64(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match *self {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<PrimitiveDateTime> {
        match *self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match *self {
            Value::Base64(ref bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(*self, Value::Nil)
    }
}

impl<'a> Index<&'a str> for Value {
    type Output = Value;

    fn index(&self, idx: &str) -> &Value {
        match self.find(idx) {
            Some(value) => value,
            None => panic!("no struct member named {:?}", idx),
        }
    }
}

impl Index<usize> for Value {
    type Output = Value;

    fn index(&self, idx: usize) -> &Value {
        match *self {
            Value::Array(ref v) => &v[idx],
            _ => panic!("can only index a value with usize if it is an array"),
        }
    }
}

impl fmt::Display for Value {
    /// Writes the `<value>` element for this value, or the debug form if it
    /// cannot be represented on the wire.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match encoding::encode_value(self) {
            Ok(xml) => f.write_str(&xml),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

macro_rules! from_impl {
    ($($t:ty => $variant:ident),+ $(,)?) => (
        $(impl From<$t> for Value {
            fn from(v: $t) -> Value { Value::$variant(v.into()) }
        })+
    )
}

from_impl! {
    i8 => I32,
    i16 => I32,
    i32 => I32,
    u8 => I32,
    u16 => I32,
    u32 => I64,
    i64 => I64,
    f32 => F64,
    f64 => F64,
    bool => Boolean,
    String => String,
    PrimitiveDateTime => DateTime,
    Array => Array,
    Object => Struct,
}

impl<'a> From<&'a str> for Value {
    fn from(s: &'a str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Value {
        Value::Nil
    }
}
