// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

//! Wire codec: `Value` trees and call/response envelopes to and from the
//! XML-RPC grammar.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use time::macros::format_description;
use time::PrimitiveDateTime;
use xml::escape::escape_str_pcdata;
use xml::reader::{EventReader, ParserConfig, XmlEvent};

use crate::xmlrpc::fault::Fault;
use crate::xmlrpc::protocol::{Request, Response};
use crate::xmlrpc::value::Value;

const XML_DECLARATION: &str = "<?xml version=\"1.0\"?>";

/// The errors that can arise while reading an XML-RPC document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("document has no root element")]
    EmptyDocument,

    #[error("expected <{expected}>, found <{found}>")]
    UnexpectedElement {
        expected: &'static str,
        found: String,
    },

    #[error("missing <{0}> element")]
    MissingElement(&'static str),

    #[error("empty method name")]
    EmptyMethodName,

    #[error("unknown value type <{0}>")]
    UnknownType(String),

    #[error("invalid <{tag}> content {text:?}")]
    InvalidScalar { tag: &'static str, text: String },

    #[error("fault value is not a struct with faultCode and faultString")]
    InvalidFault,
}

/// The errors that can arise while writing an XML-RPC document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("dateTime {0} cannot be written in basic ISO-8601 form")]
    DateTimeOutOfRange(String),

    #[error("dateTime {0} has a sub-second part, which XML-RPC cannot carry")]
    SubsecondDateTime(String),

    #[error("double {0} is not finite")]
    NonFiniteDouble(f64),

    #[error("text contains U+{0:04X}, which is not allowed in XML 1.0")]
    InvalidCharacter(u32),

    #[error("fault response must carry exactly one value, got {0}")]
    FaultArity(usize),

    #[error("fault value is not a struct with faultCode and faultString")]
    InvalidFault,
}

pub type EncodeResult<T> = Result<T, EncodeError>;
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Encodes a value as a `<value>` element.
pub fn encode_value(value: &Value) -> EncodeResult<String> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// Encodes a `<methodCall>` document.
pub fn encode_call(request: &Request) -> EncodeResult<String> {
    let mut out = String::with_capacity(128);
    out.push_str(XML_DECLARATION);
    out.push_str("<methodCall><methodName>");
    out.push_str(&escape_text(&request.method)?);
    out.push_str("</methodName>");
    write_params(&mut out, &request.params)?;
    out.push_str("</methodCall>");
    Ok(out)
}

/// Encodes a `<methodResponse>` document. A fault response must hold exactly
/// one value, and that value must be a well-formed fault struct.
pub fn encode_response(response: &Response) -> EncodeResult<String> {
    let mut out = String::with_capacity(128);
    out.push_str(XML_DECLARATION);
    out.push_str("<methodResponse>");
    if response.is_fault {
        let fault = match response.params.as_slice() {
            [fault] => fault,
            params => return Err(EncodeError::FaultArity(params.len())),
        };
        if Fault::from_value(fault).is_none() {
            return Err(EncodeError::InvalidFault);
        }
        out.push_str("<fault>");
        write_value(&mut out, fault)?;
        out.push_str("</fault>");
    } else {
        write_params(&mut out, &response.params)?;
    }
    out.push_str("</methodResponse>");
    Ok(out)
}

/// Writes a fault response directly, without going through `Value`. This is
/// the last-resort path when encoding a regular response failed, so it
/// cannot fail itself: characters XML cannot carry become U+FFFD.
pub fn encode_fault_document(code: i32, message: &str) -> String {
    let message: String = message
        .chars()
        .map(|c| if is_xml_char(c) { c } else { char::REPLACEMENT_CHARACTER })
        .collect();
    format!(
        "{}<methodResponse><fault><value><struct>\
         <member><name>faultCode</name><value><int>{}</int></value></member>\
         <member><name>faultString</name><value><string>{}</string></value></member>\
         </struct></value></fault></methodResponse>",
        XML_DECLARATION,
        code,
        escape_str_pcdata(&message)
    )
}

/// Char production of XML 1.0. Surrogates cannot occur in a `char`.
fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

fn escape_text(text: &str) -> EncodeResult<Cow<'_, str>> {
    match text.chars().find(|c| !is_xml_char(*c)) {
        Some(c) => Err(EncodeError::InvalidCharacter(c as u32)),
        None => Ok(escape_str_pcdata(text)),
    }
}

fn write_params(out: &mut String, params: &[Value]) -> EncodeResult<()> {
    out.push_str("<params>");
    for param in params {
        out.push_str("<param>");
        write_value(out, param)?;
        out.push_str("</param>");
    }
    out.push_str("</params>");
    Ok(())
}

// `write!` into a String cannot fail, so its result is discarded throughout.
fn write_value(out: &mut String, value: &Value) -> EncodeResult<()> {
    out.push_str("<value>");
    match *value {
        // booleans first: they must never be written as integers
        Value::Boolean(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", b as u8);
        }
        Value::I32(n) => {
            let _ = write!(out, "<int>{}</int>", n);
        }
        Value::I64(n) => {
            let _ = write!(out, "<i8>{}</i8>", n);
        }
        Value::F64(n) => {
            if !n.is_finite() {
                return Err(EncodeError::NonFiniteDouble(n));
            }
            let _ = write!(out, "<double>{}</double>", n);
        }
        Value::String(ref s) => {
            out.push_str("<string>");
            out.push_str(&escape_text(s)?);
            out.push_str("</string>");
        }
        Value::DateTime(ref dt) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&format_datetime(dt)?);
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(ref bytes) => {
            out.push_str("<base64>");
            out.push_str(&STANDARD.encode(bytes));
            out.push_str("</base64>");
        }
        Value::Nil => out.push_str("<nil/>"),
        Value::Array(ref values) => {
            out.push_str("<array><data>");
            for v in values {
                write_value(out, v)?;
            }
            out.push_str("</data></array>");
        }
        Value::Struct(ref members) => {
            out.push_str("<struct>");
            for (name, v) in members {
                out.push_str("<member><name>");
                out.push_str(&escape_text(name)?);
                out.push_str("</name>");
                write_value(out, v)?;
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
    Ok(())
}

fn format_datetime(dt: &PrimitiveDateTime) -> EncodeResult<String> {
    // a sign or a fifth year digit would not survive separator stripping
    if !(0..=9999).contains(&dt.year()) {
        return Err(EncodeError::DateTimeOutOfRange(dt.to_string()));
    }
    if dt.nanosecond() != 0 {
        return Err(EncodeError::SubsecondDateTime(dt.to_string()));
    }
    dt.format(format_description!(
        "[year][month][day]T[hour][minute][second]"
    ))
    .map_err(|_| EncodeError::DateTimeOutOfRange(dt.to_string()))
}

fn parse_datetime(text: &str) -> DecodeResult<PrimitiveDateTime> {
    let compact: String = text
        .trim()
        .chars()
        .filter(|c| *c != '-' && *c != ':')
        .collect();
    PrimitiveDateTime::parse(
        &compact,
        format_description!("[year][month][day]T[hour][minute][second]"),
    )
    .map_err(|_| DecodeError::InvalidScalar {
        tag: "dateTime.iso8601",
        text: text.to_string(),
    })
}

/// Minimal element tree built from the xml-rs event stream.
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

struct Builder<'a> {
    parser: EventReader<&'a [u8]>,
}

impl<'a> Builder<'a> {
    fn new(src: &'a str) -> Builder<'a> {
        let config = ParserConfig::new()
            .trim_whitespace(false)
            .whitespace_to_characters(true)
            .cdata_to_characters(true)
            .coalesce_characters(true)
            .ignore_comments(true);
        Builder {
            parser: EventReader::new_with_config(src.as_bytes(), config),
        }
    }

    fn build(self) -> DecodeResult<Element> {
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;
        for event in self.parser {
            match event.map_err(|e| DecodeError::Xml(e.to_string()))? {
                XmlEvent::StartElement { name, .. } => stack.push(Element {
                    name: name.local_name,
                    ..Element::default()
                }),
                XmlEvent::EndElement { .. } => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DecodeError::Xml("unbalanced end tag".to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                XmlEvent::Characters(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                _ => {}
            }
        }
        root.ok_or(DecodeError::EmptyDocument)
    }
}

fn expect_root(root: &Element, expected: &'static str) -> DecodeResult<()> {
    if root.name == expected {
        Ok(())
    } else {
        Err(DecodeError::UnexpectedElement {
            expected,
            found: root.name.clone(),
        })
    }
}

/// Decodes a `<methodCall>` document.
pub fn decode_call(xml: &str) -> DecodeResult<Request> {
    let root = Builder::new(xml).build()?;
    expect_root(&root, "methodCall")?;

    let method = root
        .child("methodName")
        .ok_or(DecodeError::MissingElement("methodName"))?
        .text
        .trim()
        .to_string();
    if method.is_empty() {
        return Err(DecodeError::EmptyMethodName);
    }

    let params = match root.child("params") {
        Some(params) => build_params(params)?,
        None => Vec::new(),
    };
    Ok(Request { method, params })
}

/// Decodes a `<methodResponse>` document. A `<fault>` element wins over
/// `<params>` when both are present.
pub fn decode_response(xml: &str) -> DecodeResult<Response> {
    let root = Builder::new(xml).build()?;
    expect_root(&root, "methodResponse")?;

    if let Some(fault) = root.child("fault") {
        let value = fault
            .child("value")
            .ok_or(DecodeError::MissingElement("value"))?;
        let value = build_value(value)?;
        if Fault::from_value(&value).is_none() {
            return Err(DecodeError::InvalidFault);
        }
        return Ok(Response {
            is_fault: true,
            params: vec![value],
        });
    }

    let params = match root.child("params") {
        Some(params) => build_params(params)?,
        None => Vec::new(),
    };
    Ok(Response {
        is_fault: false,
        params,
    })
}

/// Decodes a standalone `<value>` element.
pub fn decode_value(xml: &str) -> DecodeResult<Value> {
    let root = Builder::new(xml).build()?;
    expect_root(&root, "value")?;
    build_value(&root)
}

fn build_params(params: &Element) -> DecodeResult<Vec<Value>> {
    params
        .children_named("param")
        .map(|param| {
            let value = param
                .child("value")
                .ok_or(DecodeError::MissingElement("value"))?;
            build_value(value)
        })
        .collect()
}

fn build_value(value: &Element) -> DecodeResult<Value> {
    let typed = match value.children.first() {
        Some(typed) => typed,
        // no type tag: the text is a string
        None => return Ok(Value::String(value.text.clone())),
    };

    match typed.name.as_str() {
        "int" | "i4" => parse_scalar(typed, "int").map(Value::I32),
        "i8" => parse_scalar(typed, "i8").map(Value::I64),
        "double" => parse_scalar(typed, "double").map(Value::F64),
        "string" => Ok(Value::String(typed.text.clone())),
        // lenient: any integer is accepted, nonzero is true
        "boolean" => parse_scalar::<i64>(typed, "boolean").map(|n| Value::Boolean(n != 0)),
        "dateTime.iso8601" => parse_datetime(&typed.text).map(Value::DateTime),
        "base64" => build_base64(typed),
        "nil" => Ok(Value::Nil),
        "array" => build_array(typed),
        "struct" => build_struct(typed),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn parse_scalar<T: FromStr>(element: &Element, tag: &'static str) -> DecodeResult<T> {
    element
        .text
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidScalar {
            tag,
            text: element.text.clone(),
        })
}

fn build_base64(element: &Element) -> DecodeResult<Value> {
    let compact: String = element
        .text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map(Value::Base64)
        .map_err(|_| DecodeError::InvalidScalar {
            tag: "base64",
            text: element.text.clone(),
        })
}

fn build_array(array: &Element) -> DecodeResult<Value> {
    let mut values = Vec::new();
    if let Some(data) = array.child("data") {
        for value in data.children_named("value") {
            values.push(build_value(value)?);
        }
    }
    Ok(Value::Array(values))
}

fn build_struct(element: &Element) -> DecodeResult<Value> {
    let mut members = BTreeMap::new();
    for member in element.children_named("member") {
        match (member.child("name"), member.child("value")) {
            (Some(name), Some(value)) => {
                members.insert(name.text.clone(), build_value(value)?);
            }
            _ => trace!("skipping struct member without name or value"),
        }
    }
    Ok(Value::Struct(members))
}
