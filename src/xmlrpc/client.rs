// Copyright 2014-2015 Galen Clark Haynes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Rust XML-RPC library

use std::collections::BTreeMap;
use std::io;
use std::string::FromUtf8Error;
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::header::{CONTENT_TYPE, USER_AGENT};
use hyper::{Body, Method, StatusCode, Uri};
use thiserror::Error;
use tokio::runtime::{self, Runtime};

use crate::config::ClientConfig;
use crate::xmlrpc::encoding::{DecodeError, EncodeError};
use crate::xmlrpc::fault::Fault;
use crate::xmlrpc::protocol::{Request, Response};
use crate::xmlrpc::registry::MULTICALL;
use crate::xmlrpc::value::Value;

/// Failure to move bytes to or from the server, as opposed to a fault
/// returned by the remote method.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("connection failed: {0}")]
    Connection(#[from] hyper::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("could not encode call: {0}")]
    Encode(#[from] EncodeError),
    #[error("could not decode response: {0}")]
    Decode(#[from] DecodeError),
    #[error("response is not UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Sends one request body to `uri` and returns the response body.
pub trait Transport {
    fn perform_request(
        &self,
        uri: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}

/// HTTP/1 POST over hyper, driven by a private current-thread runtime.
pub struct HyperTransport {
    runtime: Runtime,
    client: hyper::Client<HttpConnector, Body>,
    user_agent: String,
}

impl HyperTransport {
    pub fn new(user_agent: &str) -> Result<HyperTransport, TransportError> {
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        // servers commonly close after each response
        let client = hyper::Client::builder()
            .pool_max_idle_per_host(0)
            .build_http();
        Ok(HyperTransport {
            runtime,
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

impl Transport for HyperTransport {
    fn perform_request(
        &self,
        uri: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let uri: Uri = uri
            .parse()
            .map_err(|err| TransportError::InvalidRequest(format!("{}: {}", uri, err)))?;
        let request = hyper::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "text/xml")
            .header(USER_AGENT, self.user_agent.as_str())
            .body(Body::from(body))
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;

        let exchange = async {
            let response = self.client.request(request).await?;
            if response.status() != StatusCode::OK {
                return Err(TransportError::Status(response.status()));
            }
            let bytes = hyper::body::to_bytes(response.into_body()).await?;
            Ok(bytes.to_vec())
        };

        self.runtime.block_on(async {
            tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| TransportError::Timeout(timeout))?
        })
    }
}

pub struct Client<T = HyperTransport> {
    url: String,
    timeout: Duration,
    transport: T,
}

impl Client<HyperTransport> {
    pub fn new(url: &str) -> Result<Client<HyperTransport>, ClientError> {
        Client::with_config(url, ClientConfig::default())
    }

    pub fn with_config(url: &str, config: ClientConfig) -> Result<Client<HyperTransport>, ClientError> {
        let transport = HyperTransport::new(&config.user_agent)?;
        Ok(Client::with_transport(url, transport).timeout(config.timeout))
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(url: &str, transport: T) -> Client<T> {
        Client {
            url: url.to_string(),
            timeout: ClientConfig::default().timeout,
            transport,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Client<T> {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Calls `method` and returns its results, turning a fault into
    /// `ClientError::Fault`.
    pub fn call(&self, method: &str, params: Vec<Value>) -> Result<Vec<Value>, ClientError> {
        let request = Request {
            method: method.to_string(),
            params,
        };
        let response = self.call_raw(&request)?;
        Ok(response.into_result()?)
    }

    /// Like `call`, but a fault response is returned as data.
    pub fn call_raw(&self, request: &Request) -> Result<Response, ClientError> {
        let body = request.to_xml()?;

        debug!("Send XMLRPC request to: {}", &self.url);
        trace!("XMLRPC body: {}", &body);

        let bytes = self
            .transport
            .perform_request(&self.url, body.into_bytes(), self.timeout)?;
        let body = String::from_utf8(bytes)?;

        trace!("Response body: {}", &body);

        Ok(Response::from_xml(&body)?)
    }

    pub fn multicall(&self) -> MultiCall<'_, T> {
        MultiCall {
            client: self,
            calls: Vec::new(),
        }
    }
}

/// Batches calls into a single `system.multicall` round trip.
pub struct MultiCall<'a, T> {
    client: &'a Client<T>,
    calls: Vec<Request>,
}

impl<'a, T: Transport> MultiCall<'a, T> {
    pub fn call(&mut self, method: &str, params: Vec<Value>) -> &mut MultiCall<'a, T> {
        self.calls.push(Request {
            method: method.to_string(),
            params,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// One entry per queued call, in the order they were queued.
    pub fn send(self) -> Result<Vec<Result<Vec<Value>, Fault>>, ClientError> {
        let expected = self.calls.len();
        let calls = self
            .calls
            .into_iter()
            .map(|call| {
                let mut entry = BTreeMap::new();
                entry.insert("methodName".to_string(), Value::String(call.method));
                entry.insert("params".to_string(), Value::Array(call.params));
                Value::Struct(entry)
            })
            .collect();

        let results = self.client.call(MULTICALL, vec![Value::Array(calls)])?;
        let slots = match results.into_iter().next() {
            Some(Value::Array(slots)) => slots,
            other => {
                return Err(ClientError::UnexpectedResponse(format!(
                    "expected an array of results, got {:?}",
                    other
                )))
            }
        };
        if slots.len() != expected {
            return Err(ClientError::UnexpectedResponse(format!(
                "expected {} results, got {}",
                expected,
                slots.len()
            )));
        }

        slots
            .into_iter()
            .map(|slot| match slot {
                Value::Array(values) => Ok(Ok(values)),
                ref fault @ Value::Struct(_) => Fault::from_value(fault)
                    .map(Err)
                    .ok_or_else(|| ClientError::UnexpectedResponse(format!("{:?}", fault))),
                other => Err(ClientError::UnexpectedResponse(format!("{:?}", other))),
            })
            .collect()
    }
}
