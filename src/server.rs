//! XML-RPC over the embedded HTTP server.

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::{HandlerError, HttpRequest, HttpResponse, HttpServer, RequestHandler, StopHandle};
use crate::xmlrpc::fault::MethodError;
use crate::xmlrpc::registry::{MethodInfo, Registry, RegistryError};
use crate::xmlrpc::typed::TypedMethod;
use crate::xmlrpc::value::Value;
use crate::xmlrpc::Dispatcher;

impl RequestHandler for Dispatcher {
    fn handle(&mut self, request: &HttpRequest) -> std::result::Result<HttpResponse, HandlerError> {
        if request.method != "POST" {
            debug!("Handling {} request like a POST", request.method);
        }
        let xml = self.handle_request(&request.body_text());
        Ok(HttpResponse::ok()
            .with_header("Content-Type", "text/xml")
            .with_body(xml))
    }
}

/// Listens on `bind_addr` and answers every request body as a
/// `<methodCall>`, regardless of path.
pub struct XmlRpcServer {
    http: HttpServer<Dispatcher>,
}

impl XmlRpcServer {
    pub fn new(config: &ServerConfig) -> Result<XmlRpcServer> {
        XmlRpcServer::with_registry(config, Registry::new())
    }

    pub fn with_registry(config: &ServerConfig, registry: Registry) -> Result<XmlRpcServer> {
        let http = HttpServer::bind(config, Dispatcher::new(registry))?;
        Ok(XmlRpcServer { http })
    }

    pub fn add_method<F>(&mut self, name: &str, handler: F) -> std::result::Result<(), RegistryError>
    where
        F: Fn(&[Value]) -> std::result::Result<Vec<Value>, MethodError> + Send + 'static,
    {
        self.registry_mut().add_method(name, handler)
    }

    pub fn add_method_with_info<F>(
        &mut self,
        name: &str,
        handler: F,
        info: MethodInfo,
    ) -> std::result::Result<(), RegistryError>
    where
        F: Fn(&[Value]) -> std::result::Result<Vec<Value>, MethodError> + Send + 'static,
    {
        self.registry_mut().add_method_with_info(name, handler, info)
    }

    pub fn add_typed_method<Args, F>(&mut self, name: &str, method: F) -> std::result::Result<(), RegistryError>
    where
        Args: 'static,
        F: TypedMethod<Args>,
    {
        self.registry_mut().add_typed_method(name, method)
    }

    pub fn remove_method(&mut self, name: &str) -> bool {
        self.registry_mut().remove_method(name)
    }

    pub fn list_methods(&self) -> Vec<String> {
        self.registry().list_methods()
    }

    pub fn registry(&self) -> &Registry {
        self.http.handler().registry()
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        self.http.handler_mut().registry_mut()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.http.local_addr()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.http.stop_handle()
    }

    pub fn close(&mut self) {
        self.http.close()
    }

    pub fn spin(&mut self) -> Result<()> {
        self.http.spin()
    }

    pub fn spin_for(&mut self, duration: Duration) -> Result<()> {
        self.http.spin_for(duration)
    }

    pub fn spin_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.http.spin_once(timeout)
    }
}
