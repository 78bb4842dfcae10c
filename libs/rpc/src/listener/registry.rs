//! Listener Construction Registry
//!
//! Scheme-name-to-constructor binding is an explicit map populated at
//! process start; configuration selects a listener variant through the
//! endpoint's URI scheme.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use super::{
    InProcessRouter, InProcessServiceListener, NetworkListenerConfig, NetworkServiceListener,
    NullServiceListener, ServiceCallHandler, ServiceListener, TestServiceListener,
};
use crate::error::{Result, RpcError};

type Constructor =
    Box<dyn Fn(&Url, Arc<dyn ServiceCallHandler>) -> Result<Arc<dyn ServiceListener>> + Send + Sync>;

pub struct ListenerRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ListenerRegistry {
    /// An empty registry with no known schemes.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry populated with the standard variants: `net`, `inproc`
    /// (served through `router`), `null`, and the `test` harness.
    pub fn with_defaults(router: Arc<InProcessRouter>) -> Self {
        let mut registry = Self::new();

        registry.register("net", |endpoint, handler| {
            let listener = NetworkServiceListener::new(
                endpoint.clone(),
                NetworkListenerConfig::default(),
                handler,
            )?;
            Ok(listener as Arc<dyn ServiceListener>)
        });

        registry.register("inproc", move |endpoint, handler| {
            let listener =
                InProcessServiceListener::new(endpoint.clone(), handler, Arc::clone(&router))?;
            Ok(listener as Arc<dyn ServiceListener>)
        });

        registry.register("null", |endpoint, _handler| {
            Ok(Arc::new(NullServiceListener::new(endpoint.clone())) as Arc<dyn ServiceListener>)
        });

        registry.register("test", |endpoint, handler| {
            Ok(TestServiceListener::new(endpoint.clone(), handler) as Arc<dyn ServiceListener>)
        });

        registry
    }

    /// Binds `scheme` to a constructor, replacing any previous binding.
    pub fn register<F>(&mut self, scheme: &str, constructor: F)
    where
        F: Fn(&Url, Arc<dyn ServiceCallHandler>) -> Result<Arc<dyn ServiceListener>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(scheme.to_string(), Box::new(constructor));
    }

    /// Builds the listener for `endpoint`, keyed by its URI scheme.
    pub fn create(
        &self,
        endpoint: &Url,
        handler: Arc<dyn ServiceCallHandler>,
    ) -> Result<Arc<dyn ServiceListener>> {
        let constructor = self.constructors.get(endpoint.scheme()).ok_or_else(|| {
            RpcError::configuration(format!(
                "no listener registered for scheme '{}'",
                endpoint.scheme()
            ))
        })?;

        constructor(endpoint, handler)
    }

    /// The schemes this registry knows how to build.
    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
