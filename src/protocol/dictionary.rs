//! Route compression dictionary.
//!
//! Handler routes are sorted and numbered from 1 so every server that knows the
//! same handlers derives the same codes. Extra routes from a user dictionary
//! file are appended after them in file order.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::core::message::{Route, MAX_ROUTE_CODE};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Default)]
pub struct RouteDictionary {
    route_to_code: HashMap<String, u32>,
    code_to_route: Vec<String>,
    version: String,
}

impl RouteDictionary {
    /// Build a dictionary from handler routes; duplicates are ignored.
    pub fn new<I, S>(handler_routes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut routes: Vec<String> = handler_routes.into_iter().map(Into::into).collect();
        routes.sort();
        routes.dedup();
        Self::from_ordered(routes)
    }

    /// Append user routes after the handler routes.
    pub fn with_user_routes<I, S>(self, user_routes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut routes = self.code_to_route;
        for route in user_routes {
            let route = route.into();
            if !routes.contains(&route) {
                routes.push(route);
            }
        }
        Self::from_ordered(routes)
    }

    /// Parse a user dictionary: a JSON array of route strings.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let routes: Vec<String> = serde_json::from_str(source)?;
        Self::new(Vec::<String>::new())?.with_user_routes(routes)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        let dictionary = Self::from_json_str(&source)?;
        info!(
            path = %path.as_ref().display(),
            routes = dictionary.len(),
            "Route dictionary loaded"
        );
        Ok(dictionary)
    }

    fn from_ordered(routes: Vec<String>) -> Result<Self> {
        if routes.len() > MAX_ROUTE_CODE as usize {
            return Err(ProtocolError::RouteOverflow(format!(
                "{} routes do not fit in 16-bit codes",
                routes.len()
            )));
        }

        let route_to_code = routes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.clone(), i as u32 + 1))
            .collect();

        let mut hasher = Sha256::new();
        for route in &routes {
            hasher.update(route.as_bytes());
            hasher.update([0]);
        }

        Ok(Self {
            route_to_code,
            code_to_route: routes,
            version: hex::encode(hasher.finalize()),
        })
    }

    pub fn code(&self, route: &str) -> Option<u32> {
        self.route_to_code.get(route).copied()
    }

    pub fn route(&self, code: u32) -> Option<&str> {
        let index = (code as usize).checked_sub(1)?;
        self.code_to_route.get(index).map(String::as_str)
    }

    /// Resolve a wire route to its name.
    ///
    /// # Errors
    /// `ProtocolError::UnknownRouteCode` for a code the dictionary does not know.
    pub fn resolve(&self, route: &Route) -> Result<String> {
        match route {
            Route::Name(name) => Ok(name.clone()),
            Route::Code(code) => self
                .route(*code)
                .map(str::to_string)
                .ok_or(ProtocolError::UnknownRouteCode(*code)),
        }
    }

    /// Compressed form of `route` if the dictionary knows it.
    pub fn compress(&self, route: &str) -> Route {
        match self.code(route) {
            Some(code) => Route::Code(code),
            None => Route::Name(route.to_string()),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.code_to_route.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code_to_route.is_empty()
    }

    pub fn route_to_code_json(&self) -> Value {
        let map: Map<String, Value> = self
            .code_to_route
            .iter()
            .enumerate()
            .map(|(i, r)| (r.clone(), Value::from(i as u32 + 1)))
            .collect();
        Value::Object(map)
    }

    pub fn code_to_route_json(&self) -> Value {
        let map: Map<String, Value> = self
            .code_to_route
            .iter()
            .enumerate()
            .map(|(i, r)| ((i + 1).to_string(), Value::from(r.as_str())))
            .collect();
        Value::Object(map)
    }
}
