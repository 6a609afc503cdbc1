use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, Result};

/// Parsed `serverType.handler.method` route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteRecord {
    pub route: String,
    pub server_type: String,
    pub handler: String,
    pub method: String,
}

impl RouteRecord {
    pub fn parse(route: &str) -> Result<Self> {
        let mut parts = route.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(server_type), Some(handler), Some(method), None)
                if !server_type.is_empty() && !handler.is_empty() && !method.is_empty() =>
            {
                Ok(Self {
                    route: route.to_string(),
                    server_type: server_type.to_string(),
                    handler: handler.to_string(),
                    method: method.to_string(),
                })
            }
            _ => Err(ProtocolError::InvalidRoute(route.to_string())),
        }
    }
}

impl FromStr for RouteRecord {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RouteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_segments() {
        let record = RouteRecord::parse("connector.entryHandler.entry").unwrap();
        assert_eq!(record.server_type, "connector");
        assert_eq!(record.handler, "entryHandler");
        assert_eq!(record.method, "entry");
        assert_eq!(record.to_string(), "connector.entryHandler.entry");
    }

    #[test]
    fn rejects_other_shapes() {
        for bad in ["", "a.b", "a.b.c.d", "a..c", ".b.c"] {
            assert!(RouteRecord::parse(bad).is_err(), "{bad}");
        }
    }
}
