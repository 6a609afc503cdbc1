//! Hot-swappable schema tables.
//!
//! The store holds one snapshot pointer. A reload parses the new source fully,
//! builds a new snapshot and replaces the pointer under a short write lock.
//! Encoders and decoders clone the current snapshot and keep using it even if
//! a reload lands while they run.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::protobuf::schema::SchemaTable;
use crate::protobuf::{decoder, encoder};

/// Immutable view of both tables and their combined version.
#[derive(Debug)]
pub struct SchemaSet {
    /// Tables used to encode server-to-client payloads.
    pub server: Arc<SchemaTable>,
    /// Tables used to decode client-to-server payloads.
    pub client: Arc<SchemaTable>,
    pub version: String,
}

impl SchemaSet {
    fn new(server: Arc<SchemaTable>, client: Arc<SchemaTable>) -> Self {
        let version = digest(&client, &server);
        Self {
            server,
            client,
            version,
        }
    }
}

fn digest(client: &SchemaTable, server: &SchemaTable) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client.source().to_string().as_bytes());
    hasher.update(server.source().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
pub struct SchemaStore {
    current: RwLock<Arc<SchemaSet>>,
}

impl Default for SchemaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaStore {
    /// Store with empty tables: every route falls back to JSON bodies.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(SchemaSet::new(
                Arc::new(SchemaTable::empty()),
                Arc::new(SchemaTable::empty()),
            ))),
        }
    }

    pub fn from_sources(server: &str, client: &str) -> Result<Self> {
        let store = Self::new();
        store.reload_server(server)?;
        store.reload_client(client)?;
        Ok(store)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Result<Arc<SchemaSet>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    pub fn version(&self) -> Result<String> {
        Ok(self.snapshot()?.version.clone())
    }

    /// Replace the server (encode) table. On a parse error the current table
    /// stays in place.
    pub fn reload_server(&self, source: &str) -> Result<()> {
        let table = Arc::new(SchemaTable::from_json_str(source)?);
        self.swap(|current| SchemaSet::new(table, Arc::clone(&current.client)))
    }

    /// Replace the client (decode) table. On a parse error the current table
    /// stays in place.
    pub fn reload_client(&self, source: &str) -> Result<()> {
        let table = Arc::new(SchemaTable::from_json_str(source)?);
        self.swap(|current| SchemaSet::new(Arc::clone(&current.server), table))
    }

    pub fn load_server_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let source = std::fs::read_to_string(path.as_ref())?;
        self.reload_server(&source).inspect_err(|e| {
            warn!(path = %path.as_ref().display(), error = %e, "Server schema reload rejected");
        })
    }

    pub fn load_client_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let source = std::fs::read_to_string(path.as_ref())?;
        self.reload_client(&source).inspect_err(|e| {
            warn!(path = %path.as_ref().display(), error = %e, "Client schema reload rejected");
        })
    }

    fn swap<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(&SchemaSet) -> SchemaSet,
    {
        let mut guard = self
            .current
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        let next = Arc::new(build(&guard));
        info!(version = %next.version, "Schema tables swapped");
        *guard = next;
        Ok(())
    }

    /// Encode a server-to-client payload. Returns `Ok(None)` when the route has
    /// no schema so the caller can fall back to JSON.
    pub fn encode(&self, route: &str, payload: &Value) -> Result<Option<Vec<u8>>> {
        let set = self.snapshot()?;
        if !set.server.has_route(route) {
            return Ok(None);
        }
        encoder::encode(&set.server, route, payload).map(Some)
    }

    /// Decode a client-to-server payload. Returns `Ok(None)` when the route has
    /// no schema.
    pub fn decode(&self, route: &str, data: &[u8]) -> Result<Option<Value>> {
        let set = self.snapshot()?;
        if !set.client.has_route(route) {
            return Ok(None);
        }
        decoder::decode(&set.client, route, data).map(Some)
    }

    /// Tables as sent to clients during the handshake.
    pub fn protos(&self) -> Result<Value> {
        let set = self.snapshot()?;
        Ok(json!({
            "server": set.server.source(),
            "client": set.client.source(),
            "version": set.version,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = r#"{"r.h.m": {"required uInt32 code": 1}}"#;

    #[test]
    fn failed_reload_keeps_previous_table() {
        let store = SchemaStore::from_sources(SERVER, "{}").unwrap();
        let before = store.version().unwrap();

        assert!(store.reload_server("{ not json").is_err());
        assert!(store
            .reload_server(r#"{"r.h.m": {"required uInt32": 1}}"#)
            .is_err());

        assert_eq!(store.version().unwrap(), before);
        assert!(store.snapshot().unwrap().server.has_route("r.h.m"));
    }

    #[test]
    fn snapshot_outlives_swap() {
        let store = SchemaStore::from_sources(SERVER, "{}").unwrap();
        let old = store.snapshot().unwrap();

        store
            .reload_server(r#"{"other.h.m": {"optional string s": 1}}"#)
            .unwrap();

        assert!(old.server.has_route("r.h.m"));
        let new = store.snapshot().unwrap();
        assert!(!new.server.has_route("r.h.m"));
        assert!(new.server.has_route("other.h.m"));
        assert_ne!(old.version, new.version);
    }

    #[test]
    fn routes_without_schema_fall_back() {
        let store = SchemaStore::new();
        assert!(store.encode("x.y.z", &json!({"a": 1})).unwrap().is_none());
        assert!(store.decode("x.y.z", &[1, 2]).unwrap().is_none());
    }
}
