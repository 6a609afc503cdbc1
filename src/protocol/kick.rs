//! Kick notice sent before the server closes a connection.

use serde::{Deserialize, Serialize};

use crate::core::package::{Package, PackageType};
use crate::core::utf8;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickReason {
    pub reason: String,
}

impl KickReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn to_package(&self) -> Result<Package> {
        let text = serde_json::to_string(self)?;
        Ok(Package::new(PackageType::Kick, utf8::encode(&text)))
    }

    pub fn from_package(package: &Package) -> Result<Self> {
        let text = utf8::decode(&package.body)?;
        Ok(serde_json::from_str(&text)?)
    }
}
