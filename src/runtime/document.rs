//! Semi-structured configuration documents.
//!
//! Node configuration templates are owned by the node binary and change between releases, so
//! they are handled as a YAML value tree rather than a fixed schema. Accessors take dotted
//! paths (`peer.gossip`) and fail explicitly when a key is missing or has the wrong shape.

use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::error::{NodeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Value,
}

impl ConfigDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let root: Value = serde_yaml::from_slice(bytes)?;
        if !root.is_mapping() {
            return Err(NodeError::Configuration(
                "configuration document is not a mapping".to_string(),
            ));
        }
        Ok(Self { root })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| NodeError::io(path, e))?;
        Self::from_slice(&bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(&self.root)?.into_bytes())
    }

    pub fn has_section(&self, path: &str) -> bool {
        self.section(path).is_ok()
    }

    /// The mapping at `path`, or `MissingSection` naming `path`.
    pub fn section(&self, path: &str) -> Result<&Mapping> {
        let mut current = self.root_mapping()?;
        for key in path.split('.') {
            current = current
                .get(key)
                .and_then(Value::as_mapping)
                .ok_or_else(|| NodeError::MissingSection(path.to_string()))?;
        }
        Ok(current)
    }

    pub fn section_mut(&mut self, path: &str) -> Result<Section<'_>> {
        let mut current = self
            .root
            .as_mapping_mut()
            .ok_or_else(|| NodeError::Configuration("configuration document is not a mapping".to_string()))?;
        for key in path.split('.') {
            current = current
                .get_mut(key)
                .and_then(Value::as_mapping_mut)
                .ok_or_else(|| NodeError::MissingSection(path.to_string()))?;
        }
        Ok(Section { mapping: current })
    }

    /// Value at a dotted path, e.g. `peer.gossip.endpoint`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let (parent, key) = match path.rsplit_once('.') {
            Some((parent, key)) => (self.section(parent).ok()?, key),
            None => (self.root_mapping().ok()?, path),
        };
        parent.get(key)
    }

    pub fn get_str(&self, path: &str) -> Result<&str> {
        self.get(path)
            .ok_or_else(|| NodeError::Configuration(format!("missing key {}", path)))?
            .as_str()
            .ok_or_else(|| NodeError::Configuration(format!("key {} is not a string", path)))
    }

    pub fn get_bool(&self, path: &str) -> Result<bool> {
        self.get(path)
            .ok_or_else(|| NodeError::Configuration(format!("missing key {}", path)))?
            .as_bool()
            .ok_or_else(|| NodeError::Configuration(format!("key {} is not a boolean", path)))
    }

    pub fn get_sequence(&self, path: &str) -> Result<&[Value]> {
        self.get(path)
            .ok_or_else(|| NodeError::Configuration(format!("missing key {}", path)))?
            .as_sequence()
            .map(Vec::as_slice)
            .ok_or_else(|| NodeError::Configuration(format!("key {} is not a sequence", path)))
    }

    fn root_mapping(&self) -> Result<&Mapping> {
        self.root
            .as_mapping()
            .ok_or_else(|| NodeError::Configuration("configuration document is not a mapping".to_string()))
    }
}

/// Mutable view of one mapping within a document.
pub struct Section<'a> {
    mapping: &'a mut Mapping,
}

impl Section<'_> {
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.mapping.insert(Value::from(key), value.into());
        self
    }
}
