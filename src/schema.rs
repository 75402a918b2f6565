// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! RIB schemas and the create-callback registry
//!
//! A schema fixes the object vocabulary of one RIB version: the path
//! separator and, for `M_CREATE` requests that target an FQN not yet in
//! the tree, the callbacks able to build such objects. Callbacks are
//! keyed by `(class, path)`; an empty path is the generic fallback for
//! the class.

use crate::error::RibError;
use crate::message::FiltInfo;
use crate::rib::Rib;
use crate::session::ConnectionHandle;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Default path separator of a RIB schema.
pub const DEFAULT_SEPARATOR: char = '/';

/// An inbound `M_CREATE` for an object that is not in the tree yet.
pub struct CreateRequest<'a> {
    pub con: &'a ConnectionHandle,
    pub fqn: &'a str,
    pub class: &'a str,
    pub value: &'a [u8],
    pub filt: &'a FiltInfo,
    pub invoke_id: u32,
}

/// Builds the requested object (usually by inserting it into the RIB it
/// is handed) and returns the optional reply value.
pub type CreateCallback =
    Arc<dyn Fn(&Rib, &CreateRequest<'_>) -> Result<Option<Vec<u8>>, RibError> + Send + Sync>;

/// Schema of one RIB version.
pub struct RibSchema {
    version: u64,
    separator: char,
    callbacks: RwLock<HashMap<(String, String), CreateCallback>>,
}

impl RibSchema {
    pub fn new(version: u64) -> Self {
        Self::with_separator(version, DEFAULT_SEPARATOR)
    }

    pub fn with_separator(version: u64, separator: char) -> Self {
        Self {
            version,
            separator,
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Registers a create callback for `(class, path)`. `path = ""`
    /// registers the generic fallback for the class.
    pub fn add_create_callback(
        &self,
        class: &str,
        path: &str,
        callback: CreateCallback,
    ) -> Result<(), RibError> {
        let key = (class.to_string(), path.to_string());
        let mut callbacks = self.callbacks.write().unwrap();
        if callbacks.contains_key(&key) {
            return Err(RibError::CallbackAlreadyRegistered {
                class: class.to_string(),
                path: path.to_string(),
            });
        }
        callbacks.insert(key, callback);
        Ok(())
    }

    /// Picks the callback for an `M_CREATE` targeting `fqn`: a path
    /// registration matching the FQN itself or its parent wins over the
    /// generic `(class, "")` entry.
    pub fn find_create_callback(&self, class: &str, fqn: &str) -> Option<CreateCallback> {
        let callbacks = self.callbacks.read().unwrap();

        let exact = (class.to_string(), fqn.to_string());
        if let Some(callback) = callbacks.get(&exact) {
            return Some(callback.clone());
        }
        if let Some(parent) = self.parent_path(fqn) {
            if let Some(callback) = callbacks.get(&(class.to_string(), parent)) {
                return Some(callback.clone());
            }
        }
        callbacks
            .get(&(class.to_string(), String::new()))
            .cloned()
    }

    fn parent_path(&self, fqn: &str) -> Option<String> {
        let cut = fqn.rfind(self.separator)?;
        if cut == 0 {
            Some(self.separator.to_string())
        } else {
            Some(fqn[..cut].to_string())
        }
    }
}

impl std::fmt::Debug for RibSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RibSchema")
            .field("version", &self.version)
            .field("separator", &self.separator)
            .field("callbacks", &self.callbacks.read().unwrap().len())
            .finish()
    }
}
