// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Resource Information Base (RIB)
//!
//! A per-schema hierarchical store of managed objects, keyed both by
//! fully qualified name (`/`-separated path) and by instance id. The
//! tree invariants: FQNs and instance ids are unique, every object but
//! the root has an existing parent, and only leaves can be removed.
//!
//! Objects implement the [`RibObj`] capability trait; operations they do
//! not override answer `OperationNotSupported`, except `read`, which
//! returns the object's own serialized value. An object can also mark
//! itself as capturing its whole subtree, in which case operations on
//! any descendant FQN are delivered to it with the original name.

use crate::error::RibError;
use crate::message::{CdapFlags, FiltInfo, ObjInfo, ResInfo};
use crate::schema::{CreateRequest, RibSchema};
use crate::session::ConnectionHandle;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// Identifies one RIB instance within the daemon.
pub type RibHandle = u64;

/// Instance id of the root object at `/`.
pub const ROOT_INSTANCE_ID: i64 = 0;

/// Capability trait of a managed object. Accessors are required; every
/// operation has a default so plain data objects implement nothing.
pub trait RibObj: Send + Sync {
    /// Object class name.
    fn class(&self) -> &str;

    /// Serialized value of the object, used by the default `read`.
    fn value(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Marks the object as capturing operations on every descendant FQN.
    fn delegates_subtree(&self) -> bool {
        false
    }

    fn create(
        &self,
        fqn: &str,
        class: &str,
        value: &[u8],
    ) -> Result<Option<Vec<u8>>, RibError> {
        let _ = (fqn, class, value);
        Err(RibError::OperationNotSupported)
    }

    fn delete(&self, fqn: &str) -> Result<(), RibError> {
        let _ = fqn;
        Err(RibError::OperationNotSupported)
    }

    /// Self-read by default: an object that does not override `read`
    /// answers with itself.
    fn read(&self, fqn: &str) -> Result<Option<Vec<u8>>, RibError> {
        let _ = fqn;
        Ok(Some(self.value()))
    }

    fn cancel_read(&self, fqn: &str) -> Result<(), RibError> {
        let _ = fqn;
        Err(RibError::OperationNotSupported)
    }

    fn write(&self, fqn: &str, value: &[u8]) -> Result<Option<Vec<u8>>, RibError> {
        let _ = (fqn, value);
        Err(RibError::OperationNotSupported)
    }

    fn start(&self, fqn: &str, value: &[u8]) -> Result<Option<Vec<u8>>, RibError> {
        let _ = (fqn, value);
        Err(RibError::OperationNotSupported)
    }

    fn stop(&self, fqn: &str, value: &[u8]) -> Result<Option<Vec<u8>>, RibError> {
        let _ = (fqn, value);
        Err(RibError::OperationNotSupported)
    }
}

/// The root of every RIB.
struct RootObj;

impl RibObj for RootObj {
    fn class(&self) -> &str {
        "root"
    }
}

/// Handlers for the results of operations this process initiated on a
/// peer's RIB. One method per opcode family.
#[allow(unused_variables)]
pub trait RibOpsResponseHandler: Send + Sync {
    fn on_create_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo) {}
    fn on_delete_result(&self, con: &ConnectionHandle, res: &ResInfo) {}
    fn on_read_result(
        &self,
        con: &ConnectionHandle,
        obj: &ObjInfo,
        res: &ResInfo,
        flags: CdapFlags,
    ) {
    }
    fn on_cancel_read_result(&self, con: &ConnectionHandle, res: &ResInfo) {}
    fn on_write_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo) {}
    fn on_start_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo) {}
    fn on_stop_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo) {}
}

struct RibEntry {
    inst_id: i64,
    parent: Option<String>,
    children: BTreeSet<String>,
    obj: Arc<dyn RibObj>,
}

struct RibInner {
    by_fqn: HashMap<String, RibEntry>,
    by_inst: HashMap<i64, String>,
    next_inst: i64,
}

/// How an inbound operation resolved against the tree.
enum Resolution {
    /// The FQN names an object directly.
    Exact(Arc<dyn RibObj>),
    /// A subtree-capturing ancestor takes the operation.
    Delegated(Arc<dyn RibObj>),
    Err(RibError),
}

/// One RIB instance. All tree mutations and lookups are serialized by
/// the inner mutex; the mutex is never held across an object operation
/// or a create callback.
pub struct Rib {
    handle: RibHandle,
    schema: Arc<RibSchema>,
    resp_handler: Arc<dyn RibOpsResponseHandler>,
    inner: Mutex<RibInner>,
}

impl Rib {
    pub fn new(
        handle: RibHandle,
        schema: Arc<RibSchema>,
        resp_handler: Arc<dyn RibOpsResponseHandler>,
    ) -> Self {
        let root = RibEntry {
            inst_id: ROOT_INSTANCE_ID,
            parent: None,
            children: BTreeSet::new(),
            obj: Arc::new(RootObj),
        };
        let mut by_fqn = HashMap::new();
        by_fqn.insert("/".to_string(), root);
        let mut by_inst = HashMap::new();
        by_inst.insert(ROOT_INSTANCE_ID, "/".to_string());

        Self {
            handle,
            schema,
            resp_handler,
            inner: Mutex::new(RibInner {
                by_fqn,
                by_inst,
                next_inst: 1,
            }),
        }
    }

    pub fn handle(&self) -> RibHandle {
        self.handle
    }

    pub fn version(&self) -> u64 {
        self.schema.version()
    }

    pub fn schema(&self) -> &Arc<RibSchema> {
        &self.schema
    }

    /// Strips the last path segment. The parent of a first-level object
    /// is the root `/`; the root has no parent.
    pub fn parent_fqn_of(&self, fqn: &str) -> Option<String> {
        if fqn == "/" {
            return None;
        }
        let sep = self.schema.separator();
        let cut = fqn.rfind(sep)?;
        if cut == 0 {
            Some(sep.to_string())
        } else {
            Some(fqn[..cut].to_string())
        }
    }

    fn normalize(fqn: &str) -> String {
        fqn.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn validate_fqn(&self, fqn: &str) -> Result<(), RibError> {
        let sep = self.schema.separator();
        if fqn.is_empty() || !fqn.starts_with(sep) {
            return Err(RibError::ObjectInvalid(format!(
                "name '{}' must start with '{}'",
                fqn, sep
            )));
        }
        if fqn.len() > 1 && fqn.ends_with(sep) {
            return Err(RibError::ObjectInvalid(format!(
                "name '{}' must not end with '{}'",
                fqn, sep
            )));
        }
        let mut double = String::new();
        double.push(sep);
        double.push(sep);
        if fqn.contains(&double) {
            return Err(RibError::ObjectInvalid(format!(
                "name '{}' contains an empty segment",
                fqn
            )));
        }
        Ok(())
    }

    /// Inserts `obj` at `fqn` and returns its freshly assigned instance
    /// id. The parent object must already be in the tree.
    pub fn add_object(&self, fqn: &str, obj: Arc<dyn RibObj>) -> Result<i64, RibError> {
        let fqn = Self::normalize(fqn);
        self.validate_fqn(&fqn)?;

        let mut inner = self.inner.lock().unwrap();
        if inner.by_fqn.contains_key(&fqn) {
            return Err(RibError::ObjectExists(fqn));
        }

        let parent = self
            .parent_fqn_of(&fqn)
            .ok_or_else(|| RibError::ObjectInvalid(fqn.clone()))?;
        if !inner.by_fqn.contains_key(&parent) {
            return Err(RibError::ObjectDoesNotExist(parent));
        }

        let inst_id = inner.next_inst;
        inner.next_inst += 1;

        if let Some(entry) = inner.by_fqn.get_mut(&parent) {
            entry.children.insert(fqn.clone());
        }
        inner.by_fqn.insert(
            fqn.clone(),
            RibEntry {
                inst_id,
                parent: Some(parent),
                children: BTreeSet::new(),
                obj,
            },
        );
        inner.by_inst.insert(inst_id, fqn.clone());

        log::debug!("object {} added to RIB {} as instance {}", fqn, self.handle, inst_id);
        Ok(inst_id)
    }

    /// Removes a leaf object by instance id. Root removal always fails.
    pub fn remove_object_by_instance_id(&self, inst_id: i64) -> Result<(), RibError> {
        let mut inner = self.inner.lock().unwrap();
        let fqn = inner
            .by_inst
            .get(&inst_id)
            .cloned()
            .ok_or_else(|| RibError::ObjectDoesNotExist(format!("instance {}", inst_id)))?;
        Self::remove_locked(&mut inner, &fqn)
    }

    /// Removes a leaf object by FQN.
    pub fn remove_object_by_fqn(&self, fqn: &str) -> Result<(), RibError> {
        let fqn = Self::normalize(fqn);
        let mut inner = self.inner.lock().unwrap();
        if !inner.by_fqn.contains_key(&fqn) {
            return Err(RibError::ObjectDoesNotExist(fqn));
        }
        Self::remove_locked(&mut inner, &fqn)
    }

    fn remove_locked(inner: &mut RibInner, fqn: &str) -> Result<(), RibError> {
        let entry = inner
            .by_fqn
            .get(fqn)
            .ok_or_else(|| RibError::ObjectDoesNotExist(fqn.to_string()))?;

        if entry.parent.is_none() {
            return Err(RibError::ObjectInvalid("the root cannot be removed".to_string()));
        }
        if !entry.children.is_empty() {
            return Err(RibError::ObjectHasChildren(fqn.to_string()));
        }

        let parent = entry.parent.clone();
        let inst_id = entry.inst_id;
        inner.by_fqn.remove(fqn);
        inner.by_inst.remove(&inst_id);
        if let Some(parent) = parent {
            if let Some(parent_entry) = inner.by_fqn.get_mut(&parent) {
                parent_entry.children.remove(fqn);
            }
        }
        log::debug!("object {} removed from the RIB", fqn);
        Ok(())
    }

    /// Looks an object up by FQN, optionally checking its class.
    pub fn get_object_by_fqn(
        &self,
        fqn: &str,
        class: Option<&str>,
    ) -> Result<Arc<dyn RibObj>, RibError> {
        let fqn = Self::normalize(fqn);
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .by_fqn
            .get(&fqn)
            .ok_or(RibError::ObjectDoesNotExist(fqn))?;
        Self::class_checked(entry, class)
    }

    /// Looks an object up by instance id, returning its FQN as well.
    pub fn get_object_by_instance_id(
        &self,
        inst_id: i64,
        class: Option<&str>,
    ) -> Result<(String, Arc<dyn RibObj>), RibError> {
        let inner = self.inner.lock().unwrap();
        let fqn = inner
            .by_inst
            .get(&inst_id)
            .ok_or_else(|| RibError::ObjectDoesNotExist(format!("instance {}", inst_id)))?;
        let entry = &inner.by_fqn[fqn];
        Ok((fqn.clone(), Self::class_checked(entry, class)?))
    }

    fn class_checked(
        entry: &RibEntry,
        class: Option<&str>,
    ) -> Result<Arc<dyn RibObj>, RibError> {
        if let Some(class) = class {
            if !class.is_empty() && entry.obj.class() != class {
                return Err(RibError::ObjectClassMismatch {
                    expected: entry.obj.class().to_string(),
                    got: class.to_string(),
                });
            }
        }
        Ok(entry.obj.clone())
    }

    /// FQN of the parent of an object that is in the tree.
    pub fn get_parent_fqn(&self, fqn: &str) -> Result<String, RibError> {
        let fqn = Self::normalize(fqn);
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .by_fqn
            .get(&fqn)
            .ok_or(RibError::ObjectDoesNotExist(fqn))?;
        Ok(entry.parent.clone().unwrap_or_default())
    }

    pub fn get_object_class(&self, fqn: &str) -> Result<String, RibError> {
        Ok(self.get_object_by_fqn(fqn, None)?.class().to_string())
    }

    pub fn get_instance_id(&self, fqn: &str) -> Result<i64, RibError> {
        let fqn = Self::normalize(fqn);
        let inner = self.inner.lock().unwrap();
        inner
            .by_fqn
            .get(&fqn)
            .map(|entry| entry.inst_id)
            .ok_or(RibError::ObjectDoesNotExist(fqn))
    }

    pub fn fqn_is_present(&self, fqn: &str) -> bool {
        let fqn = Self::normalize(fqn);
        self.inner.lock().unwrap().by_fqn.contains_key(&fqn)
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().unwrap().by_fqn.len()
    }

    /// Finds the target of an inbound operation: the exact object, or
    /// the nearest subtree-capturing ancestor. The lock is dropped
    /// before the caller invokes anything on the result.
    fn resolve(&self, fqn: &str, class: &str) -> Resolution {
        let fqn = Self::normalize(fqn);
        let fqn_for_err = fqn.clone();
        let inner = self.inner.lock().unwrap();

        if let Some(entry) = inner.by_fqn.get(&fqn) {
            if !class.is_empty() && entry.obj.class() != class {
                return Resolution::Err(RibError::ObjectClassMismatch {
                    expected: entry.obj.class().to_string(),
                    got: class.to_string(),
                });
            }
            return Resolution::Exact(entry.obj.clone());
        }

        // walk towards the root looking for a delegation object
        let mut cursor = fqn;
        while let Some(ancestor) = self.parent_fqn_of(&cursor) {
            if let Some(entry) = inner.by_fqn.get(&ancestor) {
                if entry.obj.delegates_subtree() {
                    return Resolution::Delegated(entry.obj.clone());
                }
            }
            cursor = ancestor;
        }

        Resolution::Err(RibError::ObjectDoesNotExist(fqn_for_err))
    }

    fn reply_obj(obj: &ObjInfo, value: Option<Vec<u8>>) -> ObjInfo {
        ObjInfo {
            class: obj.class.clone(),
            name: obj.name.clone(),
            inst: obj.inst,
            value: value.unwrap_or_default(),
        }
    }

    fn res_from(result: Result<Option<Vec<u8>>, RibError>, obj: &ObjInfo) -> (ObjInfo, ResInfo) {
        match result {
            Ok(value) => (Self::reply_obj(obj, value), ResInfo::success()),
            Err(err) => {
                log::debug!("operation on {} failed: {}", obj.name, err);
                (
                    Self::reply_obj(obj, None),
                    ResInfo::failure(err.result_code(), err.to_string()),
                )
            }
        }
    }

    //
    // Inbound requests, routed here by the daemon. Each returns the
    // reply object and result for the corresponding `_R` message.
    //

    pub(crate) fn remote_create_request(
        &self,
        con: &ConnectionHandle,
        obj: &ObjInfo,
        filt: &FiltInfo,
        invoke_id: u32,
    ) -> (ObjInfo, ResInfo) {
        let result = match self.resolve(&obj.name, &obj.class) {
            Resolution::Exact(target) | Resolution::Delegated(target) => {
                target.create(&obj.name, &obj.class, &obj.value)
            }
            Resolution::Err(RibError::ObjectDoesNotExist(_)) => {
                // unknown target: the schema may know how to build it
                match self.schema.find_create_callback(&obj.class, &obj.name) {
                    Some(callback) => {
                        let request = CreateRequest {
                            con,
                            fqn: &obj.name,
                            class: &obj.class,
                            value: &obj.value,
                            filt,
                            invoke_id,
                        };
                        callback(self, &request)
                    }
                    None => Err(RibError::OperationNotSupported),
                }
            }
            Resolution::Err(err) => Err(err),
        };
        Self::res_from(result, obj)
    }

    pub(crate) fn remote_delete_request(&self, obj: &ObjInfo) -> (ObjInfo, ResInfo) {
        let result = match self.resolve(&obj.name, &obj.class) {
            Resolution::Exact(target) | Resolution::Delegated(target) => {
                target.delete(&obj.name).map(|()| None)
            }
            Resolution::Err(err) => Err(err),
        };
        Self::res_from(result, obj)
    }

    pub(crate) fn remote_read_request(&self, obj: &ObjInfo) -> (ObjInfo, ResInfo) {
        let result = match self.resolve(&obj.name, &obj.class) {
            Resolution::Exact(target) | Resolution::Delegated(target) => target.read(&obj.name),
            Resolution::Err(err) => Err(err),
        };
        Self::res_from(result, obj)
    }

    pub(crate) fn remote_cancel_read_request(&self, obj: &ObjInfo) -> (ObjInfo, ResInfo) {
        let result = match self.resolve(&obj.name, &obj.class) {
            Resolution::Exact(target) | Resolution::Delegated(target) => {
                target.cancel_read(&obj.name).map(|()| None)
            }
            Resolution::Err(err) => Err(err),
        };
        Self::res_from(result, obj)
    }

    pub(crate) fn remote_write_request(&self, obj: &ObjInfo) -> (ObjInfo, ResInfo) {
        let result = match self.resolve(&obj.name, &obj.class) {
            Resolution::Exact(target) | Resolution::Delegated(target) => {
                target.write(&obj.name, &obj.value)
            }
            Resolution::Err(err) => Err(err),
        };
        Self::res_from(result, obj)
    }

    pub(crate) fn remote_start_request(&self, obj: &ObjInfo) -> (ObjInfo, ResInfo) {
        let result = match self.resolve(&obj.name, &obj.class) {
            Resolution::Exact(target) | Resolution::Delegated(target) => {
                target.start(&obj.name, &obj.value)
            }
            Resolution::Err(err) => Err(err),
        };
        Self::res_from(result, obj)
    }

    pub(crate) fn remote_stop_request(&self, obj: &ObjInfo) -> (ObjInfo, ResInfo) {
        let result = match self.resolve(&obj.name, &obj.class) {
            Resolution::Exact(target) | Resolution::Delegated(target) => {
                target.stop(&obj.name, &obj.value)
            }
            Resolution::Err(err) => Err(err),
        };
        Self::res_from(result, obj)
    }

    //
    // Responses to operations this process initiated, routed through to
    // the registered handler.
    //

    pub(crate) fn remote_create_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo) {
        self.resp_handler.on_create_result(con, obj, res);
    }

    pub(crate) fn remote_delete_result(&self, con: &ConnectionHandle, res: &ResInfo) {
        self.resp_handler.on_delete_result(con, res);
    }

    pub(crate) fn remote_read_result(
        &self,
        con: &ConnectionHandle,
        obj: &ObjInfo,
        res: &ResInfo,
        flags: CdapFlags,
    ) {
        self.resp_handler.on_read_result(con, obj, res, flags);
    }

    pub(crate) fn remote_cancel_read_result(&self, con: &ConnectionHandle, res: &ResInfo) {
        self.resp_handler.on_cancel_read_result(con, res);
    }

    pub(crate) fn remote_write_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo) {
        self.resp_handler.on_write_result(con, obj, res);
    }

    pub(crate) fn remote_start_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo) {
        self.resp_handler.on_start_result(con, obj, res);
    }

    pub(crate) fn remote_stop_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo) {
        self.resp_handler.on_stop_result(con, obj, res);
    }
}

impl std::fmt::Debug for Rib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rib")
            .field("handle", &self.handle)
            .field("version", &self.version())
            .field("objects", &self.object_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopHandler;
    impl RibOpsResponseHandler for NoopHandler {}

    struct Plain {
        class: String,
        payload: Vec<u8>,
    }

    impl Plain {
        fn new(class: &str) -> Arc<Self> {
            Arc::new(Self {
                class: class.to_string(),
                payload: Vec::new(),
            })
        }

        fn with_payload(class: &str, payload: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                class: class.to_string(),
                payload: payload.to_vec(),
            })
        }
    }

    impl RibObj for Plain {
        fn class(&self) -> &str {
            &self.class
        }

        fn value(&self) -> Vec<u8> {
            self.payload.clone()
        }
    }

    struct Deleg {
        started: AtomicUsize,
        last_fqn: Mutex<String>,
    }

    impl RibObj for Deleg {
        fn class(&self) -> &str {
            "delegation"
        }

        fn delegates_subtree(&self) -> bool {
            true
        }

        fn start(&self, fqn: &str, _value: &[u8]) -> Result<Option<Vec<u8>>, RibError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            *self.last_fqn.lock().unwrap() = fqn.to_string();
            Ok(None)
        }
    }

    fn rib() -> Rib {
        Rib::new(1, Arc::new(RibSchema::new(1)), Arc::new(NoopHandler))
    }

    #[test]
    fn test_root_exists_and_cannot_be_removed() {
        let rib = rib();
        assert!(rib.fqn_is_present("/"));
        assert_eq!(rib.get_instance_id("/").unwrap(), ROOT_INSTANCE_ID);
        assert!(matches!(
            rib.remove_object_by_fqn("/"),
            Err(RibError::ObjectInvalid(_))
        ));
        assert!(matches!(
            rib.remove_object_by_instance_id(ROOT_INSTANCE_ID),
            Err(RibError::ObjectInvalid(_))
        ));
    }

    #[test]
    fn test_instance_ids_are_monotonic() {
        let rib = rib();
        let a = rib.add_object("/a", Plain::new("x")).unwrap();
        let b = rib.add_object("/a/b", Plain::new("x")).unwrap();
        let c = rib.add_object("/a/c", Plain::new("x")).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_parent_must_exist() {
        let rib = rib();
        let err = rib.add_object("/a/b", Plain::new("x")).unwrap_err();
        assert_eq!(err, RibError::ObjectDoesNotExist("/a".to_string()));
    }

    #[test]
    fn test_fqn_shape_is_validated() {
        let rib = rib();
        assert!(matches!(
            rib.add_object("a", Plain::new("x")),
            Err(RibError::ObjectInvalid(_))
        ));
        assert!(matches!(
            rib.add_object("/a/", Plain::new("x")),
            Err(RibError::ObjectInvalid(_))
        ));
        assert!(matches!(
            rib.add_object("", Plain::new("x")),
            Err(RibError::ObjectInvalid(_))
        ));
        assert!(matches!(
            rib.add_object("/a//b", Plain::new("x")),
            Err(RibError::ObjectInvalid(_))
        ));
    }

    #[test]
    fn test_duplicate_fqn_is_rejected() {
        let rib = rib();
        rib.add_object("/a", Plain::new("x")).unwrap();
        assert!(matches!(
            rib.add_object("/a", Plain::new("y")),
            Err(RibError::ObjectExists(_))
        ));
    }

    #[test]
    fn test_parent_and_instance_queries() {
        let rib = rib();
        rib.add_object("/p", Plain::new("x")).unwrap();
        let id = rib.add_object("/p/c", Plain::new("x")).unwrap();

        assert_eq!(rib.get_parent_fqn("/p/c").unwrap(), "/p");
        assert_eq!(rib.get_parent_fqn("/p").unwrap(), "/");
        let (fqn, _) = rib.get_object_by_instance_id(id, None).unwrap();
        assert_eq!(fqn, "/p/c");
    }

    #[test]
    fn test_only_leaves_can_be_removed() {
        let rib = rib();
        rib.add_object("/p", Plain::new("x")).unwrap();
        let child = rib.add_object("/p/c", Plain::new("x")).unwrap();

        assert_eq!(
            rib.remove_object_by_fqn("/p"),
            Err(RibError::ObjectHasChildren("/p".to_string()))
        );
        rib.remove_object_by_instance_id(child).unwrap();
        rib.remove_object_by_fqn("/p").unwrap();
        assert_eq!(rib.object_count(), 1);
    }

    #[test]
    fn test_class_check() {
        let rib = rib();
        rib.add_object("/x", Plain::new("Flow")).unwrap();

        assert!(rib.get_object_by_fqn("/x", Some("Flow")).is_ok());
        assert!(rib.get_object_by_fqn("/x", Some("")).is_ok());
        assert!(matches!(
            rib.get_object_by_fqn("/x", Some("Neighbor")),
            Err(RibError::ObjectClassMismatch { .. })
        ));
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let rib = rib();
        rib.add_object("/x ", Plain::new("Flow")).unwrap();
        assert!(rib.fqn_is_present("/x"));
        assert!(rib.get_object_by_fqn(" /x", None).is_ok());
    }

    #[test]
    fn test_default_read_returns_object_value() {
        let rib = rib();
        rib.add_object("/sys", Plain::new("Sys")).unwrap();
        rib.add_object("/sys/info", Plain::with_payload("SysInfo", b"uptime=42"))
            .unwrap();

        let obj = ObjInfo::new("SysInfo", "/sys/info");
        let (reply, res) = rib.remote_read_request(&obj);
        assert!(res.is_success());
        assert_eq!(reply.value, b"uptime=42");
    }

    #[test]
    fn test_write_without_override_is_unsupported() {
        let rib = rib();
        rib.add_object("/x", Plain::new("Flow")).unwrap();

        let mut obj = ObjInfo::new("Flow", "/x");
        obj.value = b"data".to_vec();
        let (_, res) = rib.remote_write_request(&obj);
        assert_eq!(res.code, RibError::OperationNotSupported.result_code());
    }

    #[test]
    fn test_missing_object_maps_to_result_code() {
        let rib = rib();
        let obj = ObjInfo::new("Flow", "/nope");
        let (_, res) = rib.remote_read_request(&obj);
        assert_eq!(
            res.code,
            RibError::ObjectDoesNotExist(String::new()).result_code()
        );
    }

    #[test]
    fn test_delegation_captures_descendants() {
        let rib = rib();
        rib.add_object("/root", Plain::new("MyObj")).unwrap();
        let deleg = Arc::new(Deleg {
            started: AtomicUsize::new(0),
            last_fqn: Mutex::new(String::new()),
        });
        rib.add_object("/root/deleg", deleg.clone()).unwrap();

        let obj = ObjInfo::new("", "/root/deleg/foo/bar");
        let (_, res) = rib.remote_start_request(&obj);
        assert!(res.is_success());
        assert_eq!(deleg.started.load(Ordering::SeqCst), 1);
        assert_eq!(deleg.last_fqn.lock().unwrap().as_str(), "/root/deleg/foo/bar");
    }

    #[test]
    fn test_non_delegating_ancestors_do_not_capture() {
        let rib = rib();
        rib.add_object("/root", Plain::new("MyObj")).unwrap();

        let obj = ObjInfo::new("", "/root/missing");
        let (_, res) = rib.remote_start_request(&obj);
        assert_eq!(
            res.code,
            RibError::ObjectDoesNotExist(String::new()).result_code()
        );
    }
}
