use std::collections::HashMap;

use tracing::trace;

use crate::classpath::{ClassEnvironment, ClassHandle};
use crate::fault::{VerifyResult, verify_error};
use crate::fullinfo::FullInfo;

/// Largest class id that fits in the payload of a `FullInfo`.
const MAX_CLASS_ID: usize = 0xffff;

struct Entry {
    name: String,
    handle: Option<ClassHandle>,
    /// Reachable through the defining loader of the class under verification.
    loadable: bool,
}

/// Interns the classes one verification run refers to as small ids.
///
/// Ids start at 1 so that an object payload of 0 can stand for null. Two ids are equal exactly
/// when they name the same class; a name seen only in a signature is not loaded until a
/// hierarchy question needs it.
pub(crate) struct ClassTable<'e> {
    env: &'e dyn ClassEnvironment,
    current: ClassHandle,
    entries: Vec<Entry>,
    by_name: HashMap<String, Vec<u16>>,
}

impl<'e> ClassTable<'e> {
    pub(crate) fn new(env: &'e dyn ClassEnvironment, current: ClassHandle) -> Self {
        ClassTable {
            env,
            current,
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub(crate) fn env(&self) -> &'e dyn ClassEnvironment {
        self.env
    }

    pub(crate) fn current(&self) -> ClassHandle {
        self.current
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Id for an already loaded class.
    pub(crate) fn intern_by_handle(&mut self, handle: ClassHandle, loadable: bool) -> VerifyResult<u16> {
        let name = self.env.class_name(handle);
        let candidates = self.by_name.get(name).cloned().unwrap_or_default();
        for id in candidates {
            if self.resolve(id)? == handle {
                let entry = self.entry_mut(id)?;
                entry.loadable |= loadable;
                return Ok(id);
            }
        }
        self.insert(name.to_string(), Some(handle), loadable)
    }

    /// Id for a class named in a signature or constant pool entry of the current class.
    pub(crate) fn intern_by_name(&mut self, name: &str) -> VerifyResult<u16> {
        let mut force_load = false;
        if let Some(ids) = self.by_name.get(name) {
            for &id in ids {
                if self.entry(id)?.loadable {
                    return Ok(id);
                }
                force_load = true;
            }
        }
        if force_load {
            let Some(handle) = self.env.find_class_from_class(name, self.current) else {
                verify_error!("Cannot find class {name}");
            };
            return self.intern_by_handle(handle, true);
        }
        self.insert(name.to_string(), None, true)
    }

    /// Loaded class behind an id, loading it on first use.
    pub(crate) fn resolve(&mut self, id: u16) -> VerifyResult<ClassHandle> {
        let entry = self.entry(id)?;
        if let Some(handle) = entry.handle {
            return Ok(handle);
        }
        let name = &entry.name;
        let Some(handle) = self.env.find_class_from_class(name, self.current) else {
            verify_error!("Cannot find class {name}");
        };
        trace!(class = name.as_str(), id, "loaded referenced class");
        self.entry_mut(id)?.handle = Some(handle);
        Ok(handle)
    }

    #[cfg(test)]
    pub(crate) fn name(&self, id: u16) -> VerifyResult<&str> {
        Ok(&self.entry(id)?.name)
    }

    /// Object type for a loaded class, without claiming loader reachability.
    pub(crate) fn class_info(&mut self, handle: ClassHandle) -> VerifyResult<FullInfo> {
        Ok(FullInfo::object(self.intern_by_handle(handle, false)?))
    }

    pub(crate) fn object_by_name(&mut self, name: &str) -> VerifyResult<FullInfo> {
        Ok(FullInfo::object(self.intern_by_name(name)?))
    }

    fn insert(&mut self, name: String, handle: Option<ClassHandle>, loadable: bool) -> VerifyResult<u16> {
        let id = self.entries.len() + 1;
        if id > MAX_CLASS_ID {
            verify_error!("Exceeded verifier's limit of 65535 referred classes");
        }
        let id = id as u16;
        self.by_name.entry(name.clone()).or_default().insert(0, id);
        self.entries.push(Entry {
            name,
            handle,
            loadable,
        });
        Ok(id)
    }

    /// Id 0 is null and never names an entry.
    fn entry(&self, id: u16) -> VerifyResult<&Entry> {
        match usize::from(id).checked_sub(1).and_then(|index| self.entries.get(index)) {
            Some(entry) => Ok(entry),
            None => verify_error!("Internal error: no class with id {id}"),
        }
    }

    fn entry_mut(&mut self, id: u16) -> VerifyResult<&mut Entry> {
        match usize::from(id).checked_sub(1).and_then(|index| self.entries.get_mut(index)) {
            Some(entry) => Ok(entry),
            None => verify_error!("Internal error: no class with id {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::ClassPath;
    use crate::fault::VerifyFault;

    fn class_path() -> ClassPath {
        ClassPath::new(Vec::new()).expect("class path")
    }

    #[test]
    fn same_name_interns_once() {
        let path = class_path();
        let object = path.lookup("java/lang/Object").expect("object");
        let mut table = ClassTable::new(&path, object);
        let first = table.intern_by_name("java/lang/String").expect("id");
        let second = table.intern_by_name("java/lang/String").expect("id");
        assert_eq!(first, second);
        assert_eq!(first, 1);
        assert_eq!(table.name(first), Ok("java/lang/String"));
    }

    #[test]
    fn handle_lookup_reuses_name_entry_after_resolve() {
        let path = class_path();
        let object = path.lookup("java/lang/Object").expect("object");
        let string = path.lookup("java/lang/String").expect("string");
        let mut table = ClassTable::new(&path, object);
        let by_name = table.intern_by_name("java/lang/String").expect("id");
        let by_handle = table.intern_by_handle(string, false).expect("id");
        assert_eq!(by_name, by_handle);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn non_loadable_entry_is_upgraded_by_name() {
        let path = class_path();
        let object = path.lookup("java/lang/Object").expect("object");
        let throwable = path.lookup("java/lang/Throwable").expect("throwable");
        let mut table = ClassTable::new(&path, object);
        let id = table.intern_by_handle(throwable, false).expect("id");
        assert_eq!(table.intern_by_name("java/lang/Throwable").expect("id"), id);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_class_fails_only_when_resolved() {
        let path = class_path();
        let object = path.lookup("java/lang/Object").expect("object");
        let mut table = ClassTable::new(&path, object);
        let id = table.intern_by_name("com/example/Missing").expect("id");
        assert_eq!(
            table.resolve(id),
            Err(VerifyFault::VerifyError(
                "Cannot find class com/example/Missing".to_string()
            ))
        );
    }

    #[test]
    fn null_and_unassigned_ids_name_no_class() {
        let path = class_path();
        let object = path.lookup("java/lang/Object").expect("object");
        let mut table = ClassTable::new(&path, object);
        table.intern_by_name("java/lang/String").expect("id");
        for id in [0, 2] {
            assert_eq!(
                table.resolve(id),
                Err(VerifyFault::VerifyError(format!(
                    "Internal error: no class with id {id}"
                )))
            );
        }
        assert!(table.name(0).is_err());
    }

    #[test]
    fn id_space_is_capped() {
        let path = class_path();
        let object = path.lookup("java/lang/Object").expect("object");
        let mut table = ClassTable::new(&path, object);
        for index in 0..MAX_CLASS_ID {
            table.intern_by_name(&format!("C{index}")).expect("id");
        }
        assert_eq!(
            table.intern_by_name("Overflow"),
            Err(VerifyFault::VerifyError(
                "Exceeded verifier's limit of 65535 referred classes".to_string()
            ))
        );
    }
}
