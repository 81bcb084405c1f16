//! The virtual file system, as far as program loading is concerned.
use std::collections::BTreeMap;

use tracing::{event, Level};

use super::machine::ProgramHandle;

pub trait FileSystem {
    /// Opens the named file for reading.  `None` means it does not
    /// exist.
    fn open(&mut self, name: &str) -> Option<ProgramHandle>;

    fn close(&mut self, handle: ProgramHandle);

    /// Names of the files for which `predicate` holds, in the file
    /// system's own order.
    fn list(&self, predicate: &dyn Fn(&str) -> bool) -> Vec<String>;
}

/// A read-only file system held in memory.  Names are matched without
/// regard to case, as they would be on the virtual machine's own disk.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, (String, Vec<u8>)>,
    open: BTreeMap<ProgramHandle, String>,
    next_handle: i32,
}

impl MemoryFileSystem {
    pub fn new() -> MemoryFileSystem {
        MemoryFileSystem::default()
    }

    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.files
            .insert(name.to_lowercase(), (name.to_string(), data));
    }

    #[must_use]
    pub fn with_file(mut self, name: &str, data: Vec<u8>) -> MemoryFileSystem {
        self.insert(name, data);
        self
    }

    /// The contents of an open file.
    pub fn contents(&self, handle: ProgramHandle) -> Option<&[u8]> {
        let key = self.open.get(&handle)?;
        self.files.get(key).map(|(_, data)| data.as_slice())
    }

    /// The name of an open file, as it was inserted.
    pub fn name_of(&self, handle: ProgramHandle) -> Option<&str> {
        let key = self.open.get(&handle)?;
        self.files.get(key).map(|(name, _)| name.as_str())
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&mut self, name: &str) -> Option<ProgramHandle> {
        let key = name.to_lowercase();
        if !self.files.contains_key(&key) {
            event!(Level::DEBUG, "{name} is not in the file system");
            return None;
        }
        let handle = ProgramHandle(self.next_handle);
        self.next_handle += 1;
        self.open.insert(handle, key);
        Some(handle)
    }

    fn close(&mut self, handle: ProgramHandle) {
        if self.open.remove(&handle).is_none() {
            event!(Level::WARN, "closing {handle:?}, which is not open");
        }
    }

    fn list(&self, predicate: &dyn Fn(&str) -> bool) -> Vec<String> {
        self.files
            .values()
            .map(|(name, _)| name)
            .filter(|name| predicate(name))
            .cloned()
            .collect()
    }
}

#[test]
fn lookup_ignores_case() {
    let mut fs = MemoryFileSystem::new().with_file("TOWN.ZZT", vec![1, 2, 3]);
    let handle = fs.open("town.zzt").expect("file was inserted");
    assert_eq!(fs.contents(handle), Some(&[1_u8, 2, 3][..]));
    assert_eq!(fs.name_of(handle), Some("TOWN.ZZT"));
    fs.close(handle);
    assert_eq!(fs.open_count(), 0);
    assert_eq!(fs.open("CAVES.ZZT"), None);
}

#[test]
fn list_keeps_original_names() {
    let fs = MemoryFileSystem::new()
        .with_file("ZZT.EXE", Vec::new())
        .with_file("Town.zzt", Vec::new());
    assert_eq!(
        fs.list(&|name| name.to_lowercase().ends_with(".zzt")),
        vec!["Town.zzt".to_string()]
    );
}
