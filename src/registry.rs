//! Function names, and the replay functions registered for them.
//!
//! A trace refers to functions by small integer ids, assigned by the trace's
//! `FunctionRegistry`. The retracer registers its replay functions by name in
//! a `DispatchTable`, and then binds the table to a particular trace's
//! registry to get an id-indexed table for the dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::call::ArgCursor;
use crate::engine::Retracer;
use crate::error::Result;

/// Interned function names. A function's id is its index in `names`.
#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl FunctionRegistry {
    /// Build a registry from a list of names. Ids are assigned in order.
    pub fn from_names<I, S>(names: I) -> FunctionRegistry
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = FunctionRegistry::default();
        for name in names {
            registry.intern(&name.into());
        }
        registry
    }

    /// Return the id for `name`, assigning a new one if needed.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).cloned()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(|name| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|name| name.as_str())
    }
}

pub type ReplayFn = Arc<dyn Fn(&mut Retracer, &mut ArgCursor) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Entry {
    pub name: Arc<str>,
    /// Query `glGetError` after this call when debugging.
    pub check_error: bool,
    pub func: ReplayFn,
}

/// Replay functions, by name and, once bound, by trace function id.
#[derive(Clone, Default)]
pub struct DispatchTable {
    by_name: HashMap<String, Entry>,
    by_id: Vec<Option<Entry>>,
}

impl DispatchTable {
    pub fn new() -> DispatchTable {
        DispatchTable::default()
    }

    /// Register `func` as the replay function for `name`, replacing any
    /// earlier registration.
    pub fn register<F>(&mut self, name: &str, check_error: bool, func: F)
    where
        F: Fn(&mut Retracer, &mut ArgCursor) -> Result<()> + Send + Sync + 'static,
    {
        self.by_name.insert(
            name.to_string(),
            Entry {
                name: Arc::from(name),
                check_error,
                func: Arc::new(func),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Build the id-indexed table for a trace whose functions are named by
    /// `functions`. Functions we have no replay for get no entry.
    pub fn bind(&mut self, functions: &FunctionRegistry) {
        self.by_id = functions
            .names()
            .map(|name| self.by_name.get(name).cloned())
            .collect();
        debug!(
            "bound {} of {} trace functions to replay functions",
            self.by_id.iter().filter(|entry| entry.is_some()).count(),
            self.by_id.len()
        );
    }

    pub fn get(&self, id: u32) -> Option<&Entry> {
        self.by_id.get(id as usize).and_then(|entry| entry.as_ref())
    }
}

#[test]
fn test_bind() {
    let functions = FunctionRegistry::from_names(vec!["glFlush", "glFooEXT", "glFinish"]);
    assert_eq!(functions.id("glFinish"), Some(2));
    assert_eq!(functions.name(1), Some("glFooEXT"));
    assert_eq!(functions.name(3), None);

    let mut table = DispatchTable::new();
    table.register("glFinish", true, |_, _| Ok(()));
    table.register("glFlush", false, |_, _| Ok(()));
    table.bind(&functions);

    assert_eq!(&*table.get(0).unwrap().name, "glFlush");
    assert!(!table.get(0).unwrap().check_error);
    assert!(table.get(1).is_none());
    assert!(table.get(2).unwrap().check_error);
    assert!(table.get(99).is_none());
}
