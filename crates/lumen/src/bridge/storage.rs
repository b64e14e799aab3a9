//! `localStorage` backed by an in-memory map, optionally mirrored to a JSON file.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use rquickjs::{Ctx, Function, Object, convert::Coerced};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Shared between generations so that values survive reloads.
pub type SharedStorage = Rc<RefCell<LocalStorage>>;

#[derive(Debug, Default)]
pub struct LocalStorage {
    items: BTreeMap<String, String>,
    path: Option<PathBuf>,
}

impl LocalStorage {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens storage persisted at `path`. A missing file starts out empty.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or is not a
    /// JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), "Opened local storage");
        Ok(Self {
            items,
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Missing keys read as the empty string.
    pub fn get_item(&self, key: &str) -> String {
        self.items.get(key).cloned().unwrap_or_default()
    }

    pub fn set_item(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.insert(key.into(), value.into());
        self.flush();
    }

    pub fn remove_item(&mut self, key: &str) {
        if self.items.remove(key).is_some() {
            self.flush();
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.flush();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn flush(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec_pretty(&self.items)
            .map_err(std::io::Error::other)
            .and_then(|raw| std::fs::write(path, raw));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "Failed to persist local storage");
        }
    }
}

/// Installs the global `localStorage` object.
pub fn install<'js>(ctx: &Ctx<'js>, storage: &SharedStorage) -> rquickjs::Result<()> {
    let object = Object::new(ctx.clone())?;

    let store = Rc::clone(storage);
    object.set(
        "getItem",
        Function::new(ctx.clone(), move |key: Coerced<String>| {
            store.borrow().get_item(&key.0)
        })?,
    )?;

    let store = Rc::clone(storage);
    object.set(
        "setItem",
        Function::new(
            ctx.clone(),
            move |key: Coerced<String>, value: Coerced<String>| {
                store.borrow_mut().set_item(key.0, value.0);
            },
        )?,
    )?;

    let store = Rc::clone(storage);
    object.set(
        "removeItem",
        Function::new(ctx.clone(), move |key: Coerced<String>| {
            store.borrow_mut().remove_item(&key.0);
        })?,
    )?;

    let store = Rc::clone(storage);
    object.set(
        "clear",
        Function::new(ctx.clone(), move || store.borrow_mut().clear())?,
    )?;

    ctx.globals().set("localStorage", object)
}
