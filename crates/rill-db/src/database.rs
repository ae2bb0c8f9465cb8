//! Process-wide registries: name → collection and name → view, owned by a
//! database.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::view::View;

/// Snapshot row reported by [`Database::views`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
    pub count: usize,
    pub linked: bool,
}

pub(crate) struct DatabaseCore {
    name: String,
    weak_self: Weak<DatabaseCore>,
    collections: RefCell<HashMap<String, Collection>>,
    views: RefCell<HashMap<String, View>>,
}

#[derive(Clone)]
pub struct Database {
    core: Rc<DatabaseCore>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            core: Rc::new_cyclic(|weak| DatabaseCore {
                name,
                weak_self: weak.clone(),
                collections: RefCell::new(HashMap::new()),
                views: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.core.name.clone()
    }

    /// Fetch a collection, lazily creating and registering it.
    pub fn collection(&self, name: &str) -> Collection {
        if let Some(existing) = self.core.collections.borrow().get(name) {
            return existing.clone();
        }
        let collection = Collection::new(name);
        collection.set_db(self.core.weak_self.clone());
        self.core
            .collections
            .borrow_mut()
            .insert(name.to_string(), collection.clone());
        collection
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.core.collections.borrow().contains_key(name)
    }

    /// Fetch a view, lazily constructing an unbound one registered to this
    /// database.
    pub fn view(&self, name: &str) -> View {
        if let Some(existing) = self.core.views.borrow().get(name) {
            return existing.clone();
        }
        let view = View::new(name, None, None);
        view.attach_db(self.core.weak_self.clone());
        self.core
            .views
            .borrow_mut()
            .insert(name.to_string(), view.clone());
        view
    }

    pub fn view_exists(&self, name: &str) -> bool {
        self.core.views.borrow().contains_key(name)
    }

    /// Snapshot listing of registered views.
    pub fn views(&self) -> Vec<ViewInfo> {
        self.core
            .views
            .borrow()
            .values()
            .map(|view| ViewInfo {
                name: view.name(),
                count: view.count(None).unwrap_or(0),
                linked: view.is_bound(),
            })
            .collect()
    }
}

impl DatabaseCore {
    pub(crate) fn view_exists(&self, name: &str) -> bool {
        self.views.borrow().contains_key(name)
    }

    pub(crate) fn register_view(&self, name: &str, view: &View) {
        self.views.borrow_mut().insert(name.to_string(), view.clone());
    }

    pub(crate) fn remove_view(&self, name: &str) {
        self.views.borrow_mut().remove(name);
    }

    pub(crate) fn remove_collection(&self, name: &str) {
        self.collections.borrow_mut().remove(name);
    }

    pub(crate) fn collection_if_exists(&self, name: &str) -> Option<Collection> {
        self.collections.borrow().get(name).cloned()
    }
}
