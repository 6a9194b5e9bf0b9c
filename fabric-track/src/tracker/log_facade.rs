// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::Id;
use crate::tracker::{EntityManager, Track};

/// A tracker that forwards _log_ events to the [log](https://docs.rs/log)
/// facade.
///
/// The full entity name is used as the log target so that the installed
/// logger can apply its own filtering on top of the [`EntityManager`].
pub struct LogTracker {
    entity_manager: EntityManager,

    /// Full names of the entities seen so far.
    names: Mutex<HashMap<Id, String>>,
}

impl LogTracker {
    /// Create a new [`LogTracker`] with an [`EntityManager`].
    #[must_use]
    pub fn new(entity_manager: EntityManager) -> Self {
        Self {
            entity_manager,
            names: Mutex::new(HashMap::new()),
        }
    }
}

impl Track for LogTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_log_enabled_at_level(id, level) && level <= log::max_level()
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
        self.names.lock().insert(id, entity_name.to_string());
    }

    fn create(&self, created_by: Id, id: Id, name: &str) {
        log::trace!(target: name, "{created_by}: created {id}");
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        if let Some(name) = self.names.lock().remove(&id) {
            log::trace!(target: name.as_str(), "{destroyed_by}: destroyed {id}");
        }
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        match self.names.lock().get(&id) {
            Some(name) => log::log!(target: name.as_str(), level, "{msg}"),
            None => log::log!(level, "{id}: {msg}"),
        }
    }

    fn shutdown(&self) {
        log::logger().flush();
    }
}
