//! TypedRegistry - Handler の登録と管理
//!
//! 起動時に組み立て（mutable）、実行時は読み取りのみ（immutable）。
//! 実行時にロックは要らない。

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::payload::TaskPayload;
use crate::domain::TaskKind;

#[derive(Default)]
pub struct TypedRegistry {
    handlers: HashMap<TaskKind, Arc<dyn DynHandler>>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for task type '{0}' is already registered")]
    AlreadyRegistered(TaskKind),
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: TaskPayload, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&T::KIND) {
            return Err(RegistryError::AlreadyRegistered(T::KIND));
        }
        self.handlers
            .insert(T::KIND, Arc::new(TypedHandler::<T, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
