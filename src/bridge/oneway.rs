//! Oneway registry: which methods never produce a reply.
//!
//! Populated once from the handler at startup and immutable afterwards,
//! so lookups need no lock and the registry is shared freely across
//! threads.  If the handler cannot produce the list the registry stays
//! empty and every method is treated as two-way (fail-open).

use std::collections::HashSet;

use log::{error, info};

use crate::app::ports::HandlerAdapter;
use crate::runtime::RuntimeGuard;

#[derive(Debug, Clone, Default)]
pub struct OnewayRegistry {
    methods: HashSet<String>,
}

impl OnewayRegistry {
    /// Ask the handler for its oneway methods.
    pub fn load(adapter: &dyn HandlerAdapter, guard: &RuntimeGuard<'_>) -> Self {
        match adapter.oneway_methods(guard) {
            Ok(names) => {
                let reg = Self::from_methods(names);
                info!("bridge: {} oneway methods registered", reg.len());
                reg
            }
            Err(e) => {
                error!("bridge: oneway_methods failed, treating all methods as two-way: {}", e);
                Self::default()
            }
        }
    }

    pub fn from_methods<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
