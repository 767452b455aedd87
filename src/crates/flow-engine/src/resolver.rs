//! `EngineResolver`: the `ExternalResolver` backing `frame.<name>` lookups
//! that `FlowState::ambient_bindings` doesn't already cover (§4.1's
//! identifier resolution order falls through local env, then this
//! resolver, before raising an unknown-identifier error).

use flow_core::env::ExternalResolver;
use flow_core::value::Value;
use flow_store::FrameStore;
use std::sync::Arc;

/// Exposes every frame in the backing [`FrameStore`] under `frame.<name>`,
/// so an expression like `frame.users` reads the whole table as a list of
/// row maps. Frames are read lazily on each resolve rather than snapshotted
/// up front, matching `FlowState::ambient_bindings`'s "always read live"
/// convention for `state`/`step`.
pub struct EngineResolver {
    store: Arc<dyn FrameStore>,
}

impl EngineResolver {
    pub fn new(store: Arc<dyn FrameStore>) -> Self {
        Self { store }
    }
}

impl ExternalResolver for EngineResolver {
    fn resolve(&self, name: &str) -> Option<Value> {
        let frame_name = name.strip_prefix("frame.")?;
        let rows = self.store.all(frame_name).ok()?;
        Some(Value::List(rows.into_iter().map(Value::from_map).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_store::InMemoryFrameStore;
    use indexmap::IndexMap;

    #[test]
    fn resolves_a_frame_by_name_as_a_list_of_rows() {
        let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
        store.ensure_frame("widgets");
        let mut row = IndexMap::new();
        row.insert("id".to_string(), Value::Int(1));
        store.insert("widgets", row).unwrap();

        let resolver = EngineResolver::new(store);
        let resolved = resolver.resolve("frame.widgets").expect("frame resolves");
        assert_eq!(resolved.as_list().map(<[_]>::len), Some(1));
    }

    #[test]
    fn ignores_identifiers_outside_the_frame_namespace() {
        let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
        let resolver = EngineResolver::new(store);
        assert!(resolver.resolve("state.foo").is_none());
    }
}
