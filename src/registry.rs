//! Handler storage and the resolution cache.
//!
//! Grounded on circuits' `Manager.getHandlers` (tree walk + channel
//! filtering) and `_cache`/`_cache_needs_refresh` (a resolved handler list
//! per `(event, channel)` pair, invalidated only by the dispatcher thread via
//! `addHandler`/`removeHandler`/`registerChild`/`unregisterChild`).

use crate::component::{ComponentId, Tree};
use crate::handler::{sort_key, Handler, HandlerId};
use std::collections::HashMap;

#[derive(Default)]
pub struct Registry {
    handlers: HashMap<HandlerId, Handler>,
    /// Keyed by `(event name, channel)`; only ever populated/read from the
    /// dispatcher thread, so no lock is needed beyond the root mutex already
    /// guarding the rest of the manager's mutable state.
    cache: HashMap<(String, String), Vec<HandlerId>>,
    dirty: bool,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            handlers: HashMap::new(),
            cache: HashMap::new(),
            dirty: false,
        }
    }

    pub fn insert(&mut self, tree: &mut Tree, handler: Handler) -> HandlerId {
        let id = handler.id;
        let name = handler.name.clone();
        let is_global = handler.channel.as_deref() == Some("*");
        let component = handler.component;
        self.handlers.insert(id, handler);
        if let Some(node) = tree.get_mut(component) {
            node.add_handler(&name, id, is_global);
        }
        self.dirty = true;
        id
    }

    pub fn remove(&mut self, tree: &mut Tree, id: HandlerId) {
        if let Some(handler) = self.handlers.remove(&id) {
            if let Some(node) = tree.get_mut(handler.component) {
                node.remove_handler(id);
            }
        }
        self.dirty = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn get(&self, id: HandlerId) -> Option<&Handler> {
        self.handlers.get(&id)
    }

    /// Resolves, in priority order, the handlers that should run for
    /// `event_name` fired on `channel`. Consults the cache first; on a miss
    /// (or after the cache was invalidated) walks the whole tree from
    /// `root`, matching circuits' channel rule: a handler matches if its own
    /// channel is `"*"`, equals the event's channel, or the handler is a
    /// declared global.
    pub fn resolve(&mut self, tree: &Tree, root: ComponentId, event_name: &str, channel: &str) -> Vec<HandlerId> {
        if self.dirty {
            self.cache.clear();
            self.dirty = false;
        }
        let key = (event_name.to_string(), channel.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let mut matched: Vec<HandlerId> = Vec::new();
        for component in tree.walk(root) {
            let Some(node) = tree.get(component) else {
                continue;
            };
            let node_channel_matches = |h: &Handler| -> bool {
                match h.channel.as_deref() {
                    None => node.channel.as_deref() == Some(channel) || channel == "*",
                    Some("*") => true,
                    Some(c) => c == channel,
                }
            };
            for bucket_name in ["*", event_name] {
                if let Some(ids) = node.handlers.get(bucket_name) {
                    for id in ids {
                        if let Some(h) = self.handlers.get(id) {
                            if node_channel_matches(h) || node.globals.contains(id) {
                                matched.push(*id);
                            }
                        }
                    }
                }
            }
        }
        matched.sort_by_key(|id| self.handlers.get(id).map(sort_key));
        matched.dedup();
        self.cache.insert(key, matched.clone());
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerOutcome;
    use std::sync::Arc;

    fn dummy_handler(component: ComponentId, name: &str, priority: i32) -> Handler {
        Handler {
            id: HandlerId::next(),
            component,
            name: name.to_string(),
            channel: None,
            priority,
            filter: false,
            wants_event: true,
            func: Arc::new(|_, _| HandlerOutcome::None),
        }
    }

    #[test]
    fn resolves_handlers_sorted_by_priority() {
        let mut tree = Tree::new();
        let mut reg = Registry::new();
        let root = ComponentId::ROOT;
        tree.get_mut(root).unwrap().channel = Some("app".into());

        let low = dummy_handler(root, "ping", 0);
        let low_id = low.id;
        let high = dummy_handler(root, "ping", 10);
        let high_id = high.id;
        reg.insert(&mut tree, low);
        reg.insert(&mut tree, high);

        let resolved = reg.resolve(&tree, root, "ping", "app");
        assert_eq!(resolved, vec![high_id, low_id]);
    }

    #[test]
    fn cache_invalidated_on_new_handler() {
        let mut tree = Tree::new();
        let mut reg = Registry::new();
        let root = ComponentId::ROOT;
        tree.get_mut(root).unwrap().channel = Some("app".into());

        assert!(reg.resolve(&tree, root, "ping", "app").is_empty());
        let h = dummy_handler(root, "ping", 0);
        let id = h.id;
        reg.insert(&mut tree, h);
        assert_eq!(reg.resolve(&tree, root, "ping", "app"), vec![id]);
    }
}
