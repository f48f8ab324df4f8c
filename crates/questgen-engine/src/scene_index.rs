//! Per-scene cache of filter-option indexes.
//!
//! Indexes depend only on the scene and the attribute tuple, so one cache is
//! shared by every template instantiated on the scene. Drop it (or build a
//! new one) when moving to the next scene.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use questgen_model::{Metadata, PositionalAttribute, Scene};
use tracing::debug;

use crate::filter_options::FilterOptionIndex;

#[derive(Debug)]
pub struct SceneIndex<'s> {
    scene: &'s Scene,
    positional: Option<PositionalAttribute>,
    filter_indexes: RefCell<AHashMap<Vec<String>, Rc<FilterOptionIndex>>>,
}

impl<'s> SceneIndex<'s> {
    pub fn new(scene: &'s Scene, metadata: &Metadata) -> Self {
        Self {
            scene,
            positional: metadata.positional().cloned(),
            filter_indexes: RefCell::new(AHashMap::new()),
        }
    }

    pub fn scene(&self) -> &'s Scene {
        self.scene
    }

    /// Index for `attributes`, computed on first request.
    pub fn filter_index(&self, attributes: &[String]) -> Rc<FilterOptionIndex> {
        if let Some(index) = self.filter_indexes.borrow().get(attributes) {
            return Rc::clone(index);
        }
        let index = Rc::new(FilterOptionIndex::build(
            self.scene,
            attributes,
            self.positional.as_ref(),
        ));
        debug!(
            scene = %self.scene.filename,
            attributes = ?attributes,
            keys = index.len(),
            "built filter option index"
        );
        self.filter_indexes
            .borrow_mut()
            .insert(attributes.to_vec(), Rc::clone(&index));
        index
    }

    /// Number of attribute tuples indexed so far.
    pub fn cached_indexes(&self) -> usize {
        self.filter_indexes.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questgen_model::SceneObject;
    use serde_json::json;

    #[test]
    fn indexes_are_built_once_per_attribute_tuple() {
        let scene = Scene::new(
            "s",
            vec![SceneObject::new([("color", "red")])],
            Vec::new(),
        )
        .expect("scene");
        let meta = Metadata::from_json_value(json!({
            "attributes": { "color": { "placeholder": "<C>", "values": ["red"] } }
        }))
        .expect("metadata");

        let cache = SceneIndex::new(&scene, &meta);
        let attrs = vec!["color".to_string()];
        let first = cache.filter_index(&attrs);
        let second = cache.filter_index(&attrs);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(cache.cached_indexes(), 1);
    }
}
