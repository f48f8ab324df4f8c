//! Scene graph consumed by the engine.
//!
//! A scene is an ordered list of objects with categorical attributes plus a
//! set of relationship tables (`relation → object → related objects`). Scenes
//! are immutable once loaded; the derived lookups below are built once at
//! construction and live as long as the scene.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ModelError;

/// Index of an object within its scene.
pub type ObjectId = u32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneObject {
    attributes: BTreeMap<String, String>,
}

impl SceneObject {
    pub fn new<K, V>(attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keep scalar JSON fields as categorical attributes; nested values
    /// (coordinates, bounding boxes) are not attributes.
    fn from_json(map: Map<String, Value>) -> Self {
        let mut attributes = BTreeMap::new();
        for (key, value) in map {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            attributes.insert(key, text);
        }
        Self { attributes }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RelationTable {
    name: String,
    related: Vec<Vec<ObjectId>>,
}

#[derive(Debug, Deserialize)]
struct SceneFile {
    #[serde(default, alias = "sound_filename", alias = "scene_filename")]
    image_filename: String,
    #[serde(default)]
    image_index: Option<u64>,
    #[serde(default)]
    split: Option<String>,
    objects: Vec<Map<String, Value>>,
    #[serde(default)]
    relationships: BTreeMap<String, Vec<Vec<ObjectId>>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "SceneFile")]
pub struct Scene {
    pub filename: String,
    pub index: Option<u64>,
    pub split: Option<String>,
    objects: Vec<SceneObject>,
    relations: Vec<RelationTable>,
    relation_index: BTreeMap<String, usize>,
    /// `(attribute, value) → objects`, in scene order.
    value_index: BTreeMap<(String, String), Vec<ObjectId>>,
}

impl TryFrom<SceneFile> for Scene {
    type Error = ModelError;

    fn try_from(file: SceneFile) -> Result<Self, Self::Error> {
        let objects = file.objects.into_iter().map(SceneObject::from_json).collect();
        let mut scene = Scene::new(file.image_filename, objects, file.relationships)?;
        scene.index = file.image_index;
        scene.split = file.split;
        Ok(scene)
    }
}

impl Scene {
    pub fn new(
        filename: impl Into<String>,
        objects: Vec<SceneObject>,
        relationships: impl IntoIterator<Item = (String, Vec<Vec<ObjectId>>)>,
    ) -> Result<Self, ModelError> {
        let filename = filename.into();
        let n = objects.len();

        let mut relations = Vec::new();
        let mut relation_index = BTreeMap::new();
        for (name, related) in relationships {
            if related.len() != n {
                return Err(ModelError::Scene {
                    scene: filename,
                    reason: format!(
                        "relationship `{name}` has {} rows for {n} objects",
                        related.len()
                    ),
                });
            }
            if let Some(bad) = related.iter().flatten().find(|&&id| id as usize >= n) {
                return Err(ModelError::Scene {
                    scene: filename,
                    reason: format!("relationship `{name}` refers to missing object {bad}"),
                });
            }
            relation_index.insert(name.clone(), relations.len());
            relations.push(RelationTable { name, related });
        }

        let mut value_index: BTreeMap<(String, String), Vec<ObjectId>> = BTreeMap::new();
        for (id, obj) in objects.iter().enumerate() {
            for (attr, value) in obj.attributes() {
                value_index
                    .entry((attr.to_string(), value.to_string()))
                    .or_default()
                    .push(id as ObjectId);
            }
        }

        Ok(Self {
            filename,
            index: None,
            split: None,
            objects,
            relations,
            relation_index,
            value_index,
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(id as usize)
    }

    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> {
        0..self.objects.len() as ObjectId
    }

    /// Relationship names in table order.
    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(|r| r.name.as_str())
    }

    pub fn has_relation(&self, relation: &str) -> bool {
        self.relation_index.contains_key(relation)
    }

    /// Objects related to `object` through `relation`; empty for unknown
    /// relations or objects.
    pub fn related(&self, relation: &str, object: ObjectId) -> &[ObjectId] {
        self.relation_index
            .get(relation)
            .and_then(|&i| self.relations[i].related.get(object as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Objects whose `attribute` equals `value`, in scene order.
    pub fn objects_with(&self, attribute: &str, value: &str) -> &[ObjectId] {
        self.value_index
            .get(&(attribute.to_string(), value.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of objects sharing `object`'s value of `group_attribute`.
    pub fn group_size(&self, group_attribute: &str, object: ObjectId) -> usize {
        self.object(object)
            .and_then(|o| o.get(group_attribute))
            .map(|value| self.objects_with(group_attribute, value).len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scene_file_and_builds_indices() {
        let scene = Scene::from_json_str(
            r#"{
                "sound_filename": "AQA_train_000007.wav",
                "split": "train",
                "objects": [
                    { "instrument": "piano", "loudness": "loud", "duration": 1200, "pos": [1, 2] },
                    { "instrument": "violin", "loudness": "quiet", "duration": 800 },
                    { "instrument": "piano", "loudness": "quiet", "duration": 900 }
                ],
                "relationships": {
                    "before": [[], [0], [0, 1]],
                    "after": [[1, 2], [2], []]
                }
            }"#,
        )
        .expect("scene");

        assert_eq!(scene.filename, "AQA_train_000007.wav");
        assert_eq!(scene.len(), 3);
        assert_eq!(scene.object(0).and_then(|o| o.get("duration")), Some("1200"));
        assert_eq!(scene.object(0).and_then(|o| o.get("pos")), None);
        assert_eq!(scene.objects_with("instrument", "piano"), &[0, 2]);
        assert_eq!(scene.related("after", 0), &[1, 2]);
        assert_eq!(scene.related("left", 0), &[] as &[ObjectId]);
        assert_eq!(scene.group_size("instrument", 1), 1);
        assert_eq!(scene.group_size("instrument", 2), 2);
        assert_eq!(scene.relation_names().collect::<Vec<_>>(), vec!["after", "before"]);
    }

    #[test]
    fn rejects_relationship_rows_out_of_range() {
        let err = Scene::new(
            "s",
            vec![SceneObject::new([("color", "red")])],
            [("left".to_string(), vec![vec![3]])],
        );
        assert!(matches!(err, Err(ModelError::Scene { .. })));
    }
}
