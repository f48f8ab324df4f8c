//! Attribute and function metadata.
//!
//! The metadata file declares, for every attribute, its value domain and the
//! placeholder token templates use for it (`"color" → "<C>"`), and for every
//! primitive function its output type. A few optional fields describe the
//! dataset-specific attributes the engine treats specially:
//!
//! - `primary_attribute`: the attribute whose unset value is a visible token
//!   (`"thing"`) rather than the empty string, and whose wildcard is illegal
//!   unless a template opts in
//! - `relation_attribute`: the attribute whose values are relationship names
//! - `positional`: an attribute that orders objects within a group

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// Placeholder token used in templates, e.g. `<C>`.
    pub placeholder: String,
    /// Enumerated value domain.
    pub values: Vec<String>,
    /// Value bound to a placeholder when the attribute is left unspecified.
    #[serde(default)]
    pub null_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub side_inputs: Vec<String>,
    pub output: String,
}

/// An attribute tied 1:1 to a grouping attribute, e.g. "position among the
/// objects with the same instrument".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionalAttribute {
    pub attribute: String,
    pub group_attribute: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputType {
    Bool,
    Integer,
    Object,
    ObjectSet,
    /// Output is a value of the named attribute.
    Attribute(String),
}

impl OutputType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "bool" | "boolean" => OutputType::Bool,
            "integer" | "int" => OutputType::Integer,
            "object" | "Object" => OutputType::Object,
            "object_set" | "ObjectSet" => OutputType::ObjectSet,
            other => OutputType::Attribute(other.to_string()),
        }
    }
}

fn default_relation_attribute() -> String {
    "relation".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    dataset: Option<String>,
    attributes: BTreeMap<String, AttributeSpec>,
    #[serde(default)]
    functions: Vec<FunctionSpec>,
    #[serde(default)]
    primary_attribute: Option<String>,
    #[serde(default = "default_relation_attribute")]
    relation_attribute: String,
    #[serde(default)]
    positional: Option<PositionalAttribute>,
    #[serde(default)]
    agreement_attributes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "MetadataFile")]
pub struct Metadata {
    pub dataset: Option<String>,
    attributes: BTreeMap<String, AttributeSpec>,
    functions: Vec<FunctionSpec>,
    functions_by_name: HashMap<String, usize>,
    placeholder_to_attribute: HashMap<String, String>,
    primary_attribute: Option<String>,
    relation_attribute: String,
    positional: Option<PositionalAttribute>,
    agreement_attributes: Vec<String>,
}

impl TryFrom<MetadataFile> for Metadata {
    type Error = ModelError;

    fn try_from(file: MetadataFile) -> Result<Self, Self::Error> {
        let mut placeholder_to_attribute = HashMap::new();
        for (name, spec) in &file.attributes {
            if let Some(previous) =
                placeholder_to_attribute.insert(spec.placeholder.clone(), name.clone())
            {
                return Err(ModelError::Metadata(format!(
                    "placeholder {} is shared by `{previous}` and `{name}`",
                    spec.placeholder
                )));
            }
        }

        let known = |attr: &str| -> Result<(), ModelError> {
            if file.attributes.contains_key(attr) {
                Ok(())
            } else {
                Err(ModelError::UnknownAttribute(attr.to_string()))
            }
        };
        if let Some(primary) = &file.primary_attribute {
            known(primary)?;
        }
        if let Some(positional) = &file.positional {
            known(&positional.attribute)?;
            known(&positional.group_attribute)?;
        }
        for attr in &file.agreement_attributes {
            known(attr)?;
        }

        let functions_by_name = file
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        Ok(Metadata {
            dataset: file.dataset,
            attributes: file.attributes,
            functions: file.functions,
            functions_by_name,
            placeholder_to_attribute,
            primary_attribute: file.primary_attribute,
            relation_attribute: file.relation_attribute,
            positional: file.positional,
            agreement_attributes: file.agreement_attributes,
        })
    }
}

impl Metadata {
    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ModelError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeSpec)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn attribute(&self, name: &str) -> Result<&AttributeSpec, ModelError> {
        self.attributes
            .get(name)
            .ok_or_else(|| ModelError::UnknownAttribute(name.to_string()))
    }

    /// Value domain of an attribute.
    pub fn values(&self, name: &str) -> Result<&[String], ModelError> {
        Ok(&self.attribute(name)?.values)
    }

    /// Attribute named by a bare placeholder token such as `<C>`.
    pub fn attribute_for_placeholder(&self, token: &str) -> Option<&str> {
        self.placeholder_to_attribute.get(token).map(String::as_str)
    }

    /// The value a placeholder of this attribute holds when left unspecified.
    pub fn unset_value(&self, attribute: &str) -> &str {
        self.attributes
            .get(attribute)
            .map(|spec| spec.null_value.as_str())
            .unwrap_or("")
    }

    pub fn primary_attribute(&self) -> Option<&str> {
        self.primary_attribute.as_deref()
    }

    pub fn is_primary(&self, attribute: &str) -> bool {
        self.primary_attribute.as_deref() == Some(attribute)
    }

    pub fn relation_attribute(&self) -> &str {
        &self.relation_attribute
    }

    pub fn positional(&self) -> Option<&PositionalAttribute> {
        self.positional.as_ref()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions_by_name
            .get(name)
            .map(|&i| &self.functions[i])
    }

    pub fn output_type(&self, function: &str) -> Option<OutputType> {
        self.function(function).map(|f| OutputType::parse(&f.output))
    }

    /// Attributes whose paired placeholders (`<X>`, `<X2>`) decide whether
    /// "other"/"another" wording is grammatical.
    ///
    /// Defaults to the primary attribute followed by every attribute that is
    /// neither the relation nor the positional attribute.
    pub fn agreement_attributes(&self) -> Vec<&str> {
        if !self.agreement_attributes.is_empty() {
            return self.agreement_attributes.iter().map(String::as_str).collect();
        }
        let positional = self.positional.as_ref().map(|p| p.attribute.as_str());
        let mut out: Vec<&str> = self.primary_attribute.iter().map(String::as_str).collect();
        for name in self.attributes.keys() {
            let name = name.as_str();
            if name == self.relation_attribute
                || Some(name) == positional
                || self.is_primary(name)
            {
                continue;
            }
            out.push(name);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Metadata {
        Metadata::from_json_value(json!({
            "attributes": {
                "instrument": { "placeholder": "<I>", "values": ["piano", "violin"], "null_value": "thing" },
                "loudness": { "placeholder": "<L>", "values": ["quiet", "loud"] },
                "relation": { "placeholder": "<R>", "values": ["before", "after"] }
            },
            "functions": [
                { "name": "count", "inputs": ["ObjectSet"], "output": "integer" },
                { "name": "query_instrument", "inputs": ["Object"], "output": "instrument" }
            ],
            "primary_attribute": "instrument"
        }))
        .expect("metadata")
    }

    #[test]
    fn placeholders_resolve_to_attributes() {
        let meta = sample();
        assert_eq!(meta.attribute_for_placeholder("<I>"), Some("instrument"));
        assert_eq!(meta.attribute_for_placeholder("<Q>"), None);
    }

    #[test]
    fn unset_values_follow_null_value() {
        let meta = sample();
        assert_eq!(meta.unset_value("instrument"), "thing");
        assert_eq!(meta.unset_value("loudness"), "");
    }

    #[test]
    fn output_types_parse() {
        let meta = sample();
        assert_eq!(meta.output_type("count"), Some(OutputType::Integer));
        assert_eq!(
            meta.output_type("query_instrument"),
            Some(OutputType::Attribute("instrument".to_string()))
        );
        assert_eq!(
            meta.function("count").map(|f| f.inputs.as_slice()),
            Some(["ObjectSet".to_string()].as_slice())
        );
    }

    #[test]
    fn agreement_attributes_default_excludes_relation() {
        let meta = sample();
        assert_eq!(meta.agreement_attributes(), vec!["instrument", "loudness"]);
    }

    #[test]
    fn unknown_primary_attribute_is_rejected() {
        let err = Metadata::from_json_value(json!({
            "attributes": { "color": { "placeholder": "<C>", "values": ["red"] } },
            "primary_attribute": "shape"
        }));
        assert!(err.is_err());
    }
}
