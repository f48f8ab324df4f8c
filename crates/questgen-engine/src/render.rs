//! Text Renderer.
//!
//! Turns an accepted instantiation's bindings into question text:
//!
//! 1. pick one of the template's text variants;
//! 2. substitute every bound placeholder, through a random synonym when the
//!    value has any, collapsing whitespace after each substitution;
//! 3. keep or drop each `[optional]` segment, leftmost first;
//! 4. strip "other"/"another" when paired placeholders name different things.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use questgen_model::{placeholders_in_text, Metadata, Synonyms, Template};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use tracing::debug;

use crate::config::RenderConfig;
use crate::error::EngineError;

fn optional_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([^\[\]]*)\]").expect("optional segment regex"))
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve `[bracketed]` segments left to right, keeping each one's content
/// with probability `keep_probability`.
pub fn resolve_optionals<R: Rng + ?Sized>(text: &str, keep_probability: f64, rng: &mut R) -> String {
    let mut out = text.to_string();
    while let Some(caps) = optional_pattern().captures(&out) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let replacement = if rng.gen_bool(keep_probability) {
            inner.as_str().to_string()
        } else {
            String::new()
        };
        let range = whole.range();
        out.replace_range(range, &replacement);
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct TextRenderer<'a> {
    metadata: &'a Metadata,
    synonyms: &'a Synonyms,
    config: &'a RenderConfig,
}

impl<'a> TextRenderer<'a> {
    pub fn new(metadata: &'a Metadata, synonyms: &'a Synonyms, config: &'a RenderConfig) -> Self {
        Self {
            metadata,
            synonyms,
            config,
        }
    }

    pub fn render<R: Rng + ?Sized>(
        &self,
        template: &Template,
        values: &BTreeMap<String, String>,
        rng: &mut R,
    ) -> Result<String, EngineError> {
        // A single variant draws nothing from `rng`.
        let mut text = match template.texts() {
            [only] => only.clone(),
            texts => texts.choose(rng).cloned().unwrap_or_default(),
        };

        for (placeholder, value) in values {
            let literal = match self.synonyms.alternatives(value) {
                Some(alternatives) => alternatives.choose(rng).unwrap_or(value),
                None => value,
            };
            text = collapse_whitespace(&text.replace(placeholder.as_str(), literal));
        }
        if let Some(unbound) = placeholders_in_text(&text).next() {
            return Err(EngineError::UnboundPlaceholder(unbound.to_string()));
        }

        let text = resolve_optionals(&text, self.config.optional_keep_probability, rng);
        let text = collapse_whitespace(&text);
        Ok(self.agree_other(text, values))
    }

    /// "other"/"another" presumes the compared objects share every specified
    /// attribute. Only applies when the bindings are exactly the paired
    /// placeholders of the agreement attributes.
    fn agree_other(&self, text: String, values: &BTreeMap<String, String>) -> String {
        if !text.contains(" other ") && !text.contains(" another ") {
            return text;
        }

        let mut pairs = Vec::new();
        for attribute in self.metadata.agreement_attributes() {
            let Ok(spec) = self.metadata.attribute(attribute) else {
                continue;
            };
            let first = spec.placeholder.clone();
            let second = format!("{}2>", first.trim_end_matches('>'));
            pairs.push((attribute, first, second));
        }
        let expected: BTreeSet<&str> = pairs
            .iter()
            .flat_map(|(_, a, b)| [a.as_str(), b.as_str()])
            .collect();
        let bound: BTreeSet<&str> = values.keys().map(String::as_str).collect();
        if expected != bound {
            return text;
        }

        let is_set = |attribute: &str, value: &str| {
            !value.is_empty() && value != self.metadata.unset_value(attribute)
        };
        let conflict = pairs.iter().find(|(attribute, a, b)| {
            match (values.get(a), values.get(b)) {
                (Some(x), Some(y)) => is_set(attribute, x) && is_set(attribute, y) && x != y,
                _ => false,
            }
        });
        let Some((_, a, b)) = conflict else {
            return text;
        };

        debug!(first = %a, second = %b, "dropping \"other\": paired values differ");
        text.replace(" other ", " ").replace(" another ", " a ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn metadata() -> Metadata {
        Metadata::from_json_value(json!({
            "attributes": {
                "color": { "placeholder": "<C>", "values": ["red", "blue"] },
                "shape": { "placeholder": "<S>", "values": ["cube", "sphere"], "null_value": "thing" }
            },
            "primary_attribute": "shape"
        }))
        .expect("metadata")
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn optionals_alternate_with_alternating_coins() {
        // StepRng(0, 2^63) yields 0, 2^63, 0, ... : keep, drop, keep.
        let mut rng = StepRng::new(0, 1 << 63);
        assert_eq!(resolve_optionals("Is [there] a cube?", 0.5, &mut rng), "Is there a cube?");
        assert_eq!(resolve_optionals("Is [there] a cube?", 0.5, &mut rng), "Is  a cube?");
        assert_eq!(resolve_optionals("[a] [b]", 0.5, &mut rng), "a ");
    }

    #[test]
    fn substitutes_and_collapses_unset_values() {
        let meta = metadata();
        let synonyms = Synonyms::default();
        let config = RenderConfig::default();
        let template = Template::from_json_value(json!({
            "text": ["How many <C> <S>s are there?"],
            "nodes": [
                { "type": "scene", "inputs": [] },
                { "type": "filter_count", "inputs": [0], "side_inputs": ["<C>", "<S>"] }
            ]
        }))
        .expect("template");

        let renderer = TextRenderer::new(&meta, &synonyms, &config);
        let mut rng = StdRng::seed_from_u64(1);
        let text = renderer
            .render(&template, &values(&[("<C>", ""), ("<S>", "cube")]), &mut rng)
            .expect("render");
        assert_eq!(text, "How many cubes are there?");
    }

    #[test]
    fn plain_single_variant_leaves_rng_untouched() {
        let meta = metadata();
        let synonyms = Synonyms::default();
        let config = RenderConfig::default();
        let template = Template::from_json_value(json!({
            "text": ["How many <S>s are there?"],
            "nodes": [
                { "type": "scene", "inputs": [] },
                { "type": "filter_count", "inputs": [0], "side_inputs": ["<S>"] }
            ]
        }))
        .expect("template");
        let renderer = TextRenderer::new(&meta, &synonyms, &config);

        let mut rng = StdRng::seed_from_u64(42);
        let text = renderer
            .render(&template, &values(&[("<S>", "sphere")]), &mut rng)
            .expect("render");
        assert_eq!(text, "How many spheres are there?");
        assert_eq!(rng.gen::<u64>(), StdRng::seed_from_u64(42).gen::<u64>());
    }

    #[test]
    fn synonyms_replace_values() {
        let meta = metadata();
        let synonyms: Synonyms = [("cube".to_string(), vec!["block".to_string()])]
            .into_iter()
            .collect();
        let config = RenderConfig::default();
        let template = Template::from_json_value(json!({
            "text": ["Is there a <S>?"],
            "nodes": [
                { "type": "scene", "inputs": [] },
                { "type": "filter_exist", "inputs": [0], "side_inputs": ["<S>"] }
            ]
        }))
        .expect("template");
        let renderer = TextRenderer::new(&meta, &synonyms, &config);
        let mut rng = StdRng::seed_from_u64(7);
        let text = renderer
            .render(&template, &values(&[("<S>", "cube")]), &mut rng)
            .expect("render");
        assert_eq!(text, "Is there a block?");
    }

    #[test]
    fn other_is_dropped_when_pairs_differ() {
        let meta = metadata();
        let synonyms = Synonyms::default();
        let config = RenderConfig::default();
        let renderer = TextRenderer::new(&meta, &synonyms, &config);

        let differ = values(&[("<C>", "red"), ("<C2>", "blue"), ("<S>", "cube"), ("<S2>", "cube")]);
        assert_eq!(
            renderer.agree_other("Is there another red cube?".into(), &differ),
            "Is there a red cube?"
        );

        let same = values(&[("<C>", "red"), ("<C2>", ""), ("<S>", "cube"), ("<S2>", "cube")]);
        assert_eq!(
            renderer.agree_other("Are there other cubes?".into(), &same),
            "Are there other cubes?"
        );

        // Not the paired shape: left alone.
        let partial = values(&[("<C>", "red"), ("<C2>", "blue")]);
        assert_eq!(
            renderer.agree_other("Is there another thing?".into(), &partial),
            "Is there another thing?"
        );
    }
}
