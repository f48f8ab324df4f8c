//! Filter-Option Index.
//!
//! For one scene and one ordered tuple of attributes, maps every attainable
//! masked attribute tuple to the objects matching it. A masked position is a
//! wildcard (`None`): "this attribute doesn't matter".
//!
//! With attributes `(color, shape)` and a scene holding a red cube and a blue
//! cube, the index contains:
//!
//! ```text
//! (red,  cube) -> {0}      (None, cube) -> {0, 1}
//! (blue, cube) -> {1}      (None, None) -> {0, 1}
//! (red,  None) -> {0}
//! (blue, None) -> {1}
//! ```
//!
//! The index is template-agnostic; wildcard pruning for attributes a template
//! does not allow to be left unspecified happens at lookup via [`FilterOptionIndex::options`].

use std::collections::{BTreeMap, BTreeSet};

use questgen_model::{Metadata, PositionalAttribute, Scene};
use rand::seq::SliceRandom;
use rand::Rng;
use roaring::RoaringBitmap;
use tracing::warn;

use crate::error::EngineError;

/// A masked attribute tuple; `None` is a wildcard.
pub type FilterKey = Vec<Option<String>>;

/// Collisions tolerated while drawing empty options before giving up.
const MAX_EMPTY_OPTION_COLLISIONS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOptionIndex {
    attributes: Vec<String>,
    buckets: BTreeMap<FilterKey, RoaringBitmap>,
}

impl FilterOptionIndex {
    /// Enumerate all `2^k` masks over the attribute positions and bucket every
    /// object under each of its masked keys.
    ///
    /// Objects missing an attribute, and objects alone in their group for the
    /// positional attribute, only appear under keys with a wildcard there.
    pub fn build(
        scene: &Scene,
        attributes: &[String],
        positional: Option<&PositionalAttribute>,
    ) -> Self {
        let k = attributes.len();
        let positional_slot = positional.and_then(|p| {
            attributes
                .iter()
                .position(|a| *a == p.attribute)
                .map(|slot| (slot, p.group_attribute.as_str()))
        });

        let mut buckets: BTreeMap<FilterKey, RoaringBitmap> = BTreeMap::new();
        for (id, object) in scene.object_ids().zip(scene.objects()) {
            let mut full: Vec<Option<&str>> =
                attributes.iter().map(|a| object.get(a)).collect();
            if let Some((slot, group)) = positional_slot {
                if scene.group_size(group, id) <= 1 {
                    full[slot] = None;
                }
            }

            for mask in 0u32..(1 << k) {
                let key: FilterKey = full
                    .iter()
                    .enumerate()
                    .map(|(j, v)| {
                        if mask & (1 << j) != 0 {
                            v.map(str::to_string)
                        } else {
                            None
                        }
                    })
                    .collect();
                buckets.entry(key).or_default().insert(id);
            }
        }

        Self {
            attributes: attributes.to_vec(),
            buckets,
        }
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Every key, including wildcards at positions no template may leave open.
    pub fn buckets(&self) -> &BTreeMap<FilterKey, RoaringBitmap> {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Keys legal for a template: wildcards only at positions where
    /// `nullable[i]` holds.
    pub fn options<'a>(
        &'a self,
        nullable: &'a [bool],
    ) -> impl Iterator<Item = (&'a FilterKey, &'a RoaringBitmap)> + 'a {
        self.buckets.iter().filter(move |(key, _)| {
            key.iter()
                .zip(nullable)
                .all(|(value, &may_be_unset)| value.is_some() || may_be_unset)
        })
    }
}

/// Intersect every legal bucket with `candidates`, keeping empty intersections
/// so callers can decide what to drop.
pub fn find_filter_options(
    index: &FilterOptionIndex,
    candidates: &RoaringBitmap,
    nullable: &[bool],
) -> BTreeMap<FilterKey, RoaringBitmap> {
    index
        .options(nullable)
        .map(|(key, objects)| (key.clone(), objects & candidates))
        .collect()
}

/// Add up to `count` random keys mapping to the empty set, drawn from the
/// attribute domains (plus the wildcard where nullable).
///
/// The map never grows beyond the cross-product of those domains; drawing
/// stops after repeated collisions with existing keys. Returns the number of
/// keys actually added.
pub fn add_empty_filter_options<R: Rng + ?Sized>(
    options: &mut BTreeMap<FilterKey, RoaringBitmap>,
    metadata: &Metadata,
    attributes: &[String],
    nullable: &[bool],
    count: usize,
    rng: &mut R,
) -> Result<usize, EngineError> {
    let mut domains: Vec<Vec<Option<String>>> = Vec::with_capacity(attributes.len());
    for (i, attribute) in attributes.iter().enumerate() {
        let values: BTreeSet<&String> = metadata.values(attribute)?.iter().collect();
        let mut domain: Vec<Option<String>> = values.into_iter().cloned().map(Some).collect();
        if nullable.get(i).copied().unwrap_or(false) {
            domain.push(None);
        }
        domains.push(domain);
    }

    let cardinality = domains
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(d.len()))
        .unwrap_or(usize::MAX);
    let target = options.len().saturating_add(count).min(cardinality);
    if domains.iter().any(Vec::is_empty) {
        return Ok(0);
    }

    let mut added = 0;
    let mut collisions = 0;
    while options.len() < target {
        let key: FilterKey = domains
            .iter()
            .map(|d| d.choose(&mut *rng).cloned().flatten())
            .collect();
        if options.contains_key(&key) {
            collisions += 1;
            if collisions > MAX_EMPTY_OPTION_COLLISIONS {
                warn!(
                    attributes = ?attributes,
                    added,
                    requested = count,
                    "reached the empty filter option collision bound"
                );
                break;
            }
            continue;
        }
        options.insert(key, RoaringBitmap::new());
        added += 1;
    }
    Ok(added)
}
