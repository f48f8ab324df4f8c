//! Relate-Filter-Option Index.
//!
//! Layered on the filter-option index: for an anchor object, pairs every
//! relationship with every filter key and keeps the pairs whose related and
//! filtered objects intersect the way the requesting macro needs.

use std::collections::BTreeSet;

use questgen_model::ObjectId;
use rand::seq::SliceRandom;
use rand::Rng;
use roaring::RoaringBitmap;

use crate::filter_options::FilterKey;
use crate::scene_index::SceneIndex;

/// Which intersections a relate macro accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelateMode {
    /// Exactly one related object matches.
    Unique,
    /// More than one related object matches.
    NotUnique,
    All { include_zero: bool },
}

impl RelateMode {
    fn accepts(self, matches: u64) -> bool {
        match self {
            RelateMode::Unique => matches == 1,
            RelateMode::NotUnique => matches > 1,
            RelateMode::All { include_zero } => include_zero || matches > 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelateOption {
    pub relation: String,
    pub key: FilterKey,
    pub objects: RoaringBitmap,
    /// The relation selects every object the filter alone selects.
    pub trivial: bool,
}

/// Relationship/filter pairs for `anchor`, in index order.
///
/// Every non-trivial pair is kept. Trivial pairs are subsampled so they make
/// up about `trivial_fraction` of the result. Relationships with nothing
/// related to the anchor are skipped.
pub fn find_relate_filter_options<R: Rng + ?Sized>(
    anchor: ObjectId,
    scene_index: &SceneIndex<'_>,
    attributes: &[String],
    nullable: &[bool],
    mode: RelateMode,
    trivial_fraction: f64,
    rng: &mut R,
) -> Vec<RelateOption> {
    let (attributes, nullable): (Vec<String>, Vec<bool>) = attributes
        .iter()
        .zip(nullable)
        .filter(|(a, _)| !a.starts_with("relate"))
        .map(|(a, n)| (a.clone(), *n))
        .unzip();

    let scene = scene_index.scene();
    let index = scene_index.filter_index(&attributes);

    let mut options = Vec::new();
    for relation in scene.relation_names() {
        let related: RoaringBitmap = scene.related(relation, anchor).iter().copied().collect();
        if related.is_empty() {
            continue;
        }
        for (key, filtered) in index.options(&nullable) {
            let objects = &related & filtered;
            if !mode.accepts(objects.len()) {
                continue;
            }
            let trivial = objects == *filtered;
            options.push(RelateOption {
                relation: relation.to_string(),
                key: key.clone(),
                objects,
                trivial,
            });
        }
    }

    let non_trivial = options.iter().filter(|o| !o.trivial).count();
    let keep_trivial = trivial_quota(non_trivial, trivial_fraction);
    let mut trivial_positions: Vec<usize> = options
        .iter()
        .enumerate()
        .filter_map(|(i, o)| o.trivial.then_some(i))
        .collect();
    trivial_positions.shuffle(rng);
    let kept: BTreeSet<usize> = trivial_positions.into_iter().take(keep_trivial).collect();

    options
        .into_iter()
        .enumerate()
        .filter(|(i, o)| !o.trivial || kept.contains(i))
        .map(|(_, o)| o)
        .collect()
}

/// How many trivial pairs make them `fraction` of the final set.
fn trivial_quota(non_trivial: usize, fraction: f64) -> usize {
    (non_trivial as f64 * fraction / (1.0 - fraction)).round() as usize
}
