use proptest::prelude::*;
use questgen_engine::{
    add_empty_filter_options, find_filter_options, find_relate_filter_options, ConstraintValidator,
    Evaluation, FilterKey, FilterOptionIndex, RelateMode, SceneIndex, SearchState,
};
use questgen_model::{Metadata, Scene, SceneObject, Template};
use rand::rngs::StdRng;
use rand::SeedableRng;
use roaring::RoaringBitmap;
use serde_json::json;

const COLORS: [&str; 3] = ["red", "blue", "green"];
const SHAPES: [&str; 2] = ["cube", "sphere"];

fn metadata() -> Metadata {
    Metadata::from_json_value(json!({
        "attributes": {
            "color": { "placeholder": "<C>", "values": COLORS },
            "shape": { "placeholder": "<S>", "values": SHAPES },
            "relation": { "placeholder": "<R>", "values": ["left", "right"] }
        }
    }))
    .expect("metadata")
}

/// Objects from `(color, shape)` indices; `left` relates an object to every
/// earlier one, `right` to every later one.
fn scene_from(spec: &[(usize, usize)]) -> Scene {
    let n = spec.len() as u32;
    let objects = spec
        .iter()
        .map(|&(c, s)| SceneObject::new([("color", COLORS[c]), ("shape", SHAPES[s])]))
        .collect();
    let left: Vec<Vec<u32>> = (0..n).map(|i| (0..i).collect()).collect();
    let right: Vec<Vec<u32>> = (0..n).map(|i| (i + 1..n).collect()).collect();
    Scene::new(
        "generated",
        objects,
        [("left".to_string(), left), ("right".to_string(), right)],
    )
    .expect("scene")
}

fn attrs() -> Vec<String> {
    vec!["color".to_string(), "shape".to_string()]
}

fn scene_spec() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..COLORS.len(), 0..SHAPES.len()), 1..9)
}

proptest! {
    #[test]
    fn full_keys_partition_the_scene(spec in scene_spec()) {
        let scene = scene_from(&spec);
        let index = FilterOptionIndex::build(&scene, &attrs(), None);

        for id in scene.object_ids() {
            let homes = index
                .buckets()
                .iter()
                .filter(|(key, objects)| key.iter().all(Option::is_some) && objects.contains(id))
                .count();
            prop_assert_eq!(homes, 1);
        }

        let everything: RoaringBitmap = scene.object_ids().collect();
        let all_wildcards: FilterKey = vec![None, None];
        prop_assert_eq!(&index.buckets()[&all_wildcards], &everything);
    }

    #[test]
    fn unique_relate_options_match_one_object(spec in scene_spec(), seed in any::<u64>()) {
        let scene = scene_from(&spec);
        let meta = metadata();
        let scene_index = SceneIndex::new(&scene, &meta);
        let mut rng = StdRng::seed_from_u64(seed);

        for anchor in scene.object_ids() {
            let options = find_relate_filter_options(
                anchor,
                &scene_index,
                &attrs(),
                &[true, true],
                RelateMode::Unique,
                0.1,
                &mut rng,
            );
            for option in options {
                prop_assert_eq!(option.objects.len(), 1);
                prop_assert!(!option.objects.contains(anchor));
            }
        }
    }

    #[test]
    fn empty_options_never_exceed_cross_product(
        spec in scene_spec(),
        requested in 0usize..40,
        seed in any::<u64>(),
        color_nullable in any::<bool>(),
    ) {
        let scene = scene_from(&spec);
        let meta = metadata();
        let nullable = [color_nullable, false];
        let index = FilterOptionIndex::build(&scene, &attrs(), None);
        let candidates: RoaringBitmap = scene.object_ids().take(1).collect();
        let mut options = find_filter_options(&index, &candidates, &nullable);
        let before = options.len();

        let mut rng = StdRng::seed_from_u64(seed);
        let added = add_empty_filter_options(&mut options, &meta, &attrs(), &nullable, requested, &mut rng)
            .expect("known attributes");

        let cardinality = (COLORS.len() + usize::from(color_nullable)) * SHAPES.len();
        prop_assert!(options.len() <= cardinality);
        prop_assert!(added <= requested);
        prop_assert_eq!(options.len(), before + added);
    }

    #[test]
    fn neq_rejects_only_equal_bound_values(
        first in proptest::option::of(prop::sample::select(vec!["red", "blue", ""])),
        second in proptest::option::of(prop::sample::select(vec!["red", "blue", ""])),
    ) {
        let meta = metadata();
        let template = Template::from_json_value(json!({
            "text": ["Is the <C> thing the same as the <C2> thing?"],
            "nodes": [
                { "type": "scene", "inputs": [] },
                { "type": "filter_unique", "inputs": [0], "side_inputs": ["<C>"] },
                { "type": "filter_unique", "inputs": [0], "side_inputs": ["<C2>"] },
                { "type": "equal_object", "inputs": [1, 2] }
            ],
            "constraints": [{ "type": "NEQ", "params": ["<C>", "<C2>"] }]
        }))
        .expect("template");
        let bindings = template.bindings(&meta).expect("bindings");
        let validator = ConstraintValidator::new(&template, bindings, &meta);

        let root = SearchState::root("scene");
        let mut next = root.successor();
        if let Some(v) = first {
            next.bind("<C>", v);
        }
        if let Some(v) = second {
            next.bind("<C2>", v);
        }
        let state = next.finish(0);

        let rejected = !validator.validate(&state, &Evaluation::default());
        let both_equal = matches!((first, second), (Some(a), Some(b)) if a == b);
        prop_assert_eq!(rejected, both_equal);
    }
}
