use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{json, Value};

fn questgen_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_questgen"))
}

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string_pretty(value).expect("serialize")).expect("write fixture");
}

fn object(color: &str, shape: &str) -> Value {
    json!({ "color": color, "shape": shape, "pixel_coords": [10, 20, 3.5] })
}

/// Metadata, synonyms, one counting template and two scenes (2 and 3 objects).
fn fixture(dir: &Path) {
    write_json(
        &dir.join("metadata.json"),
        &json!({
            "attributes": {
                "color": { "placeholder": "<C>", "values": ["red", "blue"] },
                "shape": { "placeholder": "<S>", "values": ["cube", "sphere"], "null_value": "thing" }
            },
            "functions": [
                { "name": "scene", "output": "object_set" },
                { "name": "count", "inputs": ["ObjectSet"], "output": "integer" }
            ],
            "primary_attribute": "shape"
        }),
    );
    write_json(&dir.join("synonyms.json"), &json!({ "thing": ["thing", "object"] }));

    let templates = dir.join("templates");
    fs::create_dir_all(&templates).expect("create template dir");
    write_json(
        &templates.join("counting.json"),
        &json!([{
            "text": ["How many things are there?"],
            "nodes": [
                { "type": "scene", "inputs": [] },
                { "type": "count", "inputs": [0] }
            ]
        }]),
    );

    write_json(
        &dir.join("scenes.json"),
        &json!({
            "info": { "split": "test", "version": "1.0" },
            "scenes": [
                {
                    "image_filename": "CLEVR_test_000000.png",
                    "objects": [object("red", "cube"), object("blue", "sphere")],
                    "relationships": { "left": [[], [0]], "right": [[1], []] }
                },
                {
                    "image_filename": "CLEVR_test_000001.png",
                    "objects": [object("red", "cube"), object("blue", "cube"), object("red", "sphere")],
                    "relationships": { "left": [[], [0], [0, 1]], "right": [[1, 2], [2], []] }
                }
            ]
        }),
    );
}

fn base_command(dir: &Path, out: &Path) -> Command {
    let mut cmd = Command::new(questgen_bin());
    cmd.arg("--input-scene-file")
        .arg(dir.join("scenes.json"))
        .arg("--metadata-file")
        .arg(dir.join("metadata.json"))
        .arg("--synonyms-json")
        .arg(dir.join("synonyms.json"))
        .arg("--template-dir")
        .arg(dir.join("templates"))
        .arg("--output-questions-file")
        .arg(out)
        .env_remove("RUST_LOG");
    cmd
}

fn read_output(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read output")).expect("parse output")
}

#[test]
fn generates_one_question_per_scene() {
    let dir = tempfile::tempdir().expect("tempdir");
    fixture(dir.path());
    let out = dir.path().join("out/questions.json");

    let status = base_command(dir.path(), &out)
        .arg("--seed")
        .arg("7")
        .status()
        .expect("run questgen");
    assert!(status.success(), "questgen should succeed");

    let written = read_output(&out);
    assert_eq!(written["info"]["split"], "test");

    let questions = written["questions"].as_array().expect("questions array");
    assert_eq!(questions.len(), 2);
    for (i, q) in questions.iter().enumerate() {
        assert_eq!(q["question"], "How many things are there?");
        assert_eq!(q["question_index"], i);
        assert_eq!(q["image_index"], i);
        assert_eq!(q["split"], "test");
        assert_eq!(q["template_filename"], "counting.json");
        assert_eq!(q["question_family_index"], 0);
        assert_eq!(q["program"][0], json!({ "type": "scene", "inputs": [], "value_inputs": [] }));
        assert_eq!(q["program"][1]["type"], "count");
    }
    assert_eq!(questions[0]["image"], "CLEVR_test_000000");
    assert_eq!(questions[0]["answer"], 2);
    assert_eq!(questions[1]["answer"], 3);
}

#[test]
fn scene_window_and_broken_templates() {
    let dir = tempfile::tempdir().expect("tempdir");
    fixture(dir.path());
    fs::write(dir.path().join("templates/zz_broken.json"), "[{").expect("write broken");
    let out = dir.path().join("questions.json");

    let status = base_command(dir.path(), &out)
        .args(["--scene-start-idx", "1", "--num-scenes", "1"])
        .status()
        .expect("run questgen");
    assert!(status.success(), "a broken template file is skipped, not fatal");

    let written = read_output(&out);
    let questions = written["questions"].as_array().expect("questions array");
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0]["image_filename"], "CLEVR_test_000001.png");
    assert_eq!(questions[0]["answer"], 3);
}

#[test]
fn missing_metadata_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    fixture(dir.path());
    fs::remove_file(dir.path().join("metadata.json")).expect("remove metadata");
    let out = dir.path().join("questions.json");

    let status = base_command(dir.path(), &out).status().expect("run questgen");
    assert!(!status.success());
    assert!(!out.exists());
}

#[test]
fn invalid_engine_config_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    fixture(dir.path());
    write_json(
        &dir.path().join("config.json"),
        &json!({ "relate": { "trivial_fraction": 1.5 } }),
    );
    let out = dir.path().join("questions.json");

    let status = base_command(dir.path(), &out)
        .arg("--config")
        .arg(dir.path().join("config.json"))
        .status()
        .expect("run questgen");
    assert!(!status.success());
}
