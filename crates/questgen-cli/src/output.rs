//! Output document: `{ "info": ..., "questions": [...] }`.

use anyhow::{anyhow, Result};
use questgen_engine::{Answer, GeneratedQuestion, ProgramNode};
use questgen_model::Scene;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct QuestionRecord {
    pub split: Option<String>,
    pub image_filename: String,
    pub image_index: Option<u64>,
    pub image: String,
    pub question: String,
    pub program: Vec<ProgramNode>,
    pub answer: Answer,
    pub template_filename: String,
    pub question_family_index: usize,
    pub question_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionFile {
    pub info: serde_json::Value,
    pub questions: Vec<QuestionRecord>,
}

impl QuestionFile {
    pub fn new(info: serde_json::Value) -> Self {
        Self {
            info,
            questions: Vec::new(),
        }
    }

    /// Append one generated question; `question_index` is its position in the file.
    pub fn push(
        &mut self,
        scene: &Scene,
        template_filename: &str,
        family_index: usize,
        question: GeneratedQuestion,
    ) {
        let split = self
            .info
            .get("split")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| scene.split.clone());
        let record = QuestionRecord {
            split,
            image_filename: scene.filename.clone(),
            image_index: scene.index.or_else(|| trailing_index(&scene.filename)),
            image: file_stem(&scene.filename).to_string(),
            question: question.text,
            program: question.program,
            answer: question.answer,
            template_filename: template_filename.to_string(),
            question_family_index: family_index,
            question_index: self.questions.len(),
        };
        self.questions.push(record);
    }
}

/// `CLEVR_val_000012.png` → `CLEVR_val_000012`.
fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

/// Number after the last `_` of the file stem: `CLEVR_val_000012.png` → 12.
fn trailing_index(filename: &str) -> Option<u64> {
    file_stem(filename).rsplit('_').next()?.parse().ok()
}

pub fn write_questions(path: &Path, file: &QuestionFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| anyhow!("failed to create {}: {e}", parent.display()))?;
    }
    let handle = fs::File::create(path)
        .map_err(|e| anyhow!("failed to create {}: {e}", path.display()))?;
    let mut writer = BufWriter::new(handle);
    serde_json::to_writer(&mut writer, file)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use questgen_model::SceneObject;
    use serde_json::json;

    #[test]
    fn image_index_comes_from_the_filename_suffix() {
        assert_eq!(trailing_index("CLEVR_val_000012.png"), Some(12));
        assert_eq!(trailing_index("scene_7"), Some(7));
        assert_eq!(trailing_index("no-digits.png"), None);
        assert_eq!(file_stem("CLEVR_val_000012.png"), "CLEVR_val_000012");
    }

    #[test]
    fn records_take_split_from_info_and_number_sequentially() {
        let scene = Scene::new(
            "CLEVR_train_000003.png",
            vec![SceneObject::new([("color", "red")])],
            Vec::new(),
        )
        .expect("scene");
        let mut file = QuestionFile::new(json!({ "split": "train" }));
        for family in [4, 2] {
            file.push(
                &scene,
                "compare.json",
                family,
                GeneratedQuestion {
                    text: "How many things?".to_string(),
                    program: vec![ProgramNode::new("scene", vec![])],
                    answer: Answer::Integer(1),
                },
            );
        }

        let rendered = serde_json::to_value(&file).expect("serialize");
        let second = &rendered["questions"][1];
        assert_eq!(second["split"], "train");
        assert_eq!(second["image_index"], 3);
        assert_eq!(second["image"], "CLEVR_train_000003");
        assert_eq!(second["question_family_index"], 2);
        assert_eq!(second["question_index"], 1);
        assert_eq!(second["answer"], 1);
        assert_eq!(second["program"][0]["type"], "scene");
        assert_eq!(second["program"][0]["value_inputs"], json!([]));
    }
}
