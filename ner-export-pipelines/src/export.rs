use std::{
    fs,
    path::{Path, PathBuf},
};

use candle_core::Device;
use ner_export::{Error, FromPretrainedParameters, Result};
use ner_export_models::{from_pretrained, PretrainedConfig, TracedModel, TRACED_MODEL_FILE};
use ner_export_tokenizers::{AutoTokenizer, Padding};

use crate::check::DEFAULT_CHECK_TEXT;
use crate::label_map::{LabelMap, LABEL_MAP_FILE};

pub const DEFAULT_MODEL_ID: &str = "dslim/bert-base-NER";
pub const DEFAULT_OUTPUT_DIR: &str = "exported_model";
pub const DEFAULT_MAX_LENGTH: usize = 128;

/// Options of an export.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// The repository id of the model or a local directory.
    pub model_id: String,
    /// The directory the artifacts are written to. It's created if it doesn't exist.
    pub output_dir: PathBuf,
    /// The example sentence the model is traced with.
    pub text: String,
    /// Truncation length of the example sentence.
    pub max_length: usize,
    pub params: Option<FromPretrainedParameters>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            text: DEFAULT_CHECK_TEXT.to_string(),
            max_length: DEFAULT_MAX_LENGTH,
            params: None,
        }
    }
}

/// What an export produced.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub output_dir: PathBuf,
    /// Every file written, in order.
    pub files: Vec<PathBuf>,
    pub num_labels: usize,
    /// The sequence length the traced model is specialized to.
    pub trace_seq_len: usize,
}

/// Exports a token classification model and its tokenizer into a directory that can be loaded
/// without access to the Hugging Face Hub.
pub struct Exporter {
    options: ExportOptions,
    device: Device,
}

impl Exporter {
    pub fn new(options: ExportOptions, device: &Device) -> Self {
        Self {
            options,
            device: device.clone(),
        }
    }

    pub fn get_options(&self) -> &ExportOptions {
        &self.options
    }

    /// Runs the export. Everything is loaded and traced before the output directory is created,
    /// so a model that can't be loaded leaves nothing behind.
    ///
    /// # Returns
    ///
    /// The `ExportReport` of the written artifacts.
    pub fn run(&self) -> Result<ExportReport> {
        let options = &self.options;

        tracing::info!("Loading tokenizer from '{}'", options.model_id);
        let mut tokenizer =
            AutoTokenizer::from_pretrained(&options.model_id, options.params.clone())?;

        tracing::info!("Loading model from '{}'", options.model_id);
        let model_info = from_pretrained(&options.model_id, options.params.clone())?;
        let config: PretrainedConfig =
            serde_json::from_value(model_info.require_config()?.clone())?;
        let label_map = LabelMap::from_config(&config)?;

        let encodings = tokenizer.encode(
            vec![options.text.clone()],
            true,
            Some(Padding::Longest),
            Some(options.max_length),
        )?;
        let traced = TracedModel::trace(
            &model_info,
            encodings.get_input_ids(),
            encodings.get_attention_mask(),
            &self.device,
        )?;
        let (_, _, num_outputs) = traced.get_reference_logits().dims3()?;
        if num_outputs != label_map.len() {
            return Err(Error::LabelMapParse(format!(
                "label map has {} labels but the model outputs {} classes",
                label_map.len(),
                num_outputs
            )));
        }
        tracing::info!(
            "Traced model with an example of {} tokens",
            traced.trace_seq_len()
        );

        let output_dir = options.output_dir.as_path();
        fs::create_dir_all(output_dir)?;

        let mut files = tokenizer.save_pretrained(output_dir)?;
        for file in &files {
            tracing::info!("Saved '{}'", file.display());
        }
        files.push(self.write(output_dir, LABEL_MAP_FILE, |path| label_map.write(path))?);
        files.push(self.write(output_dir, TRACED_MODEL_FILE, |path| traced.save(path))?);

        tracing::info!("Model exported successfully!");

        Ok(ExportReport {
            output_dir: output_dir.to_path_buf(),
            files,
            num_labels: label_map.len(),
            trace_seq_len: traced.trace_seq_len(),
        })
    }

    fn write<F>(&self, dir: &Path, file_name: &str, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let path = dir.join(file_name);
        write(&path)?;
        tracing::info!("Saved '{}'", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::{ExportOptions, Exporter};
    use crate::label_map::LabelMap;
    use crate::testing::{write_tiny_repo, LABELS};
    use candle_core::Device;
    use ner_export_models::TracedModel;

    fn options(repo: &std::path::Path, output_dir: &std::path::Path) -> ExportOptions {
        ExportOptions {
            model_id: repo.to_str().unwrap().to_string(),
            output_dir: output_dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_export_writes_artifacts() {
        let repo = tempfile::tempdir().unwrap();
        write_tiny_repo(repo.path());
        let out = tempfile::tempdir().unwrap();
        let output_dir = out.path().join("exported_model");

        let report = Exporter::new(options(repo.path(), &output_dir), &Device::Cpu)
            .run()
            .unwrap();

        for file_name in [
            "vocab.txt",
            "tokenizer.json",
            "tokenizer_config.json",
            "special_tokens_map.json",
            "label_map.json",
            "traced_model.pt",
        ] {
            assert!(output_dir.join(file_name).is_file(), "missing {file_name}");
        }
        assert_eq!(report.files.len(), 6);
        assert_eq!(report.num_labels, LABELS.len());
        // [CLS] john works at micro ##soft in seattle [SEP]
        assert_eq!(report.trace_seq_len, 9);

        let label_map = LabelMap::read(&output_dir.join("label_map.json")).unwrap();
        assert_eq!(label_map.get(3), Some("B-ORG"));

        let traced =
            TracedModel::load(output_dir.join("traced_model.pt"), &Device::Cpu).unwrap();
        assert!(traced.verify(1e-4).is_ok());
    }

    #[test]
    fn test_export_is_idempotent() {
        let repo = tempfile::tempdir().unwrap();
        write_tiny_repo(repo.path());
        let out = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(options(repo.path(), out.path()), &Device::Cpu);

        exporter.run().unwrap();
        let first = std::fs::read(out.path().join("label_map.json")).unwrap();
        exporter.run().unwrap();
        let second = std::fs::read(out.path().join("label_map.json")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unresolvable_model_creates_no_output() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let output_dir = out.path().join("exported_model");

        let result = Exporter::new(options(repo.path(), &output_dir), &Device::Cpu).run();
        assert!(result.is_err());
        assert!(!output_dir.exists());
    }
}
