use std::path::Path;

use candle_core::{DType, Device};
use ner_export::{Error, Result};
use ner_export_models::{TracedModel, TRACED_MODEL_FILE};
use ner_export_tokenizers::{AutoTokenizer, Padding, Tokenizer};

use crate::classifier::{TokenClassifier, TokenizedText};
use crate::entities::{extract_entities, Entity, TokenClassificationOptions};
use crate::export::DEFAULT_MAX_LENGTH;
use crate::label_map::{LabelMap, LABEL_MAP_FILE};

/// A model exported into a directory, loaded back from the tokenizer files, `label_map.json` and
/// the traced model.
pub struct ExportedModel {
    tokenizer: Box<dyn Tokenizer>,
    label_map: LabelMap,
    traced: TracedModel,
    device: Device,
    max_length: usize,
}

impl ExportedModel {
    /// Loads an exported model.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory the model was exported to.
    /// * `device` - The device to run the traced model on.
    ///
    /// # Returns
    ///
    /// The `ExportedModel` instance.
    pub fn load<P: AsRef<Path>>(dir: P, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        let dir_str = dir
            .to_str()
            .ok_or_else(|| Error::msg(format!("Invalid path '{}'", dir.display())))?;
        let tokenizer = AutoTokenizer::from_pretrained(dir_str, None)?;
        let label_map = LabelMap::read(&dir.join(LABEL_MAP_FILE))?;
        let traced = TracedModel::load(dir.join(TRACED_MODEL_FILE), device)?;

        if traced.config().num_labels() != label_map.len() {
            return Err(Error::LabelMapParse(format!(
                "label map has {} labels but the traced model has {}",
                label_map.len(),
                traced.config().num_labels()
            )));
        }
        tracing::info!(
            "Loaded exported model from '{}' ({} labels, traced with {} tokens)",
            dir.display(),
            label_map.len(),
            traced.trace_seq_len()
        );

        Ok(Self {
            tokenizer,
            label_map,
            traced,
            device: device.clone(),
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// Sets the truncation length of the encoded sentences, special tokens included.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn get_max_length(&self) -> usize {
        self.max_length
    }

    pub fn get_label_map(&self) -> &LabelMap {
        &self.label_map
    }

    pub fn get_traced_model(&self) -> &TracedModel {
        &self.traced
    }

    /// Identifies the entities in a sentence.
    ///
    /// # Arguments
    ///
    /// * `text` - The input sentence.
    /// * `options` - Optional parameters of the prediction.
    ///
    /// # Returns
    ///
    /// The entities found in the sentence.
    pub fn predict(
        &mut self,
        text: &str,
        options: Option<TokenClassificationOptions>,
    ) -> Result<Vec<Entity>> {
        let options = options.unwrap_or_default();
        extract_entities(self, text, &options)
    }
}

impl TokenClassifier for ExportedModel {
    /// Encodes the sentence truncated to `max_length`. Sentences shorter than the example the
    /// model was traced with are padded up to the trace length.
    fn tokenize(&mut self, text: &str) -> Result<TokenizedText> {
        let subword_tokens = self.tokenizer.tokenize(text)?;
        let inputs = vec![text.to_string()];
        let mut encodings = self.tokenizer.encode(
            inputs.clone(),
            true,
            Some(Padding::Longest),
            Some(self.max_length),
        )?;

        let trace_seq_len = self.traced.trace_seq_len().min(self.max_length);
        if encodings.seq_len() < trace_seq_len {
            encodings = self.tokenizer.encode(
                inputs,
                true,
                Some(Padding::Fixed(trace_seq_len)),
                Some(self.max_length),
            )?;
        }
        TokenizedText::from_batch_encoding(text, subword_tokens, &encodings)
    }

    fn classify(&self, input: &TokenizedText) -> Result<Vec<Vec<f32>>> {
        let (input_ids, attention_mask) = input.to_tensors(&self.device)?;
        let logits = self.traced.forward(&input_ids, &attention_mask)?;
        Ok(logits.squeeze(0)?.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }

    fn label_of(&self, index: usize) -> Option<&str> {
        self.label_map.get(index)
    }

    fn num_labels(&self) -> usize {
        self.label_map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::ExportedModel;
    use crate::classifier::{PretrainedClassifier, TokenClassifier};
    use crate::entities::{AggregationStrategy, TokenClassificationOptions};
    use crate::export::{ExportOptions, Exporter};
    use crate::testing::{write_tiny_repo, LABELS};
    use candle_core::Device;

    fn export() -> (tempfile::TempDir, tempfile::TempDir) {
        let repo = tempfile::tempdir().unwrap();
        write_tiny_repo(repo.path());
        let out = tempfile::tempdir().unwrap();
        Exporter::new(
            ExportOptions {
                model_id: repo.path().to_str().unwrap().to_string(),
                output_dir: out.path().to_path_buf(),
                ..Default::default()
            },
            &Device::Cpu,
        )
        .run()
        .unwrap();
        (repo, out)
    }

    const LONG_TEXT: &str = "John works at Microsoft in Seattle john works in seattle";

    #[test]
    fn test_exported_model_matches_original() {
        let (repo, out) = export();
        let mut exported = ExportedModel::load(out.path(), &Device::Cpu).unwrap();
        let mut original =
            PretrainedClassifier::new(repo.path().to_str().unwrap(), &Device::Cpu, None, Some(128))
                .unwrap();
        assert_eq!(exported.num_labels(), LABELS.len());

        for text in ["John works at Microsoft in Seattle", LONG_TEXT] {
            let exported_input = exported.tokenize(text).unwrap();
            let original_input = original.tokenize(text).unwrap();
            assert_eq!(exported_input.input_ids, original_input.input_ids);
            assert_eq!(exported_input.subword_tokens, original_input.subword_tokens);

            let exported_logits = exported.classify(&exported_input).unwrap();
            let original_logits = original.classify(&original_input).unwrap();
            assert_eq!(exported_logits.len(), original_logits.len());
            for (e, o) in exported_logits
                .iter()
                .flatten()
                .zip(original_logits.iter().flatten())
            {
                assert!((e - o).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_longer_sentences_keep_every_subword() {
        let (_repo, out) = export();
        let mut exported = ExportedModel::load(out.path(), &Device::Cpu).unwrap();
        assert_eq!(exported.get_traced_model().trace_seq_len(), 9);

        let input = exported.tokenize(LONG_TEXT).unwrap();
        assert_eq!(input.subword_tokens.len(), 11);
        // [CLS] + 11 subwords + [SEP]
        assert_eq!(input.len(), 13);
        assert_eq!(input.tokens[9..12], ["works", "in", "seattle"]);
        assert_eq!(exported.classify(&input).unwrap().len(), 13);
    }

    #[test]
    fn test_max_length_truncates() {
        let (_repo, out) = export();
        let mut exported = ExportedModel::load(out.path(), &Device::Cpu)
            .unwrap()
            .with_max_length(6);

        let input = exported.tokenize(LONG_TEXT).unwrap();
        assert_eq!(input.len(), 6);
        assert_eq!(input.tokens.last().map(String::as_str), Some("[SEP]"));
    }

    #[test]
    fn test_predict_finds_every_word() {
        let (_repo, out) = export();
        let mut exported = ExportedModel::load(out.path(), &Device::Cpu).unwrap();

        let options = TokenClassificationOptions {
            aggregation_strategy: AggregationStrategy::First,
            ignore_labels: vec![],
        };
        let entities = exported.predict(LONG_TEXT, Some(options)).unwrap();
        let words: Vec<&str> = entities
            .iter()
            .flat_map(|entity| entity.get_word().split(' '))
            .collect();
        assert_eq!(
            words,
            vec![
                "John",
                "works",
                "at",
                "Microsoft",
                "in",
                "Seattle",
                "john",
                "works",
                "in",
                "seattle"
            ]
        );
        assert!(entities
            .iter()
            .all(|entity| LABELS.iter().any(|label| label.ends_with(entity.get_entity()))));
    }

    #[test]
    fn test_shorter_sentences_are_padded_to_trace_length() {
        let (_repo, out) = export();
        let mut exported = ExportedModel::load(out.path(), &Device::Cpu).unwrap();

        let input = exported.tokenize("John works").unwrap();
        assert_eq!(input.len(), 9);
        assert_eq!(input.attention_mask.iter().sum::<u32>(), 4);
        assert_eq!(exported.classify(&input).unwrap().len(), 9);
    }

    #[test]
    fn test_predict_skips_ignored_labels() {
        let (_repo, out) = export();
        let mut exported = ExportedModel::load(out.path(), &Device::Cpu).unwrap();

        let entities = exported
            .predict(
                "John works at Microsoft in Seattle",
                Some(TokenClassificationOptions {
                    aggregation_strategy: AggregationStrategy::First,
                    ..Default::default()
                }),
            )
            .unwrap();
        assert!(entities.iter().all(|entity| entity.get_entity() != "O"));
        assert!(entities
            .iter()
            .all(|entity| entity.get_start() < entity.get_end()));
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ExportedModel::load(dir.path(), &Device::Cpu).is_err());
    }
}
