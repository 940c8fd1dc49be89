use candle_core::{DType, Device, Tensor};
use ner_export::{Error, FromPretrainedParameters, Result};
use ner_export_models::{
    from_pretrained, AutoModelForTokenClassification, ForwardParams, PreTrainedModel,
};
use ner_export_tokenizers::{AutoTokenizer, BatchEncoding, Padding, Tokenizer};

use crate::label_map::LabelMap;

/// A sentence encoded for token classification.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedText {
    /// The original sentence.
    pub text: String,
    /// The subword tokens of the sentence, without special tokens.
    pub subword_tokens: Vec<String>,
    /// The ids of every encoded position, special tokens and padding included.
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// The token of every encoded position.
    pub tokens: Vec<String>,
    /// `1` for the positions holding special tokens or padding.
    pub special_tokens_mask: Vec<u32>,
    /// Character offsets of every position into `text`.
    pub offsets: Vec<(usize, usize)>,
    /// The index of the word every position belongs to.
    pub word_ids: Vec<Option<u32>>,
}

impl TokenizedText {
    /// Builds a `TokenizedText` from the first encoding of a batch.
    pub fn from_batch_encoding(
        text: &str,
        subword_tokens: Vec<String>,
        encodings: &BatchEncoding,
    ) -> Result<Self> {
        let encoding = encodings
            .get_encodings()
            .first()
            .ok_or_else(|| Error::TokenizerEncodingError("empty batch".to_string()))?;
        Ok(Self {
            text: text.to_string(),
            subword_tokens,
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
            tokens: encoding.get_tokens().to_vec(),
            special_tokens_mask: encoding.get_special_tokens_mask().to_vec(),
            offsets: encoding.get_offsets().to_vec(),
            word_ids: encoding.get_word_ids().to_vec(),
        })
    }

    /// The number of encoded positions.
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Returns the input ids and attention mask as `(1, seq_len)` tensors.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let input_ids = Tensor::new(self.input_ids.as_slice(), device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(self.attention_mask.as_slice(), device)?
            .to_dtype(DType::U8)?
            .unsqueeze(0)?;
        Ok((input_ids, attention_mask))
    }
}

/// What the inference check and the entity extraction need from a token classification model.
pub trait TokenClassifier {
    /// Encodes a single sentence.
    fn tokenize(&mut self, text: &str) -> Result<TokenizedText>;

    /// Computes the logits of every encoded position, with shape `(seq_len, num_labels)`.
    fn classify(&self, input: &TokenizedText) -> Result<Vec<Vec<f32>>>;

    /// Gets the label of a class index.
    fn label_of(&self, index: usize) -> Option<&str>;

    fn num_labels(&self) -> usize;
}

/// A token classifier backed by a model and a tokenizer loaded from the Hugging Face Hub or a local
/// directory.
pub struct PretrainedClassifier {
    model: Box<dyn PreTrainedModel>,
    tokenizer: Box<dyn Tokenizer>,
    label_map: LabelMap,
    device: Device,
    max_length: Option<usize>,
}

impl PretrainedClassifier {
    /// Loads the tokenizer and the token classification model.
    ///
    /// # Arguments
    ///
    /// * `identifier` - The repository id of the model or a local directory.
    /// * `device` - The device to run the model on.
    /// * `params` - Optional parameters to specify the revision and auth token.
    /// * `max_length` - Optional truncation length of the encoded sentences.
    ///
    /// # Returns
    ///
    /// The `PretrainedClassifier` instance.
    pub fn new<S: AsRef<str>>(
        identifier: S,
        device: &Device,
        params: Option<FromPretrainedParameters>,
        max_length: Option<usize>,
    ) -> Result<Self> {
        let identifier = identifier.as_ref();
        let tokenizer = AutoTokenizer::from_pretrained(identifier, params.clone())?;
        let model_info = from_pretrained(identifier, params)?;
        let model = AutoModelForTokenClassification::from_model_info(&model_info, device, None)?;
        let label_map = LabelMap::from_config(model.config())?;
        tracing::info!(
            "Loaded token classification model '{}' with {} labels",
            identifier,
            label_map.len()
        );
        Ok(Self {
            model,
            tokenizer,
            label_map,
            device: device.clone(),
            max_length,
        })
    }

    pub fn get_label_map(&self) -> &LabelMap {
        &self.label_map
    }
}

impl TokenClassifier for PretrainedClassifier {
    fn tokenize(&mut self, text: &str) -> Result<TokenizedText> {
        let subword_tokens = self.tokenizer.tokenize(text)?;
        let encodings = self.tokenizer.encode(
            vec![text.to_string()],
            true,
            Some(Padding::Longest),
            self.max_length,
        )?;
        TokenizedText::from_batch_encoding(text, subword_tokens, &encodings)
    }

    fn classify(&self, input: &TokenizedText) -> Result<Vec<Vec<f32>>> {
        let (input_ids, attention_mask) = input.to_tensors(&self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let logits = self.model.forward(ForwardParams::new(
            Some(&input_ids),
            Some(&attention_mask),
            Some(&token_type_ids),
        ))?;
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
    use super::{PretrainedClassifier, TokenClassifier};
    use crate::check::InferenceCheck;
    use crate::testing::{write_tiny_repo, LABELS};
    use candle_core::Device;

    #[test]
    fn test_check_with_local_repository() {
        let repo = tempfile::tempdir().unwrap();
        write_tiny_repo(repo.path());

        let mut classifier =
            PretrainedClassifier::new(repo.path().to_str().unwrap(), &Device::Cpu, None, Some(128))
                .unwrap();
        assert_eq!(classifier.num_labels(), LABELS.len());

        let input = classifier.tokenize("John works at Microsoft in Seattle").unwrap();
        assert_eq!(input.input_ids, vec![2, 5, 6, 7, 8, 9, 10, 11, 3]);
        assert_eq!(input.word_ids[4], input.word_ids[5]);

        let output = InferenceCheck::default().run(&mut classifier).unwrap();
        assert_eq!(output.tokens.len(), 7);
        assert_eq!(output.labels.len(), 9);
        assert!(output
            .labels
            .iter()
            .all(|label| LABELS.contains(&label.as_str())));
    }

    #[test]
    fn test_unresolvable_identifier() {
        let repo = tempfile::tempdir().unwrap();
        let result =
            PretrainedClassifier::new(repo.path().to_str().unwrap(), &Device::Cpu, None, None);
        assert!(result.is_err());
    }
}
