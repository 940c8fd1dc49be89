//! Fixtures shared by the tests of the crate.

use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use ner_export::Result;
use ner_export_models::{BertForTokenClassification, PreTrainedModel};

use crate::classifier::{TokenClassifier, TokenizedText};

pub const LABELS: &[&str] = &["O", "B-PER", "I-PER", "B-ORG", "I-ORG", "B-LOC", "I-LOC"];

pub const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "john", "works", "at", "micro", "##soft", "in",
    "seattle",
];

/// A classifier with a fixed tokenization of "John works at Microsoft in Seattle" and one
/// confident prediction per position.
pub struct FakeClassifier {
    logits: Vec<Vec<f32>>,
}

impl FakeClassifier {
    pub fn new() -> Self {
        // [CLS] john works at micro ##soft in seattle [SEP]
        let predictions = [0, 1, 0, 0, 3, 4, 0, 5, 0];
        let logits = predictions
            .iter()
            .map(|&label| {
                let mut logits = vec![0f32; LABELS.len()];
                logits[label] = 5.0;
                logits
            })
            .collect();
        Self { logits }
    }

    /// Overrides the logit of `label` at `position`.
    pub fn with_prediction(mut self, position: usize, label: usize, logit: f32) -> Self {
        self.logits[position][label] = logit;
        self
    }
}

impl TokenClassifier for FakeClassifier {
    fn tokenize(&mut self, text: &str) -> Result<TokenizedText> {
        let tokens = [
            "[CLS]", "john", "works", "at", "micro", "##soft", "in", "seattle", "[SEP]",
        ];
        Ok(TokenizedText {
            text: text.to_string(),
            subword_tokens: tokens[1..tokens.len() - 1]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            input_ids: vec![2, 5, 6, 7, 8, 9, 10, 11, 3],
            attention_mask: vec![1; tokens.len()],
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            special_tokens_mask: vec![1, 0, 0, 0, 0, 0, 0, 0, 1],
            offsets: vec![
                (0, 0),
                (0, 4),
                (5, 10),
                (11, 13),
                (14, 19),
                (19, 23),
                (24, 26),
                (27, 34),
                (0, 0),
            ],
            word_ids: vec![
                None,
                Some(0),
                Some(1),
                Some(2),
                Some(3),
                Some(3),
                Some(4),
                Some(5),
                None,
            ],
        })
    }

    fn classify(&self, _input: &TokenizedText) -> Result<Vec<Vec<f32>>> {
        Ok(self.logits.clone())
    }

    fn label_of(&self, index: usize) -> Option<&str> {
        LABELS.get(index).copied()
    }

    fn num_labels(&self) -> usize {
        LABELS.len()
    }
}

/// Writes a tiny randomly initialized BERT token classification model and its tokenizer files
/// into `dir`, so it can be loaded as a local repository.
pub fn write_tiny_repo(dir: &Path) {
    let id2label: serde_json::Map<String, serde_json::Value> = LABELS
        .iter()
        .enumerate()
        .map(|(i, label)| (i.to_string(), serde_json::Value::from(*label)))
        .collect();
    let config = serde_json::json!({
        "model_type": "bert",
        "vocab_size": VOCAB.len(),
        "hidden_size": 8,
        "num_hidden_layers": 2,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "hidden_act": "gelu",
        "max_position_embeddings": 64,
        "type_vocab_size": 2,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "id2label": id2label,
    });

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    BertForTokenClassification::load(vb, config.clone()).unwrap();
    varmap.save(dir.join("model.safetensors")).unwrap();

    std::fs::write(dir.join("config.json"), config.to_string()).unwrap();
    std::fs::write(dir.join("vocab.txt"), VOCAB.join("\n")).unwrap();
    std::fs::write(
        dir.join("tokenizer_config.json"),
        r#"{"do_lower_case": true, "model_max_length": 64}"#,
    )
    .unwrap();
}
