use std::collections::BTreeMap;

use ner_export::{Error, Result};
use serde::{Deserialize, Serialize};
use tokenizers::AddedToken;

/// Tokenizer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_tokens_decoder: Option<BTreeMap<u32, AddedToken>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_up_tokenization_spaces: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cls_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_basic_tokenize: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_lower_case: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub never_split: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pad_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sep_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_accents: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenize_chinese_chars: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unk_token: Option<String>,
}

impl TokenizerConfig {
    /// Loads the tokenizer config from a `tokenizer_config.json` file.
    ///
    /// # Arguments
    ///
    /// * `file` - Path to the `tokenizer_config.json` file.
    ///
    /// # Returns
    ///
    /// The tokenizer configuration.
    pub fn from_file(file: std::path::PathBuf) -> Result<Self> {
        let config = std::fs::read_to_string(file)?;
        let tokenizer_config: TokenizerConfig =
            serde_json::from_str(&config).map_err(Error::wrap)?;
        Ok(tokenizer_config)
    }

    /// Writes the tokenizer config as pretty printed JSON.
    pub fn to_file(&self, file: &std::path::Path) -> Result<()> {
        let config = serde_json::to_string_pretty(self)?;
        std::fs::write(file, config)?;
        Ok(())
    }
}
