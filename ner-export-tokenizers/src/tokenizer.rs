use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use candle_core::{DType, Device, Tensor};
use ner_export::{bail, utils::FromPretrainedParameters, Error, Result};
use tokenizers::{
    AddedToken, PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer as CoreTokenizer,
    TruncationParams,
};

use crate::config::TokenizerConfig;
use crate::encoding::BatchEncoding;
use crate::from_pretrained::{
    from_pretrained, TokenizerInfo, SPECIAL_TOKENS_MAP_FILE, TOKENIZER_CONFIG_FILE,
    TOKENIZER_FILE, VOCAB_TXT_FILE,
};
use crate::tokenizers::bert::{BertTokenizer, BertTokenizerBuilder};

/// An enum containing the available padding configurations for the tokenizer.
#[derive(Debug, Clone)]
pub enum Padding {
    /// Pad to the longest sequence in the batch.
    Longest,
    /// Pad to the maximum length of the model.
    MaxLength,
    /// Pad to a specific length.
    Fixed(usize),
}

/// A thin wrapper around `tokenizers::Tokenizer` that provides additional functionality
/// for encoding sequences, saving the tokenizer files and automatically loading the tokenizer
/// from a Hugging Face Hub repository or a local directory.
pub trait Tokenizer: std::fmt::Debug {
    fn get_tokenizer(&self) -> &CoreTokenizer;

    fn get_tokenizer_mut(&mut self) -> &mut CoreTokenizer;

    /// Sets the padding and truncation used by the next calls to `encode`. `None` disables them.
    ///
    /// # Arguments
    ///
    /// * `padding` - An optional padding configuration.
    /// * `max_length` - An optional maximum number of tokens per sequence, special tokens
    ///   included.
    ///
    /// # Returns
    ///
    /// The configured tokenizer.
    fn configure(
        &mut self,
        padding: Option<Padding>,
        max_length: Option<usize>,
    ) -> Result<&CoreTokenizer> {
        let padding_params = match padding {
            Some(padding) => {
                let pad_token = self
                    .get_pad_token()
                    .ok_or_else(|| Error::MissingSpecialToken("pad_token".to_string()))?
                    .to_string();
                let pad_id = self
                    .get_pad_token_id()
                    .ok_or_else(|| Error::MissingSpecialTokenId("pad_token".to_string()))?;
                let strategy = match padding {
                    Padding::Longest => PaddingStrategy::BatchLongest,
                    Padding::MaxLength => PaddingStrategy::Fixed(self.get_max_length()),
                    Padding::Fixed(length) => PaddingStrategy::Fixed(length),
                };
                Some(PaddingParams {
                    strategy,
                    direction: self.get_padding_side(),
                    pad_to_multiple_of: None,
                    pad_id,
                    pad_type_id: 0,
                    pad_token,
                })
            }
            None => None,
        };
        let truncation_params = max_length.map(|max_length| TruncationParams {
            max_length,
            ..Default::default()
        });

        let tokenizer = self.get_tokenizer_mut();
        tokenizer.with_padding(padding_params);
        tokenizer
            .with_truncation(truncation_params)
            .map_err(|e| Error::TokenizerEncodingError(e.to_string()))?;
        Ok(tokenizer)
    }

    fn get_config(&self) -> &TokenizerConfig;
    fn get_tokenizer_class(&self) -> &str;
    fn get_padding_side(&self) -> PaddingDirection;
    fn get_max_length(&self) -> usize;
    fn get_cls_token(&self) -> Option<&str>;
    fn get_mask_token(&self) -> Option<&str>;
    fn get_pad_token(&self) -> Option<&str>;
    fn get_sep_token(&self) -> Option<&str>;
    fn get_unk_token(&self) -> Option<&str>;

    /// Get the token ID of a given token.
    ///
    /// # Arguments
    ///
    /// * `token` - A string slice representing the token.
    ///
    /// # Returns
    ///
    /// The token ID if the token exists in the tokenizer, `None` otherwise.
    fn get_token_id(&self, token: &str) -> Option<u32> {
        self.get_tokenizer().token_to_id(token)
    }

    fn get_cls_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_cls_token()?)
    }

    fn get_mask_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_mask_token()?)
    }

    fn get_pad_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_pad_token()?)
    }

    fn get_sep_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_sep_token()?)
    }

    fn get_unk_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_unk_token()?)
    }

    /// Splits a text into its subword tokens, without special tokens, padding or truncation.
    fn tokenize(&mut self, text: &str) -> Result<Vec<String>> {
        let encoding = self
            .configure(None, None)?
            .encode(text, false)
            .map_err(|e| Error::TokenizerEncodingError(e.to_string()))?;
        Ok(encoding.get_tokens().to_vec())
    }

    /// Encodes a list of sequences. The offsets of the encodings are expressed in characters.
    ///
    /// # Arguments
    ///
    /// * `inputs` - A list of sequences to encode.
    /// * `add_special_tokens` - A flag indicating if special tokens should be added.
    /// * `padding` - An optional padding configuration.
    /// * `max_length` - An optional truncation length.
    ///
    /// # Returns
    ///
    /// A `BatchEncoding` containing the encoded sequences.
    fn encode(
        &mut self,
        inputs: Vec<String>,
        add_special_tokens: bool,
        padding: Option<Padding>,
        max_length: Option<usize>,
    ) -> Result<BatchEncoding> {
        let tokenizer = self.configure(padding, max_length)?;

        let encodings = tokenizer
            .encode_batch_char_offsets(inputs, add_special_tokens)
            .map_err(|e| Error::TokenizerEncodingError(e.to_string()))?;

        let mut input_ids: Vec<Vec<u32>> = Vec::new();
        let mut token_type_ids: Vec<Vec<u32>> = Vec::new();
        let mut attention_mask: Vec<Vec<u32>> = Vec::new();

        for encoding in &encodings {
            input_ids.push(encoding.get_ids().to_vec());
            token_type_ids.push(encoding.get_type_ids().to_vec());
            attention_mask.push(encoding.get_attention_mask().to_vec());
        }

        let input_ids = Tensor::new(input_ids, &Device::Cpu)?;
        let token_type_ids = Tensor::new(token_type_ids, &Device::Cpu)?;
        let attention_mask = Tensor::new(attention_mask, &Device::Cpu)?.to_dtype(DType::U8)?;

        Ok(BatchEncoding::new(
            input_ids,
            token_type_ids,
            attention_mask,
            encodings,
        ))
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.get_tokenizer()
            .decode(ids, skip_special_tokens)
            .map_err(|e| Error::TokenizerEncodingError(e.to_string()))
    }

    /// Saves the files needed to load the tokenizer again into a directory: `tokenizer.json`,
    /// `vocab.txt`, `tokenizer_config.json` and `special_tokens_map.json`. The padding and
    /// truncation configured for encoding are not saved.
    ///
    /// # Arguments
    ///
    /// * `dir` - An existing directory.
    ///
    /// # Returns
    ///
    /// The paths of the written files.
    fn save_pretrained(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut tokenizer = self.get_tokenizer().clone();
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| Error::TokenizerEncodingError(e.to_string()))?;

        let tokenizer_file = dir.join(TOKENIZER_FILE);
        tokenizer.save(&tokenizer_file, true).map_err(Error::msg)?;

        let mut vocab: Vec<(String, u32)> = tokenizer.get_vocab(false).into_iter().collect();
        vocab.sort_by_key(|(_, id)| *id);
        let mut vocab_txt = String::new();
        for (token, _) in vocab {
            vocab_txt.push_str(&token);
            vocab_txt.push('\n');
        }
        let vocab_file = dir.join(VOCAB_TXT_FILE);
        std::fs::write(&vocab_file, vocab_txt)?;

        let mut config = self.get_config().clone();
        config.tokenizer_class = Some(self.get_tokenizer_class().to_string());
        config.model_max_length = Some(self.get_max_length());
        config.cls_token = self.get_cls_token().map(String::from);
        config.mask_token = self.get_mask_token().map(String::from);
        config.pad_token = self.get_pad_token().map(String::from);
        config.sep_token = self.get_sep_token().map(String::from);
        config.unk_token = self.get_unk_token().map(String::from);
        let config_file = dir.join(TOKENIZER_CONFIG_FILE);
        config.to_file(&config_file)?;

        let special_tokens_map: BTreeMap<&str, &str> = [
            ("cls_token", self.get_cls_token()),
            ("mask_token", self.get_mask_token()),
            ("pad_token", self.get_pad_token()),
            ("sep_token", self.get_sep_token()),
            ("unk_token", self.get_unk_token()),
        ]
        .into_iter()
        .filter_map(|(name, token)| token.map(|token| (name, token)))
        .collect();
        let special_tokens_map_file = dir.join(SPECIAL_TOKENS_MAP_FILE);
        std::fs::write(
            &special_tokens_map_file,
            serde_json::to_string_pretty(&special_tokens_map)?,
        )?;

        tracing::debug!("Saved tokenizer files into '{}'", dir.display());

        Ok(vec![
            tokenizer_file,
            vocab_file,
            config_file,
            special_tokens_map_file,
        ])
    }
}

/// A macro that implements the `Tokenizer` trait for a given tokenizer type.
#[macro_export]
macro_rules! impl_tokenizer {
    ($tokenizer_type:ty, $tokenizer_class:expr) => {
        impl Tokenizer for $tokenizer_type {
            fn get_tokenizer(&self) -> &CoreTokenizer {
                &self.tokenizer
            }

            fn get_tokenizer_mut(&mut self) -> &mut CoreTokenizer {
                &mut self.tokenizer
            }

            fn get_config(&self) -> &TokenizerConfig {
                &self.config
            }

            fn get_tokenizer_class(&self) -> &str {
                $tokenizer_class
            }

            fn get_padding_side(&self) -> PaddingDirection {
                self.padding_side
            }

            fn get_max_length(&self) -> usize {
                self.max_length
            }

            fn get_cls_token(&self) -> Option<&str> {
                self.cls_token.as_deref()
            }

            fn get_mask_token(&self) -> Option<&str> {
                self.mask_token.as_deref()
            }

            fn get_pad_token(&self) -> Option<&str> {
                self.pad_token.as_deref()
            }

            fn get_sep_token(&self) -> Option<&str> {
                self.sep_token.as_deref()
            }

            fn get_unk_token(&self) -> Option<&str> {
                self.unk_token.as_deref()
            }
        }
    };
}

/// A trait that defines the methods required to build a `Tokenizer`.
pub trait TokenizerBuilder<T: Tokenizer> {
    fn new(tokenizer_info: TokenizerInfo) -> Self;
    fn get_tokenizer_info(&self) -> &TokenizerInfo;

    /// Builds the tokenizer pipeline from the vocabulary when there is no `tokenizer.json`.
    fn build_tokenizer(&mut self) -> Result<CoreTokenizer>;

    fn build_with_tokenizer(&self, tokenizer: CoreTokenizer) -> Result<T>;

    fn build(&mut self) -> Result<T> {
        let tokenizer_info = self.get_tokenizer_info();

        let special_tokens: Vec<AddedToken> = tokenizer_info
            .special_tokens_map
            .as_ref()
            .map(|special_tokens_map| special_tokens_map.all())
            .unwrap_or_default();

        let added_tokens: Vec<AddedToken> = tokenizer_info
            .config
            .as_ref()
            .and_then(|config| config.added_tokens_decoder.as_ref())
            .map(|added_tokens_decoder| added_tokens_decoder.values().cloned().collect())
            .unwrap_or_default();

        let tokenizer_file_path = tokenizer_info.tokenizer_file_path.clone();

        // Try to build from `tokenizer.json`. Otherwise, build from `vocab.txt`
        let mut tokenizer = match tokenizer_file_path {
            Some(tokenizer_file_path) => {
                CoreTokenizer::from_file(tokenizer_file_path).map_err(Error::msg)?
            }
            None => self.build_tokenizer()?,
        };

        tokenizer.add_special_tokens(&special_tokens);
        tokenizer.add_tokens(&added_tokens);

        self.build_with_tokenizer(tokenizer)
    }
}

/// Allows to automatically load a tokenizer from a Hugging Face Hub repository or a local
/// directory.
#[derive(Debug)]
pub struct AutoTokenizer {}

/// Implement the `from_pretrained` method for the `AutoTokenizer` struct.
#[macro_export]
macro_rules! impl_auto_tokenizer_from_pretrained_method {
    ($auto_tokenizer_struct:ident, $(($tokenizer_class:pat, $tokenizer_struct:ident, $tokenizer_builder_struct:ident)), *) => {
        impl $auto_tokenizer_struct {
            pub fn from_pretrained<S: AsRef<str>>(
                repo_id: S,
                params: Option<FromPretrainedParameters>
            ) -> Result<Box<dyn Tokenizer>> {
                let tokenizer_info = from_pretrained(repo_id, params)?;

                match tokenizer_info.get_tokenizer_class() {
                    $(
                        $tokenizer_class => {
                            <$tokenizer_builder_struct as TokenizerBuilder<$tokenizer_struct>>::new(tokenizer_info)
                                .build()
                                .map(|tokenizer| Box::new(tokenizer) as Box<dyn Tokenizer>)
                        }
                    )*
                    tokenizer_class => bail!(format!("Could not determine tokenizer class (got '{}')", tokenizer_class)),
                }
            }
        }
    };
}

impl_auto_tokenizer_from_pretrained_method!(
    AutoTokenizer,
    (
        "BertTokenizer" | "BertTokenizerFast",
        BertTokenizer,
        BertTokenizerBuilder
    )
);

// Implement `from_pretrained` method for each tokenizer
#[macro_export]
macro_rules! impl_tokenizer_from_pretrained_method {
    ($tokenizer_struct:ident, $tokenizer_builder_struct:ident) => {
        impl $tokenizer_struct {
            pub fn from_pretrained<S: AsRef<str>>(
                repo_id: S,
                params: Option<FromPretrainedParameters>,
            ) -> Result<Box<dyn Tokenizer>> {
                let tokenizer_info = from_pretrained(repo_id, params)?;
                let tokenizer = $tokenizer_builder_struct::new(tokenizer_info).build()?;
                Ok(Box::new(tokenizer))
            }
        }
    };
}

impl_tokenizer_from_pretrained_method!(BertTokenizer, BertTokenizerBuilder);
