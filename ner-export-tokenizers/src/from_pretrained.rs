use std::{collections::HashMap, fs, path::PathBuf};

use lazy_static::lazy_static;
use ner_export::{
    get_repo,
    utils::{load_model_config, FromPretrainedParameters, MODEL_CONFIG_FILE},
    Result,
};
use serde::{Deserialize, Deserializer};
use tokenizers::{models::bpe::Vocab, AddedToken};

use crate::config::TokenizerConfig;

pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const VOCAB_TXT_FILE: &str = "vocab.txt";
pub const SPECIAL_TOKENS_MAP_FILE: &str = "special_tokens_map.json";

lazy_static! {
    static ref MODEL_TYPE_TO_TOKENIZER_CLASS: HashMap<String, String> = {
        let mut map = HashMap::new();
        map.insert("bert".to_string(), "BertTokenizer".to_string());
        map
    };
    static ref IGNORE_TOKENIZER_CLASSES: Vec<&'static str> = vec!["PreTrainedTokenizerFast"];
}

/// The special tokens a tokenizer can declare.
#[derive(Debug, Clone, Copy)]
pub enum SpecialTokenName {
    Cls,
    Mask,
    Pad,
    Sep,
    Unk,
}

/// Wraps an `AddedToken` so it can be deserialized either from a plain string or from the full
/// object representation.
#[derive(Debug)]
struct AddedTokenWithDefaults {
    added_token: AddedToken,
}

fn deserialize_special_token<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<AddedTokenWithDefaults>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(|v| match v {
        serde_json::Value::String(s) => Some(AddedTokenWithDefaults {
            added_token: AddedToken::from(s, true),
        }),
        v => serde_json::from_value::<AddedToken>(v)
            .ok()
            .map(|added_token| AddedTokenWithDefaults { added_token }),
    })
}

/// Representation of the `special_tokens_map.json` file.
#[derive(Debug, Deserialize)]
pub struct SpecialTokensMap {
    #[serde(deserialize_with = "deserialize_special_token", default)]
    cls_token: Option<AddedTokenWithDefaults>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    mask_token: Option<AddedTokenWithDefaults>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    pad_token: Option<AddedTokenWithDefaults>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    sep_token: Option<AddedTokenWithDefaults>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    unk_token: Option<AddedTokenWithDefaults>,
}

impl SpecialTokensMap {
    pub fn get(&self, name: SpecialTokenName) -> Option<&AddedToken> {
        let token = match name {
            SpecialTokenName::Cls => &self.cls_token,
            SpecialTokenName::Mask => &self.mask_token,
            SpecialTokenName::Pad => &self.pad_token,
            SpecialTokenName::Sep => &self.sep_token,
            SpecialTokenName::Unk => &self.unk_token,
        };
        token.as_ref().map(|t| &t.added_token)
    }

    /// Gets all the declared special tokens.
    pub fn all(&self) -> Vec<AddedToken> {
        [
            SpecialTokenName::Cls,
            SpecialTokenName::Mask,
            SpecialTokenName::Pad,
            SpecialTokenName::Sep,
            SpecialTokenName::Unk,
        ]
        .into_iter()
        .filter_map(|name| self.get(name).cloned())
        .collect()
    }
}

/// A struct containing all the required information to load a tokenizer model.
#[derive(Debug)]
pub struct TokenizerInfo {
    /// The configuration of the tokenizer.
    pub config: Option<TokenizerConfig>,
    /// The configuration of the model.
    pub model_config: Option<serde_json::Value>,
    /// The path to the `tokenizer.json` file if it exists.
    pub tokenizer_file_path: Option<PathBuf>,
    /// The vocabulary of the tokenizer.
    pub vocab: Option<Vocab>,
    /// The special tokens of the tokenizer.
    pub special_tokens_map: Option<SpecialTokensMap>,
}

impl TokenizerInfo {
    pub fn get_config(&self) -> Option<&TokenizerConfig> {
        self.config.as_ref()
    }

    pub fn get_tokenizer_class(&self) -> &str {
        if let Some(tokenizer_class) = self
            .config
            .as_ref()
            .and_then(|config| config.tokenizer_class.as_deref())
        {
            if !IGNORE_TOKENIZER_CLASSES.contains(&tokenizer_class) {
                return tokenizer_class;
            }
        }

        if let Some(model_type) = self
            .model_config
            .as_ref()
            .and_then(|model_config| model_config["model_type"].as_str())
        {
            if let Some(tokenizer_class) = MODEL_TYPE_TO_TOKENIZER_CLASS.get(model_type) {
                return tokenizer_class;
            }
        }

        ""
    }

    /// Gets the `String` representation of a special token. It will first try to get the token from
    /// the special tokens map and if it doesn't exist, it will try to get it from the config file.
    ///
    /// # Arguments
    ///
    /// - `name` - The name of the special token.
    ///
    /// # Returns
    ///
    /// The `String` representation of the special token.
    pub fn get_special_token(&self, name: SpecialTokenName) -> Option<String> {
        if let Some(token) = self
            .special_tokens_map
            .as_ref()
            .and_then(|special_tokens_map| special_tokens_map.get(name))
        {
            return Some(token.content.clone());
        }

        let config = self.config.as_ref()?;
        let token = match name {
            SpecialTokenName::Cls => &config.cls_token,
            SpecialTokenName::Mask => &config.mask_token,
            SpecialTokenName::Pad => &config.pad_token,
            SpecialTokenName::Sep => &config.sep_token,
            SpecialTokenName::Unk => &config.unk_token,
        };
        token.clone()
    }
}

/// Loads the vocabulary of the tokenizer model from a text file with one token per line.
///
/// # Arguments
///
/// - `file_path` - The path to the vocabulary file.
///
/// # Returns
///
/// The vocabulary as a `HashMap` where the key is the token and the value is the index.
pub fn load_vocab_txt(file_path: PathBuf) -> Result<Vocab> {
    let vocab = fs::read_to_string(file_path)?.lines().enumerate().fold(
        Vocab::new(),
        |mut map, (idx, line)| {
            map.insert(line.to_string(), idx as u32);
            map
        },
    );
    Ok(vocab)
}

/// Loads the special tokens map of the tokenizer model from a JSON file.
pub fn load_special_tokens_map(file_path: PathBuf) -> Result<SpecialTokensMap> {
    let special_tokens_map = fs::read_to_string(file_path)?;
    let special_tokens_map: SpecialTokensMap = serde_json::from_str(&special_tokens_map)?;
    Ok(special_tokens_map)
}

/// Gets all the information and files needed to load a tokenizer from a Hugging Face Hub
/// repository or a local directory.
///
/// # Arguments
///
/// * `repo_id` - The ID of the repository or the path of the directory to load the tokenizer from.
/// * `params` - Optional parameters to specify the revision and auth token.
///
/// # Returns
///
/// A `TokenizerInfo` struct containing all the information needed to load a tokenizer.
pub fn from_pretrained<I: AsRef<str>>(
    repo_id: I,
    params: Option<FromPretrainedParameters>,
) -> Result<TokenizerInfo> {
    let repo = get_repo(repo_id.as_ref(), params)?;
    tracing::debug!("Resolving tokenizer files from '{}'", repo.id());

    let config = match repo.get(TOKENIZER_CONFIG_FILE) {
        Ok(tokenizer_config_file) => Some(TokenizerConfig::from_file(tokenizer_config_file)?),
        Err(_) => None,
    };

    // Used to determine the tokenizer class if the config doesn't name it
    let model_config = match repo.get(MODEL_CONFIG_FILE) {
        Ok(model_config_file_path) => load_model_config(model_config_file_path).ok(),
        Err(_) => None,
    };

    let tokenizer_file_path = repo.get(TOKENIZER_FILE).ok();

    let vocab = match repo.get(VOCAB_TXT_FILE) {
        Ok(vocab_txt_file_path) => Some(load_vocab_txt(vocab_txt_file_path)?),
        Err(_) => None,
    };

    let special_tokens_map = match repo.get(SPECIAL_TOKENS_MAP_FILE) {
        Ok(special_tokens_map_file) => Some(load_special_tokens_map(special_tokens_map_file)?),
        Err(_) => None,
    };

    Ok(TokenizerInfo {
        config,
        model_config,
        tokenizer_file_path,
        vocab,
        special_tokens_map,
    })
}
