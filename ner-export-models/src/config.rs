use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// The configuration shared by every pretrained model, i.e. the parts of `config.json` that
/// don't depend on the architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PretrainedConfig {
    /// A map of the label ids to their corresponding labels.
    #[serde(default, deserialize_with = "deserialize_id2label")]
    id2label: Option<HashMap<usize, String>>,
    /// Explicit number of labels. Most configs only carry `id2label`.
    #[serde(default)]
    num_labels: Option<usize>,
    /// The ID of the PAD token.
    pad_token_id: Option<u32>,
}

impl PretrainedConfig {
    pub fn new(id2label: HashMap<usize, String>) -> Self {
        Self {
            id2label: Some(id2label),
            num_labels: None,
            pad_token_id: None,
        }
    }

    pub fn get_id2label(&self) -> Option<&HashMap<usize, String>> {
        self.id2label.as_ref()
    }

    pub fn get_pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }

    /// Gets the number of labels the model was trained on, which is the size of the last
    /// dimension of the classifier output.
    pub fn num_labels(&self) -> usize {
        if let Some(num_labels) = self.num_labels {
            return num_labels;
        }
        self.id2label.as_ref().map_or(0, |id2label| id2label.len())
    }
}

fn deserialize_id2label<'de, D>(deserializer: D) -> Result<Option<HashMap<usize, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: Option<HashMap<String, String>> = Deserialize::deserialize(deserializer)?;
    map.map(|m| {
        m.into_iter()
            .map(|(k, v)| {
                k.parse::<usize>()
                    .map(|idx| (idx, v))
                    .map_err(|_| D::Error::custom(format!("invalid label index '{k}'")))
            })
            .collect::<Result<HashMap<usize, String>, D::Error>>()
    })
    .transpose()
}

impl Default for PretrainedConfig {
    fn default() -> Self {
        Self {
            id2label: None,
            num_labels: None,
            pad_token_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PretrainedConfig;

    #[test]
    fn test_id2label_string_keys() {
        let config: PretrainedConfig = serde_json::from_str(
            r#"{"id2label": {"0": "O", "1": "B-PER", "2": "I-PER"}, "pad_token_id": 0}"#,
        )
        .unwrap();
        assert_eq!(config.num_labels(), 3);
        assert_eq!(config.get_id2label().unwrap()[&1], "B-PER");
        assert_eq!(config.get_pad_token_id(), Some(0));
    }

    #[test]
    fn test_id2label_rejects_non_integer_keys() {
        let config = serde_json::from_str::<PretrainedConfig>(r#"{"id2label": {"zero": "O"}}"#);
        assert!(config.is_err());
    }

    #[test]
    fn test_default_has_no_labels() {
        let config = PretrainedConfig::default();
        assert!(config.get_id2label().is_none());
        assert_eq!(config.num_labels(), 0);
    }

    #[test]
    fn test_explicit_num_labels() {
        let config: PretrainedConfig =
            serde_json::from_str(r#"{"id2label": {"0": "O"}, "num_labels": 2}"#).unwrap();
        assert_eq!(config.num_labels(), 2);
    }
}
