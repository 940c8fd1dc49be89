use std::{collections::BTreeMap, path::Path};

use ner_export::{Error, Result};
use ner_export_models::PretrainedConfig;

pub const LABEL_MAP_FILE: &str = "label_map.json";

/// The mapping from class index to entity tag of a token classification model. It always holds a
/// label for every index in `[0, num_labels)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    /// Builds the label map from an `id2label` map, checking it has a label for every class.
    ///
    /// # Arguments
    ///
    /// * `id2label` - The labels keyed by class index.
    /// * `num_labels` - The number of classes of the model.
    ///
    /// # Returns
    ///
    /// The label map, or `Error::IncompleteLabelMap` with the first index without label.
    pub fn new<I>(id2label: I, num_labels: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, String)>,
    {
        let mut slots: Vec<Option<String>> = vec![None; num_labels];
        for (index, label) in id2label {
            let slot = slots.get_mut(index).ok_or_else(|| {
                Error::LabelMapParse(format!(
                    "label index {index} out of range for {num_labels} labels"
                ))
            })?;
            *slot = Some(label);
        }

        let labels = slots
            .into_iter()
            .enumerate()
            .map(|(index, label)| label.ok_or(Error::IncompleteLabelMap { index, num_labels }))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { labels })
    }

    /// Builds the label map from the `id2label` of a model configuration.
    pub fn from_config(config: &PretrainedConfig) -> Result<Self> {
        let id2label = config
            .get_id2label()
            .ok_or_else(|| Error::LabelMapParse("model config has no `id2label`".to_string()))?;
        if config.num_labels() == 0 {
            return Err(Error::LabelMapParse("model config has no labels".to_string()));
        }
        Self::new(
            id2label.iter().map(|(index, label)| (*index, label.clone())),
            config.num_labels(),
        )
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().map(String::as_str).enumerate()
    }

    /// Serializes the label map as a JSON object with the indices as keys, in numeric order.
    pub fn to_json(&self) -> Result<String> {
        let map: BTreeMap<usize, &str> = self.iter().collect();
        Ok(serde_json::to_string_pretty(&map)?)
    }

    /// Parses a label map serialized with [`LabelMap::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let map: BTreeMap<String, String> = serde_json::from_str(json)?;
        let num_labels = map.len();
        let id2label = map
            .into_iter()
            .map(|(key, label)| {
                key.parse::<usize>()
                    .map(|index| (index, label))
                    .map_err(|_| Error::LabelMapParse(format!("key '{key}' is not an integer")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(id2label, num_labels)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::LabelMap;
    use ner_export::Error;
    use ner_export_models::PretrainedConfig;
    use std::collections::HashMap;

    fn labels(pairs: &[(usize, &str)]) -> Vec<(usize, String)> {
        pairs.iter().map(|(i, l)| (*i, l.to_string())).collect()
    }

    #[test]
    fn test_label_map_is_total() {
        let label_map = LabelMap::new(labels(&[(1, "B-PER"), (0, "O"), (2, "I-PER")]), 3).unwrap();
        assert_eq!(label_map.len(), 3);
        assert_eq!(label_map.get(0), Some("O"));
        assert_eq!(label_map.get(2), Some("I-PER"));
        assert_eq!(label_map.get(3), None);
    }

    #[test]
    fn test_gap_is_rejected() {
        let err = LabelMap::new(labels(&[(0, "O"), (2, "I-PER")]), 3).unwrap_err();
        assert!(matches!(
            err,
            Error::IncompleteLabelMap {
                index: 1,
                num_labels: 3
            }
        ));
    }

    #[test]
    fn test_index_out_of_range_is_rejected() {
        let err = LabelMap::new(labels(&[(0, "O"), (5, "B-LOC")]), 2).unwrap_err();
        assert!(matches!(err, Error::LabelMapParse(_)));
    }

    #[test]
    fn test_json_is_sorted_numerically() {
        let id2label = (0..12)
            .rev()
            .map(|i| (i, format!("L{i}")))
            .collect::<HashMap<_, _>>();
        let label_map = LabelMap::from_config(&PretrainedConfig::new(id2label)).unwrap();
        let json = label_map.to_json().unwrap();

        let keys: Vec<&str> = json
            .lines()
            .filter_map(|line| line.trim().split('"').nth(1))
            .collect();
        let expected: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        assert_eq!(keys, expected);
        assert_eq!(json, label_map.to_json().unwrap());
        assert_eq!(LabelMap::from_json(&json).unwrap(), label_map);
    }

    #[test]
    fn test_non_integer_key_is_rejected() {
        let err = LabelMap::from_json(r#"{"0": "O", "first": "B-PER"}"#).unwrap_err();
        assert!(matches!(err, Error::LabelMapParse(_)));
    }

    #[test]
    fn test_config_without_id2label() {
        let err = LabelMap::from_config(&PretrainedConfig::default()).unwrap_err();
        assert!(matches!(err, Error::LabelMapParse(_)));
    }

    #[test]
    fn test_config_with_empty_id2label() {
        let config = PretrainedConfig::new(HashMap::new());
        let err = LabelMap::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::LabelMapParse(_)));
    }
}
