use candle_core::{Device, Tensor, D};
use candle_nn::ops::softmax;
use ner_export::{Error, Result};
use serde::Serialize;

use crate::classifier::{TokenClassifier, TokenizedText};

#[derive(Debug, Clone)]
struct PreEntity {
    word: String,
    scores: Vec<f32>,
    start: usize,
    end: usize,
    index: usize,
    is_subword: bool,
}

/// An entity found in a sentence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    entity: String,
    score: f32,
    index: usize,
    word: String,
    start: usize,
    end: usize,
}

impl Entity {
    pub fn new(
        entity: String,
        score: f32,
        index: usize,
        word: String,
        start: usize,
        end: usize,
    ) -> Self {
        Self {
            entity,
            score,
            index,
            word,
            start,
            end,
        }
    }

    pub fn get_word(&self) -> &str {
        &self.word
    }

    pub fn get_entity(&self) -> &str {
        &self.entity
    }

    pub fn get_score(&self) -> f32 {
        self.score
    }

    pub fn get_start(&self) -> usize {
        self.start
    }

    pub fn get_end(&self) -> usize {
        self.end
    }

    pub fn get_index(&self) -> usize {
        self.index
    }
}

/// How the predictions of the tokens are turned into entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationStrategy {
    /// One entity per token.
    #[default]
    None,
    /// Consecutive tokens with the same entity type are grouped following the B-/I- tags.
    Simple,
    /// Subwords are merged into words using the prediction of the first subword.
    First,
    /// Subwords are merged into words averaging their scores.
    Average,
    /// Subwords are merged into words using the prediction of the subword with the highest score.
    Max,
}

#[derive(Debug, Clone)]
pub struct TokenClassificationOptions {
    pub aggregation_strategy: AggregationStrategy,
    pub ignore_labels: Vec<String>,
}

impl Default for TokenClassificationOptions {
    fn default() -> Self {
        Self {
            aggregation_strategy: AggregationStrategy::None,
            ignore_labels: vec!["O".to_string()],
        }
    }
}

fn substring(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Turns the `(seq_len, num_labels)` logits into probabilities over the labels.
fn probabilities(logits: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if logits.is_empty() {
        return Ok(logits);
    }
    let logits = Tensor::new(logits, &Device::Cpu)?;
    Ok(softmax(&logits, D::Minus1)?.to_vec2::<f32>()?)
}

/// Gets the index and value of the highest score.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (idx, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((idx, score)),
        })
}

fn get_tag(entity_name: &str) -> (&str, &str) {
    if let Some(entity) = entity_name.strip_prefix("B-") {
        ("B", entity)
    } else if let Some(entity) = entity_name.strip_prefix("I-") {
        ("I", entity)
    } else {
        // Not B- or I- entity, default to I- for continuation
        ("I", entity_name)
    }
}

/// Turns the token classification output of sentences into entities.
pub struct EntityExtractor<'a, C: TokenClassifier> {
    classifier: &'a C,
}

impl<'a, C: TokenClassifier> EntityExtractor<'a, C> {
    pub fn new(classifier: &'a C) -> Self {
        Self { classifier }
    }

    fn label(&self, index: usize) -> Result<&'a str> {
        self.classifier
            .label_of(index)
            .ok_or(Error::IncompleteLabelMap {
                index,
                num_labels: self.classifier.num_labels(),
            })
    }

    fn gather_pre_entities(
        &self,
        input: &TokenizedText,
        logits: Vec<Vec<f32>>,
    ) -> Result<Vec<PreEntity>> {
        let mut pre_entities: Vec<PreEntity> = Vec::new();
        let mut last_word_id: Option<u32> = None;
        for (i, scores) in probabilities(logits)?.into_iter().enumerate() {
            if input.special_tokens_mask.get(i).copied().unwrap_or(1) != 0 {
                continue;
            }
            let word_id = input.word_ids.get(i).copied().flatten();
            let is_subword =
                !pre_entities.is_empty() && word_id.is_some() && word_id == last_word_id;
            last_word_id = word_id;

            let (Some(&(start, end)), Some(token)) = (input.offsets.get(i), input.tokens.get(i))
            else {
                continue;
            };
            pre_entities.push(PreEntity {
                word: token.clone(),
                scores,
                start,
                end,
                index: i,
                is_subword,
            });
        }
        Ok(pre_entities)
    }

    fn aggregate_word(
        &self,
        text: &str,
        pre_entities: Vec<PreEntity>,
        aggregation_strategy: AggregationStrategy,
    ) -> Result<Entity> {
        let (first, last) = match (pre_entities.first(), pre_entities.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::msg("Cannot aggregate an empty word")),
        };
        let scores = match aggregation_strategy {
            AggregationStrategy::Max => pre_entities
                .iter()
                .max_by(|a, b| {
                    let max_a = argmax(&a.scores).map_or(f32::NEG_INFINITY, |(_, s)| s);
                    let max_b = argmax(&b.scores).map_or(f32::NEG_INFINITY, |(_, s)| s);
                    max_a.total_cmp(&max_b)
                })
                .map_or_else(Vec::new, |pre_entity| pre_entity.scores.clone()),
            AggregationStrategy::Average => {
                let mut average = vec![0f32; first.scores.len()];
                for pre_entity in &pre_entities {
                    for (acc, score) in average.iter_mut().zip(&pre_entity.scores) {
                        *acc += score / pre_entities.len() as f32;
                    }
                }
                average
            }
            _ => first.scores.clone(),
        };
        let (idx, score) =
            argmax(&scores).ok_or_else(|| Error::msg("Cannot aggregate a word without scores"))?;
        Ok(Entity::new(
            self.label(idx)?.to_string(),
            score,
            first.index,
            substring(text, first.start, last.end),
            first.start,
            last.end,
        ))
    }

    fn aggregate_words(
        &self,
        text: &str,
        pre_entities: Vec<PreEntity>,
        aggregation_strategy: AggregationStrategy,
    ) -> Result<Vec<Entity>> {
        let mut word_entities: Vec<Entity> = Vec::new();
        let mut word_group: Vec<PreEntity> = Vec::new();
        for pre_entity in pre_entities {
            if word_group.is_empty() || pre_entity.is_subword {
                word_group.push(pre_entity);
            } else {
                word_entities.push(self.aggregate_word(text, word_group, aggregation_strategy)?);
                word_group = vec![pre_entity];
            }
        }

        if !word_group.is_empty() {
            word_entities.push(self.aggregate_word(text, word_group, aggregation_strategy)?);
        }

        Ok(word_entities)
    }

    fn group_sub_entities(&self, text: &str, entities: Vec<Entity>) -> Option<Entity> {
        let first_entity = entities.first()?;
        let last_entity = entities.last()?;
        let (_, entity) = get_tag(&first_entity.entity);
        let avg_score =
            entities.iter().map(|entity| entity.score).sum::<f32>() / entities.len() as f32;
        Some(Entity::new(
            entity.to_string(),
            avg_score,
            first_entity.index,
            substring(text, first_entity.start, last_entity.end),
            first_entity.start,
            last_entity.end,
        ))
    }

    fn group_entities(&self, text: &str, entities: Vec<Entity>) -> Vec<Entity> {
        let mut entity_groups: Vec<Entity> = Vec::new();
        let mut entity_group_disagg: Vec<Entity> = Vec::new();
        for entity in entities {
            let continues_group = entity_group_disagg.last().is_some_and(|last| {
                let (bi, tag) = get_tag(&entity.entity);
                let (_, last_tag) = get_tag(&last.entity);
                tag == last_tag && bi != "B"
            });

            if !continues_group && !entity_group_disagg.is_empty() {
                let group = std::mem::take(&mut entity_group_disagg);
                entity_groups.extend(self.group_sub_entities(text, group));
            }
            entity_group_disagg.push(entity);
        }

        entity_groups.extend(self.group_sub_entities(text, entity_group_disagg));
        entity_groups
    }

    /// Turns the logits of a tokenized sentence into entities.
    ///
    /// # Arguments
    ///
    /// * `input` - The tokenized sentence.
    /// * `logits` - The logits of every position of `input`.
    /// * `options` - The aggregation strategy and the labels to drop.
    ///
    /// # Returns
    ///
    /// The entities of the sentence, in order of appearance.
    pub fn extract(
        &self,
        input: &TokenizedText,
        logits: Vec<Vec<f32>>,
        options: &TokenClassificationOptions,
    ) -> Result<Vec<Entity>> {
        let pre_entities = self.gather_pre_entities(input, logits)?;
        let entities = match options.aggregation_strategy {
            AggregationStrategy::None | AggregationStrategy::Simple => pre_entities
                .into_iter()
                .map(|pre_entity| {
                    let (idx, score) = argmax(&pre_entity.scores)
                        .ok_or_else(|| Error::msg("Cannot classify a token without scores"))?;
                    Ok(Entity::new(
                        self.label(idx)?.to_string(),
                        score,
                        pre_entity.index,
                        pre_entity.word,
                        pre_entity.start,
                        pre_entity.end,
                    ))
                })
                .collect::<Result<Vec<_>>>()?,
            strategy => self.aggregate_words(&input.text, pre_entities, strategy)?,
        };

        let entities = match options.aggregation_strategy {
            AggregationStrategy::None => entities,
            _ => self.group_entities(&input.text, entities),
        };

        Ok(entities
            .into_iter()
            .filter(|entity| !options.ignore_labels.contains(&entity.entity))
            .collect())
    }
}

/// Identifies the entities of a sentence.
pub fn extract_entities<C: TokenClassifier>(
    classifier: &mut C,
    text: &str,
    options: &TokenClassificationOptions,
) -> Result<Vec<Entity>> {
    let input = classifier.tokenize(text)?;
    let logits = classifier.classify(&input)?;
    EntityExtractor::new(&*classifier).extract(&input, logits, options)
}

#[cfg(test)]
mod tests {
    use super::{extract_entities, AggregationStrategy, TokenClassificationOptions};
    use crate::testing::FakeClassifier;

    fn options(aggregation_strategy: AggregationStrategy) -> TokenClassificationOptions {
        TokenClassificationOptions {
            aggregation_strategy,
            ..Default::default()
        }
    }

    fn words(
        classifier: &mut FakeClassifier,
        strategy: AggregationStrategy,
    ) -> Vec<(String, String)> {
        extract_entities(classifier, "John works at Microsoft in Seattle", &options(strategy))
            .unwrap()
            .into_iter()
            .map(|e| (e.get_word().to_string(), e.get_entity().to_string()))
            .collect()
    }

    fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
        expected
            .iter()
            .map(|(w, e)| (w.to_string(), e.to_string()))
            .collect()
    }

    #[test]
    fn test_no_aggregation() {
        let mut classifier = FakeClassifier::new();
        assert_eq!(
            words(&mut classifier, AggregationStrategy::None),
            pairs(&[
                ("john", "B-PER"),
                ("micro", "B-ORG"),
                ("##soft", "I-ORG"),
                ("seattle", "B-LOC")
            ])
        );
    }

    #[test]
    fn test_scores_are_label_probabilities() {
        let mut classifier = FakeClassifier::new();
        let entities = extract_entities(
            &mut classifier,
            "John works at Microsoft in Seattle",
            &TokenClassificationOptions {
                aggregation_strategy: AggregationStrategy::None,
                ignore_labels: vec![],
            },
        )
        .unwrap();
        assert_eq!(entities.len(), 7);

        // One logit of 5.0 against six logits of 0.0
        let expected = 5f32.exp() / (5f32.exp() + 6.0);
        for entity in &entities {
            assert!((entity.get_score() - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_simple_aggregation_groups_tags() {
        let mut classifier = FakeClassifier::new();
        assert_eq!(
            words(&mut classifier, AggregationStrategy::Simple),
            pairs(&[("John", "PER"), ("Microsoft", "ORG"), ("Seattle", "LOC")])
        );
    }

    #[test]
    fn test_first_uses_first_subword() {
        // The second subword of "Microsoft" is predicted as `O`
        let mut classifier = FakeClassifier::new().with_prediction(5, 0, 9.0);
        assert_eq!(
            words(&mut classifier, AggregationStrategy::First),
            pairs(&[("John", "PER"), ("Microsoft", "ORG"), ("Seattle", "LOC")])
        );
    }

    #[test]
    fn test_max_uses_most_confident_subword() {
        let mut classifier = FakeClassifier::new().with_prediction(5, 5, 20.0);
        assert_eq!(
            words(&mut classifier, AggregationStrategy::Max),
            pairs(&[("John", "PER"), ("Microsoft", "LOC"), ("Seattle", "LOC")])
        );
    }

    #[test]
    fn test_average_scores() {
        let mut classifier = FakeClassifier::new();
        let entities = extract_entities(
            &mut classifier,
            "John works at Microsoft in Seattle",
            &options(AggregationStrategy::Average),
        )
        .unwrap();
        let microsoft = &entities[1];
        assert_eq!(microsoft.get_word(), "Microsoft");
        assert_eq!(microsoft.get_entity(), "ORG");
        assert_eq!((microsoft.get_start(), microsoft.get_end()), (14, 23));
        assert!(microsoft.get_score() > 0.0 && microsoft.get_score() <= 1.0);
    }

    #[test]
    fn test_ignore_labels() {
        let mut classifier = FakeClassifier::new();
        let entities = extract_entities(
            &mut classifier,
            "John works at Microsoft in Seattle",
            &TokenClassificationOptions {
                aggregation_strategy: AggregationStrategy::Simple,
                ignore_labels: vec!["PER".to_string(), "LOC".to_string()],
            },
        )
        .unwrap();
        let labels: Vec<&str> = entities.iter().map(|e| e.get_entity()).collect();
        assert_eq!(labels, vec!["O", "ORG", "O"]);
    }
}
