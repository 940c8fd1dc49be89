use ner_export::Result;

use crate::classifier::TokenClassifier;
use crate::entities::argmax;

pub const DEFAULT_CHECK_TEXT: &str = "John works at Microsoft in Seattle";

/// The result of running the inference check on a sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
    /// The subword tokens of the sentence, without special tokens.
    pub tokens: Vec<String>,
    /// The predicted label of every encoded position, special tokens included.
    pub labels: Vec<String>,
}

impl CheckOutput {
    /// Whether there is a label for each token. It doesn't hold as soon as the tokenizer adds
    /// special tokens around the sentence.
    pub fn is_aligned(&self) -> bool {
        self.tokens.len() == self.labels.len()
    }
}

/// Tokenizes a sentence, runs the model and maps the highest scoring class of every position to
/// its label.
#[derive(Debug, Clone)]
pub struct InferenceCheck {
    text: String,
}

impl Default for InferenceCheck {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_TEXT)
    }
}

impl InferenceCheck {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self { text: text.into() }
    }

    pub fn get_text(&self) -> &str {
        &self.text
    }

    pub fn run<C: TokenClassifier>(&self, classifier: &mut C) -> Result<CheckOutput> {
        let input = classifier.tokenize(&self.text)?;
        let logits = classifier.classify(&input)?;

        let labels = logits
            .iter()
            .map(|position| {
                argmax(position)
                    .and_then(|(idx, _)| classifier.label_of(idx))
                    .unwrap_or_default()
                    .to_string()
            })
            .collect::<Vec<_>>();

        let output = CheckOutput {
            tokens: input.subword_tokens,
            labels,
        };
        if !output.is_aligned() {
            tracing::warn!(
                "Got {} tokens but {} labels: labels include the special tokens positions",
                output.tokens.len(),
                output.labels.len()
            );
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::InferenceCheck;
    use crate::testing::FakeClassifier;

    #[test]
    fn test_labels_cover_special_tokens() {
        let mut classifier = FakeClassifier::new();
        let output = InferenceCheck::default().run(&mut classifier).unwrap();

        assert_eq!(
            output.tokens,
            vec!["john", "works", "at", "micro", "##soft", "in", "seattle"]
        );
        assert_eq!(
            output.labels,
            vec!["O", "B-PER", "O", "O", "B-ORG", "I-ORG", "O", "B-LOC", "O"]
        );
        assert!(!output.is_aligned());
        assert_eq!(output.labels.len() - output.tokens.len(), 2);
    }

    #[test]
    fn test_check_is_deterministic() {
        let mut classifier = FakeClassifier::new();
        let check = InferenceCheck::new("John works at Microsoft in Seattle");
        assert_eq!(
            check.run(&mut classifier).unwrap(),
            check.run(&mut classifier).unwrap()
        );
    }
}
