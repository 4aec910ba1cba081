//! Label vocabulary. Order matches the model's output indices.

use crate::error::{OcrError, Result};

const DEFAULT_LABELS: [&str; 20] = [
    "A", "made", "may", "two", "We", "But", "told", "And", "new", "This", "first", "people", "In",
    "much", "could", "time", "man", "like", "well", "You",
];

pub fn default_labels() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(OcrError::Config("label vocabulary is empty".to_string()));
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label of the highest probability; ties go to the lowest index. No
    /// threshold is applied.
    pub fn decode(&self, probabilities: &[f32]) -> Result<&str> {
        if probabilities.len() != self.labels.len() {
            return Err(OcrError::InferenceError(format!(
                "model produced {} scores for {} labels",
                probabilities.len(),
                self.labels.len()
            )));
        }
        let index = probabilities
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_nan())
            .fold(None, |best: Option<(usize, &f32)>, (i, p)| match best {
                Some((_, top)) if p <= top => best,
                _ => Some((i, p)),
            })
            .map(|(i, _)| i)
            .ok_or_else(|| OcrError::InferenceError("model produced no usable scores".to_string()))?;
        Ok(&self.labels[index])
    }
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self {
            labels: default_labels(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let labels = default_labels();
        assert_eq!(labels.len(), 20);
        assert_eq!(labels[0], "A");
        assert_eq!(labels[19], "You");
    }

    #[test]
    fn test_decode_argmax() {
        let vocab = LabelVocabulary::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(vocab.decode(&[0.1, 0.7, 0.2]).unwrap(), "b");
    }

    #[test]
    fn test_decode_tie_picks_first() {
        let vocab = LabelVocabulary::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(vocab.decode(&[0.5, 0.5, 0.0]).unwrap(), "a");
        assert_eq!(vocab.decode(&[0.0, 0.5, 0.5]).unwrap(), "b");
    }

    #[test]
    fn test_decode_skips_nan() {
        let vocab = LabelVocabulary::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(vocab.decode(&[f32::NAN, 0.2, 0.1]).unwrap(), "b");
        assert!(vocab.decode(&[f32::NAN; 3]).is_err());
    }

    #[test]
    fn test_decode_low_confidence_still_answers() {
        let vocab = LabelVocabulary::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(vocab.decode(&[0.33, 0.32, 0.35]).unwrap(), "c");
    }

    #[test]
    fn test_decode_width_mismatch() {
        let vocab = LabelVocabulary::default();
        assert!(matches!(vocab.decode(&[1.0]), Err(OcrError::InferenceError(_))));
    }

    #[test]
    fn test_empty_vocabulary_rejected() {
        assert!(LabelVocabulary::new(vec![]).is_err());
    }
}
