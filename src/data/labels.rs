use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

// ---------------------------------------------------------------------------
// Label encoding
// ---------------------------------------------------------------------------

/// Sorted distinct labels. Their position is the encoded integer.
pub fn unique_sorted(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Encode each label as the rank of its value among the sorted distinct
/// values. Ties break on `String` ordering, never on first appearance.
///
/// `None` when a label is missing from `classes`.
pub fn encode(labels: &[String], classes: &[String]) -> Option<Vec<usize>> {
    let rank: BTreeMap<&str, usize> = classes
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();
    labels.iter().map(|l| rank.get(l.as_str()).copied()).collect()
}

// ---------------------------------------------------------------------------
// LabelMetadata – everything derived from the raw condition names
// ---------------------------------------------------------------------------

/// Label-derived fields of a pattern container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelMetadata {
    /// Encoded labels, one per trial.
    pub y: Vec<usize>,
    /// Number of trials (pattern rows).
    pub n_trials: usize,
    /// Sorted distinct condition names.
    pub cope_names: Vec<String>,
    /// Number of distinct conditions.
    pub n_cope: usize,
    /// Per *trial*: how many trials share this trial's condition.
    pub n_inst: Vec<usize>,
    /// Per condition: boolean membership over trials.
    pub class_idx: Vec<Vec<bool>>,
    /// Per condition: ascending trial positions.
    pub trial_idx: Vec<Vec<usize>>,
}

impl LabelMetadata {
    /// Derive all fields from `labels`. Callers guarantee `labels` is non-empty.
    pub fn from_labels(labels: &[String]) -> Self {
        let cope_names = unique_sorted(labels);
        // Every label is a member of its own distinct set.
        let y = encode(labels, &cope_names).unwrap_or_default();

        let mut counts = vec![0usize; cope_names.len()];
        for &code in &y {
            counts[code] += 1;
        }
        let n_inst = y.iter().map(|&code| counts[code]).collect();

        let class_idx: Vec<Vec<bool>> = (0..cope_names.len())
            .map(|c| y.iter().map(|&code| code == c).collect())
            .collect();

        let trial_idx = class_idx
            .iter()
            .map(|members| {
                members
                    .iter()
                    .enumerate()
                    .filter(|&(_, &m)| m)
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();

        LabelMetadata {
            n_trials: labels.len(),
            n_cope: cope_names.len(),
            y,
            cope_names,
            n_inst,
            class_idx,
            trial_idx,
        }
    }

    /// Name of the condition encoded as `code`.
    pub fn name_of(&self, code: usize) -> Option<&str> {
        self.cope_names.get(code).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn encoding_follows_sorted_order_not_appearance() {
        let l = labels(&["face", "house", "body", "face"]);
        let classes = unique_sorted(&l);
        assert_eq!(classes, vec!["body", "face", "house"]);
        assert_eq!(encode(&l, &classes), Some(vec![1, 2, 0, 1]));
    }

    #[test]
    fn encoding_unknown_label_is_none() {
        assert_eq!(encode(&labels(&["z"]), &labels(&["a"])), None);
        assert_eq!(encode(&labels(&["a", "z"]), &labels(&["a", "b"])), None);
    }

    #[test]
    fn encoding_is_byte_lexicographic() {
        let l = labels(&["b", "B", "a", "10", "9"]);
        let classes = unique_sorted(&l);
        assert_eq!(classes, vec!["10", "9", "B", "a", "b"]);
    }

    #[test]
    fn same_label_set_gives_same_encoding() {
        let a = LabelMetadata::from_labels(&labels(&["x", "y", "z", "x"]));
        let b = LabelMetadata::from_labels(&labels(&["z", "y", "x", "x"]));
        assert_eq!(a.cope_names, b.cope_names);
        assert_eq!(a.y[0], b.y[2]);
        assert_eq!(a.y[2], b.y[0]);
    }

    #[test]
    fn single_condition() {
        let meta = LabelMetadata::from_labels(&labels(&["only", "only", "only"]));
        assert_eq!(meta.n_cope, 1);
        assert_eq!(meta.y, vec![0, 0, 0]);
        assert_eq!(meta.n_inst, vec![3, 3, 3]);
        assert_eq!(meta.trial_idx, vec![vec![0, 1, 2]]);
        assert_eq!(meta.name_of(0), Some("only"));
        assert_eq!(meta.name_of(1), None);
    }
}
