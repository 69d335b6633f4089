//! Confidence statistics over recognized blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Block, BlockType};

/// Histogram buckets as `(label, lower bound inclusive)`. Each bucket's upper
/// bound is the next one's lower bound; the last bucket also takes 100.
const BUCKETS: [(&str, f64); 6] = [
    ("0-50", 0.0),
    ("50-70", 50.0),
    ("70-80", 70.0),
    ("80-90", 80.0),
    ("90-95", 90.0),
    ("95-100", 95.0),
];

/// Summary of per-block confidence scores (0-100) for one extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceStats {
    pub average_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub low_confidence_blocks: usize,
    pub total_blocks: usize,
    pub confidence_distribution: BTreeMap<String, usize>,
}

impl Default for ConfidenceStats {
    fn default() -> Self {
        Self {
            average_confidence: 0.0,
            min_confidence: 0.0,
            max_confidence: 0.0,
            low_confidence_blocks: 0,
            total_blocks: 0,
            confidence_distribution: empty_distribution(),
        }
    }
}

impl ConfidenceStats {
    /// Statistics over the text-bearing blocks (LINE and WORD) that carry a score.
    pub fn from_blocks(blocks: &[Block], low_threshold: f64) -> Self {
        let scores: Vec<f64> = blocks
            .iter()
            .filter(|b| matches!(b.block_type, BlockType::Line | BlockType::Word))
            .filter_map(|b| b.confidence)
            .collect();
        Self::from_scores(&scores, low_threshold)
    }

    /// Statistics over raw scores. Non-finite values are ignored.
    pub fn from_scores(scores: &[f64], low_threshold: f64) -> Self {
        let scores: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
        if scores.is_empty() {
            return Self::default();
        }

        let mut distribution = empty_distribution();
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut low = 0;
        for &score in &scores {
            sum += score;
            min = min.min(score);
            max = max.max(score);
            if score < low_threshold {
                low += 1;
            }
            if let Some(count) = distribution.get_mut(bucket_for(score)) {
                *count += 1;
            }
        }

        Self {
            average_confidence: sum / scores.len() as f64,
            min_confidence: min,
            max_confidence: max,
            low_confidence_blocks: low,
            total_blocks: scores.len(),
            confidence_distribution: distribution,
        }
    }

    /// Fraction of scored blocks below the low-confidence threshold.
    pub fn low_confidence_ratio(&self) -> f64 {
        if self.total_blocks == 0 {
            0.0
        } else {
            self.low_confidence_blocks as f64 / self.total_blocks as f64
        }
    }
}

fn empty_distribution() -> BTreeMap<String, usize> {
    BUCKETS
        .iter()
        .map(|(label, _)| (label.to_string(), 0))
        .collect()
}

fn bucket_for(score: f64) -> &'static str {
    BUCKETS
        .iter()
        .rev()
        .find(|(_, lower)| score >= *lower)
        .map(|(label, _)| *label)
        .unwrap_or(BUCKETS[0].0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_all_zero() {
        let stats = ConfidenceStats::from_scores(&[], 80.0);
        assert_eq!(stats.total_blocks, 0);
        assert_eq!(stats.average_confidence, 0.0);
        assert_eq!(stats.min_confidence, 0.0);
        assert_eq!(stats.max_confidence, 0.0);
        assert_eq!(stats.low_confidence_blocks, 0);
        assert_eq!(stats.confidence_distribution.len(), 6);
        assert!(stats.confidence_distribution.values().all(|&c| c == 0));
        assert_eq!(stats.low_confidence_ratio(), 0.0);
    }

    #[test]
    fn mixed_scores() {
        let stats = ConfidenceStats::from_scores(&[100.0, 50.0, 0.0], 80.0);
        assert_eq!(stats.average_confidence, 50.0);
        assert_eq!(stats.min_confidence, 0.0);
        assert_eq!(stats.max_confidence, 100.0);
        assert_eq!(stats.low_confidence_blocks, 2);
        assert_eq!(stats.total_blocks, 3);
        assert_eq!(stats.confidence_distribution["0-50"], 1);
        assert_eq!(stats.confidence_distribution["50-70"], 1);
        assert_eq!(stats.confidence_distribution["95-100"], 1);
    }

    #[test]
    fn bucket_bounds_are_lower_inclusive() {
        assert_eq!(bucket_for(49.99), "0-50");
        assert_eq!(bucket_for(70.0), "70-80");
        assert_eq!(bucket_for(94.9), "90-95");
        assert_eq!(bucket_for(95.0), "95-100");
        assert_eq!(bucket_for(100.0), "95-100");
        assert_eq!(bucket_for(-3.0), "0-50");
    }

    #[test]
    fn threshold_is_strict() {
        let stats = ConfidenceStats::from_scores(&[80.0, 79.9], 80.0);
        assert_eq!(stats.low_confidence_blocks, 1);
        assert_eq!(stats.low_confidence_ratio(), 0.5);
    }

    #[test]
    fn from_blocks_ignores_page_blocks_and_unscored() {
        let mut unscored = Block::line("no score", 0.0);
        unscored.confidence = None;
        let blocks = vec![
            Block::page(1),
            Block::line("Hello world", 99.0),
            Block::word("Hello", 98.0),
            Block::word("world", 97.0),
            unscored,
        ];
        let stats = ConfidenceStats::from_blocks(&blocks, 80.0);
        assert_eq!(stats.total_blocks, 3);
        assert_eq!(stats.average_confidence, 98.0);
    }

    #[test]
    fn ignores_nan() {
        let stats = ConfidenceStats::from_scores(&[f64::NAN, 90.0], 80.0);
        assert_eq!(stats.total_blocks, 1);
        assert_eq!(stats.average_confidence, 90.0);
    }
}
