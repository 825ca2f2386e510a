use std::collections::BTreeMap;

use crate::model::DistributionRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedDistribution {
    frequencies: BTreeMap<u64, u64>,
}

impl AggregatedDistribution {
    pub fn from_frequencies(frequencies: BTreeMap<u64, u64>) -> Self {
        Self { frequencies }
    }

    pub fn fold_record(&mut self, record: &DistributionRecord) {
        for draw in &record.draws {
            *self.frequencies.entry(draw.citation_count).or_insert(0) += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.frequencies.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.frequencies
            .iter()
            .map(|(citation_count, frequency)| (*citation_count, *frequency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Draw;

    fn record(citations: &[u64]) -> DistributionRecord {
        DistributionRecord {
            settings_id: 1,
            global_query_id: 3,
            requested: citations.len(),
            underfilled: false,
            draws: citations
                .iter()
                .enumerate()
                .map(|(position, citation_count)| Draw {
                    rank: position + 1,
                    article_id: position as u64 + 100,
                    citation_count: *citation_count,
                    similarity: 0.5,
                    score: 0.5,
                    page: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn folds_citation_counts_across_records() {
        let mut distribution = AggregatedDistribution::default();
        distribution.fold_record(&record(&[0, 4, 4]));
        distribution.fold_record(&record(&[4, 12]));

        assert_eq!(
            distribution.iter().collect::<Vec<(u64, u64)>>(),
            vec![(0, 1), (4, 3), (12, 1)]
        );
        assert_eq!(distribution.total(), 5);
    }

    #[test]
    fn empty_record_leaves_distribution_unchanged() {
        let mut distribution = AggregatedDistribution::default();
        distribution.fold_record(&record(&[]));
        assert_eq!(distribution.iter().count(), 0);
        assert_eq!(distribution.total(), 0);
    }
}
