use crate::model::{CandidateSet, Weights};
use crate::normalization::{NormalizationModel, NormalizedFeatures};
use crate::semantic::similarity_from_distance;

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCandidate {
    pub article_id: u64,
    pub citation_count: u64,
    pub similarity: f64,
    pub features: NormalizedFeatures,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub article_id: u64,
    pub citation_count: u64,
    pub similarity: f64,
    pub score: f64,
}

pub fn prepare_candidates(
    candidate_set: &CandidateSet,
    normalizer: &NormalizationModel,
) -> Vec<PreparedCandidate> {
    candidate_set
        .candidates
        .iter()
        .map(|candidate| PreparedCandidate {
            article_id: candidate.article.article_id,
            citation_count: candidate.article.citation_count,
            similarity: similarity_from_distance(candidate.distance),
            features: normalizer.transform(&candidate.article),
        })
        .collect()
}

pub fn fuse_score(candidate: &PreparedCandidate, weights: &Weights) -> f64 {
    weights.similarity * candidate.similarity
        + weights.year * candidate.features.year
        + weights.citations * candidate.features.citations
        + weights.gov * candidate.features.gov
}

pub fn rank_candidates(prepared: &[PreparedCandidate], weights: &Weights) -> Vec<RankedCandidate> {
    let mut ranked = prepared
        .iter()
        .map(|candidate| RankedCandidate {
            article_id: candidate.article_id,
            citation_count: candidate.citation_count,
            similarity: candidate.similarity,
            score: fuse_score(candidate, weights),
        })
        .collect::<Vec<RankedCandidate>>();

    sort_ranked(&mut ranked);
    ranked
}

fn sort_ranked(candidates: &mut [RankedCandidate]) {
    candidates.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.article_id.cmp(&right.article_id))
    });
}
