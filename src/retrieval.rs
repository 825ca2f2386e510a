use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Result, bail};
use tracing::info;

use crate::corpus::{for_each_embedded_article, open_corpus_read_only};
use crate::model::{Article, Candidate, CandidateSet, Query};
use crate::semantic::cosine_distance;

pub trait CandidateRetriever {
    fn retrieve(&self, query: &Query, limit: usize) -> Result<CandidateSet>;
}

pub struct CorpusIndex {
    articles: Vec<Article>,
    embeddings: Vec<Vec<f32>>,
    embedding_dim: usize,
}

impl CorpusIndex {
    pub fn load(db_path: &Path) -> Result<Self> {
        let connection = open_corpus_read_only(db_path)?;
        let mut entries = Vec::<(Article, Vec<f32>)>::new();
        for_each_embedded_article(&connection, |article, embedding| {
            entries.push((article, embedding));
            Ok(())
        })?;

        let index = Self::from_entries(entries)?;
        info!(
            path = %db_path.display(),
            articles = index.len(),
            embedding_dim = index.embedding_dim,
            "loaded corpus index"
        );
        Ok(index)
    }

    pub fn from_entries(entries: Vec<(Article, Vec<f32>)>) -> Result<Self> {
        let Some(embedding_dim) = entries.first().map(|(_, embedding)| embedding.len()) else {
            bail!("corpus index is empty; run import-corpus first");
        };

        let mut articles = Vec::<Article>::with_capacity(entries.len());
        let mut embeddings = Vec::<Vec<f32>>::with_capacity(entries.len());
        for (article, embedding) in entries {
            if embedding.len() != embedding_dim {
                bail!(
                    "article {} has embedding dimension {} (expected {})",
                    article.article_id,
                    embedding.len(),
                    embedding_dim
                );
            }
            articles.push(article);
            embeddings.push(embedding);
        }

        Ok(Self {
            articles,
            embeddings,
            embedding_dim,
        })
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }
}

impl CandidateRetriever for CorpusIndex {
    fn retrieve(&self, query: &Query, limit: usize) -> Result<CandidateSet> {
        if query.embedding.len() != self.embedding_dim {
            bail!(
                "query {} has embedding dimension {} but the corpus index uses {}",
                query.global_query_id,
                query.embedding.len(),
                self.embedding_dim
            );
        }

        let mut scored = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(position, embedding)| (position, cosine_distance(&query.embedding, embedding)))
            .collect::<Vec<(usize, f64)>>();

        let by_distance = |left: &(usize, f64), right: &(usize, f64)| -> Ordering {
            left.1.total_cmp(&right.1).then(
                self.articles[left.0]
                    .article_id
                    .cmp(&self.articles[right.0].article_id),
            )
        };

        if limit < scored.len() {
            if limit == 0 {
                scored.clear();
            } else {
                scored.select_nth_unstable_by(limit - 1, by_distance);
                scored.truncate(limit);
            }
        }
        scored.sort_by(by_distance);

        Ok(CandidateSet {
            global_query_id: query.global_query_id,
            candidates: scored
                .into_iter()
                .map(|(position, distance)| Candidate {
                    article: self.articles[position].clone(),
                    distance,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(article_id: u64, embedding: Vec<f32>) -> (Article, Vec<f32>) {
        (
            Article {
                article_id,
                title: format!("article {article_id}"),
                year: 2010,
                citation_count: article_id * 2,
                gov_score: 40.0,
            },
            embedding,
        )
    }

    fn query(embedding: Vec<f32>) -> Query {
        Query {
            global_query_id: 9,
            phrase: "test".to_string(),
            embedding,
        }
    }

    #[test]
    fn retrieve_orders_by_distance_then_article_id() {
        let index = CorpusIndex::from_entries(vec![
            entry(4, vec![0.0, 1.0]),
            entry(3, vec![1.0, 0.0]),
            entry(2, vec![0.7, 0.7]),
            entry(1, vec![2.0, 0.0]),
            entry(5, vec![-1.0, 0.0]),
        ])
        .expect("index");

        let result = index.retrieve(&query(vec![1.0, 0.0]), 10).expect("retrieve");
        let ids = result
            .candidates
            .iter()
            .map(|candidate| candidate.article.article_id)
            .collect::<Vec<u64>>();
        assert_eq!(ids, vec![1, 3, 2, 4, 5]);
        assert_eq!(result.global_query_id, 9);
        assert!((result.candidates[4].distance - 2.0).abs() < 1e-9);
    }

    #[test]
    fn retrieve_truncates_to_limit() {
        let index = CorpusIndex::from_entries(
            (1..=20)
                .map(|id| entry(id, vec![1.0, id as f32]))
                .collect(),
        )
        .expect("index");

        let result = index.retrieve(&query(vec![1.0, 0.0]), 5).expect("retrieve");
        let ids = result
            .candidates
            .iter()
            .map(|candidate| candidate.article.article_id)
            .collect::<Vec<u64>>();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(index.retrieve(&query(vec![1.0, 0.0]), 0).expect("retrieve").candidates.is_empty());
    }

    #[test]
    fn retrieve_fails_on_dimension_mismatch() {
        let index = CorpusIndex::from_entries(vec![entry(1, vec![1.0, 0.0])]).expect("index");
        assert!(index.retrieve(&query(vec![1.0, 0.0, 0.0]), 5).is_err());
    }

    #[test]
    fn empty_or_inconsistent_index_is_rejected() {
        assert!(CorpusIndex::from_entries(Vec::new()).is_err());
        assert!(
            CorpusIndex::from_entries(vec![entry(1, vec![1.0]), entry(2, vec![1.0, 0.0])]).is_err()
        );
    }
}
