use anyhow::{Context, Result};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::model::Draw;

use super::pagination::WorkingPageSet;

#[derive(Debug, Clone, PartialEq)]
pub struct DrawOutcome {
    pub draws: Vec<Draw>,
    pub requested: usize,
    pub underfilled: bool,
}

pub fn page_weights(active_count: usize) -> Vec<f64> {
    let raw = (0..active_count)
        .map(|rank| (-(rank as f64)).exp())
        .collect::<Vec<f64>>();
    let total = raw.iter().sum::<f64>();
    if total <= 0.0 {
        return raw;
    }
    raw.into_iter().map(|weight| weight / total).collect()
}

pub fn draw_without_replacement<R: Rng + ?Sized>(
    pages: &mut WorkingPageSet,
    k: usize,
    rng: &mut R,
) -> Result<DrawOutcome> {
    let mut draws = Vec::<Draw>::with_capacity(k.min(pages.remaining()));

    while draws.len() < k {
        let active = pages.active_pages();
        if active.is_empty() {
            break;
        }

        let weights = page_weights(active.len());
        let sampler = WeightedIndex::new(&weights)
            .with_context(|| format!("invalid page weights over {} pages", active.len()))?;
        let relative_rank = sampler.sample(rng);
        let page_index = active
            .resolve(relative_rank)
            .with_context(|| format!("sampled rank {relative_rank} outside active pages"))?;

        let page_len = pages.page(page_index).len();
        let slot = rng.gen_range(0..page_len);
        let picked = pages.take(page_index, slot).with_context(|| {
            format!(
                "slot {slot} missing from page {} during draw",
                page_index.get()
            )
        })?;

        draws.push(Draw {
            rank: draws.len() + 1,
            article_id: picked.article_id,
            citation_count: picked.citation_count,
            similarity: picked.similarity,
            score: picked.score,
            page: page_index.get(),
        });
    }

    Ok(DrawOutcome {
        underfilled: draws.len() < k,
        requested: k,
        draws,
    })
}
