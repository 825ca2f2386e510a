use anyhow::{Result, bail};

use super::scoring::RankedCandidate;

/// Absolute page number in the ranked result list (0 = best page).
///
/// Only this type is accepted by [`WorkingPageSet::take`]; a rank among the
/// currently active pages has to go through [`ActivePages::resolve`] first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(usize);

impl PageIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePages {
    indices: Vec<PageIndex>,
}

impl ActivePages {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn resolve(&self, relative_rank: usize) -> Option<PageIndex> {
        self.indices.get(relative_rank).copied()
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[PageIndex] {
        &self.indices
    }
}

#[derive(Debug, Clone)]
pub struct WorkingPageSet {
    pages: Vec<Vec<RankedCandidate>>,
}

impl WorkingPageSet {
    pub fn paginate(ranked: &[RankedCandidate], page_size: usize) -> Result<Self> {
        if page_size == 0 {
            bail!("page size must be at least 1");
        }

        let pages = ranked
            .chunks(page_size)
            .map(|chunk| chunk.to_vec())
            .collect::<Vec<Vec<RankedCandidate>>>();
        Ok(Self { pages })
    }

    #[cfg(test)]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: PageIndex) -> &[RankedCandidate] {
        &self.pages[index.0]
    }

    pub fn remaining(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn active_pages(&self) -> ActivePages {
        ActivePages {
            indices: self
                .pages
                .iter()
                .enumerate()
                .filter(|(_, page)| !page.is_empty())
                .map(|(index, _)| PageIndex(index))
                .collect(),
        }
    }

    /// Physically removes the candidate at `slot` from page `index`,
    /// preserving the order of what is left on that page.
    pub fn take(&mut self, index: PageIndex, slot: usize) -> Option<RankedCandidate> {
        let page = self.pages.get_mut(index.0)?;
        if slot >= page.len() {
            return None;
        }
        Some(page.remove(slot))
    }
}
