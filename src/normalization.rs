use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::model::Article;
use crate::util::{now_utc_string, read_json, sha256_str, write_json_pretty};

pub const NORMALIZATION_METHOD: &str = "min-max-log1p-citations";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn observe(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn scale(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span > 0.0 && span.is_finite() {
            (value - self.min) / span
        } else {
            value - self.min
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedFeatures {
    pub year: f64,
    pub citations: f64,
    pub gov: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationModel {
    pub manifest_version: u32,
    pub method: String,
    pub fitted_at: String,
    pub article_count: u64,
    pub year: FeatureRange,
    pub log_citations: FeatureRange,
    pub gov_score: FeatureRange,
    pub checksum: String,
}

impl NormalizationModel {
    pub fn transform(&self, article: &Article) -> NormalizedFeatures {
        NormalizedFeatures {
            year: self.year.scale(f64::from(article.year)),
            citations: self.log_citations.scale(log_citations(article.citation_count)),
            gov: self.gov_score.scale(article.gov_score),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let model: Self = read_json(path)?;
        if model.method != NORMALIZATION_METHOD {
            bail!(
                "normalization model {} uses unsupported method '{}' (expected '{}')",
                path.display(),
                model.method,
                NORMALIZATION_METHOD
            );
        }

        let expected = model.compute_checksum();
        if model.checksum != expected {
            bail!(
                "normalization model {} failed checksum verification (stored {}, computed {}); refit it with fit-normalizer",
                path.display(),
                model.checksum,
                expected
            );
        }

        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, self)
    }

    fn compute_checksum(&self) -> String {
        let checksum_input = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.method,
            self.article_count,
            self.year.min,
            self.year.max,
            self.log_citations.min,
            self.log_citations.max,
            self.gov_score.min,
            self.gov_score.max,
        );
        sha256_str(&checksum_input)
    }
}

pub fn log_citations(citation_count: u64) -> f64 {
    (citation_count as f64).ln_1p()
}

#[derive(Debug, Clone)]
pub struct NormalizerFit {
    article_count: u64,
    year: FeatureRange,
    log_citations: FeatureRange,
    gov_score: FeatureRange,
}

impl Default for NormalizerFit {
    fn default() -> Self {
        Self {
            article_count: 0,
            year: FeatureRange::empty(),
            log_citations: FeatureRange::empty(),
            gov_score: FeatureRange::empty(),
        }
    }
}

impl NormalizerFit {
    pub fn observe(&mut self, article: &Article) -> Result<()> {
        if !article.gov_score.is_finite() {
            bail!(
                "article {} has non-finite gov_score {}",
                article.article_id,
                article.gov_score
            );
        }

        self.article_count += 1;
        self.year.observe(f64::from(article.year));
        self.log_citations
            .observe(log_citations(article.citation_count));
        self.gov_score.observe(article.gov_score);
        Ok(())
    }

    pub fn finish(self) -> Result<NormalizationModel> {
        if self.article_count == 0 {
            bail!("cannot fit normalization model on an empty corpus");
        }

        let mut model = NormalizationModel {
            manifest_version: 1,
            method: NORMALIZATION_METHOD.to_string(),
            fitted_at: now_utc_string(),
            article_count: self.article_count,
            year: self.year,
            log_citations: self.log_citations,
            gov_score: self.gov_score,
            checksum: String::new(),
        };
        model.checksum = model.compute_checksum();
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(article_id: u64, year: i32, citation_count: u64, gov_score: f64) -> Article {
        Article {
            article_id,
            title: format!("article {article_id}"),
            year,
            citation_count,
            gov_score,
        }
    }

    fn fitted() -> NormalizationModel {
        let mut fit = NormalizerFit::default();
        for value in [
            article(1, 2000, 0, 20.0),
            article(2, 2020, 99, 140.0),
            article(3, 2010, 9, 70.0),
        ] {
            fit.observe(&value).expect("observe");
        }
        fit.finish().expect("finish")
    }

    #[test]
    fn transform_maps_fitted_extremes_to_unit_interval() {
        let model = fitted();

        let low = model.transform(&article(10, 2000, 0, 20.0));
        assert_eq!(low.year, 0.0);
        assert_eq!(low.citations, 0.0);
        assert_eq!(low.gov, 0.0);

        let high = model.transform(&article(11, 2020, 99, 140.0));
        assert!((high.year - 1.0).abs() < 1e-12);
        assert!((high.citations - 1.0).abs() < 1e-12);
        assert!((high.gov - 1.0).abs() < 1e-12);
    }

    #[test]
    fn transform_is_independent_of_other_records() {
        let model = fitted();
        let target = article(7, 2015, 42, 90.0);

        let alone = model.transform(&target);
        let batch = [article(8, 2001, 5000, 10.0), target.clone(), article(9, 2019, 1, 0.0)]
            .iter()
            .map(|value| model.transform(value))
            .collect::<Vec<NormalizedFeatures>>();

        assert_eq!(batch[1], alone);
    }

    #[test]
    fn degenerate_range_maps_to_zero_and_values_are_not_clipped() {
        let mut fit = NormalizerFit::default();
        fit.observe(&article(1, 2010, 3, 50.0)).expect("observe");
        fit.observe(&article(2, 2010, 3, 50.0)).expect("observe");
        let model = fit.finish().expect("finish");

        let same = model.transform(&article(3, 2010, 3, 50.0));
        assert_eq!(same.year, 0.0);
        assert_eq!(same.citations, 0.0);

        let model = fitted();
        let beyond = model.transform(&article(4, 2030, 99, 140.0));
        assert!(beyond.year > 1.0);
    }

    #[test]
    fn fitting_empty_corpus_fails() {
        assert!(NormalizerFit::default().finish().is_err());
    }

    #[test]
    fn load_rejects_tampered_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("normalizer.json");

        let model = fitted();
        model.save(&path).expect("save");
        assert_eq!(NormalizationModel::load(&path).expect("load"), model);

        let mut tampered = model.clone();
        tampered.log_citations.max = 1.0;
        write_json_pretty(&path, &tampered).expect("write tampered");
        let err = NormalizationModel::load(&path).expect_err("checksum must fail");
        assert!(err.to_string().contains("checksum"));
    }
}
