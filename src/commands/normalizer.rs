use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::cli::FitNormalizerArgs;
use crate::corpus::{for_each_article, open_corpus_read_only};
use crate::normalization::{NormalizationModel, NormalizerFit};

pub fn run(args: FitNormalizerArgs) -> Result<()> {
    let model = fit_from_corpus(&args.corpus_db)?;
    model.save(&args.output_path)?;

    info!(
        path = %args.output_path.display(),
        articles = model.article_count,
        year_min = model.year.min,
        year_max = model.year.max,
        log_citations_max = model.log_citations.max,
        checksum = %model.checksum,
        "normalization model fitted"
    );
    Ok(())
}

fn fit_from_corpus(corpus_db: &Path) -> Result<NormalizationModel> {
    let connection = open_corpus_read_only(corpus_db)?;
    let mut fit = NormalizerFit::default();
    for_each_article(&connection, |article| fit.observe(&article))?;
    fit.finish()
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::corpus::{ensure_corpus_schema, upsert_article};
    use crate::model::{Article, ArticleRecord};
    use crate::normalization::log_citations;

    #[test]
    fn fitted_artifact_round_trips_through_checksum_verification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus_db = dir.path().join("corpus.sqlite");
        let mut connection = Connection::open(&corpus_db).expect("open");
        ensure_corpus_schema(&connection).expect("schema");
        let tx = connection.transaction().expect("tx");
        for (article_id, year, citation_count) in [(1, 1995, 0), (2, 2020, 120), (3, 2005, 9)] {
            upsert_article(
                &tx,
                &ArticleRecord {
                    article: Article {
                        article_id,
                        title: format!("paper {article_id}"),
                        year,
                        citation_count,
                        gov_score: 30.0 + article_id as f64,
                    },
                    embedding: vec![1.0, 0.0],
                },
            )
            .expect("upsert");
        }
        tx.commit().expect("commit");
        drop(connection);

        let model = fit_from_corpus(&corpus_db).expect("fit");
        assert_eq!(model.article_count, 3);
        assert_eq!(model.year.min, 1995.0);
        assert_eq!(model.year.max, 2020.0);
        assert_eq!(model.log_citations.max, log_citations(120));

        let path = dir.path().join("normalizer.json");
        model.save(&path).expect("save");
        let loaded = NormalizationModel::load(&path).expect("load");
        assert_eq!(loaded, model);
    }

    #[test]
    fn empty_corpus_cannot_be_fitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus_db = dir.path().join("corpus.sqlite");
        let connection = Connection::open(&corpus_db).expect("open");
        ensure_corpus_schema(&connection).expect("schema");
        drop(connection);

        assert!(fit_from_corpus(&corpus_db).is_err());
    }
}
