use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::ImportCorpusArgs;
use crate::corpus::{
    configure_connection, count_articles, ensure_corpus_schema, stored_embedding_dim,
    upsert_article,
};
use crate::model::ArticleRecord;
use crate::util::ensure_parent_directory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImportSummary {
    imported: usize,
    batches: usize,
    embedding_dim: Option<usize>,
}

pub fn run(args: ImportCorpusArgs) -> Result<()> {
    let batch_size = args.batch_size.max(1);
    ensure_parent_directory(&args.corpus_db)?;

    let mut connection = Connection::open(&args.corpus_db)
        .with_context(|| format!("failed to open {}", args.corpus_db.display()))?;
    configure_connection(&connection)?;
    ensure_corpus_schema(&connection)?;

    let summary = import_articles(&mut connection, &args.articles_path, batch_size)?;
    if summary.imported == 0 {
        warn!(path = %args.articles_path.display(), "no articles found in input");
    }

    info!(
        path = %args.corpus_db.display(),
        imported = summary.imported,
        batches = summary.batches,
        embedding_dim = ?summary.embedding_dim,
        articles_total = count_articles(&connection)?,
        "corpus import completed"
    );
    Ok(())
}

fn import_articles(
    connection: &mut Connection,
    articles_path: &Path,
    batch_size: usize,
) -> Result<ImportSummary> {
    let file = File::open(articles_path)
        .with_context(|| format!("failed to open {}", articles_path.display()))?;

    let mut summary = ImportSummary {
        imported: 0,
        batches: 0,
        embedding_dim: stored_embedding_dim(connection)?,
    };
    let mut pending = Vec::<ArticleRecord>::with_capacity(batch_size);

    for (line_index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", articles_path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let location = format!("{}:{}", articles_path.display(), line_index + 1);
        let record: ArticleRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("failed to parse article at {location}"))?;
        validate_record(&record, &mut summary.embedding_dim)
            .with_context(|| format!("invalid article at {location}"))?;
        pending.push(record);

        if pending.len() >= batch_size {
            summary.imported += flush_article_batch(connection, &mut pending)?;
            summary.batches += 1;
            info!(imported = summary.imported, "corpus batch committed");
        }
    }

    if !pending.is_empty() {
        summary.imported += flush_article_batch(connection, &mut pending)?;
        summary.batches += 1;
    }

    Ok(summary)
}

fn validate_record(record: &ArticleRecord, embedding_dim: &mut Option<usize>) -> Result<()> {
    if record.embedding.is_empty() {
        bail!("article {} has an empty embedding", record.article.article_id);
    }
    if record.embedding.iter().any(|value| !value.is_finite()) {
        bail!("article {} has a non-finite embedding value", record.article.article_id);
    }
    if !record.article.gov_score.is_finite() {
        bail!(
            "article {} has non-finite gov_score {}",
            record.article.article_id,
            record.article.gov_score
        );
    }

    match *embedding_dim {
        Some(dim) if dim != record.embedding.len() => bail!(
            "article {} has embedding dimension {} but the corpus uses {}",
            record.article.article_id,
            record.embedding.len(),
            dim
        ),
        Some(_) => {}
        None => *embedding_dim = Some(record.embedding.len()),
    }
    Ok(())
}

fn flush_article_batch(
    connection: &mut Connection,
    pending: &mut Vec<ArticleRecord>,
) -> Result<usize> {
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = connection.transaction()?;
    let mut written = 0usize;
    for record in pending.drain(..) {
        upsert_article(&tx, &record)?;
        written += 1;
    }
    tx.commit()?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    fn article_line(article_id: u64, embedding: &str) -> String {
        format!(
            r#"{{"article_id": {article_id}, "title": "paper {article_id}", "year": 2001, "citation_count": {}, "gov_score": 55.5, "embedding": {embedding}}}"#,
            article_id * 3
        )
    }

    fn setup(lines: &[String]) -> (tempfile::TempDir, PathBuf, Connection) {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("articles.jsonl");
        fs::write(&input, lines.join("\n")).expect("write input");
        let connection = Connection::open(dir.path().join("corpus.sqlite")).expect("open");
        ensure_corpus_schema(&connection).expect("schema");
        (dir, input, connection)
    }

    #[test]
    fn imports_in_batches_and_upserts_on_reimport() {
        let (_dir, input, mut connection) = setup(&[
            article_line(1, "[1.0, 0.0]"),
            String::new(),
            article_line(2, "[0.0, 1.0]"),
            article_line(3, "[0.5, 0.5]"),
        ]);

        let summary = import_articles(&mut connection, &input, 2).expect("import");
        assert_eq!(summary.imported, 3);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.embedding_dim, Some(2));

        import_articles(&mut connection, &input, 2).expect("reimport");
        assert_eq!(count_articles(&connection).expect("count"), 3);
    }

    #[test]
    fn rejects_dimension_that_disagrees_with_stored_corpus() {
        let (dir, input, mut connection) = setup(&[article_line(1, "[1.0, 0.0]")]);
        import_articles(&mut connection, &input, 10).expect("import");

        let wider = dir.path().join("wider.jsonl");
        fs::write(&wider, article_line(2, "[1.0, 0.0, 0.0]")).expect("write");
        assert!(import_articles(&mut connection, &wider, 10).is_err());
        assert_eq!(count_articles(&connection).expect("count"), 1);
    }

    #[test]
    fn rejects_empty_embeddings() {
        let (_dir, input, mut connection) = setup(&[article_line(1, "[]")]);
        assert!(import_articles(&mut connection, &input, 10).is_err());
    }
}
