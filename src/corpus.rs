use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params};

use crate::model::{Article, ArticleRecord};
use crate::semantic::{decode_embedding_blob, encode_embedding_blob};

pub const CORPUS_SCHEMA_VERSION: &str = "0.1.0";

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub fn open_corpus_read_only(db_path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open corpus database read-only: {}", db_path.display()))
}

pub fn ensure_corpus_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS articles (
          article_id INTEGER PRIMARY KEY,
          title TEXT NOT NULL,
          year INTEGER NOT NULL,
          citation_count INTEGER NOT NULL CHECK (citation_count >= 0),
          gov_score REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS article_embeddings (
          article_id INTEGER PRIMARY KEY,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL,
          FOREIGN KEY(article_id) REFERENCES articles(article_id)
        );

        CREATE INDEX IF NOT EXISTS idx_articles_citation_count ON articles(citation_count);
        ",
    )?;

    connection.execute(
        "
        INSERT INTO metadata(key, value) VALUES('schema_version', ?1)
        ON CONFLICT(key) DO UPDATE SET value=excluded.value
        ",
        [CORPUS_SCHEMA_VERSION],
    )?;

    Ok(())
}

pub fn upsert_article(tx: &Transaction<'_>, record: &ArticleRecord) -> Result<()> {
    let article = &record.article;
    tx.execute(
        "
        INSERT INTO articles(article_id, title, year, citation_count, gov_score)
        VALUES(?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(article_id) DO UPDATE SET
          title=excluded.title,
          year=excluded.year,
          citation_count=excluded.citation_count,
          gov_score=excluded.gov_score
        ",
        params![
            to_sql_id(article.article_id)?,
            article.title,
            article.year,
            to_sql_id(article.citation_count)?,
            article.gov_score,
        ],
    )?;

    tx.execute(
        "
        INSERT INTO article_embeddings(article_id, embedding, embedding_dim)
        VALUES(?1, ?2, ?3)
        ON CONFLICT(article_id) DO UPDATE SET
          embedding=excluded.embedding,
          embedding_dim=excluded.embedding_dim
        ",
        params![
            to_sql_id(article.article_id)?,
            encode_embedding_blob(&record.embedding),
            record.embedding.len() as i64,
        ],
    )?;

    Ok(())
}

pub fn count_articles(connection: &Connection) -> Result<i64> {
    let count = connection.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
    Ok(count)
}

pub fn stored_embedding_dim(connection: &Connection) -> Result<Option<usize>> {
    let dim = connection
        .query_row(
            "SELECT embedding_dim FROM article_embeddings LIMIT 1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(dim.map(|value| value as usize))
}

pub fn for_each_article<F>(connection: &Connection, mut visit: F) -> Result<()>
where
    F: FnMut(Article) -> Result<()>,
{
    let mut statement = connection.prepare(
        "
        SELECT article_id, title, year, citation_count, gov_score
        FROM articles
        ORDER BY article_id ASC
        ",
    )?;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        visit(Article {
            article_id: from_sql_id(row.get(0)?)?,
            title: row.get(1)?,
            year: row.get(2)?,
            citation_count: from_sql_id(row.get(3)?)?,
            gov_score: row.get(4)?,
        })?;
    }

    Ok(())
}

pub fn for_each_embedded_article<F>(connection: &Connection, mut visit: F) -> Result<()>
where
    F: FnMut(Article, Vec<f32>) -> Result<()>,
{
    let mut statement = connection.prepare(
        "
        SELECT a.article_id, a.title, a.year, a.citation_count, a.gov_score,
               e.embedding, e.embedding_dim
        FROM articles a
        JOIN article_embeddings e ON e.article_id = a.article_id
        ORDER BY a.article_id ASC
        ",
    )?;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let article = Article {
            article_id: from_sql_id(row.get(0)?)?,
            title: row.get(1)?,
            year: row.get(2)?,
            citation_count: from_sql_id(row.get(3)?)?,
            gov_score: row.get(4)?,
        };
        let blob = row.get::<_, Vec<u8>>(5)?;
        let dim = row.get::<_, i64>(6)? as usize;
        let Some(embedding) = decode_embedding_blob(&blob, dim) else {
            bail!(
                "article {} has a corrupt embedding blob ({} bytes for dimension {})",
                article.article_id,
                blob.len(),
                dim
            );
        };
        visit(article, embedding)?;
    }

    Ok(())
}

pub fn empirical_citation_distribution(connection: &Connection) -> Result<BTreeMap<u64, u64>> {
    let mut statement = connection.prepare(
        "
        SELECT citation_count, COUNT(*)
        FROM articles
        GROUP BY citation_count
        ORDER BY citation_count ASC
        ",
    )?;

    let mut rows = statement.query([])?;
    let mut out = BTreeMap::<u64, u64>::new();
    while let Some(row) = rows.next()? {
        out.insert(from_sql_id(row.get(0)?)?, from_sql_id(row.get(1)?)?);
    }
    Ok(out)
}

pub fn to_sql_id(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("value {value} does not fit an sqlite integer"))
}

pub fn from_sql_id(value: i64) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("unexpected negative value {value} in database"))
}
