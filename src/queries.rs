use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::model::Query;

pub struct QuerySetReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
    last_query_id: Option<u64>,
    embedding_dim: Option<usize>,
}

impl QuerySetReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open query set {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
            last_query_id: None,
            embedding_dim: None,
        })
    }

    fn parse_line(&mut self, line: &str) -> Result<Query> {
        let query: Query = serde_json::from_str(line).with_context(|| {
            format!(
                "failed to parse query at {}:{}",
                self.path.display(),
                self.line_number
            )
        })?;

        if let Some(previous) = self.last_query_id {
            if query.global_query_id <= previous {
                bail!(
                    "query set {} is not in ascending global_query_id order at line {} ({} after {})",
                    self.path.display(),
                    self.line_number,
                    query.global_query_id,
                    previous
                );
            }
        }

        if query.embedding.is_empty() {
            bail!(
                "query {} at {}:{} has an empty embedding",
                query.global_query_id,
                self.path.display(),
                self.line_number
            );
        }
        match self.embedding_dim {
            Some(dim) if dim != query.embedding.len() => bail!(
                "query {} at {}:{} has embedding dimension {} (expected {})",
                query.global_query_id,
                self.path.display(),
                self.line_number,
                query.embedding.len(),
                dim
            ),
            Some(_) => {}
            None => self.embedding_dim = Some(query.embedding.len()),
        }

        self.last_query_id = Some(query.global_query_id);
        Ok(query)
    }
}

impl Iterator for QuerySetReader {
    type Item = Result<Query>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    return Some(Err(err).with_context(|| {
                        format!("failed to read query set {}", self.path.display())
                    }));
                }
            };
            self.line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(self.parse_line(trimmed));
        }
    }
}

pub fn count_queries(path: &Path) -> Result<usize> {
    let file =
        File::open(path).with_context(|| format!("failed to open query set {}", path.display()))?;
    let mut count = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("failed to read query set {}", path.display()))?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_lines(dir: &Path, lines: &[&str]) -> PathBuf {
        let path = dir.join("queries.jsonl");
        fs::write(&path, lines.join("\n")).expect("write queries");
        path
    }

    #[test]
    fn reads_queries_in_order_and_skips_blank_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_lines(
            dir.path(),
            &[
                r#"{"global_query_id": 0, "phrase": "graph learning", "embedding": [1.0, 0.0]}"#,
                "",
                r#"{"global_query_id": 4, "phrase": "soil carbon", "embedding": [0.0, 1.0]}"#,
            ],
        );

        let queries = QuerySetReader::open(&path)
            .expect("open")
            .collect::<Result<Vec<Query>>>()
            .expect("parse");
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].global_query_id, 4);
        assert_eq!(queries[1].phrase, "soil carbon");
        assert_eq!(count_queries(&path).expect("count"), 2);
    }

    #[test]
    fn rejects_non_ascending_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_lines(
            dir.path(),
            &[
                r#"{"global_query_id": 3, "phrase": "a", "embedding": [1.0]}"#,
                r#"{"global_query_id": 3, "phrase": "b", "embedding": [1.0]}"#,
            ],
        );

        let result = QuerySetReader::open(&path)
            .expect("open")
            .collect::<Result<Vec<Query>>>();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_mixed_embedding_dimensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_lines(
            dir.path(),
            &[
                r#"{"global_query_id": 1, "phrase": "a", "embedding": [1.0, 0.0]}"#,
                r#"{"global_query_id": 2, "phrase": "b", "embedding": [1.0]}"#,
            ],
        );

        let mut reader = QuerySetReader::open(&path).expect("open");
        assert!(reader.next().expect("first").is_ok());
        assert!(reader.next().expect("second").is_err());
    }
}
