use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use crate::document::{DocumentFormat, ProcessedDocument};

pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<ProcessedDocument> {
        let format = DocumentFormat::from_path(path)
            .with_context(|| format!("Unsupported file format: {:?}", path))?;

        let raw = fs::read_to_string(path)
            .await
            .context(format!("Failed to read file: {:?}", path))?;

        let filename = path.to_string_lossy().to_string();
        let mut doc = ProcessedDocument::new(&filename, format, format.extract_text(&raw));
        doc.metadata.insert("path".to_string(), filename);
        doc.metadata.insert("size_bytes".to_string(), raw.len().to_string());
        Ok(doc)
    }

    /// Read every supported file below `dir`, in path order. Unsupported
    /// files are skipped.
    pub async fn read_directory(dir: &Path) -> Result<Vec<ProcessedDocument>> {
        let mut paths: Vec<_> = WalkDir::new(dir)
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .context(format!("Failed to walk directory: {:?}", dir))?
            .into_iter()
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        paths.sort();

        let mut documents = Vec::new();
        for path in paths {
            if DocumentFormat::from_path(&path).is_none() {
                debug!(path = %path.display(), "Skipping unsupported file");
                continue;
            }
            documents.push(Self::read_file(&path).await?);
        }

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_directory_skips_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Marco Rossi lives in Rome.").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.html"), "<p>Rome is in Italy.</p>").unwrap();
        std::fs::write(dir.path().join("c.pdf"), "%PDF").unwrap();

        let docs = FileReader::read_directory(dir.path()).await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].format, DocumentFormat::PlainText);
        assert_eq!(docs[1].format, DocumentFormat::Html);
        assert_eq!(docs[1].source.trim(), "Rome is in Italy.");
        assert_eq!(docs[0].metadata["size_bytes"], "26");
    }

    #[tokio::test]
    async fn test_read_unsupported_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.pdf");
        std::fs::write(&path, "%PDF").unwrap();

        assert!(FileReader::read_file(&path).await.is_err());
    }
}
