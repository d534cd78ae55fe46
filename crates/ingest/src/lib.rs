//! Document reading, chunking and per-chunk graph mining.

pub mod chunk;
pub mod chunker;
pub mod document;
pub mod miner;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};
pub use document::{generate_doc_id, DocumentFormat, ProcessedDocument};
pub use miner::{ChunkOutcome, GraphMiner, MinerConfig, MiningReport};
pub use reader::FileReader;

use anyhow::Result;
use std::path::Path;

/// Read and chunk a single file.
pub async fn ingest_file(file_path: &Path, config: ChunkerConfig) -> Result<ProcessedDocument> {
    let mut doc = FileReader::read_file(file_path).await?;
    Chunker::new(config).chunk_document(&mut doc);
    Ok(doc)
}

/// Read and chunk every supported file below a directory.
pub async fn ingest_directory(dir_path: &Path, config: ChunkerConfig) -> Result<Vec<ProcessedDocument>> {
    let mut docs = FileReader::read_directory(dir_path).await?;
    let chunker = Chunker::new(config);

    for doc in &mut docs {
        chunker.chunk_document(doc);
    }

    Ok(docs)
}
