use crate::error::AnalysisError;

/// A chunk ready for insertion into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInsert {
    pub id: String,
    pub index: usize,
    pub content: String,
}

/// Split text into overlapping character windows.
///
/// Windows are `size` characters long and start every `size - overlap`
/// characters. Each window is trimmed; whitespace-only windows are dropped.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>, AnalysisError> {
    if size == 0 || overlap >= size {
        return Err(AnalysisError::InvalidChunking { size, overlap });
    }
    let chars: Vec<char> = text.chars().collect();
    let step = size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        start += step;
    }
    Ok(chunks)
}

/// Chunk a policy's text and assign stable ids (`<policy_id>_chunk_0007`).
pub fn chunk_policy(
    policy_id: &str,
    text: &str,
    size: usize,
    overlap: usize,
) -> Result<Vec<ChunkInsert>, AnalysisError> {
    Ok(chunk_text(text, size, overlap)?
        .into_iter()
        .enumerate()
        .map(|(index, content)| ChunkInsert {
            id: chunk_id(policy_id, index),
            index,
            content,
        })
        .collect())
}

pub fn chunk_id(policy_id: &str, index: usize) -> String {
    format!("{policy_id}_chunk_{index:04}")
}
