use crate::error::IngestError;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub separator: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            separator: ".".to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.separator.is_empty() {
            return Err(IngestError::InvalidChunkConfig(
                "separator must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset of the `chars`-th character, or `text.len()` past the end.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

fn tail(text: &str, chars: usize) -> &str {
    let total = char_len(text);
    &text[byte_offset(text, total.saturating_sub(chars))..]
}

/// Splits `text` after every occurrence of `separator`, keeping the separator
/// on the preceding unit.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut units = Vec::new();
    let mut start = 0;

    while let Some(position) = text[start..].find(separator) {
        let end = start + position + separator.len();
        units.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        units.push(&text[start..]);
    }

    units
}

/// Splits `text` into chunks of at most `chunk_size` characters.
///
/// Chunks are packed from separator-terminated units. Each chunk after the
/// first begins with up to `chunk_overlap` trailing characters of its
/// predecessor. The overlap shrinks when a unit would not fit beside it, and
/// only a unit longer than `chunk_size` on its own is cut at a character
/// boundary.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    if char_len(text) <= config.chunk_size {
        return Ok(vec![text.to_string()]);
    }

    let mut pending: VecDeque<String> = split_keeping_separator(text, &config.separator)
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    // characters of `current` that are carried over from the previous chunk
    let mut carried = 0usize;

    while let Some(unit) = pending.pop_front() {
        let unit_len = char_len(&unit);

        if current_len + unit_len <= config.chunk_size {
            current.push_str(&unit);
            current_len += unit_len;
            continue;
        }

        if current_len > carried {
            pending.push_front(unit);
        } else if unit_len <= config.chunk_size {
            let keep = config.chunk_size - unit_len;
            current = tail(&current, keep).to_string();
            current.push_str(&unit);
            carried = carried.min(keep);
            current_len = carried + unit_len;
            continue;
        } else {
            let room = config.chunk_size - current_len;
            let cut = byte_offset(&unit, room);
            current.push_str(&unit[..cut]);
            pending.push_front(unit[cut..].to_string());
        }

        let overlap = tail(&current, config.chunk_overlap).to_string();
        chunks.push(std::mem::take(&mut current));
        carried = char_len(&overlap);
        current_len = carried;
        current = overlap;
    }

    if current_len > carried {
        chunks.push(current);
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            separator: ".".to_string(),
            chunk_size,
            chunk_overlap,
        }
    }

    fn assert_overlapping(chunks: &[String], overlap: usize) {
        for pair in chunks.windows(2) {
            let suffix = tail(&pair[0], overlap);
            assert!(
                pair[1].starts_with(suffix),
                "{:?} does not start with {:?}",
                pair[1],
                suffix
            );
        }
    }

    fn assert_some_overlap(chunks: &[String], overlap: usize) {
        for pair in chunks.windows(2) {
            let shared = (1..=overlap).any(|chars| pair[1].starts_with(tail(&pair[0], chars)));
            assert!(shared, "{:?} shares no prefix with the end of {:?}", pair[1], pair[0]);
        }
    }

    const REGULATION: &str = "Products must carry a label. The label lists every ingredient. \
        Ingredients appear in descending order of weight. Fragrance may be declared as parfum. \
        Sunscreens must state their protection factor. Claims require supporting evidence. \
        Evidence must be kept on file for inspection.";

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn empty_text_has_no_chunks() -> Result<(), IngestError> {
        assert!(split_text("", &config(100, 10))?.is_empty());
        assert!(split_text("  \n ", &config(100, 10))?.is_empty());
        Ok(())
    }

    #[test]
    fn short_text_is_a_single_identical_chunk() -> Result<(), IngestError> {
        let text = "One short sentence. Another one.";
        let chunks = split_text(text, &ChunkingConfig::default())?;
        assert_eq!(chunks, vec![text.to_string()]);
        Ok(())
    }

    #[test]
    fn chunks_respect_size_and_overlap() -> Result<(), IngestError> {
        let config = config(80, 12);
        let chunks = split_text(REGULATION, &config)?;

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 80));
        assert_overlapping(&chunks, 12);
        Ok(())
    }

    #[test]
    fn chunks_cover_the_whole_text() -> Result<(), IngestError> {
        let config = config(70, 10);
        let chunks = split_text(REGULATION, &config)?;

        let mut rebuilt = chunks[0].clone();
        for pair in chunks.windows(2) {
            let carried = tail(&pair[0], 10);
            rebuilt.push_str(&pair[1][carried.len()..]);
        }
        assert_eq!(rebuilt, REGULATION);
        Ok(())
    }

    #[test]
    fn splits_prefer_the_separator() -> Result<(), IngestError> {
        let text = "aaaa. bbbb. cccc. dddd. eeee.";
        let chunks = split_text(text, &config(14, 2))?;

        assert_eq!(chunks[0], "aaaa. bbbb.");
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 14));
        assert_overlapping(&chunks, 2);
        Ok(())
    }

    #[test]
    fn sentence_longer_than_the_limit_is_cut() -> Result<(), IngestError> {
        let text = "x".repeat(45);
        let chunks = split_text(&text, &config(20, 5))?;

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 20));
        assert_overlapping(&chunks, 5);
        Ok(())
    }

    #[test]
    fn multibyte_text_is_counted_in_characters() -> Result<(), IngestError> {
        let text = "Protección solar obligatoria. Índice de protección visible. Fórmula registrada.";
        let chunks = split_text(text, &config(32, 4))?;

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 32));
        assert_some_overlap(&chunks, 4);
        assert!(chunks
            .iter()
            .any(|chunk| chunk.ends_with(" Índice de protección visible.")));
        Ok(())
    }

    #[test]
    fn sentence_that_fits_alone_is_never_cut() -> Result<(), IngestError> {
        let sentences: Vec<String> = ['a', 'b', 'c']
            .iter()
            .map(|letter| format!("{}.", letter.to_string().repeat(34)))
            .collect();
        let text = sentences.concat();

        let chunks = split_text(&text, &config(40, 10))?;

        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 40));
        for sentence in &sentences {
            assert!(
                chunks.iter().any(|chunk| chunk.contains(sentence.as_str())),
                "{sentence:?} was split across chunks: {chunks:?}"
            );
        }
        assert_some_overlap(&chunks, 10);
        assert_eq!(chunks[1], format!("aaaa.{}", sentences[1]));
        Ok(())
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let result = split_text(REGULATION, &config(10, 10));
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }
}
