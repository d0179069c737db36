//! Sentence-aware text chunking for rulebook ingestion. A pure, synchronous
//! function deliberately kept independent of the async pipeline so it stays
//! trivially unit-testable.

use std::sync::LazyLock;

use regex::Regex;

pub const DEFAULT_MAX_TOKENS: usize = 400;
pub const DEFAULT_OVERLAP_FRACTION: f64 = 0.5;

/// One chunk produced by [`chunk_page`], before it becomes a [`common::storage::types::chunk::Chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCandidate {
    pub chunk_index: i64,
    pub chunk_text: String,
    pub char_count: usize,
    pub estimated_tokens: usize,
}

/// 1 token ≈ 4 characters for English text.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Jr.", "Sr.", "Inc.", "Ltd.", "Corp.", "vs.", "e.g.",
    "i.e.", "etc.",
];

#[allow(clippy::unwrap_used)]
static DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)\.(\d)").unwrap());
#[allow(clippy::unwrap_used)]
static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[.!?])\s+(?=[A-Z])").unwrap());
#[allow(clippy::unwrap_used)]
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Splits text into sentences, protecting common abbreviations and decimal
/// numbers from being mistaken for sentence boundaries.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let collapsed = WHITESPACE_RE.replace_all(text, " ");
    let collapsed = collapsed.trim();
    if collapsed.is_empty() {
        return Vec::new();
    }

    let mut protected = collapsed.to_string();
    for abbr in ABBREVIATIONS {
        let marker = abbr.replace('.', "<<DOT>>");
        protected = replace_case_insensitive(&protected, abbr, &marker);
    }
    protected = DECIMAL_RE.replace_all(&protected, "$1<<DECIMAL>>$2").into_owned();

    let mut sentences = Vec::new();
    let mut last_end = 0;
    for mat in SENTENCE_SPLIT_RE.find_iter(&protected) {
        let boundary = mat.start() + 1; // keep the terminal punctuation with the sentence
        sentences.push(protected[last_end..boundary].to_string());
        last_end = mat.end() - 1; // the lookahead capital letter starts the next sentence
    }
    sentences.push(protected[last_end..].to_string());

    sentences
        .into_iter()
        .map(|s| s.replace("<<DOT>>", ".").replace("<<DECIMAL>>", ".").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower_hay = haystack.to_ascii_lowercase();
    let lower_needle = needle.to_ascii_lowercase();
    let mut result = String::with_capacity(haystack.len());
    let mut pos = 0;
    while let Some(found) = lower_hay[pos..].find(&lower_needle) {
        let start = pos + found;
        let end = start + needle.len();
        result.push_str(&haystack[pos..start]);
        result.push_str(replacement);
        pos = end;
    }
    result.push_str(&haystack[pos..]);
    result
}

/// Chunks a single page of text into overlapping sentence-bounded segments,
/// splitting by word when a single sentence exceeds `max_tokens`.
pub fn chunk_page(
    text: &str,
    max_tokens: usize,
    overlap_fraction: f64,
    start_index: i64,
) -> Vec<ChunkCandidate> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut sentences = split_into_sentences(text);
    if sentences.is_empty() {
        sentences.push(text.trim().to_string());
    }

    let overlap_tokens = (max_tokens as f64 * overlap_fraction) as usize;
    let mut chunks = Vec::new();
    let mut current_sentences: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;
    let mut chunk_index = start_index;

    let mut emit = |sentences: &[String], chunks: &mut Vec<ChunkCandidate>, idx: &mut i64| {
        let joined = sentences.join(" ");
        chunks.push(ChunkCandidate {
            chunk_index: *idx,
            char_count: joined.len(),
            estimated_tokens: estimate_tokens(&joined),
            chunk_text: joined,
        });
        *idx += 1;
    };

    for sentence in sentences {
        let sentence_tokens = estimate_tokens(&sentence);

        if sentence_tokens > max_tokens {
            if !current_sentences.is_empty() {
                emit(&current_sentences, &mut chunks, &mut chunk_index);
                current_sentences.clear();
                current_tokens = 0;
            }

            let words: Vec<&str> = sentence.split_whitespace().collect();
            let mut word_chunk: Vec<&str> = Vec::new();
            let mut word_tokens = 0usize;

            for word in words {
                let word_token_count = estimate_tokens(&format!("{word} "));
                if word_tokens + word_token_count > max_tokens && !word_chunk.is_empty() {
                    emit(
                        &[word_chunk.join(" ")],
                        &mut chunks,
                        &mut chunk_index,
                    );
                    let overlap_word_count = (word_chunk.len() / 2).max(1);
                    let tail: Vec<&str> =
                        word_chunk[word_chunk.len() - overlap_word_count..].to_vec();
                    word_tokens = tail.iter().map(|w| estimate_tokens(&format!("{w} "))).sum();
                    word_chunk = tail;
                }
                word_chunk.push(word);
                word_tokens += word_token_count;
            }

            if !word_chunk.is_empty() {
                current_sentences = vec![word_chunk.join(" ")];
                current_tokens = word_tokens;
            }
            continue;
        }

        if current_tokens + sentence_tokens > max_tokens && !current_sentences.is_empty() {
            emit(&current_sentences, &mut chunks, &mut chunk_index);

            let mut overlap_sentences: Vec<String> = Vec::new();
            let mut overlap_token_count = 0usize;
            for sent in current_sentences.iter().rev() {
                let sent_tokens = estimate_tokens(sent);
                if overlap_token_count + sent_tokens <= overlap_tokens {
                    overlap_sentences.insert(0, sent.clone());
                    overlap_token_count += sent_tokens;
                } else {
                    break;
                }
            }
            current_sentences = overlap_sentences;
            current_tokens = overlap_token_count;
        }

        current_sentences.push(sentence);
        current_tokens += sentence_tokens;
    }

    if !current_sentences.is_empty() {
        emit(&current_sentences, &mut chunks, &mut chunk_index);
    }

    chunks
}

/// Chunks an entire document, renumbering `chunk_index` to be globally
/// contiguous across pages.
pub fn chunk_document(pages: &[(i64, String)], max_tokens: usize, overlap_fraction: f64) -> Vec<(i64, ChunkCandidate)> {
    let mut all = Vec::new();
    let mut next_index = 0;

    for (page_number, page_text) in pages {
        let page_chunks = chunk_page(page_text, max_tokens, overlap_fraction, next_index);
        if let Some(last) = page_chunks.last() {
            next_index = last.chunk_index + 1;
        }
        for candidate in page_chunks {
            all.push((*page_number, candidate));
        }
    }

    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_into_sentences_protects_abbreviations() {
        let sentences = split_into_sentences("Dr. Smith arrived. He was late.");
        assert_eq!(sentences, vec!["Dr. Smith arrived.", "He was late."]);
    }

    #[test]
    fn split_into_sentences_protects_decimals() {
        let sentences = split_into_sentences("Roll a 3.5 on the die. Then move.");
        assert_eq!(sentences, vec!["Roll a 3.5 on the die.", "Then move."]);
    }

    #[test]
    fn chunk_page_is_empty_for_blank_input() {
        assert!(chunk_page("   ", DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_FRACTION, 0).is_empty());
    }

    #[test]
    fn chunk_page_splits_oversized_sentences_by_word() {
        let long_word_run = "word ".repeat(2000);
        let chunks = chunk_page(&long_word_run, DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_FRACTION, 0);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.estimated_tokens <= DEFAULT_MAX_TOKENS + 50);
        }
    }

    #[test]
    fn chunk_page_indices_are_contiguous() {
        let text = "One sentence here. ".repeat(200);
        let chunks = chunk_page(&text, DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_FRACTION, 5);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, 5 + i as i64);
        }
    }

    #[test]
    fn chunk_document_renumbers_across_pages() {
        let pages = vec![
            (1i64, "First page sentence one. First page sentence two.".to_string()),
            (2i64, "Second page sentence one. Second page sentence two.".to_string()),
        ];
        let chunks = chunk_document(&pages, DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_FRACTION);
        let indices: Vec<i64> = chunks.iter().map(|(_, c)| c.chunk_index).collect();
        let expected: Vec<i64> = (0..indices.len() as i64).collect();
        assert_eq!(indices, expected);
    }
}
