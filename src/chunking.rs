//! Recursive-character text splitting and hierarchical proportional parent
//! mapping (§4.1). Grounded on the teacher's `ingest.rs::split_into_chunks`
//! (paragraph-first splitting with a size budget), generalized to a
//! separator-preference list and multiple levels.

use crate::config::ChunkingConfig;
use crate::models::ChunkLevel;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A single produced chunk, before `chunk_id`/embedding assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub level: ChunkLevel,
    pub level_index: i64,
    pub parent_index: Option<i64>,
    pub content: String,
}

/// Splits `text` into a dense sequence of chunks no longer than `size`
/// characters, preferring to break on the first separator in
/// [`SEPARATORS`] that yields pieces small enough to fit, with up to
/// `overlap` characters carried into the next chunk.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.len() <= size {
        let trimmed = text.trim();
        return if trimmed.is_empty() { Vec::new() } else { vec![trimmed.to_string()] };
    }

    let pieces = split_by_best_separator(text, size);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + 1 + piece.len() > size {
            chunks.push(std::mem::take(&mut current));
            if overlap > 0 {
                let tail = tail_chars(chunks.last().unwrap(), overlap);
                current.push_str(&tail);
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(piece);

        // A single piece longer than `size` (e.g. the "" separator already
        // applied) is hard-split on character boundaries.
        while current.len() > size {
            let split_at = floor_char_boundary(&current, size);
            let head: String = current[..split_at].to_string();
            chunks.push(head);
            let tail_start = floor_char_boundary(&current, split_at.saturating_sub(overlap.min(split_at)));
            current = current[tail_start..].to_string();
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn tail_chars(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let start = floor_char_boundary(s, s.len() - max_len);
    s[start..].to_string()
}

fn split_by_best_separator(text: &str, size: usize) -> Vec<String> {
    for sep in SEPARATORS {
        if sep.is_empty() {
            return text.chars().collect::<Vec<_>>().chunks(size.max(1)).map(|c| c.iter().collect()).collect();
        }
        let parts: Vec<&str> = text.split(sep).collect();
        if parts.len() > 1 && parts.iter().all(|p| p.len() <= size || p.len() < text.len()) {
            return parts.into_iter().map(str::to_string).collect();
        }
    }
    vec![text.to_string()]
}

fn parent_index(child_index: i64, n_children: i64, n_parents: i64) -> i64 {
    if n_parents == 0 {
        return 0;
    }
    let mapped = (child_index * n_parents) / n_children.max(1);
    mapped.min(n_parents - 1)
}

/// Hierarchical strategy: one independent split per level, then proportional
/// parent-index linkage between adjacent levels (§4.1 steps 1-3).
pub fn chunk_hierarchical(text: &str, cfg: &ChunkingConfig) -> Vec<RawChunk> {
    let levels = [ChunkLevel::Parent, ChunkLevel::Child, ChunkLevel::Grandchild];
    let per_level: Vec<Vec<String>> = cfg
        .hierarchical_sizes
        .iter()
        .map(|&size| split_text(text, size, cfg.hierarchical_overlap))
        .collect();

    let mut out = Vec::new();
    for (level_idx, pieces) in per_level.iter().enumerate() {
        let level = levels[level_idx];
        let n_children = pieces.len() as i64;
        let n_parents = if level_idx == 0 { 0 } else { per_level[level_idx - 1].len() as i64 };

        for (i, content) in pieces.iter().enumerate() {
            let parent = if level_idx == 0 {
                None
            } else {
                Some(parent_index(i as i64, n_children, n_parents))
            };
            out.push(RawChunk {
                level,
                level_index: i as i64,
                parent_index: parent,
                content: content.clone(),
            });
        }
    }
    out
}

/// Recursive (alternative) strategy: single flat level, no parent linkage.
pub fn chunk_recursive(text: &str, cfg: &ChunkingConfig) -> Vec<RawChunk> {
    split_text(text, cfg.recursive_size, cfg.recursive_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, content)| RawChunk {
            level: ChunkLevel::Parent,
            level_index: i as i64,
            parent_index: None,
            content,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_mapping_matches_formula() {
        assert_eq!(parent_index(0, 10, 3), 0);
        assert_eq!(parent_index(9, 10, 3), 2);
        assert_eq!(parent_index(4, 10, 3), 1);
        // Never exceeds n_parents - 1 even for the last child.
        assert_eq!(parent_index(99, 100, 1), 0);
    }

    #[test]
    fn split_text_respects_size_budget() {
        let text = "word ".repeat(500);
        let chunks = split_text(&text, 200, 20);
        assert!(chunks.iter().all(|c| c.len() <= 220));
        assert!(!chunks.is_empty());
    }

    #[test]
    fn hierarchical_produces_three_levels_with_linked_parents() {
        let text = "Paragraph one.\n\nParagraph two.\n\nParagraph three.\n\n".repeat(50);
        let cfg = ChunkingConfig {
            strategy: crate::config::ChunkingStrategy::Hierarchical,
            hierarchical_sizes: [2000, 1000, 500],
            hierarchical_overlap: 100,
            recursive_size: 1000,
            recursive_overlap: 200,
        };
        let chunks = chunk_hierarchical(&text, &cfg);
        let parents: Vec<_> = chunks.iter().filter(|c| c.level == ChunkLevel::Parent).collect();
        let children: Vec<_> = chunks.iter().filter(|c| c.level == ChunkLevel::Child).collect();
        assert!(!parents.is_empty());
        assert!(!children.is_empty());
        for child in &children {
            let parent_idx = child.parent_index.expect("child must have a parent");
            assert!((parent_idx as usize) < parents.len());
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", 100, 10).is_empty());
        assert!(split_text("   ", 100, 10).is_empty());
    }
}
