//! Embedding-unit chunker.
//!
//! Splits a file's lines into chunks for the embedding pipeline.
//! When symbols are available the chunker aligns chunk boundaries with
//! them, which embeds semantically coherent units; fixed windows cover
//! everything else so no region of the file goes unsearchable.
//!
//! ## Algorithm
//!
//! 1. No symbols: fixed windows of `max_chunk_lines`, advancing by
//!    `max_chunk_lines - chunk_overlap`; a trailing window shorter
//!    than `min_chunk_lines` merges into the previous chunk.
//! 2. With symbols: one chunk per relevant symbol, from its line to
//!    the line before the next relevant symbol. Ranges shorter than
//!    `min_chunk_lines` are dropped back into the uncovered set;
//!    ranges longer than `max_chunk_lines` split by the fixed rule,
//!    inheriting the symbol's kind. Uncovered gaps are fixed-chunked.
//!
//! The chunker never emits two successive chunks with identical
//! coordinates and always advances past the previous chunk's start.

use std::collections::BTreeSet;

use crate::config::ChunkPolicy;
use crate::types::{is_relevant_kind, Chunk, Symbol};

/// Kind tag carried by fixed-window chunks.
pub const FIXED_KIND: &str = "fixed";

/// Chunk one file's content.
///
/// `symbols` may be empty, in which case the whole file is windowed.
/// Line numbers in the result are 1-indexed and inclusive.
pub fn chunk_file(
    path: &str,
    content: &str,
    symbols: &[Symbol],
    policy: &ChunkPolicy,
) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let line_count = lines.len() as u32;
    if line_count == 0 {
        return Vec::new();
    }

    let boundaries: Vec<u32> = symbols
        .iter()
        .filter(|s| is_relevant_kind(&s.kind))
        .map(|s| s.line.clamp(1, line_count))
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .collect();

    let mut ranges: Vec<(u32, u32, String)> = Vec::new();

    if boundaries.is_empty() {
        for (start, end) in fixed_ranges(1, line_count, policy, false) {
            ranges.push((start, end, FIXED_KIND.to_string()));
        }
    } else {
        let kind_of = |line: u32| -> String {
            symbols
                .iter()
                .filter(|s| is_relevant_kind(&s.kind))
                .find(|s| s.line.clamp(1, line_count) == line)
                .map(|s| s.kind.clone())
                .unwrap_or_else(|| FIXED_KIND.to_string())
        };

        let mut covered = vec![false; line_count as usize + 1];
        for (i, &start) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(i + 1)
                .map(|next| next - 1)
                .unwrap_or(line_count);
            if end < start {
                continue;
            }
            let len = end - start + 1;
            if len < policy.min_chunk_lines {
                // Too small to stand alone; the gap filler below picks
                // these lines up together with their surroundings.
                continue;
            }

            let kind = kind_of(start);
            if len > policy.max_chunk_lines {
                for (s, e) in fixed_ranges(start, end, policy, true) {
                    ranges.push((s, e, kind.clone()));
                }
            } else {
                ranges.push((start, end, kind));
            }
            for line in start..=end {
                covered[line as usize] = true;
            }
        }

        // Fixed-chunk every contiguous uncovered run.
        let mut gap_start: Option<u32> = None;
        for line in 1..=line_count {
            let is_covered = covered[line as usize];
            match (gap_start, is_covered) {
                (None, false) => gap_start = Some(line),
                (Some(start), true) => {
                    for (s, e) in fixed_ranges(start, line - 1, policy, true) {
                        ranges.push((s, e, FIXED_KIND.to_string()));
                    }
                    gap_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = gap_start {
            for (s, e) in fixed_ranges(start, line_count, policy, true) {
                ranges.push((s, e, FIXED_KIND.to_string()));
            }
        }
    }

    ranges.sort_unstable_by_key(|(start, end, _)| (*start, *end));

    let mut chunks: Vec<Chunk> = Vec::with_capacity(ranges.len());
    let mut prev: Option<(u32, u32)> = None;
    for (start, end, kind) in ranges {
        // Progress invariant: drop duplicates and anything that fails
        // to advance past the previous chunk's start.
        if let Some((prev_start, _)) = prev {
            if start <= prev_start {
                continue;
            }
        }
        prev = Some((start, end));
        chunks.push(Chunk {
            path: path.to_string(),
            start_line: start,
            end_line: end,
            content: materialize(&lines, start, end),
            kind,
        });
    }

    chunks
}

/// Windows over an inclusive line range by the fixed-chunker rule.
///
/// `allow_short`: emit a lone window even when the range is shorter
/// than `min_chunk_lines` (used for gap filling, where coverage wins
/// over the minimum). Without it, a range below the minimum yields
/// nothing.
fn fixed_ranges(
    start: u32,
    end: u32,
    policy: &ChunkPolicy,
    allow_short: bool,
) -> Vec<(u32, u32)> {
    if end < start {
        return Vec::new();
    }
    let len = end - start + 1;
    if len < policy.min_chunk_lines && !allow_short {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut s = start;
    loop {
        let e = (s + policy.max_chunk_lines - 1).min(end);
        windows.push((s, e));
        if e >= end {
            break;
        }
        s += policy.stride();
    }

    // Merge a short trailing window into its predecessor.
    if windows.len() >= 2 {
        let (last_start, last_end) = windows[windows.len() - 1];
        if last_end - last_start + 1 < policy.min_chunk_lines {
            windows.pop();
            if let Some(prev) = windows.last_mut() {
                prev.1 = end;
            }
        }
    }

    windows
}

fn materialize(lines: &[&str], start: u32, end: u32) -> String {
    lines[(start - 1) as usize..end.min(lines.len() as u32) as usize].join("\n")
}
