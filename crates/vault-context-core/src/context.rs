//! Token-budgeted context assembly.
//!
//! Candidates are visited highest score first. Each one's content is split
//! into word chunks ([`chunk_words`]) which are appended while the running
//! token count plus the next chunk stays within `max_tokens`. The first
//! chunk that does not fit ends assembly; chunks are never truncated.
//!
//! With `source_headers` enabled every included note is introduced by a
//! `### <path>` line, counted against the budget together with the note's
//! first chunk.

use serde::{Deserialize, Serialize};

use crate::chunk::{chunk_words, count_tokens};
use crate::error::{Error, Result};
use crate::models::{AssembledContext, Candidate, ContextSource};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget (words).
    pub max_tokens: usize,
    /// Words per chunk.
    pub chunk_size: usize,
    pub source_headers: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            chunk_size: 200,
            source_headers: true,
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::invalid_argument("context.max_tokens must be > 0"));
        }
        if self.chunk_size == 0 {
            return Err(Error::invalid_argument("context.chunk_size must be > 0"));
        }
        Ok(())
    }
}

/// Pack candidate content into a context of at most `max_tokens` tokens.
///
/// Returns an empty context (`token_count == 0`, `budget_used_pct == 0.0`)
/// when nothing fits rather than failing.
pub fn assemble_context(candidates: &[Candidate], config: &ContextConfig) -> Result<AssembledContext> {
    config.validate()?;

    let mut order: Vec<&Candidate> = candidates.iter().collect();
    order.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));

    let mut content = String::new();
    let mut token_count = 0usize;
    let mut sources = Vec::new();

    'candidates: for candidate in order {
        let Some(text) = candidate.content.as_deref() else {
            continue;
        };
        let chunks = chunk_words(text, config.chunk_size);
        if chunks.is_empty() {
            continue;
        }

        let header = format!("### {}", candidate.path);
        let header_tokens = if config.source_headers { count_tokens(&header) } else { 0 };
        let mut packed = 0usize;
        let mut exhausted = false;

        for chunk in &chunks {
            let cost = chunk.tokens + if packed == 0 { header_tokens } else { 0 };
            if token_count + cost > config.max_tokens {
                exhausted = true;
                break;
            }
            if packed == 0 {
                if !content.is_empty() {
                    content.push_str("\n\n");
                }
                if config.source_headers {
                    content.push_str(&header);
                    content.push_str("\n\n");
                }
            } else {
                content.push('\n');
            }
            content.push_str(&chunk.text);
            token_count += cost;
            packed += 1;
        }

        if packed > 0 {
            sources.push(ContextSource {
                path: candidate.path.clone(),
                score: candidate.match_score,
                chunks: packed,
            });
        }
        if exhausted {
            break 'candidates;
        }
    }

    Ok(AssembledContext {
        content,
        token_count,
        budget_used_pct: token_count as f64 / config.max_tokens as f64 * 100.0,
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchType;

    fn doc(path: &str, score: f64, words: usize) -> Candidate {
        let body = (0..words).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        Candidate::new(path, MatchType::Content, score).with_content(body)
    }

    fn config(max_tokens: usize, chunk_size: usize) -> ContextConfig {
        ContextConfig {
            max_tokens,
            chunk_size,
            source_headers: false,
        }
    }

    #[test]
    fn test_never_exceeds_budget() {
        let input: Vec<Candidate> = (0..10).map(|i| doc(&format!("{i}.md"), i as f64, 37)).collect();
        for max in [1, 5, 10, 50, 99, 100, 101, 370, 1000] {
            for chunk in [1, 3, 10, 64] {
                let ctx = assemble_context(&input, &config(max, chunk)).unwrap();
                assert!(ctx.token_count <= max, "max={max} chunk={chunk} got {}", ctx.token_count);
                assert_eq!(ctx.token_count, count_tokens(&ctx.content));
            }
        }
    }

    #[test]
    fn test_highest_score_first() {
        let input = vec![doc("low.md", 1.0, 5), doc("high.md", 9.0, 5)];
        let ctx = assemble_context(&input, &config(100, 10)).unwrap();
        assert_eq!(ctx.sources[0].path, "high.md");
        assert_eq!(ctx.sources[1].path, "low.md");
    }

    #[test]
    fn test_stops_at_first_chunk_that_does_not_fit() {
        let input = vec![doc("a.md", 2.0, 10), doc("b.md", 1.0, 10)];
        let ctx = assemble_context(&input, &config(15, 4)).unwrap();
        // a.md: 4 + 4 + 2 = 10; b.md: next chunk of 4 fits (14), then 4 more would be 18.
        assert_eq!(ctx.token_count, 14);
        assert_eq!(ctx.sources.len(), 2);
        assert_eq!(ctx.sources[0].chunks, 3);
        assert_eq!(ctx.sources[1].chunks, 1);
    }

    #[test]
    fn test_budget_smaller_than_one_chunk_yields_empty() {
        let input = vec![doc("a.md", 1.0, 50)];
        let ctx = assemble_context(&input, &config(5, 10)).unwrap();
        assert_eq!(ctx.token_count, 0);
        assert!(ctx.content.is_empty());
        assert_eq!(ctx.budget_used_pct, 0.0);
        assert!(ctx.sources.is_empty());
    }

    #[test]
    fn test_headers_count_against_budget() {
        let input = vec![doc("notes/a.md", 1.0, 3)];
        let cfg = ContextConfig {
            max_tokens: 5,
            chunk_size: 10,
            source_headers: true,
        };
        let ctx = assemble_context(&input, &cfg).unwrap();
        assert_eq!(ctx.token_count, 5);
        assert!(ctx.content.starts_with("### notes/a.md\n\n"));
        assert_eq!(ctx.budget_used_pct, 100.0);

        let tight = ContextConfig { max_tokens: 4, ..cfg };
        let ctx = assemble_context(&input, &tight).unwrap();
        assert_eq!(ctx.token_count, 0);
    }

    #[test]
    fn test_candidates_without_content_are_skipped() {
        let input = vec![Candidate::new("empty.md", MatchType::Filename, 10.0), doc("a.md", 1.0, 3)];
        let ctx = assemble_context(&input, &config(100, 10)).unwrap();
        assert_eq!(ctx.sources.len(), 1);
        assert_eq!(ctx.sources[0].path, "a.md");
        assert!((ctx.budget_used_pct - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(matches!(
            assemble_context(&[], &config(0, 10)),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
