use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::application::config::configuration::RoutingConfig;
use crate::db::spans::PendingSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Code,
    NonCode,
}

/// Weight for an unmatched path (spec §4.2).
const DEFAULT_WEIGHT: u8 = 5;

/// Resolves the configured `patterns -> weight` mapping for a path.
/// Collision policy is pessimistic: the largest matching weight wins.
pub fn resolve_weight(routing: &RoutingConfig, relative_path: &str) -> u8 {
    routing
        .path_weights
        .iter()
        .filter(|pw| glob_match(&pw.glob, relative_path))
        .map(|pw| pw.weight)
        .max()
        .unwrap_or(DEFAULT_WEIGHT)
}

fn glob_match(pattern: &str, path: &str) -> bool {
    match globset::Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(path),
        Err(_) => false,
    }
}

/// A span plus its scheduling-relevant metadata, scored and ordered by
/// `schedule`.
#[derive(Debug, Clone)]
pub struct ScheduledSpan {
    pub span: PendingSpan,
    pub weight: u8,
    pub score: u32,
}

fn base_for(content_type: &str) -> u32 {
    if content_type.eq_ignore_ascii_case("code") {
        100
    } else {
        10
    }
}

/// `score = base(content_type) * (11 - weight) / 10 + modifiers`, clamped
/// to `[0, 200]` (spec §4.2).
pub fn score_span(routing: &RoutingConfig, span: &PendingSpan, file_mtime: Option<i64>) -> (u8, u32) {
    let weight = resolve_weight(routing, &span.relative_path);
    let base = base_for(&span.content_type);
    let mut score = base * (11 - weight as u32) / 10;

    if span.last_enriched_at.is_none() {
        score += 50;
    }
    if let (Some(mtime), Some(last)) = (file_mtime, span.last_enriched_at) {
        if mtime > last {
            score += 30;
        }
    }
    if weight <= 2 {
        score += 20;
    }

    (weight, score.min(200))
}

/// Weight-respecting priority queue with a bounded-starvation escape
/// hatch (spec §4.2 NFR2). Spans are grouped into a high tier (weight <=
/// 3) and a low tier (weight > 5); everything in between (weight 4-5)
/// rides with whichever tier it scores closer to via plain score order
/// within each dispatch round.
pub struct Scheduler {
    high: VecDeque<ScheduledSpan>,
    mid_low: VecDeque<ScheduledSpan>,
    starvation_bound: u32,
    high_dispatched_since_low: u32,
}

impl Scheduler {
    pub fn new(routing: &RoutingConfig, spans: Vec<PendingSpan>, starvation_bound: u32) -> Self {
        let mut scored: Vec<ScheduledSpan> = spans
            .into_iter()
            .map(|span| {
                let (weight, score) = score_span(routing, &span, None);
                ScheduledSpan { span, weight, score }
            })
            .collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));

        let mut high = VecDeque::new();
        let mut mid_low = VecDeque::new();
        for item in scored {
            if item.weight <= 3 {
                high.push_back(item);
            } else {
                mid_low.push_back(item);
            }
        }

        Self {
            high,
            mid_low,
            starvation_bound: starvation_bound.max(1),
            high_dispatched_since_low: 0,
        }
    }

    /// Pulls up to `limit` spans, respecting a stop predicate that is
    /// checked between every dispatch so cancellation costs at most one
    /// span's worth of work.
    pub fn pull(&mut self, limit: usize, stop_check: impl Fn() -> bool) -> Vec<ScheduledSpan> {
        let mut out = Vec::with_capacity(limit);
        while out.len() < limit {
            if stop_check() {
                break;
            }

            let take_low = self.high_dispatched_since_low >= self.starvation_bound
                && self.mid_low.iter().any(|s| s.weight > 5);

            let next = if take_low {
                self.take_low_priority()
            } else if let Some(item) = self.high.pop_front() {
                self.high_dispatched_since_low += 1;
                Some(item)
            } else {
                self.take_low_priority()
            };

            match next {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }

    fn take_low_priority(&mut self) -> Option<ScheduledSpan> {
        let item = self.mid_low.pop_front();
        if item.is_some() {
            self.high_dispatched_since_low = 0;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::configuration::PathWeight;

    fn span(path: &str, content_type: &str, enriched: Option<i64>) -> PendingSpan {
        PendingSpan {
            span_id: 1,
            file_id: 1,
            span_hash: format!("hash-{path}"),
            relative_path: path.to_string(),
            content_type: content_type.to_string(),
            language: None,
            last_enriched_at: enriched,
        }
    }

    #[test]
    fn pessimistic_collision_takes_largest_weight() {
        let routing = RoutingConfig {
            path_weights: vec![
                PathWeight { glob: "src/**".into(), weight: 1 },
                PathWeight { glob: "**/*.rs".into(), weight: 8 },
            ],
        };
        assert_eq!(resolve_weight(&routing, "src/main.rs"), 8);
    }

    #[test]
    fn unmatched_path_defaults_to_five() {
        let routing = RoutingConfig::default();
        assert_eq!(resolve_weight(&routing, "anything.rs"), 5);
    }

    #[test]
    fn starvation_bound_dispatches_one_low_for_every_h_high() {
        let routing = RoutingConfig {
            path_weights: vec![
                PathWeight { glob: "src/**".into(), weight: 1 },
                PathWeight { glob: "docs/**".into(), weight: 9 },
            ],
        };
        let mut spans = Vec::new();
        for i in 0..10 {
            spans.push(span(&format!("src/f{i}.rs"), "code", Some(0)));
        }
        spans.push(span("docs/readme.md", "docs", Some(0)));

        let mut scheduler = Scheduler::new(&routing, spans, 3);
        let pulled = scheduler.pull(4, || false);
        assert_eq!(pulled.len(), 4);
        // after 3 high dispatches, the 4th must be the low-weight doc span
        assert!(pulled[3].weight > 5);
    }
}
