//! Per-session token accounting priced from a static rate table.

use webprobe_core::{CostBreakdown, TokenUsage};

/// Dollars per million tokens (input, output). Longest matching prefix wins.
const RATES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("o3-mini", 1.10, 4.40),
    ("o3", 2.00, 8.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-haiku", 0.80, 4.00),
    ("claude-sonnet", 3.00, 15.00),
    ("claude-opus", 15.00, 75.00),
];

/// Conservative default for models missing from the table.
const DEFAULT_RATE: (f64, f64) = (3.00, 15.00);

fn rate_for(model: &str) -> (f64, f64) {
    RATES
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or(DEFAULT_RATE)
}

/// Accumulates usage across the session's model calls. Mutated only here;
/// everything else reads the derived [`CostBreakdown`].
pub struct CostTracker {
    model: String,
    input_tokens: u64,
    output_tokens: u64,
    calls: u32,
}

impl CostTracker {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            calls: 0,
        }
    }

    pub fn record(&mut self, usage: TokenUsage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.calls += 1;
    }

    pub fn breakdown(&self) -> CostBreakdown {
        let (in_rate, out_rate) = rate_for(&self.model);
        let input_cost = self.input_tokens as f64 * in_rate / 1_000_000.0;
        let output_cost = self.output_tokens as f64 * out_rate / 1_000_000.0;
        CostBreakdown {
            model: self.model.clone(),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            calls: self.calls,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn accumulation_is_order_independent() {
        let mut a = CostTracker::new("gpt-4o");
        a.record(usage(1_000, 200));
        a.record(usage(3_000, 500));

        let mut b = CostTracker::new("gpt-4o");
        b.record(usage(3_000, 500));
        b.record(usage(1_000, 200));

        let (ba, bb) = (a.breakdown(), b.breakdown());
        assert_eq!(ba.input_tokens, bb.input_tokens);
        assert_eq!(ba.total_cost, bb.total_cost);
        assert_eq!(ba.calls, 2);
    }

    #[test]
    fn cost_is_monotone_in_usage() {
        let mut t = CostTracker::new("claude-sonnet-4-20250514");
        t.record(usage(10_000, 1_000));
        let before = t.breakdown().total_cost;
        t.record(usage(1, 1));
        assert!(t.breakdown().total_cost > before);
    }

    #[test]
    fn longest_prefix_wins() {
        // gpt-4o-mini must not be priced at the gpt-4o rate.
        let (i_mini, _) = rate_for("gpt-4o-mini-2024-07-18");
        let (i_full, _) = rate_for("gpt-4o-2024-08-06");
        assert!(i_mini < i_full);
    }

    #[test]
    fn unknown_model_uses_default_rate() {
        assert_eq!(rate_for("llama-3-70b"), DEFAULT_RATE);
    }

    #[test]
    fn breakdown_prices_per_million() {
        let mut t = CostTracker::new("gpt-4o");
        t.record(usage(1_000_000, 1_000_000));
        let b = t.breakdown();
        assert!((b.input_cost - 2.50).abs() < 1e-9);
        assert!((b.output_cost - 10.00).abs() < 1e-9);
        assert!((b.total_cost - 12.50).abs() < 1e-9);
    }
}
