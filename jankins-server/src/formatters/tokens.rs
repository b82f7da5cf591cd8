// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Token estimation for response metadata.

/// Estimates how many model tokens a serialized payload costs.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Word-count heuristic: roughly 0.75 tokens per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCountEstimator;

impl TokenEstimator for WordCountEstimator {
    fn estimate(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        (words as f64 * 0.75).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_estimate_rounds() {
        let estimator = WordCountEstimator;
        assert_eq!(estimator.estimate(""), 0);
        // 2 words * 0.75 = 1.5 -> 2
        assert_eq!(estimator.estimate("hello world"), 2);
        // 3 words * 0.75 = 2.25 -> 2
        assert_eq!(estimator.estimate("a b  c"), 2);
        assert_eq!(estimator.estimate("one two three four"), 3);
    }
}
