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

//! Head sampling

use rand::Rng;

/// Percentage-based head sampler.
///
/// Draws uniformly from `0..100` and samples when the draw is at most
/// `rate`. `rate = 100` always samples; `rate = 0` still samples a draw of
/// zero, so use [`HeadSampler::disabled`] to switch head sampling off.
#[derive(Debug, Clone, Copy)]
pub struct HeadSampler {
    rate: Option<u32>,
}

impl HeadSampler {
    pub fn new(rate: u32) -> Self {
        Self {
            rate: Some(rate.min(100)),
        }
    }

    /// Sampler that never forwards.
    pub fn disabled() -> Self {
        Self { rate: None }
    }

    /// `None` when disabled.
    pub fn rate(&self) -> Option<u32> {
        self.rate
    }

    pub fn sample(&self) -> bool {
        self.rate.is_some() && self.decide(rand::thread_rng().gen_range(0..100))
    }

    pub fn decide(&self, draw: u32) -> bool {
        self.rate.is_some_and(|rate| draw <= rate)
    }
}
