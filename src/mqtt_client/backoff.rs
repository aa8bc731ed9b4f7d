// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Capped exponential backoff for reconnection attempts.
//!
//! The delay grows as `min(initial * multiplier^n, max)` and resets to the
//! initial value after a successful connection. Retries are unbounded; the
//! caller decides when to stop (a fatal rejection or an explicit close).

use std::time::Duration;

/// Exponential backoff controller for reconnection timing.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    /// Create a controller with the given initial delay, cap, and growth
    /// factor. A multiplier at or below 1.0 degenerates to a fixed delay.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max.max(initial),
            multiplier: if multiplier > 1.0 { multiplier } else { 1.0 },
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt. Each call advances the
    /// schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;

        let grown = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(grown).min(self.max_delay);
        self.attempt += 1;

        delay
    }

    /// Number of attempts scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Return to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 2.0);

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn delay_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(15), 3.0);

        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(15));
        assert_eq!(backoff.next_delay(), Duration::from_secs(15));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::default();

        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn degenerate_multiplier_is_fixed_delay() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(60), 0.5);

        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }
}
