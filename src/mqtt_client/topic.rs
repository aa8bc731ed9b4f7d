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

//! Topic name and topic filter handling.
//!
//! Filters support `+` (exactly one level) and a trailing `#` (the parent
//! level and everything below it). Topics starting with `$` are never
//! matched by a filter whose first level is a wildcard.

/// Check whether `filter` is a valid MQTT 3.1.1 topic filter.
///
/// `#` must be the last level and stand alone; `+` must occupy a whole
/// level. Empty filters are invalid.
pub fn validate_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > u16::MAX as usize {
        return false;
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "#" => {
                if levels.peek().is_some() {
                    return false;
                }
            }
            "+" => {}
            _ => {
                if level.contains('#') || level.contains('+') {
                    return false;
                }
            }
        }
    }

    true
}

/// Check whether `topic` is a publishable topic name: non-empty and free
/// of wildcard characters.
pub fn validate_topic(topic: &str) -> bool {
    !topic.is_empty() && topic.len() <= u16::MAX as usize && !topic.contains(['#', '+'])
}

/// Match a topic name against a topic filter.
///
/// Assumes `filter` already passed [`validate_filter`].
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // $-prefixed topics (e.g. $SYS/...) are excluded from wildcard-leading
    // filters per the MQTT spec.
    if topic.starts_with('$') && matches!(filter.as_bytes().first(), Some(b'+') | Some(b'#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // A trailing '#' matches the parent level and everything below.
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
