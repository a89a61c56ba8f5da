// Copyright 2024 Nathan Geffen

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at

//     http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A small mapping from an integer class (typically age) to a float value.

/// Preserves input order; entries are expected to be sorted by class but
/// this is not enforced.
#[derive(Debug, Clone)]
pub struct ClassedValues {
    entries: Vec<(i32, f32)>,
}

impl ClassedValues {
    pub fn new(entries: Vec<(i32, f32)>) -> Self {
        ClassedValues { entries }
    }

    /// Value of the first entry whose class equals `k`, or `default`.
    pub fn get(&self, k: i32, default: f32) -> f32 {
        self.entries
            .iter()
            .find(|&&(class, _)| class == k)
            .map(|&(_, value)| value)
            .unwrap_or(default)
    }

    /// Value of the greatest class `<= k`.
    ///
    /// If `k` is smaller than every class in the table, returns the value
    /// at index 0 rather than some "no such value" signal.
    pub fn get_greatest_lte(&self, k: i32) -> f32 {
        let mut break_at = None;
        for (i, &(class, _)) in self.entries.iter().enumerate() {
            if class > k {
                break_at = Some(i);
                break;
            }
        }
        match break_at {
            Some(0) => self.entries[0].1,
            Some(i) => self.entries[i - 1].1,
            None => self.entries.last().expect("ClassedValues must not be empty").1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ClassedValues {
        ClassedValues::new(vec![(0, 0.1), (20, 0.2), (40, 0.3), (65, 0.4)])
    }

    #[test]
    fn exact_match() {
        let t = table();
        assert_eq!(t.get(20, -1.0), 0.2);
        assert_eq!(t.get(21, -1.0), -1.0);
    }

    #[test]
    fn greatest_lte_picks_band() {
        let t = table();
        assert_eq!(t.get_greatest_lte(0), 0.1);
        assert_eq!(t.get_greatest_lte(19), 0.1);
        assert_eq!(t.get_greatest_lte(20), 0.2);
        assert_eq!(t.get_greatest_lte(64), 0.3);
        assert_eq!(t.get_greatest_lte(65), 0.4);
        assert_eq!(t.get_greatest_lte(200), 0.4);
    }

    #[test]
    fn greatest_lte_below_smallest_class_returns_first_entry() {
        let t = ClassedValues::new(vec![(10, 0.5), (20, 0.7)]);
        assert_eq!(t.get_greatest_lte(-5), 0.5);
    }
}
