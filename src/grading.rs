use crate::model::{GradeBand, UNRESOLVED};
use std::cmp::Ordering;

/// Grade bands ordered by lower bound, highest first.
#[derive(Debug, Clone, Default)]
pub struct GradingTable {
    bands: Vec<GradeBand>,
}

impl GradingTable {
    pub fn new(mut bands: Vec<GradeBand>) -> Self {
        bands.sort_by(|a, b| {
            b.lower_bound
                .partial_cmp(&a.lower_bound)
                .unwrap_or(Ordering::Equal)
        });
        Self { bands }
    }

    /// Label of the highest band whose bound is <= `average`, or `"**"`.
    pub fn resolve_grade(&self, average: f64) -> String {
        self.bands
            .iter()
            .find(|b| b.lower_bound <= average)
            .map(|b| b.grade.clone())
            .unwrap_or_else(|| UNRESOLVED.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(grade: &str, lower_bound: f64) -> GradeBand {
        GradeBand {
            id: grade.to_string(),
            grade: grade.to_string(),
            lower_bound,
        }
    }

    fn table() -> GradingTable {
        // Deliberately unsorted input.
        GradingTable::new(vec![band("B", 65.0), band("C", 50.0), band("A", 80.0)])
    }

    #[test]
    fn resolves_boundaries() {
        let t = table();
        assert_eq!(t.resolve_grade(79.99), "B");
        assert_eq!(t.resolve_grade(80.0), "A");
        assert_eq!(t.resolve_grade(99.99), "A");
        assert_eq!(t.resolve_grade(50.0), "C");
        assert_eq!(t.resolve_grade(10.0), "**");
    }

    #[test]
    fn empty_table_is_unresolved() {
        assert_eq!(GradingTable::default().resolve_grade(90.0), "**");
    }

    #[test]
    fn higher_average_never_gets_lower_band() {
        let t = table();
        let rank = |g: &str| match g {
            "A" => 3,
            "B" => 2,
            "C" => 1,
            _ => 0,
        };
        let mut prev = 0;
        let mut avg = 0.0;
        while avg <= 99.99 {
            let r = rank(&t.resolve_grade(avg));
            assert!(r >= prev, "grade dropped at {}", avg);
            prev = r;
            avg += 0.25;
        }
    }
}
