//! Number generator: synthetic recipients for the "random" input mode.
//!
//! Identifiers are `region_code + area prefix + zero-padded suffix`. The
//! generator keeps drawing until it holds the requested number of distinct
//! values; collisions are simply drawn again.

use std::collections::HashSet;

use rand::Rng;

use relay_common::error::AppError;

/// Country code prepended to every generated identifier.
const DEFAULT_REGION_CODE: &str = "55";

/// Area codes a generated identifier may use.
const DEFAULT_PREFIXES: &[&str] = &["11", "21", "31", "41", "51", "61", "71", "81"];

/// Digits after the area code.
const DEFAULT_SUFFIX_WIDTH: u32 = 9;

/// Generates syntactically plausible recipient identifiers.
#[derive(Debug, Clone)]
pub struct NumberGenerator {
    region_code: String,
    prefixes: Vec<String>,
    suffix_width: u32,
    max_quantity: usize,
}

impl NumberGenerator {
    pub fn new(max_quantity: usize) -> Self {
        Self {
            region_code: DEFAULT_REGION_CODE.to_string(),
            prefixes: DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
            suffix_width: DEFAULT_SUFFIX_WIDTH,
            max_quantity,
        }
    }

    /// Use a different numbering plan. `suffix_width` must be between 1 and 18.
    pub fn with_format(
        mut self,
        region_code: impl Into<String>,
        prefixes: Vec<String>,
        suffix_width: u32,
    ) -> Result<Self, AppError> {
        if prefixes.is_empty() {
            return Err(AppError::Config(
                "number generator needs at least one prefix".to_string(),
            ));
        }
        if !(1..=18).contains(&suffix_width) {
            return Err(AppError::Config(format!(
                "suffix width {} is outside 1..=18",
                suffix_width
            )));
        }
        self.region_code = region_code.into();
        self.prefixes = prefixes;
        self.suffix_width = suffix_width;
        Ok(self)
    }

    /// Number of distinct identifiers the format can express.
    pub fn capacity(&self) -> u128 {
        self.prefixes.len() as u128 * 10u128.pow(self.suffix_width)
    }

    /// Produce exactly `count` distinct identifiers.
    pub fn generate(&self, count: usize) -> Result<Vec<String>, AppError> {
        if count > self.max_quantity {
            return Err(AppError::Validation(format!(
                "quantity {} exceeds the maximum of {}",
                count, self.max_quantity
            )));
        }
        if count as u128 > self.capacity() {
            return Err(AppError::Validation(format!(
                "quantity {} exceeds the {} identifiers this format can produce",
                count,
                self.capacity()
            )));
        }

        let mut rng = rand::rng();
        let suffix_max = 10u64.pow(self.suffix_width) - 1;
        let width = self.suffix_width as usize;
        let mut seen = HashSet::with_capacity(count);
        let mut generated = Vec::with_capacity(count);

        while generated.len() < count {
            let prefix = &self.prefixes[rng.random_range(0..self.prefixes.len())];
            let suffix = rng.random_range(0..=suffix_max);
            let identifier = format!("{}{}{:0width$}", self.region_code, prefix, suffix);

            if seen.insert(identifier.clone()) {
                generated.push(identifier);
            }
        }

        tracing::debug!(count, "Generated recipient identifiers");
        Ok(generated)
    }

    /// Whether `identifier` follows this generator's format.
    pub fn matches_format(&self, identifier: &str) -> bool {
        let Some(rest) = identifier.strip_prefix(self.region_code.as_str()) else {
            return false;
        };
        self.prefixes.iter().any(|prefix| {
            rest.strip_prefix(prefix.as_str()).is_some_and(|suffix| {
                suffix.len() == self.suffix_width as usize
                    && suffix.bytes().all(|b| b.is_ascii_digit())
            })
        })
    }
}

impl Default for NumberGenerator {
    fn default() -> Self {
        Self::new(5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_exact_distinct_count() {
        let generator = NumberGenerator::default();
        let ids = generator.generate(500).unwrap();

        assert_eq!(ids.len(), 500);
        let distinct: HashSet<_> = ids.iter().collect();
        assert_eq!(distinct.len(), 500);
    }

    #[test]
    fn test_generated_identifiers_match_format() {
        let generator = NumberGenerator::default();
        for id in generator.generate(200).unwrap() {
            assert_eq!(id.len(), 2 + 2 + 9, "unexpected length for {}", id);
            assert!(generator.matches_format(&id), "bad format: {}", id);
        }
    }

    #[test]
    fn test_generate_zero_is_empty() {
        assert!(NumberGenerator::default().generate(0).unwrap().is_empty());
    }

    #[test]
    fn test_generate_fills_a_small_space_completely() {
        // Two prefixes x 10 suffixes = 20 identifiers; asking for all of them
        // forces collisions to be regenerated.
        let generator = NumberGenerator::new(100)
            .with_format("1", vec!["2".into(), "3".into()], 1)
            .unwrap();
        let ids = generator.generate(20).unwrap();
        let distinct: HashSet<_> = ids.iter().collect();
        assert_eq!(distinct.len(), 20);
    }

    #[test]
    fn test_generate_rejects_over_capacity() {
        let generator = NumberGenerator::new(100)
            .with_format("1", vec!["2".into()], 1)
            .unwrap();
        assert!(matches!(
            generator.generate(11),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_generate_rejects_over_maximum() {
        let generator = NumberGenerator::new(10);
        assert!(matches!(
            generator.generate(11),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_matches_format_rejects_foreign_numbers() {
        let generator = NumberGenerator::default();
        assert!(generator.matches_format("5511000000042"));
        assert!(!generator.matches_format("5599000000042"));
        assert!(!generator.matches_format("551100000004"));
        assert!(!generator.matches_format("44110000000042"));
    }
}
