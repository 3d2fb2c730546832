//! C1: Provider resource name generator.
//!
//! Produces candidate Provider names as `<prefix><uuid-v4>`, case-folded to
//! `[a-z0-9-]` and truncated to 63 characters (the Provider's name length
//! limit). `uuid::Uuid::new_v4` draws 122 random bits, so collision
//! probability for any two generated names is <= 2^-122.

use crate::error::StdError;
use uuid::Uuid;

pub const DEFAULT_PREFIX: &str = "mcrt-";
const MAX_NAME_LEN: usize = 63;

#[derive(Clone, Debug)]
pub struct NameGenerator {
    prefix: String,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        NameGenerator {
            prefix: prefix.into(),
        }
    }

    /// Generates a fresh, globally-unique-with-overwhelming-probability
    /// Provider resource name. The only failure mode is the OS randomness
    /// source erroring, which `uuid` surfaces through a panic-free `Uuid`
    /// construction; we still return a `Result` so callers aren't tempted to
    /// assume infallibility if a future `uuid` release changes that.
    pub fn generate(&self) -> Result<String, StdError> {
        let uuid = Uuid::new_v4();
        let mut candidate = format!("{}{}", self.prefix, uuid.simple());
        candidate.truncate(MAX_NAME_LEN);
        Ok(candidate.to_lowercase())
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        NameGenerator::new(DEFAULT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_names_carry_the_configured_prefix() {
        let gen = NameGenerator::new("mcrt-");
        let name = gen.generate().unwrap();
        assert!(name.starts_with("mcrt-"));
    }

    #[test]
    fn generated_names_never_exceed_63_characters() {
        let gen = NameGenerator::new("mcrt-");
        for _ in 0..100 {
            let name = gen.generate().unwrap();
            assert!(name.len() <= 63, "{name} is {} chars", name.len());
        }
    }

    #[test]
    fn generated_names_are_lowercase_and_charset_restricted() {
        let gen = NameGenerator::new("mcrt-");
        let name = gen.generate().unwrap();
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn repeated_generation_does_not_collide() {
        let gen = NameGenerator::new("mcrt-");
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let name = gen.generate().unwrap();
            assert!(seen.insert(name), "collision detected");
        }
    }
}
