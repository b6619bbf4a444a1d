//! Display names for participants
//!
//! Names are compared case-insensitively after trimming. Diners who don't
//! pick a name get an adjective + animal pair from a fixed pool.

use crate::core::{SessionError, SessionResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Longest accepted display name, in characters
pub const MAX_NAME_CHARS: usize = 40;

const ADJECTIVES: &[&str] = &[
    "Brave", "Calm", "Clever", "Cosmic", "Curious", "Dapper", "Eager", "Fancy", "Gentle", "Happy",
    "Jolly", "Lucky", "Mellow", "Merry", "Nimble", "Plucky", "Quiet", "Rapid", "Sunny", "Witty",
];

const ANIMALS: &[&str] = &[
    "Otter", "Panda", "Falcon", "Koala", "Lynx", "Badger", "Heron", "Walrus", "Gecko", "Puffin",
    "Bison", "Ferret", "Llama", "Marmot", "Newt", "Quokka", "Raven", "Tapir", "Yak", "Zebra",
];

/// Trim a requested name; blank means "no name"
pub fn normalize(name: Option<&str>) -> SessionResult<Option<String>> {
    let Some(trimmed) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(SessionError::InvalidName(format!(
            "name exceeds {MAX_NAME_CHARS} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(SessionError::InvalidName(
            "name contains control characters".to_string(),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

/// Case-insensitive comparison key
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// First free variant of `base`: `base`, `base 2`, `base 3`, ...
///
/// The base is shortened when needed so a suffixed name still fits in
/// [`MAX_NAME_CHARS`].
pub fn with_suffix(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 2u32;
    loop {
        let suffix = format!(" {n}");
        let room = MAX_NAME_CHARS.saturating_sub(suffix.chars().count());
        let stem: String = base.chars().take(room).collect();
        let candidate = format!("{}{suffix}", stem.trim_end());
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Whimsical name generator
#[derive(Debug)]
pub struct NameGenerator {
    rng: StdRng,
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence of names
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn candidate(&mut self) -> String {
        let adjective = ADJECTIVES[self.rng.gen_range(0..ADJECTIVES.len())];
        let animal = ANIMALS[self.rng.gen_range(0..ANIMALS.len())];
        format!("{adjective} {animal}")
    }

    /// Draw up to `attempts` names, then fall back to a numbered suffix
    pub fn generate(&mut self, attempts: u32, taken: impl Fn(&str) -> bool) -> String {
        for _ in 0..attempts {
            let candidate = self.candidate();
            if !taken(&candidate) {
                return candidate;
            }
        }
        let base = self.candidate();
        tracing::debug!(base = %base, attempts, "Name pool collisions, using numbered suffix");
        with_suffix(&base, taken)
    }
}
