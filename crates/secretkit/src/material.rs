//! Secret specifications and generated material

use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fmt;
use zeroize::Zeroizing;

/// Mask shown in place of every secret value
pub const MASK: &str = "********";

/// Character class of a generated secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// `[A-Za-z0-9]`
    Alphanumeric,
    /// `[0-9a-f]`
    Hex,
}

impl Charset {
    pub fn contains(&self, c: char) -> bool {
        match self {
            Self::Alphanumeric => c.is_ascii_alphanumeric(),
            Self::Hex => matches!(c, '0'..='9' | 'a'..='f'),
        }
    }
}

/// Length and character class of a secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretSpec {
    pub length: usize,
    pub charset: Charset,
}

impl SecretSpec {
    /// Alphanumeric password of `length` characters
    pub const fn password(length: usize) -> Self {
        Self {
            length,
            charset: Charset::Alphanumeric,
        }
    }

    /// Lowercase hex token of `length` characters (e.g. JWT signing keys)
    pub const fn hex(length: usize) -> Self {
        Self {
            length,
            charset: Charset::Hex,
        }
    }

    /// Whether `value` has the right length and character class
    pub fn is_satisfied_by(&self, value: &str) -> bool {
        value.chars().count() == self.length && value.chars().all(|c| self.charset.contains(c))
    }

    pub(crate) fn generate(&self) -> Zeroizing<String> {
        let mut rng = rand::thread_rng();
        let value: String = match self.charset {
            Charset::Alphanumeric => (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(self.length)
                .map(char::from)
                .collect(),
            Charset::Hex => (0..self.length)
                .map(|_| {
                    let nibble = rng.gen_range(0..16u32);
                    char::from_digit(nibble, 16).unwrap_or('0')
                })
                .collect(),
        };
        Zeroizing::new(value)
    }
}

/// A secret value, wiped from memory on drop.
///
/// `Debug` never shows the value; use [`SecretMaterial::expose`] where the
/// raw value is genuinely needed (rendering the env file).
#[derive(Clone)]
pub struct SecretMaterial {
    key: String,
    value: Zeroizing<String>,
}

impl SecretMaterial {
    pub(crate) fn new(key: &str, value: Zeroizing<String>) -> Self {
        Self {
            key: key.to_string(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expose(&self) -> &str {
        self.value.as_str()
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("key", &self.key)
            .field("value", &MASK)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_values_satisfy_spec() {
        for spec in [SecretSpec::password(32), SecretSpec::hex(64), SecretSpec::password(1)] {
            let value = spec.generate();
            assert!(spec.is_satisfied_by(&value), "{spec:?}");
        }
    }

    #[test]
    fn test_spec_rejects_wrong_class() {
        assert!(!SecretSpec::hex(4).is_satisfied_by("abcz"));
        assert!(!SecretSpec::password(4).is_satisfied_by("ab-d"));
        assert!(!SecretSpec::password(4).is_satisfied_by("abc"));
    }

    #[test]
    fn test_debug_is_masked() {
        let material = SecretMaterial::new("db_root", Zeroizing::new("hunter2hunter2".to_string()));
        let debug = format!("{material:?}");
        assert!(debug.contains("db_root"));
        assert!(!debug.contains("hunter2"));
    }
}
