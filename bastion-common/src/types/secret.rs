use std::fmt::Debug;

use data_encoding::HEXLOWER;
use rand::RngExt;
use serde::{Deserialize, Serialize};

use crate::helpers::rng::get_crypto_rng;

/// Wraps credentials so they never end up in logs through `Debug`.
#[derive(PartialEq, Eq, Clone, Hash)]
pub struct Secret<T>(T);

impl Secret<String> {
    pub fn random() -> Self {
        Secret::new(HEXLOWER.encode(&get_crypto_rng().random::<[u8; 32]>()))
    }
}

impl<T> Secret<T> {
    pub const fn new(v: T) -> Self {
        Self(v)
    }

    pub fn expose_secret(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Secret<T> {
    fn from(v: T) -> Self {
        Self::new(v)
    }
}

impl<'de, T> Deserialize<'de> for Secret<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = Deserialize::deserialize::<D>(deserializer)?;
        Ok(Self::new(v))
    }
}

impl<T> Serialize for Secret<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Debug for Secret<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<secret>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_value() {
        let secret = Secret::new("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "<secret>");
    }

    #[test]
    fn test_random_is_hex_and_unique() {
        let a = Secret::random();
        let b = Secret::random();
        assert_eq!(a.expose_secret().len(), 64);
        assert!(a.expose_secret().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
