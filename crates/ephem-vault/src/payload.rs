// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decrypted session payload: field name to secret value.
//!
//! A [`Payload`] is always a copy. Values are held as [`SecretString`] so they
//! are zeroed on drop and never printed by `Debug`. The serialized form (a JSON
//! object with sorted keys) is shared by the vault and the recovery ledger, so
//! a recovered payload is byte-identical to the sealed one.

use std::collections::BTreeMap;

use ephem_core::EphemError;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

#[derive(Default)]
pub struct Payload {
    fields: BTreeMap<String, SecretString>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields
            .insert(field.into(), SecretString::from(value.into()));
    }

    /// Returns the exposed value of `field`, if present.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|v| v.expose_secret())
    }

    /// Like [`get`](Self::get), but a missing field is [`EphemError::MissingCredential`].
    pub fn require(&self, field: &str) -> Result<&str, EphemError> {
        self.get(field).ok_or_else(|| EphemError::MissingCredential {
            field: field.to_string(),
        })
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// `(field, exposed value)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.expose_secret()))
    }

    /// Moves every field of `other` into `self`, overwriting on conflict.
    pub fn merge(&mut self, other: Payload) {
        self.fields.extend(other.fields);
    }

    /// Serializes to the canonical byte form. The buffer is zeroed on drop.
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, EphemError> {
        let plain: BTreeMap<&str, &str> = self.iter().collect();
        serde_json::to_vec(&plain)
            .map(Zeroizing::new)
            .map_err(|e| EphemError::Internal(format!("failed to serialize payload: {e}")))
    }

    /// Parses the canonical byte form written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EphemError> {
        let plain: BTreeMap<String, String> = serde_json::from_slice(bytes)
            .map_err(|e| EphemError::Internal(format!("failed to parse payload: {e}")))?;
        Ok(plain.into_iter().collect())
    }
}

impl Clone for Payload {
    fn clone(&self) -> Self {
        self.iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut payload = Payload::new();
        for (field, value) in iter {
            payload.insert(field, value);
        }
        payload
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.fields.keys().map(|k| (k, "[REDACTED]")))
            .finish()
    }
}
