// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WireGuard key material.
//!
//! Keys travel as standard base64 of 32 raw bytes, the same text form the `wg`
//! tool prints and accepts. Private keys never appear in `Debug` output and
//! their encoded form is wiped when dropped.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
	#[error("invalid base64: {0}")]
	InvalidBase64(#[from] base64::DecodeError),

	#[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
	InvalidLength(usize),
}

fn decode_key(encoded: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, KeyError> {
	let bytes = Zeroizing::new(STANDARD.decode(encoded.trim())?);
	if bytes.len() != KEY_LEN {
		return Err(KeyError::InvalidLength(bytes.len()));
	}
	let mut out = Zeroizing::new([0u8; KEY_LEN]);
	out.copy_from_slice(&bytes);
	Ok(out)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WgPublicKey([u8; KEY_LEN]);

impl WgPublicKey {
	pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
		&self.0
	}

	pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
		let bytes = decode_key(encoded)?;
		Ok(Self(*bytes))
	}

	pub fn to_base64(&self) -> String {
		STANDARD.encode(self.0)
	}
}

impl fmt::Display for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl fmt::Debug for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "WgPublicKey({})", self.to_base64())
	}
}

impl FromStr for WgPublicKey {
	type Err = KeyError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::from_base64(s)
	}
}

impl Serialize for WgPublicKey {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_base64())
	}
}

impl<'de> Deserialize<'de> for WgPublicKey {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let encoded = String::deserialize(deserializer)?;
		Self::from_base64(&encoded).map_err(serde::de::Error::custom)
	}
}

/// Curve25519 private key. Wiped on drop by `x25519-dalek`.
#[derive(Clone)]
pub struct WgPrivateKey(StaticSecret);

impl WgPrivateKey {
	pub fn generate() -> Self {
		Self(StaticSecret::random_from_rng(OsRng))
	}

	pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
		let bytes = decode_key(encoded)?;
		Ok(Self(StaticSecret::from(*bytes)))
	}

	pub fn to_base64(&self) -> Zeroizing<String> {
		let bytes = Zeroizing::new(self.0.to_bytes());
		Zeroizing::new(STANDARD.encode(*bytes))
	}

	pub fn public_key(&self) -> WgPublicKey {
		WgPublicKey(PublicKey::from(&self.0).to_bytes())
	}
}

impl fmt::Debug for WgPrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("WgPrivateKey([REDACTED])")
	}
}

impl Serialize for WgPrivateKey {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_base64())
	}
}

impl<'de> Deserialize<'de> for WgPrivateKey {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let encoded = Zeroizing::new(String::deserialize(deserializer)?);
		Self::from_base64(&encoded).map_err(serde::de::Error::custom)
	}
}

#[derive(Clone)]
pub struct WgKeyPair {
	private: WgPrivateKey,
	public: WgPublicKey,
}

impl WgKeyPair {
	pub fn generate() -> Self {
		Self::from_private_key(WgPrivateKey::generate())
	}

	pub fn from_private_key(private: WgPrivateKey) -> Self {
		let public = private.public_key();
		Self { private, public }
	}

	pub fn private_key(&self) -> &WgPrivateKey {
		&self.private
	}

	pub fn public_key(&self) -> &WgPublicKey {
		&self.public
	}
}

impl fmt::Debug for WgKeyPair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WgKeyPair")
			.field("private", &self.private)
			.field("public", &self.public)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn generated_pair_is_consistent() {
		let pair = WgKeyPair::generate();
		assert_eq!(pair.private_key().public_key(), *pair.public_key());
	}

	#[test]
	fn private_key_text_reloads_same_key() {
		let key = WgPrivateKey::generate();
		let reloaded = WgPrivateKey::from_base64(&key.to_base64()).unwrap();
		assert_eq!(key.public_key(), reloaded.public_key());
	}

	#[test]
	fn known_vector_derives_public_key() {
		// RFC 7748 section 6.1, Alice.
		let private =
			WgPrivateKey::from_base64("dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo=").unwrap();
		assert_eq!(
			private.public_key().to_base64(),
			"hSDwCYkwp1R0i33ctD73Wg2/Og0mOBr066SpjqqbTmo="
		);
	}

	#[test]
	fn debug_redacts_private_key() {
		let pair = WgKeyPair::generate();
		let rendered = format!("{pair:?}");
		assert!(rendered.contains("[REDACTED]"));
		assert!(!rendered.contains(pair.private_key().to_base64().as_str()));
	}

	#[test]
	fn rejects_short_key() {
		let err = WgPublicKey::from_base64("AAAA").unwrap_err();
		assert_eq!(err, KeyError::InvalidLength(3));
	}

	#[test]
	fn rejects_garbage() {
		assert!(matches!(
			WgPublicKey::from_base64("not base64!"),
			Err(KeyError::InvalidBase64(_))
		));
	}

	#[test]
	fn public_key_serializes_as_string() {
		let key = WgKeyPair::generate().public_key().to_owned();
		let json = serde_json::to_string(&key).unwrap();
		assert_eq!(json, format!("\"{}\"", key.to_base64()));
		let back: WgPublicKey = serde_json::from_str(&json).unwrap();
		assert_eq!(back, key);
	}

	proptest! {
		#[test]
		fn any_32_bytes_is_a_public_key(bytes in proptest::array::uniform32(any::<u8>())) {
			let key = WgPublicKey::from_bytes(bytes);
			let parsed: WgPublicKey = key.to_string().parse().unwrap();
			prop_assert_eq!(parsed.as_bytes(), &bytes);
		}

		#[test]
		fn wrong_lengths_are_rejected(len in 0usize..64) {
			prop_assume!(len != KEY_LEN);
			let encoded = STANDARD.encode(vec![7u8; len]);
			prop_assert_eq!(WgPublicKey::from_base64(&encoded), Err(KeyError::InvalidLength(len)));
		}
	}
}
