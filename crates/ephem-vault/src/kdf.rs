// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic recovery-key derivation from an owner identifier.
//!
//! The key is a pure function of the owner id and the configured Argon2id
//! cost, so it can be re-derived after a full process restart. Anyone who
//! knows the owner id can derive it as well; the Argon2id cost only slows
//! down guessing.

use ephem_config::model::RecoveryConfig;
use ephem_core::EphemError;
use zeroize::Zeroizing;

/// Fixed domain-separation salt. Changing it orphans every persisted blob.
const RECOVERY_SALT: &[u8] = b"ephem.recovery-ledger.v1";

/// Derive the 32-byte recovery key for `owner_id`.
///
/// The returned key is wrapped in [`Zeroizing`] for automatic memory zeroing
/// on drop.
pub fn derive_owner_key(
    owner_id: &str,
    params: &RecoveryConfig,
) -> Result<Zeroizing<[u8; 32]>, EphemError> {
    let argon_params = argon2::Params::new(
        params.kdf_memory_cost,
        params.kdf_iterations,
        params.kdf_parallelism,
        Some(32),
    )
    .map_err(|e| EphemError::Crypto(format!("invalid Argon2id parameters: {e}")))?;

    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(owner_id.as_bytes(), RECOVERY_SALT, output.as_mut())
        .map_err(|e| EphemError::Crypto(format!("Argon2id key derivation failed: {e}")))?;

    Ok(output)
}
