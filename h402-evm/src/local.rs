//! In-memory private key signer.

use alloy_primitives::{Address, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use h402::hash;
use h402::proto::{PaymentPayload, PaymentSignature};
use h402::signer::{PaymentSigner, SignerError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Errors raised while loading a private key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyLoadError {
    /// The environment variable is not set.
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
    /// The key material is not a valid secp256k1 scalar.
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    /// The keystore file could not be read or decrypted.
    #[error("Failed to decrypt keystore {path}: {reason}")]
    Keystore {
        /// Keystore file path.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },
}

/// Signs with a secp256k1 key held in process memory.
///
/// Signing is deterministic (RFC 6979): the same payload always yields the
/// same signature. Clones share the key.
#[derive(Clone)]
pub struct LocalKeySigner {
    inner: Arc<PrivateKeySigner>,
}

impl LocalKeySigner {
    /// Wraps an existing alloy signer.
    #[must_use]
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Parses a hex private key, with or without `0x`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLoadError::InvalidKey`] if the string is not a valid key.
    pub fn from_private_key(hex_key: &str) -> Result<Self, KeyLoadError> {
        PrivateKeySigner::from_str(hex_key.trim())
            .map(Self::new)
            .map_err(|e| KeyLoadError::InvalidKey(e.to_string()))
    }

    /// Builds a signer from 32 raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLoadError::InvalidKey`] for zero or out-of-range scalars.
    pub fn from_bytes(bytes: &B256) -> Result<Self, KeyLoadError> {
        PrivateKeySigner::from_bytes(bytes)
            .map(Self::new)
            .map_err(|e| KeyLoadError::InvalidKey(e.to_string()))
    }

    /// Reads a hex private key from the environment variable `var`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLoadError::MissingEnv`] if the variable is unset and
    /// [`KeyLoadError::InvalidKey`] if it does not hold a valid key.
    pub fn from_env(var: &str) -> Result<Self, KeyLoadError> {
        let value = std::env::var(var).map_err(|_| KeyLoadError::MissingEnv(var.to_owned()))?;
        Self::from_private_key(&value)
    }

    /// Decrypts a Web3 Secret Storage (v3) keystore file.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLoadError::Keystore`] if the file is missing, malformed,
    /// or the password is wrong.
    pub fn from_keystore(
        path: impl AsRef<Path>,
        password: impl AsRef<[u8]>,
    ) -> Result<Self, KeyLoadError> {
        let path = path.as_ref();
        PrivateKeySigner::decrypt_keystore(path, password)
            .map(Self::new)
            .map_err(|e| KeyLoadError::Keystore {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Generates a fresh key from the operating system's secure RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    /// The signer's address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.inner.address()
    }
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl PaymentSigner for LocalKeySigner {
    async fn address(&self) -> Result<Address, SignerError> {
        Ok(Self::address(self))
    }

    async fn sign_payment(&self, payload: &PaymentPayload) -> Result<PaymentSignature, SignerError> {
        let own = Self::address(self);
        if payload.payer != own {
            return Err(SignerError::Rejected(format!(
                "payload payer {} is not signer {own}",
                payload.payer
            )));
        }
        let digest = hash::hash(payload);
        self.inner
            .sign_hash_sync(&digest)
            .map(PaymentSignature::from)
            .map_err(|e| SignerError::Rejected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use h402::networks::Network;
    use h402::proto::{PaymentRequirements, SignedPayment};
    use h402::replay::ReplayGuard;
    use h402::timestamp::UnixTimestamp;
    use h402::verify::verify_payment;

    // Anvil's first well-known development key.
    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ANVIL_ADDRESS: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    fn requirements() -> PaymentRequirements {
        PaymentRequirements::new(
            1000u64.into(),
            address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
            Network::BaseSepolia,
            "/data",
        )
    }

    #[test]
    fn test_from_private_key() {
        let signer = LocalKeySigner::from_private_key(ANVIL_KEY).unwrap();
        assert_eq!(signer.address(), ANVIL_ADDRESS);
        let unprefixed = LocalKeySigner::from_private_key(&ANVIL_KEY[2..]).unwrap();
        assert_eq!(unprefixed.address(), ANVIL_ADDRESS);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            LocalKeySigner::from_private_key("0x1234"),
            Err(KeyLoadError::InvalidKey(_))
        ));
        assert!(matches!(
            LocalKeySigner::from_bytes(&B256::ZERO),
            Err(KeyLoadError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_missing_env_var() {
        let err = LocalKeySigner::from_env("H402_TEST_KEY_THAT_IS_NEVER_SET").unwrap_err();
        assert_eq!(
            err,
            KeyLoadError::MissingEnv("H402_TEST_KEY_THAT_IS_NEVER_SET".into())
        );
    }

    #[test]
    fn test_keystore_round_trip() {
        let dir = std::env::temp_dir().join(format!("h402-keystore-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let key = B256::from_str(ANVIL_KEY).unwrap();
        PrivateKeySigner::encrypt_keystore(
            &dir,
            &mut rand08::thread_rng(),
            key,
            "correct horse",
            Some("anvil.json"),
        )
        .unwrap();
        let path = dir.join("anvil.json");

        let signer = LocalKeySigner::from_keystore(&path, "correct horse").unwrap();
        assert_eq!(signer.address(), ANVIL_ADDRESS);

        let wrong = LocalKeySigner::from_keystore(&path, "battery staple").unwrap_err();
        assert!(matches!(wrong, KeyLoadError::Keystore { .. }));
        let missing = LocalKeySigner::from_keystore(dir.join("absent.json"), "x").unwrap_err();
        assert!(matches!(missing, KeyLoadError::Keystore { ref path, .. } if path.ends_with("absent.json")));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = LocalKeySigner::from_private_key(ANVIL_KEY).unwrap();
        let debug = format!("{signer:?}");
        assert!(!debug.contains("ac0974bec39a17e36ba4a6b4d238ff944bacb478"));
        assert!(debug.contains("LocalKeySigner"));
    }

    #[tokio::test]
    async fn test_sign_then_verify() {
        let signer = LocalKeySigner::generate();
        let payload = PaymentPayload::for_requirements(
            &requirements(),
            signer.address(),
            UnixTimestamp::now(),
            300,
        );
        let signature = signer.sign_payment(&payload).await.unwrap();
        assert!(matches!(signature.v(), 27 | 28));

        let signed = SignedPayment {
            payment: payload,
            signature,
        };
        let payer = verify_payment(&signed, &requirements(), &ReplayGuard::new(), UnixTimestamp::now());
        assert_eq!(payer, Ok(signer.address()));
    }

    #[tokio::test]
    async fn test_signing_is_deterministic() {
        let signer = LocalKeySigner::from_private_key(ANVIL_KEY).unwrap();
        let payload = PaymentPayload::for_requirements(
            &requirements(),
            ANVIL_ADDRESS,
            UnixTimestamp::from_secs(1_700_000_000),
            300,
        );
        let a = signer.sign_payment(&payload).await.unwrap();
        let b = signer.sign_payment(&payload).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_refuses_foreign_payer() {
        let signer = LocalKeySigner::generate();
        let payload = PaymentPayload::for_requirements(
            &requirements(),
            ANVIL_ADDRESS,
            UnixTimestamp::now(),
            300,
        );
        let err = signer.sign_payment(&payload).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
