use std::{fs, path::Path, sync::Arc};

use ed25519_dalek::{Signer, SigningKey};
use rand::{rngs::OsRng, RngCore};

use crate::{
    address::Identity,
    ledger::{SignedTransaction, Transaction},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("no wallet connected")]
    NotConnected,
    #[error("transaction names signer {expected}, wallet holds {actual}")]
    SignerMismatch { expected: Identity, actual: Identity },
    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),
}

/// Signing capability supplied by the host. A wallet without an identity is
/// not connected and cannot authorize mutations.
pub trait Wallet: Send + Sync {
    fn identity(&self) -> Option<Identity>;

    fn sign_transaction(&self, tx: Transaction) -> Result<SignedTransaction, WalletError>;

    fn sign_all_transactions(
        &self,
        txs: Vec<Transaction>,
    ) -> Result<Vec<SignedTransaction>, WalletError> {
        txs.into_iter().map(|tx| self.sign_transaction(tx)).collect()
    }
}

impl<W: Wallet + ?Sized> Wallet for Box<W> {
    fn identity(&self) -> Option<Identity> {
        (**self).identity()
    }

    fn sign_transaction(&self, tx: Transaction) -> Result<SignedTransaction, WalletError> {
        (**self).sign_transaction(tx)
    }
}

impl<W: Wallet + ?Sized> Wallet for Arc<W> {
    fn identity(&self) -> Option<Identity> {
        (**self).identity()
    }

    fn sign_transaction(&self, tx: Transaction) -> Result<SignedTransaction, WalletError> {
        (**self).sign_transaction(tx)
    }
}

pub struct KeypairWallet {
    signing_key: SigningKey,
}

impl KeypairWallet {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn generate() -> Self {
        let mut sk_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut sk_bytes);
        Self::new(SigningKey::from_bytes(&sk_bytes))
    }

    /// Parse a 32-byte secret key given as 64 hex characters.
    pub fn from_secret_hex(sk_hex: &str) -> Result<Self, WalletError> {
        let sk_bytes =
            hex::decode(sk_hex.trim()).map_err(|e| WalletError::InvalidKeypair(e.to_string()))?;
        let arr: [u8; 32] = sk_bytes.try_into().map_err(|_| {
            WalletError::InvalidKeypair("secret key must be 32 bytes (64 hex chars)".into())
        })?;
        Ok(Self::new(SigningKey::from_bytes(&arr)))
    }

    pub fn read(path: &Path) -> Result<Self, WalletError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| WalletError::InvalidKeypair(format!("{}: {e}", path.display())))?;
        Self::from_secret_hex(&raw)
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, hex::encode(self.signing_key.to_bytes()))
    }

    pub fn public_identity(&self) -> Identity {
        Identity(self.signing_key.verifying_key().to_bytes())
    }
}

impl Wallet for KeypairWallet {
    fn identity(&self) -> Option<Identity> {
        Some(self.public_identity())
    }

    fn sign_transaction(&self, tx: Transaction) -> Result<SignedTransaction, WalletError> {
        let actual = self.public_identity();
        if tx.signer != actual {
            return Err(WalletError::SignerMismatch {
                expected: tx.signer,
                actual,
            });
        }
        let signature = self.signing_key.sign(&tx.digest()).to_bytes().to_vec();
        Ok(SignedTransaction {
            transaction: tx,
            signature,
        })
    }
}

/// Read-only session: listing works, every mutation fails its precondition.
#[derive(Clone, Copy, Debug, Default)]
pub struct Disconnected;

impl Wallet for Disconnected {
    fn identity(&self) -> Option<Identity> {
        None
    }

    fn sign_transaction(&self, _tx: Transaction) -> Result<SignedTransaction, WalletError> {
        Err(WalletError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{address::Address, ledger::LedgerInstruction};

    fn fee_tx(signer: Identity) -> Transaction {
        Transaction::new(
            signer,
            LedgerInstruction::UpdatePlatformSettings {
                state: Address([0; 32]),
                fee_percent: 3,
            },
        )
    }

    #[test]
    fn keypair_signatures_verify() {
        let wallet = KeypairWallet::generate();
        let signed = wallet
            .sign_all_transactions(vec![
                fee_tx(wallet.public_identity()),
                fee_tx(wallet.public_identity()),
            ])
            .unwrap();
        assert_eq!(signed.len(), 2);
        for tx in &signed {
            tx.verify().unwrap();
        }
    }

    #[test]
    fn refuses_foreign_signer() {
        let wallet = KeypairWallet::generate();
        let other = KeypairWallet::generate().public_identity();
        assert_eq!(
            wallet.sign_transaction(fee_tx(other)).unwrap_err(),
            WalletError::SignerMismatch {
                expected: other,
                actual: wallet.public_identity(),
            }
        );
    }

    #[test]
    fn secret_hex_roundtrip() {
        let wallet = KeypairWallet::generate();
        let path =
            std::env::temp_dir().join(format!("fundledger-key-{}.hex", rand::random::<u64>()));
        wallet.write(&path).unwrap();
        let restored = KeypairWallet::read(&path).unwrap();
        assert_eq!(restored.public_identity(), wallet.public_identity());
        fs::remove_file(&path).ok();

        assert!(matches!(
            KeypairWallet::from_secret_hex("abcd"),
            Err(WalletError::InvalidKeypair(_))
        ));
    }

    #[test]
    fn disconnected_wallet_has_no_identity() {
        assert_eq!(Disconnected.identity(), None);
        assert_eq!(
            Disconnected
                .sign_transaction(fee_tx(Identity::default()))
                .unwrap_err(),
            WalletError::NotConnected
        );
    }
}
