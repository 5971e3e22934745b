use thiserror::Error;

use crate::{
    address::Address,
    amount::AmountError,
    ledger::{ProgramError, RemoteError},
    wallet::WalletError,
};

/// Canonical error type surfaced by the gateway and the store.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected locally before any remote call (no wallet, bad amount).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A derived sub-record address was already taken; retry with a fresh counter.
    #[error("derived address {0} collided with an existing record")]
    AddressCollision(Address),

    /// The acting identity does not own the record. Carries the remote's reason.
    #[error("{0}")]
    Authorization(String),

    /// Network or program unreachable.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// A single-record fetch found nothing.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Any other rejection by the remote program.
    #[error("rejected by the ledger: {0}")]
    Rejected(String),

    /// The local fallback snapshot could not be read or written.
    #[error("fallback store failure: {0}")]
    Persistence(String),
}

impl ClientError {
    /// Short text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Precondition(reason) => reason.clone(),
            ClientError::AddressCollision(_) => {
                "Another transaction got there first. Please try again.".into()
            }
            ClientError::Authorization(_) => "You are not allowed to change this record.".into(),
            ClientError::RemoteUnavailable(_) => {
                "The ledger is unreachable right now. Showing saved data.".into()
            }
            ClientError::NotFound(_) => "That campaign no longer exists.".into(),
            ClientError::Rejected(reason) => capitalize(reason),
            ClientError::Persistence(_) => "Could not save local data.".into(),
        }
    }

    pub fn is_collision(&self) -> bool {
        matches!(self, ClientError::AddressCollision(_))
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>() + ".",
        None => String::new(),
    }
}

impl From<RemoteError> for ClientError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(reason) => ClientError::RemoteUnavailable(reason),
            // A stale counter shows up as either an occupied address or one
            // that no longer matches the program's seeds.
            RemoteError::AccountInUse(address) | RemoteError::SeedMismatch(address) => {
                ClientError::AddressCollision(address)
            }
            RemoteError::AccountNotFound(address) => ClientError::NotFound(address.to_hex()),
            RemoteError::Program(ProgramError::CampaignNotFound) => {
                ClientError::NotFound(ProgramError::CampaignNotFound.to_string())
            }
            RemoteError::Unauthorized(reason) => ClientError::Authorization(reason),
            RemoteError::Program(program) => ClientError::Rejected(program.to_string()),
            RemoteError::Rpc { code, .. } => {
                ClientError::Rejected(format!("request failed with code {code}"))
            }
            other @ (RemoteError::AlreadyInitialized
            | RemoteError::InvalidSignature
            | RemoteError::DuplicateTransaction) => ClientError::Rejected(other.to_string()),
        }
    }
}

impl From<WalletError> for ClientError {
    fn from(err: WalletError) -> Self {
        ClientError::Precondition(err.to_string())
    }
}

impl From<AmountError> for ClientError {
    fn from(err: AmountError) -> Self {
        ClientError::Precondition(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_remote_errors() {
        let addr = Address([4; 32]);
        assert!(ClientError::from(RemoteError::AccountInUse(addr)).is_collision());
        assert!(ClientError::from(RemoteError::SeedMismatch(addr)).is_collision());
        assert!(matches!(
            ClientError::from(RemoteError::Unavailable("timeout".into())),
            ClientError::RemoteUnavailable(_)
        ));
        assert!(matches!(
            ClientError::from(RemoteError::Program(ProgramError::CampaignNotFound)),
            ClientError::NotFound(_)
        ));
    }

    #[test]
    fn authorization_reason_is_kept_verbatim() {
        let err = ClientError::from(RemoteError::Unauthorized("only the creator".into()));
        assert_eq!(err.to_string(), "only the creator");
    }

    #[test]
    fn user_messages_hide_raw_payloads() {
        let err = ClientError::from(RemoteError::Rpc {
            code: -32002,
            message: "{\"raw\":\"payload\"}".into(),
        });
        assert!(!err.user_message().contains("payload"));

        let err = ClientError::from(RemoteError::AccountNotFound(Address([1; 32])));
        assert!(!err.user_message().contains("0101"));

        let err = ClientError::from(RemoteError::Program(ProgramError::InsufficientFund));
        assert_eq!(err.user_message(), "Insufficient funds in the campaign.");
    }
}
