use std::{fmt, str::FromStr};

use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

const KEY_LEN: usize = 32;
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

macro_rules! hex_key {
    ($name:ident, $what:literal) => {
        #[doc = concat!("32-byte ", $what, ", rendered as lowercase hex.")]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; KEY_LEN]);

        impl $name {
            pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = KeyParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s.trim()).map_err(|_| KeyParseError::NotHex)?;
                let arr: [u8; KEY_LEN] = bytes
                    .try_into()
                    .map_err(|v: Vec<u8>| KeyParseError::Length(v.len()))?;
                Ok(Self(arr))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let encoded = String::deserialize(deserializer)?;
                encoded.parse().map_err(D::Error::custom)
            }
        }
    };
}

hex_key!(Address, "storage address of a ledger record");
hex_key!(Identity, "public identity (ed25519 verifying key) of an actor");
hex_key!(ProgramId, "address of the remote ledger program");

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("key is not valid hex")]
    NotHex,
    #[error("key must be 32 bytes, got {0}")]
    Length(usize),
}

/// Record families managed by the remote program. Each maps to a fixed tag
/// that is mixed into every address derived for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    GlobalState,
    Campaign,
    DonorTransaction,
    WithdrawTransaction,
}

impl Namespace {
    pub fn tag(self) -> &'static [u8] {
        match self {
            Namespace::GlobalState => b"program_state",
            Namespace::Campaign => b"campaign",
            Namespace::DonorTransaction => b"donor",
            Namespace::WithdrawTransaction => b"withdraw",
        }
    }
}

/// One derivation field. Each is written as a kind byte followed by its value;
/// counters are 8-byte little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seed {
    U64(u64),
    Identity(Identity),
}

impl Seed {
    const U64_KIND: u8 = 1;
    const IDENTITY_KIND: u8 = 2;

    fn write(&self, hasher: &mut Sha256) {
        match self {
            Seed::U64(value) => {
                hasher.update([Self::U64_KIND]);
                hasher.update(value.to_le_bytes());
            }
            Seed::Identity(identity) => {
                hasher.update([Self::IDENTITY_KIND]);
                hasher.update(identity.as_bytes());
            }
        }
    }
}

/// Deterministically map `(namespace, fields)` under `program` to an address.
///
/// The tag is length-prefixed and every field carries its kind and a fixed
/// width, so two distinct inputs never hash the same byte string.
pub fn derive(program: &ProgramId, namespace: Namespace, fields: &[Seed]) -> Address {
    let tag = namespace.tag();
    let mut hasher = Sha256::new();
    hasher.update([tag.len() as u8]);
    hasher.update(tag);
    for field in fields {
        field.write(&mut hasher);
    }
    hasher.update(program.as_bytes());
    hasher.update(PDA_MARKER);
    Address(hasher.finalize().into())
}

pub fn global_state_address(program: &ProgramId) -> Address {
    derive(program, Namespace::GlobalState, &[])
}

pub fn campaign_address(program: &ProgramId, campaign_id: u64) -> Address {
    derive(program, Namespace::Campaign, &[Seed::U64(campaign_id)])
}

pub fn donor_transaction_address(
    program: &ProgramId,
    donor: &Identity,
    campaign_id: u64,
    index: u64,
) -> Address {
    derive(
        program,
        Namespace::DonorTransaction,
        &[
            Seed::Identity(*donor),
            Seed::U64(campaign_id),
            Seed::U64(index),
        ],
    )
}

pub fn withdraw_transaction_address(
    program: &ProgramId,
    withdrawer: &Identity,
    campaign_id: u64,
    index: u64,
) -> Address {
    derive(
        program,
        Namespace::WithdrawTransaction,
        &[
            Seed::Identity(*withdrawer),
            Seed::U64(campaign_id),
            Seed::U64(index),
        ],
    )
}
