use anyhow::{Context, Result};
use core_logic::RawKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use ethers::utils::to_checksum;
use std::fmt;
use zeroize::Zeroizing;

/// A wallet identity: secret key plus the address derived from it.
#[derive(Clone)]
pub struct Identity {
    key: Zeroizing<String>,
    wallet: LocalWallet,
    address: String,
}

impl Identity {
    pub fn from_key(key: &RawKey) -> Result<Self> {
        Self::from_str_key(key.expose())
    }

    pub fn from_str_key(key: &str) -> Result<Self> {
        let wallet: LocalWallet = key.parse().context("Invalid private key")?;
        let address = to_checksum(&wallet.address(), None);
        Ok(Self {
            key: Zeroizing::new(key.to_string()),
            wallet,
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn h160(&self) -> Address {
        self.wallet.address()
    }

    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// `0x1234...abcd`
    pub fn short(&self) -> String {
        let a = &self.address;
        if a.len() <= 10 {
            return a.clone();
        }
        format!("{}...{}", &a[..6], &a[a.len() - 4..])
    }

    /// EIP-191 personal-message signature, `0x`-prefixed hex.
    pub async fn sign_challenge(&self, message: &str) -> Result<String> {
        let signature = self
            .wallet
            .sign_message(message)
            .await
            .context("Failed to sign challenge")?;
        Ok(format!("0x{}", signature))
    }

    /// Line written to the result log for this identity.
    pub fn log_entry(&self, include_key: bool) -> String {
        if include_key {
            format!("{}:{}", self.address, self.key.as_str())
        } else {
            self.address.clone()
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("key", &"***REDACTED***")
            .finish()
    }
}
