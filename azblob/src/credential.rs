use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{BlobError, BlobResult};

type HmacSha256 = Hmac<Sha256>;

/// Storage account name plus decoded account key.
///
/// Validation happens here, at construction, so a malformed key is reported
/// before any request is built.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: Vec<u8>,
}

impl SharedKeyCredential {
    /// Build a credential from an account name and a base64 account key.
    pub fn new(account: impl Into<String>, key: impl AsRef<str>) -> BlobResult<Self> {
        let account = account.into();
        validate_account_name(&account)?;

        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err(BlobError::credential("account key is empty"));
        }
        let key = BASE64_STANDARD
            .decode(key)
            .map_err(|e| BlobError::credential(format!("account key is not valid base64: {}", e)))?;
        if key.is_empty() {
            return Err(BlobError::credential("account key decodes to zero bytes"));
        }

        Ok(Self { account, key })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// HMAC-SHA256 of `string_to_sign` under the account key, base64 encoded.
    pub(crate) fn compute_hmac_sha256(&self, string_to_sign: &str) -> BlobResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| BlobError::credential(format!("HMAC key error: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn validate_account_name(account: &str) -> BlobResult<()> {
    if account.is_empty() {
        return Err(BlobError::credential("account name is empty"));
    }
    if !(3..=24).contains(&account.len()) {
        return Err(BlobError::credential(format!(
            "account name '{}' must be 3-24 characters",
            account
        )));
    }
    if !account
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(BlobError::credential(format!(
            "account name '{}' may only contain lowercase letters and digits",
            account
        )));
    }
    Ok(())
}
