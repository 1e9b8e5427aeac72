use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};

use crate::error::DispatchError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

pub const KEY_LEN: usize = 16;

/// Key and IV are used as raw bytes and must be exactly 16 bytes each.
pub fn validate_key_iv<'a>(key: Option<&'a str>, iv: Option<&'a str>) -> Result<(&'a [u8], &'a [u8]), DispatchError> {
    let key = key.unwrap_or_default().as_bytes();
    let iv = iv.unwrap_or_default().as_bytes();
    if key.len() != KEY_LEN {
        return Err(DispatchError::Config(format!(
            "encryption key must be exactly {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    if iv.len() != KEY_LEN {
        return Err(DispatchError::Config(format!(
            "encryption iv must be exactly {KEY_LEN} bytes, got {}",
            iv.len()
        )));
    }
    Ok((key, iv))
}

/// AES-128-CBC with PKCS#7 padding, base64 encoded.
pub fn encrypt(plain: &[u8], key: Option<&str>, iv: Option<&str>) -> Result<String, DispatchError> {
    let (key, iv) = validate_key_iv(key, iv)?;
    let cipher = Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|e| DispatchError::Config(format!("invalid encryption key/iv: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plain);
    Ok(STANDARD.encode(ciphertext))
}
