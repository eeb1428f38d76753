//! Deterministic symmetric encryption
//!
//! String values are encrypted with AES in CBC mode with PKCS#7 padding. The
//! key size picks AES-128, AES-192 or AES-256. The IV is the first 16 bytes of
//! HMAC-SHA256(key, plaintext), so a value always encrypts to the same output
//! under the same key. The output is `base64(IV || ciphertext)`.
//!
//! The engine never decrypts.

use super::crypto_hash::hmac_sha256;
use super::{parse_settings, targets, unsupported, NoSettings, Processor};
use crate::anonymization::config::validate_encrypt_key;
use crate::anonymization::context::ProcessContext;
use crate::anonymization::result::{Operation, ProcessResult};
use crate::document::{Document, NodeId};
use crate::domain::{Result, VeilError};
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::ExposeSecret;
use serde_json::{Map, Value};

/// Method name
pub const NAME: &str = "encrypt";

const BLOCK_SIZE: usize = 16;

enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self> {
        validate_encrypt_key(key)?;
        let invalid = |_| VeilError::Configuration("Invalid encryption key length".to_string());
        Ok(match key.len() {
            16 => BlockCipher::Aes128(Aes128::new_from_slice(key).map_err(invalid)?),
            24 => BlockCipher::Aes192(Aes192::new_from_slice(key).map_err(invalid)?),
            _ => BlockCipher::Aes256(Aes256::new_from_slice(key).map_err(invalid)?),
        })
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            BlockCipher::Aes128(cipher) => cipher.encrypt_block(block),
            BlockCipher::Aes192(cipher) => cipher.encrypt_block(block),
            BlockCipher::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }
}

/// Encrypt a string value, returning `base64(IV || ciphertext)`
pub fn encrypt_value(key: &[u8], plaintext: &str) -> Result<String> {
    let cipher = BlockCipher::new(key)?;
    let iv = &hmac_sha256(key, plaintext.as_bytes())[..BLOCK_SIZE];

    let mut data = plaintext.as_bytes().to_vec();
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    data.extend(std::iter::repeat(pad as u8).take(pad));

    let mut output = Vec::with_capacity(BLOCK_SIZE + data.len());
    output.extend_from_slice(iv);

    let mut previous = Block::clone_from_slice(iv);
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut block = Block::clone_from_slice(chunk);
        for (byte, prev) in block.iter_mut().zip(previous.iter()) {
            *byte ^= prev;
        }
        cipher.encrypt_block(&mut block);
        output.extend_from_slice(&block);
        previous = block;
    }

    Ok(STANDARD.encode(output))
}

#[derive(Debug, Default, Clone)]
pub struct EncryptProcessor;

impl EncryptProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        parse_settings::<NoSettings>(NAME, settings)?;
        Ok(Self)
    }
}

impl Processor for EncryptProcessor {
    fn name(&self) -> &str {
        NAME
    }

    fn process(
        &self,
        doc: &mut Document,
        node: NodeId,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult> {
        let key = ctx.parameters().encrypt_key.expose_secret();
        let targets = targets(doc, node, ctx);
        let mut result = ProcessResult::new();

        for target in targets.nodes {
            let Some(text) = doc.node(target).value_str() else {
                if targets.explicit {
                    return Err(unsupported(NAME, doc, target));
                }
                continue;
            };
            let encrypted = encrypt_value(key.as_bytes(), text)?;
            doc.set_value(target, Some(Value::String(encrypted)));
            result.add(Operation::Encrypt, target);
        }

        Ok(result)
    }
}
