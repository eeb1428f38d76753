//! Keyed cryptographic hashing
//!
//! Replaces string values with the lowercase hex HMAC-SHA256 of the value
//! under `cryptoHashKey`. The same value and key always give the same digest,
//! so hashed identifiers still join across records. Reference elements only
//! have their identifier segment hashed.

use super::{parse_settings, targets, unsupported, NoSettings, Processor};
use crate::anonymization::context::ProcessContext;
use crate::anonymization::reference::transform_reference;
use crate::anonymization::result::{Operation, ProcessResult};
use crate::document::{Document, NodeId};
use crate::domain::Result;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use sha2::Sha256;

/// Method name
pub const NAME: &str = "cryptoHash";

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `data` under `key`
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    digest
}

/// Lowercase hex HMAC-SHA256 of a string value
pub fn hash_value(key: &[u8], value: &str) -> String {
    hex::encode(hmac_sha256(key, value.as_bytes()))
}

#[derive(Debug, Default, Clone)]
pub struct CryptoHashProcessor;

impl CryptoHashProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        parse_settings::<NoSettings>(NAME, settings)?;
        Ok(Self)
    }
}

impl Processor for CryptoHashProcessor {
    fn name(&self) -> &str {
        NAME
    }

    fn process(
        &self,
        doc: &mut Document,
        node: NodeId,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult> {
        let key = ctx.parameters().crypto_hash_key.expose_secret();
        let targets = targets(doc, node, ctx);
        let mut result = ProcessResult::new();

        for target in targets.nodes {
            let Some(text) = doc.node(target).value_str() else {
                if targets.explicit {
                    return Err(unsupported(NAME, doc, target));
                }
                continue;
            };

            let hashed = if doc.node(target).name() == "reference" {
                transform_reference(text, |id| hash_value(key.as_bytes(), id))
            } else {
                hash_value(key.as_bytes(), text)
            };
            doc.set_value(target, Some(Value::String(hashed)));
            result.add(Operation::CryptoHash, target);
        }

        Ok(result)
    }
}
