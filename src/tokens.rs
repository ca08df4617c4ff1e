use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::{Arc, LazyLock}};
use tiktoken_rs::CoreBPE;

/// Counts tokens the way the target model would.
pub trait TokenEncoding: Send + Sync {
    fn name(&self) -> &str;
    fn count(&self, text: &str) -> usize;
}

pub struct BpeEncoding {
    name: String,
    bpe: Arc<CoreBPE>,
}

impl TokenEncoding for BpeEncoding {
    fn name(&self) -> &str { &self.name }
    fn count(&self, text: &str) -> usize { self.bpe.encode_with_special_tokens(text).len() }
}

// Building a BPE table is slow; every window of the process shares one per identifier.
static ENCODINGS: LazyLock<Mutex<HashMap<String, Arc<CoreBPE>>>> = LazyLock::new(Default::default);

fn load_bpe(id: &str) -> Result<CoreBPE> {
    match id {
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "o200k_base" => tiktoken_rs::o200k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "p50k_edit" => tiktoken_rs::p50k_edit(),
        "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
        model => tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| anyhow!("unknown encoding or model '{model}': {e}")),
    }
}

/// Resolve an encoding by identifier or model name.
pub fn encoding_for(id: &str) -> Result<Arc<dyn TokenEncoding>> {
    let mut cache = ENCODINGS.lock();
    let bpe = match cache.get(id) {
        Some(bpe) => bpe.clone(),
        None => {
            let bpe = Arc::new(load_bpe(id)?);
            cache.insert(id.to_string(), bpe.clone());
            bpe
        }
    };
    Ok(Arc::new(BpeEncoding { name: id.to_string(), bpe }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_positive_and_stable() {
        let enc = encoding_for("cl100k_base").unwrap();
        let n = enc.count("hello world");
        assert!(n > 0);
        assert_eq!(n, enc.count("hello world"));
        assert_eq!(enc.count(""), 0);
    }

    #[test]
    fn unknown_encodings_are_rejected() {
        assert!(encoding_for("definitely-not-a-model").is_err());
    }
}
