//! Tiny on-disk model assets for integration tests.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use safetensors::tensor::{Dtype, TensorView};
use std::collections::HashMap;
use std::path::Path;
use stonegpt::config::{TOKENIZER_FILE, WEIGHTS_FILE};
use stonegpt::Hyperparameters;

pub const WORDS: &[&str] = &[
    "<|endoftext|>",
    "Stone",
    "is",
    "Hello",
    "world",
    "a",
    "rock",
    "hard",
    "[UNK]",
];

pub fn tiny_hyperparameters() -> Hyperparameters {
    Hyperparameters {
        n_ctx: 256,
        n_embd: 8,
        n_layer: 2,
        n_head: 2,
    }
}

/// Word-level tokenizer whose id 0 is the GPT-2 end-of-text token.
pub fn write_tokenizer(dir: &Path) {
    let vocab: serde_json::Map<String, serde_json::Value> = WORDS
        .iter()
        .enumerate()
        .map(|(id, word)| (word.to_string(), serde_json::json!(id)))
        .collect();

    let tokenizer = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [{
            "id": 0,
            "content": "<|endoftext|>",
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true
        }],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    });
    std::fs::write(dir.join(TOKENIZER_FILE), tokenizer.to_string()).unwrap();
}

/// Random GPT-2 weights for `hp` with the fixture vocabulary.
pub fn write_weights(dir: &Path, hp: Hyperparameters, seed: u64) {
    let vocab = WORDS.len();
    let e = hp.n_embd;
    let inner = 4 * e;

    let mut shapes: Vec<(String, Vec<usize>)> = vec![
        ("transformer.wte.weight".into(), vec![vocab, e]),
        ("transformer.wpe.weight".into(), vec![hp.n_ctx, e]),
        ("transformer.ln_f.weight".into(), vec![e]),
        ("transformer.ln_f.bias".into(), vec![e]),
    ];
    for i in 0..hp.n_layer {
        let p = format!("transformer.h.{i}");
        shapes.extend([
            (format!("{p}.ln_1.weight"), vec![e]),
            (format!("{p}.ln_1.bias"), vec![e]),
            (format!("{p}.attn.c_attn.weight"), vec![e, 3 * e]),
            (format!("{p}.attn.c_attn.bias"), vec![3 * e]),
            (format!("{p}.attn.c_proj.weight"), vec![e, e]),
            (format!("{p}.attn.c_proj.bias"), vec![e]),
            (format!("{p}.ln_2.weight"), vec![e]),
            (format!("{p}.ln_2.bias"), vec![e]),
            (format!("{p}.mlp.c_fc.weight"), vec![e, inner]),
            (format!("{p}.mlp.c_fc.bias"), vec![inner]),
            (format!("{p}.mlp.c_proj.weight"), vec![inner, e]),
            (format!("{p}.mlp.c_proj.bias"), vec![e]),
        ]);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 0.5).unwrap();
    let stored: Vec<(String, Vec<usize>, Vec<u8>)> = shapes
        .into_iter()
        .map(|(name, shape)| {
            let count: usize = shape.iter().product();
            let is_norm_scale = name.contains("ln_") && name.ends_with(".weight");
            let bytes = (0..count)
                .map(|_| if is_norm_scale { 1.0 } else { normal.sample(&mut rng) })
                .flat_map(f32::to_le_bytes)
                .collect();
            (name, shape, bytes)
        })
        .collect();

    let views: HashMap<String, TensorView> = stored
        .iter()
        .map(|(name, shape, bytes)| {
            (
                name.clone(),
                TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap(),
            )
        })
        .collect();
    safetensors::serialize_to_file(&views, &None, &dir.join(WEIGHTS_FILE)).unwrap();
}

/// A public directory holding both assets.
pub fn public_dir(hp: Hyperparameters) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());
    write_weights(dir.path(), hp, 1234);
    dir
}
