mod common;

use common::{public_dir, tiny_hyperparameters, write_tokenizer, write_weights};
use stonegpt::config::{EOS_TOKEN, WEIGHTS_FILE};
use stonegpt::{
    generate_text, generate_text_with, generate_tokens, load_model_with, Device, GenerationConfig,
    Hyperparameters, StoneError,
};

fn seeded(max_length: usize, seed: u64) -> GenerationConfig {
    GenerationConfig {
        max_length,
        eos_token_id: Some(0),
        pad_token_id: Some(0),
        seed: Some(seed),
        ..Default::default()
    }
}

#[test]
fn loads_model_in_inference_mode() {
    let hp = tiny_hyperparameters();
    let dir = public_dir(hp);

    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    assert!(!model.is_training());
    assert_eq!(model.device(), Device::Cpu);
    assert_eq!(model.config().vocab_size, tokenizer.vocab_size());
    assert_eq!(model.config().pad_token_id, tokenizer.eos_token_id());
    assert_eq!(model.config().hyperparameters(), hp);
}

#[test]
fn seeded_generation_is_deterministic() {
    let hp = tiny_hyperparameters();
    let dir = public_dir(hp);
    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    let config = seeded(40, 99);
    let first = generate_text_with(&model, &tokenizer, "Stone is", &config, Device::Cpu).unwrap();
    let second = generate_text_with(&model, &tokenizer, "Stone is", &config, Device::Cpu).unwrap();

    assert_eq!(first, second);
    assert!(first.starts_with("Stone is"));
}

#[test]
fn output_never_exceeds_max_length() {
    let hp = tiny_hyperparameters();
    let dir = public_dir(hp);
    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    for seed in 0..10 {
        let ids =
            generate_tokens(&model, &tokenizer, "Hello", &seeded(6, seed), Device::Cpu).unwrap();
        assert!(ids.len() <= 6, "generated {} tokens", ids.len());
        assert_eq!(ids[0], 3);
        // Generation stops right after the end-of-text token.
        if let Some(pos) = ids.iter().position(|&id| id == 0) {
            assert_eq!(pos, ids.len() - 1);
        }
    }
}

#[test]
fn decoded_output_has_no_special_tokens() {
    let hp = tiny_hyperparameters();
    let dir = public_dir(hp);
    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    for _ in 0..5 {
        let text = generate_text(&model, &tokenizer, "Hello world", 30, Device::Cpu).unwrap();
        assert!(!text.contains(EOS_TOKEN));
        assert!(text.starts_with("Hello world"));
    }
}

#[test]
fn max_length_is_clamped_to_context_window() {
    let hp = Hyperparameters {
        n_ctx: 12,
        ..tiny_hyperparameters()
    };
    let dir = public_dir(hp);
    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    let config = GenerationConfig {
        eos_token_id: None,
        ..seeded(200, 5)
    };
    let ids = generate_tokens(&model, &tokenizer, "Stone is", &config, Device::Cpu).unwrap();
    assert_eq!(ids.len(), 12);
}

#[test]
fn prompt_at_max_length_is_returned_unchanged() {
    let hp = tiny_hyperparameters();
    let dir = public_dir(hp);
    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    let text =
        generate_text_with(&model, &tokenizer, "Stone is a rock", &seeded(3, 1), Device::Cpu)
            .unwrap();
    assert_eq!(text, "Stone is a rock");
}

#[test]
fn prompt_longer_than_context_is_rejected() {
    let hp = Hyperparameters {
        n_ctx: 3,
        ..tiny_hyperparameters()
    };
    let dir = public_dir(hp);
    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    let err = generate_text(&model, &tokenizer, "Stone is a hard rock", 200, Device::Cpu)
        .unwrap_err();
    assert!(matches!(
        err,
        StoneError::PromptTooLong {
            tokens: 5,
            context: 3
        }
    ));
}

#[test]
fn empty_prompt_starts_from_end_of_text() {
    let hp = tiny_hyperparameters();
    let dir = public_dir(hp);
    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    let ids = generate_tokens(&model, &tokenizer, "", &seeded(8, 2), Device::Cpu).unwrap();
    assert_eq!(ids[0], 0);
    let text = tokenizer.decode(&ids, true).unwrap();
    assert!(!text.contains(EOS_TOKEN));
}

#[test]
fn missing_weight_file_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());

    let err = load_model_with(
        &dir.path().join(WEIGHTS_FILE),
        Device::Cpu,
        dir.path(),
        tiny_hyperparameters(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, StoneError::AssetLoad { .. }));
}

#[test]
fn mismatched_hyperparameters_fail_loudly() {
    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());
    write_weights(dir.path(), tiny_hyperparameters(), 7);

    let wider = Hyperparameters {
        n_embd: 16,
        ..tiny_hyperparameters()
    };
    let err = load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), wider)
        .err()
        .unwrap();
    match err {
        StoneError::ShapeMismatch { tensor, .. } => assert_eq!(tensor, "transformer.wte.weight"),
        other => panic!("unexpected error: {other}"),
    }

    let deeper = Hyperparameters {
        n_layer: 3,
        ..tiny_hyperparameters()
    };
    let err = load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), deeper)
        .err()
        .unwrap();
    assert!(matches!(err, StoneError::MissingTensor(ref name) if name.starts_with("transformer.h.2")));
}

#[test]
fn prompt_round_trips_through_tokenizer() {
    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());
    let tokenizer = stonegpt::GPTTokenizer::from_dir(dir.path()).unwrap();

    let ids = tokenizer.encode("Hello world").unwrap();
    assert_eq!(ids, vec![3, 4]);
    assert_eq!(tokenizer.decode(&ids, true).unwrap(), "Hello world");
}

#[test]
fn default_loader_expects_trained_hyperparameters() {
    // Fixture weights are 8 wide; the fixed configuration is 384 wide.
    let dir = public_dir(tiny_hyperparameters());

    let err = stonegpt::load_model(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path())
        .err()
        .unwrap();
    match err {
        StoneError::ShapeMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, vec![common::WORDS.len(), 384]);
            assert_eq!(actual, vec![common::WORDS.len(), 8]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn prompt_beyond_max_length_is_returned_unchanged() {
    let hp = tiny_hyperparameters();
    let dir = public_dir(hp);
    let (model, tokenizer) =
        load_model_with(&dir.path().join(WEIGHTS_FILE), Device::Cpu, dir.path(), hp).unwrap();

    let config = seeded(2, 4);
    let ids =
        generate_tokens(&model, &tokenizer, "Stone is a hard rock", &config, Device::Cpu).unwrap();
    assert_eq!(ids, vec![1, 2, 5, 7, 6]);
}
