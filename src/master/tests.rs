pub(crate) use super::*;
use crate::config::{ScoreConfig, ScoreKind};
use crate::phi::WeightVector;
use parking_lot::RwLock;

fn sample_batch(id: &str) -> Batch {
    let mut batch = Batch::new(id, vec![Token::new("cat"), Token::new("dog")]);
    batch.add_item(vec![0, 1], vec![3.0, 1.0]);
    batch
}

fn master_with_model(threads: usize) -> Master {
    let master = Master::new(
        MasterConfig::new()
            .with_topic_count(2)
            .with_threads(threads),
    );
    master.import_batches(vec![sample_batch("b0"), sample_batch("b1")]);
    master.gather_dictionary("main", &[]).expect("batches registered");
    master
        .initialize_model(&InitializeModelArgs::from_dictionary("main"))
        .expect("dictionary has entries");
    master
}

#[test]
fn test_initialize_requires_dictionary() {
    let master = Master::new(MasterConfig::new().with_topic_count(2).with_threads(1));
    let err = master
        .initialize_model(&InitializeModelArgs::from_dictionary("missing"))
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_initialize_rejects_empty_dictionary() {
    let master = Master::new(MasterConfig::new().with_topic_count(2).with_threads(1));
    master.create_dictionary(Dictionary::from_tokens("empty", []));
    let err = master
        .initialize_model(&InitializeModelArgs::from_dictionary("empty"))
        .expect_err("must fail");
    assert!(err.to_string().contains("no entries"));
}

#[test]
fn test_initialize_requires_topics() {
    let master = Master::new(MasterConfig::new().with_threads(1));
    master.create_dictionary(Dictionary::from_tokens("main", [Token::new("cat")]));
    let err = master
        .initialize_model(&InitializeModelArgs::from_dictionary("main"))
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
}

#[test]
fn test_initialize_is_deterministic_in_seed() {
    let master = master_with_model(1);
    let first = master
        .get_topic_model(&GetTopicModelArgs::default())
        .expect("model exists");

    master
        .initialize_model(&InitializeModelArgs::from_dictionary("main"))
        .expect("reinitialize");
    let second = master
        .get_topic_model(&GetTopicModelArgs::default())
        .expect("model exists");
    assert_eq!(first.token_weights, second.token_weights);

    master
        .initialize_model(&InitializeModelArgs::from_dictionary("main").with_seed(7))
        .expect("reinitialize");
    let reseeded = master
        .get_topic_model(&GetTopicModelArgs::default())
        .expect("model exists");
    assert_ne!(first.token_weights, reseeded.token_weights);
}

#[test]
fn test_initialize_normalizes_topics() {
    let master = master_with_model(1);
    let model = master
        .get_topic_model(&GetTopicModelArgs::default())
        .expect("model exists");
    for topic_id in 0..model.topic_size() {
        let total: f32 = model
            .token_weights
            .iter()
            .map(|w| w.value(topic_id))
            .sum();
        assert!((total - 1.0).abs() < 1e-5, "topic {topic_id} sums to {total}");
    }
}

#[test]
fn test_process_batches_requires_workers() {
    let master = master_with_model(1);
    master.reconfigure(MasterConfig::new().with_topic_count(2).with_threads(0));

    let args = ProcessBatchesArgs::from_source("pwt").with_batch_filename("b0");
    let err = master.process_batches(&args).expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
    assert!(err.to_string().contains("no processors"));
}

#[test]
fn test_process_batches_rejects_same_source_and_target() {
    let master = master_with_model(1);
    let args = ProcessBatchesArgs::from_source("pwt")
        .with_nwt_target("pwt")
        .with_batch_filename("b0");
    let err = master.process_batches(&args).expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
}

#[test]
fn test_async_requires_none_theta_type() {
    let master = master_with_model(1);
    let args = ProcessBatchesArgs::from_source("pwt")
        .with_nwt_target("nwt")
        .with_batch_filename("b0")
        .with_theta_matrix_type(ThetaMatrixType::Dense);
    let err = master.process_batches_async(&args).expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
}

#[test]
fn test_process_batches_missing_model() {
    let master = Master::new(MasterConfig::new().with_topic_count(2).with_threads(1));
    let args = ProcessBatchesArgs::from_source("pwt").with_batch_filename("b0");
    let err = master.process_batches(&args).expect_err("must fail");
    assert!(matches!(err, TematicaError::MissingModel(_)));
}

#[test]
fn test_process_batches_returns_dense_theta() {
    let master = master_with_model(1);
    let args = ProcessBatchesArgs::from_source("pwt")
        .with_batch_filename("b0")
        .with_batch_filename("b1")
        .with_theta_matrix_type(ThetaMatrixType::Dense);
    let result = master.process_batches(&args).expect("processing succeeds");
    let theta = result.theta_matrix.expect("theta requested");
    // One row per document, every submitted batch appears exactly once.
    assert_eq!(theta.item_size(), 2);
    for row in &theta.item_weights {
        let total: f32 = (0..theta.topic_size()).map(|t| row.value(t)).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }
}

#[test]
fn test_attach_model_aliases_storage() {
    let master = master_with_model(1);
    let info = master.get_master_info();
    let model = info.models.iter().find(|m| m.name == "pwt").expect("pwt");
    let buffer: AttachedBuffer = Arc::new(RwLock::new(vec![
        0.0;
        model.token_size * model.topic_size
    ]));

    master
        .attach_model("pwt", Arc::clone(&buffer))
        .expect("attach succeeds");

    // The buffer now carries the model contents.
    let total: f32 = buffer.read().iter().sum();
    assert!((total - model.topic_size as f32).abs() < 1e-4);

    // A second attach without dispose is rejected.
    let err = master
        .attach_model("pwt", Arc::clone(&buffer))
        .expect_err("must fail");
    assert!(err.to_string().contains("already attached"));
}

#[test]
fn test_attach_model_checks_buffer_length() {
    let master = master_with_model(1);
    let buffer: AttachedBuffer = Arc::new(RwLock::new(vec![0.0; 3]));
    let err = master.attach_model("pwt", buffer).expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
}

#[test]
fn test_overwrite_model_registers_copy() {
    let master = Master::new(MasterConfig::new().with_topic_count(2).with_threads(1));
    let model = TopicModel {
        name: String::new(),
        topic_names: vec!["t0".to_string(), "t1".to_string()],
        tokens: vec![Token::new("cat")],
        token_weights: vec![WeightVector::Dense(vec![0.4, 0.6])],
    };
    master.overwrite_model(&model);

    let back = master
        .get_topic_model(&GetTopicModelArgs::default())
        .expect("registered under the config name");
    assert_eq!(back.tokens, model.tokens);
    assert_eq!(back.token_weights, model.token_weights);
}

#[test]
fn test_external_topic_model_layout() {
    let master = Master::new(MasterConfig::new().with_topic_count(2).with_threads(1));
    let model = TopicModel {
        name: String::new(),
        topic_names: vec!["t0".to_string(), "t1".to_string()],
        tokens: vec![Token::new("cat"), Token::new("dog")],
        token_weights: vec![
            WeightVector::Dense(vec![0.25, 0.75]),
            WeightVector::Dense(vec![1.0, 0.0]),
        ],
    };
    master.overwrite_model(&model);

    let mut external = Vec::new();
    let returned = master
        .get_topic_model_external(&GetTopicModelArgs::default(), &mut external)
        .expect("dense request succeeds");

    // Row-major little-endian f32, token-major; the message payload is
    // cleared after serialization.
    assert_eq!(external.len(), 2 * 2 * 4);
    let decoded: Vec<f32> = external
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    assert_eq!(decoded, vec![0.25, 0.75, 1.0, 0.0]);
    assert!(returned.token_weights.is_empty());
    assert_eq!(returned.tokens.len(), 2);
}

#[test]
fn test_external_requires_dense_layout() {
    let master = master_with_model(1);
    let mut external = Vec::new();
    let args = GetTopicModelArgs::default().with_layout(MatrixLayout::Sparse);
    let err = master
        .get_topic_model_external(&args, &mut external)
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));

    let theta_args = GetThetaMatrixArgs {
        layout: MatrixLayout::Sparse,
        ..GetThetaMatrixArgs::default()
    };
    let err = master
        .get_theta_matrix_external(&theta_args, &mut external)
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
}

#[test]
fn test_transform_caches_only_in_cache_mode() {
    let master = master_with_model(1);

    // Dense transform returns Θ and leaves the instance cache empty.
    let theta = master
        .transform(&TransformArgs::default().with_batch_filename("b0"))
        .expect("transform succeeds");
    assert_eq!(theta.item_size(), 1);
    assert_eq!(master.get_master_info().theta_cache_size, 0);

    // Cache mode with cache_theta disabled stores nothing either.
    master
        .transform(
            &TransformArgs::default()
                .with_batch_filename("b0")
                .with_theta_matrix_type(ThetaMatrixType::Cache),
        )
        .expect("transform succeeds");
    assert_eq!(master.get_master_info().theta_cache_size, 0);

    // With cache_theta enabled, Cache mode populates the instance cache.
    let master = Master::new(
        MasterConfig::new()
            .with_topic_count(2)
            .with_threads(1)
            .with_cache_theta(true),
    );
    master.import_batches(vec![sample_batch("b0")]);
    master.gather_dictionary("main", &[]).expect("registered");
    master
        .initialize_model(&InitializeModelArgs::from_dictionary("main"))
        .expect("initialized");
    master
        .transform(
            &TransformArgs::default()
                .with_batch_filename("b0")
                .with_theta_matrix_type(ThetaMatrixType::Cache),
        )
        .expect("transform succeeds");
    assert_eq!(master.get_master_info().theta_cache_size, 1);
    assert_eq!(
        master.get_theta_matrix(&GetThetaMatrixArgs::default()).item_size(),
        1
    );
}

#[test]
fn test_merge_requires_sources_and_weights() {
    let master = Master::new(MasterConfig::new().with_topic_count(2).with_threads(1));

    let err = master
        .merge_models(&MergeModelArgs::into_target("nwt"))
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));

    let mut args = MergeModelArgs::into_target("nwt").with_source("a", 1.0);
    args.source_weights.clear();
    let err = master.merge_models(&args).expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));

    // All sources missing: nothing to merge.
    let args = MergeModelArgs::into_target("nwt").with_source("ghost", 1.0);
    let err = master.merge_models(&args).expect_err("must fail");
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn test_regularize_and_normalize_validate_names() {
    let master = master_with_model(1);

    let err = master
        .regularize_model(&RegularizeModelArgs::default())
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));

    let err = master
        .normalize_model(&NormalizeModelArgs::default())
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));

    let err = master
        .normalize_model(&NormalizeModelArgs {
            pwt_target_name: "pwt2".to_string(),
            nwt_source_name: "ghost".to_string(),
            rwt_source_name: None,
        })
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::MissingModel(_)));
}

#[test]
fn test_score_value_requires_configuration() {
    let master = master_with_model(1);
    let err = master.get_score_value("perplexity").expect_err("must fail");
    assert!(err.to_string().contains("not configured"));
}

#[test]
fn test_sparsity_score_reads_current_model() {
    let master = Master::new(
        MasterConfig::new()
            .with_topic_count(2)
            .with_threads(1)
            .with_score(ScoreConfig {
                name: "sparsity".to_string(),
                kind: ScoreKind::SparsityPhi { eps: 1e-3 },
            }),
    );
    let model = TopicModel {
        name: String::new(),
        topic_names: vec!["t0".to_string(), "t1".to_string()],
        tokens: vec![Token::new("cat")],
        token_weights: vec![WeightVector::Dense(vec![0.0, 1.0])],
    };
    master.overwrite_model(&model);

    let value = master.get_score_value("sparsity").expect("configured");
    assert!((value.value() - 0.5).abs() < 1e-9);
}

#[test]
fn test_master_info_reports_state() {
    let master = master_with_model(2);
    let info = master.get_master_info();
    assert_eq!(info.processor_count, 2);
    assert_eq!(info.batch_count, 2);
    assert_eq!(info.dictionary_count, 1);
    assert_eq!(info.models.len(), 1);
    assert_eq!(info.models[0].name, "pwt");
    assert_eq!(info.models[0].topic_size, 2);
}

#[test]
fn test_fit_offline_requires_batches() {
    let master = Master::new(MasterConfig::new().with_topic_count(2).with_threads(1));
    let err = master
        .fit_offline(&FitOfflineArgs::with_passes(1))
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
}

#[test]
fn test_fit_online_validates_groups() {
    let master = master_with_model(1);
    let args = FitOnlineArgs::default()
        .with_batch_filename("b0")
        .with_batch_filename("b1")
        .with_update(1, 0.5, 0.5); // final boundary != batch count
    let err = master.fit_online(&args).expect_err("must fail");
    assert!(matches!(err, TematicaError::InvalidOperation(_)));
}

#[test]
fn test_generate_random_vector_depends_on_token_and_seed() {
    let cat = generate_random_vector(4, &Token::new("cat"), 0);
    let cat_again = generate_random_vector(4, &Token::new("cat"), 0);
    let dog = generate_random_vector(4, &Token::new("dog"), 0);
    let cat_reseeded = generate_random_vector(4, &Token::new("cat"), 1);

    assert_eq!(cat, cat_again);
    assert_ne!(cat, dog);
    assert_ne!(cat, cat_reseeded);
    assert!(cat.iter().all(|&v| (0.0..1.0).contains(&v)));
}
