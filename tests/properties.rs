//! Algebraic properties: merge linearity, export/import round-trips, and
//! import failure atomicity.

use proptest::prelude::*;

use tematica::batch::Token;
use tematica::phi::{TopicModel, WeightVector};
use tematica::prelude::*;
use tematica::{ExportModelArgs, ImportModelArgs, MergeModelArgs};

fn quiet_master() -> Master {
    Master::new(MasterConfig::new().with_topic_count(2).with_threads(1))
}

fn dense_model(name: &str, rows: &[Vec<f32>]) -> TopicModel {
    TopicModel {
        name: name.to_string(),
        topic_names: vec!["t0".to_string(), "t1".to_string()],
        tokens: (0..rows.len()).map(|i| Token::new(format!("w{i}"))).collect(),
        token_weights: rows.iter().map(|row| WeightVector::Dense(row.clone())).collect(),
    }
}

fn read_rows(master: &Master, name: &str) -> Vec<Vec<f32>> {
    let model = master
        .get_topic_model(&GetTopicModelArgs::for_model(name))
        .expect("model exists");
    let topic_size = model.topic_size();
    model
        .token_weights
        .iter()
        .map(|w| (0..topic_size).map(|t| w.value(t)).collect())
        .collect()
}

proptest! {
    /// Merge(T, [A, B], [alpha, beta]) equals alpha*A + beta*B elementwise.
    #[test]
    fn prop_merge_linearity(
        a in prop::collection::vec(prop::collection::vec(0.0f32..10.0, 2), 3),
        b in prop::collection::vec(prop::collection::vec(0.0f32..10.0, 2), 3),
        alpha in -2.0f32..2.0,
        beta in -2.0f32..2.0,
    ) {
        let master = quiet_master();
        master.overwrite_model(&dense_model("a", &a));
        master.overwrite_model(&dense_model("b", &b));
        master
            .merge_models(
                &MergeModelArgs::into_target("merged")
                    .with_source("a", alpha)
                    .with_source("b", beta),
            )
            .expect("merge succeeds");

        let merged = read_rows(&master, "merged");
        for (token_id, row) in merged.iter().enumerate() {
            for (topic_id, &value) in row.iter().enumerate() {
                let expected = alpha * a[token_id][topic_id] + beta * b[token_id][topic_id];
                prop_assert!(
                    (value - expected).abs() < 1e-4,
                    "cell ({token_id}, {topic_id}): {value} vs {expected}"
                );
            }
        }
    }

    /// Tokens absent from one source contribute zero from that source.
    #[test]
    fn prop_merge_missing_tokens_are_zero(
        a in prop::collection::vec(prop::collection::vec(0.0f32..10.0, 2), 2),
        extra in prop::collection::vec(0.0f32..10.0, 2),
    ) {
        let master = quiet_master();
        master.overwrite_model(&dense_model("a", &a));

        let mut wide = dense_model("b", &a);
        wide.tokens.push(Token::new("only_in_b"));
        wide.token_weights.push(WeightVector::Dense(extra.clone()));
        master.overwrite_model(&wide);

        master
            .merge_models(
                &MergeModelArgs::into_target("merged")
                    .with_source("a", 1.0)
                    .with_source("b", 1.0),
            )
            .expect("merge succeeds");

        let merged = read_rows(&master, "merged");
        prop_assert_eq!(merged.len(), 3);
        // The b-only token carries exactly b's values.
        for (topic_id, &value) in merged[2].iter().enumerate() {
            prop_assert!((value - extra[topic_id]).abs() < 1e-4);
        }
    }

    /// Import(Export(M)) reproduces M elementwise.
    #[test]
    fn prop_export_import_roundtrip(
        rows in prop::collection::vec(prop::collection::vec(0.0f32..100.0, 2), 1..8),
    ) {
        let master = quiet_master();
        master.overwrite_model(&dense_model("model", &rows));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.bin");
        master
            .export_model(&ExportModelArgs {
                model_name: Some("model".to_string()),
                file_name: path.clone(),
            })
            .expect("export succeeds");
        master
            .import_model(&ImportModelArgs {
                model_name: Some("restored".to_string()),
                file_name: path,
            })
            .expect("import succeeds");

        let exported = read_rows(&master, "model");
        let restored = read_rows(&master, "restored");
        prop_assert_eq!(exported, restored);
    }
}

#[test]
fn corrupted_import_leaves_registry_untouched() {
    let master = quiet_master();
    master.overwrite_model(&dense_model("model", &[vec![0.5, 0.5], vec![1.0, 0.0]]));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("model.bin");
    master
        .export_model(&ExportModelArgs {
            model_name: Some("model".to_string()),
            file_name: path.clone(),
        })
        .expect("export succeeds");

    // Truncate mid-chunk.
    let bytes = std::fs::read(&path).expect("read");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).expect("truncate");

    let err = master
        .import_model(&ImportModelArgs {
            model_name: Some("restored".to_string()),
            file_name: path,
        })
        .expect_err("must fail");
    assert!(matches!(err, TematicaError::CorruptedMessage(_)));

    // The failed import registered nothing.
    let err = master
        .get_topic_model(&GetTopicModelArgs::for_model("restored"))
        .expect_err("must be absent");
    assert!(matches!(err, TematicaError::MissingModel(_)));
}

#[test]
fn export_default_model_name_is_the_config_pwt() {
    let master = quiet_master();
    master.overwrite_model(&dense_model("", &[vec![1.0, 0.0]]));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("model.bin");
    master
        .export_model(&ExportModelArgs {
            model_name: None,
            file_name: path.clone(),
        })
        .expect("export of the config model succeeds");
    master
        .import_model(&ImportModelArgs {
            model_name: Some("copy".to_string()),
            file_name: path,
        })
        .expect("import succeeds");
    assert_eq!(read_rows(&master, "copy"), vec![vec![1.0, 0.0]]);
}
