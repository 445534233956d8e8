//! End-to-end training across a two-shard cluster: one input row on each
//! shard, cross-shard dot products over the intercom, and closed-form
//! verification of the applied gradients.

mod support;

use std::time::Duration;

use gramshard_common::{ClusterConfig, MatrixKind};
use gramshard_messages::{CbowRequest, SkipGramRequest, TrainingOutcome};
use gramshard_storage::RowStorage;

use support::{assert_rows_close, build_cluster, dot, sigmoid, wait_for};

fn two_shard_config() -> ClusterConfig {
    ClusterConfig {
        shard_count: 2,
        vector_dim: 4,
        vocab_size: 2,
        aggregation_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

const TOLERANCE: f64 = 1e-12;

#[tokio::test]
async fn skip_gram_round_with_remote_tree_node() {
    let cluster = build_cluster(two_shard_config(), &[]);

    // Interleaved routing: index 0 → shard A, index 1 → shard B.
    let input = vec![0.1, 0.2, 0.3, 0.4];
    let tree = vec![0.05, -0.05, 0.1, 0.0];
    cluster.storages[0]
        .set_row(MatrixKind::Input, 0, &input)
        .unwrap();
    cluster.storages[1]
        .set_row(MatrixKind::HsOutput, 1, &tree)
        .unwrap();
    let untouched = cluster.storages[1].get_row(MatrixKind::Input, 1).unwrap();

    let rx = cluster
        .client
        .submit_skip_gram(SkipGramRequest {
            alpha: 0.025,
            w1: 0,
            w2: 1,
            points: vec![1],
            codes: vec![1],
            neg_samples: 0,
            next_random: 1,
        })
        .unwrap();
    cluster.client.flush();

    let outcome = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("ack within deadline")
        .expect("ack channel open");
    assert_eq!(outcome, TrainingOutcome::Applied);

    // The one-way delta to shard B lands asynchronously after the ack.
    assert!(
        wait_for(
            || cluster.nodes[1].stats().deltas_applied == 1,
            Duration::from_secs(2)
        )
        .await
    );

    // g = (1 - code - sigmoid(<input, tree>)) * alpha, code = 1.
    let g = (0.0 - sigmoid(dot(&input, &tree))) * 0.025;
    let expected_input: Vec<f64> = input.iter().zip(&tree).map(|(i, t)| i + g * t).collect();
    let expected_tree: Vec<f64> = tree.iter().zip(&input).map(|(t, i)| t + g * i).collect();
    assert_rows_close(
        &cluster.storages[0].get_row(MatrixKind::Input, 0).unwrap(),
        &expected_input,
        TOLERANCE,
    );
    assert_rows_close(
        &cluster.storages[1].get_row(MatrixKind::HsOutput, 1).unwrap(),
        &expected_tree,
        TOLERANCE,
    );

    // Exactly one intercom round trip served, on shard B, and exactly one
    // remote row update; nothing else moved.
    assert_eq!(cluster.nodes[1].stats().partials_served, 1);
    assert_eq!(cluster.nodes[0].stats().partials_served, 0);
    assert_eq!(cluster.nodes[0].stats().deltas_applied, 0);
    assert_eq!(cluster.nodes[0].stats().steps_completed, 1);
    assert_eq!(
        cluster.storages[1].get_row(MatrixKind::Input, 1).unwrap(),
        untouched
    );
}

#[tokio::test]
async fn cbow_round_gathers_remote_context() {
    let cluster = build_cluster(two_shard_config(), &[]);

    let context = vec![0.2, -0.1, 0.05, 0.3];
    let tree = vec![0.1, 0.1, -0.2, 0.0];
    cluster.storages[1]
        .set_row(MatrixKind::Input, 1, &context)
        .unwrap();
    cluster.storages[1]
        .set_row(MatrixKind::HsOutput, 1, &tree)
        .unwrap();

    // w1 = 0 drives on shard A; the single context word and the tree node
    // both live on shard B.
    let rx = cluster
        .client
        .submit_cbow(CbowRequest {
            alpha: 0.025,
            w1: 0,
            context: vec![1],
            points: vec![1],
            codes: vec![1],
            neg_samples: 0,
            next_random: 1,
        })
        .unwrap();
    cluster.client.flush();

    let outcome = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("ack within deadline")
        .expect("ack channel open");
    assert_eq!(outcome, TrainingOutcome::Applied);

    // Two one-way deltas land on B: the tree node and the context row.
    assert!(
        wait_for(
            || cluster.nodes[1].stats().deltas_applied == 2,
            Duration::from_secs(2)
        )
        .await
    );

    // Single context word: the input vector is the context row itself.
    let g = (0.0 - sigmoid(dot(&context, &tree))) * 0.025;
    let expected_tree: Vec<f64> = tree.iter().zip(&context).map(|(t, c)| t + g * c).collect();
    let expected_context: Vec<f64> =
        context.iter().zip(&tree).map(|(c, t)| c + g * t).collect();
    assert_rows_close(
        &cluster.storages[1].get_row(MatrixKind::HsOutput, 1).unwrap(),
        &expected_tree,
        TOLERANCE,
    );
    assert_rows_close(
        &cluster.storages[1].get_row(MatrixKind::Input, 1).unwrap(),
        &expected_context,
        TOLERANCE,
    );

    // One row fetch plus one dot request served by B.
    assert_eq!(cluster.nodes[1].stats().partials_served, 2);
    assert_eq!(cluster.nodes[0].stats().steps_completed, 1);
}

#[tokio::test]
async fn merged_siblings_train_once_with_summed_alpha() {
    // A wide window keeps both submissions in the same batch regardless of
    // scheduling.
    let mut config = two_shard_config();
    config.join.window = Duration::from_secs(10);
    let cluster = build_cluster(config, &[]);

    let input = vec![0.1, 0.2, 0.3, 0.4];
    let tree = vec![0.05, -0.05, 0.1, 0.0];
    cluster.storages[0]
        .set_row(MatrixKind::Input, 0, &input)
        .unwrap();
    cluster.storages[1]
        .set_row(MatrixKind::HsOutput, 1, &tree)
        .unwrap();

    let request = SkipGramRequest {
        alpha: 0.01,
        w1: 0,
        w2: 1,
        points: vec![1],
        codes: vec![1],
        neg_samples: 0,
        next_random: 1,
    };
    // Two submissions for the same pair inside one batching window.
    let rx_a = cluster.client.submit_skip_gram(request.clone()).unwrap();
    let rx_b = cluster.client.submit_skip_gram(request).unwrap();
    assert_eq!(cluster.client.flush(), 1, "siblings must merge into one envelope");

    let a = tokio::time::timeout(Duration::from_secs(2), rx_a)
        .await
        .unwrap()
        .unwrap();
    let b = tokio::time::timeout(Duration::from_secs(2), rx_b)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a, TrainingOutcome::Applied);
    assert_eq!(b, TrainingOutcome::Applied);

    // One merged step, trained with alpha = 0.02.
    assert_eq!(cluster.nodes[0].stats().steps_completed, 1);
    assert_eq!(cluster.client.stats().merged, 1);
    let g = (0.0 - sigmoid(dot(&input, &tree))) * 0.02;
    let expected_input: Vec<f64> = input.iter().zip(&tree).map(|(i, t)| i + g * t).collect();
    assert_rows_close(
        &cluster.storages[0].get_row(MatrixKind::Input, 0).unwrap(),
        &expected_input,
        TOLERANCE,
    );
}
