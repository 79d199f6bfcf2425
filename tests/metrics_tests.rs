use medscan_svm::storage::{BlobStore, LocalStore};
use medscan_svm::*;
use ndarray::{array, Array2};
use tempfile::TempDir;

/// Predicts class 1 when the first feature dominates, class 0 otherwise
fn threshold_model() -> LinearSvm {
    LinearSvm::from_parts(
        ModelGeometry { window: 1, stride: 1 },
        vec![0, 1],
        array![[-1.0f32], [1.0]],
        vec![0.5, -0.5],
    )
    .unwrap()
}

#[test]
fn test_compute_scores_every_row() {
    let model = threshold_model();
    let features: Array2<f32> = array![[0.0], [0.2], [0.9], [1.0], [0.8]];
    let labels = [0, 1, 1, 1, 0];

    let metrics = MetricsCalculator::compute(&model, features.view(), &labels).unwrap();

    // predictions: 0, 0, 1, 1, 1
    assert_eq!(metrics.confusion_matrix, vec![vec![1, 1], vec![1, 2]]);
    assert!((metrics.accuracy - 0.6).abs() < 1e-12);

    let positive = metrics.class(1).unwrap();
    assert!((positive.precision - 2.0 / 3.0).abs() < 1e-12);
    assert!((positive.recall - 2.0 / 3.0).abs() < 1e-12);
    assert!((positive.f1 - 2.0 / 3.0).abs() < 1e-12);

    let negative = metrics.class(0).unwrap();
    assert!((negative.precision - 0.5).abs() < 1e-12);
    assert!((negative.recall - 0.5).abs() < 1e-12);
    assert_eq!(metrics.support(1), 3);
}

#[test]
fn test_compute_rejects_unaligned_inputs() {
    let model = threshold_model();
    let features = Array2::<f32>::zeros((3, 1));
    let err = MetricsCalculator::compute(&model, features.view(), &[0, 1]).unwrap_err();
    assert!(matches!(err, ClassifierError::LengthMismatch { features: 3, labels: 2 }));
}

#[test]
fn test_compute_surfaces_dimension_mismatch() {
    let model = threshold_model();
    let features = Array2::<f32>::zeros((2, 4));
    let err = MetricsCalculator::compute(&model, features.view(), &[0, 1]).unwrap_err();
    assert!(matches!(err, ClassifierError::DimensionMismatch { expected: 1, actual: 4 }));
}

#[test]
fn test_empty_evaluation_has_zero_accuracy() {
    let model = threshold_model();
    let features = Array2::<f32>::zeros((0, 1));
    let metrics = MetricsCalculator::compute(&model, features.view(), &[]).unwrap();
    assert_eq!(metrics.accuracy, 0.0);
    assert!(metrics.confusion_matrix.is_empty());
    assert!(metrics.per_class_metrics.is_empty());
}

#[test]
fn test_saved_document_layout() {
    let metrics = MetricsCalculator::from_predictions(&[0, 1, 2], &[0, 1, 1]).unwrap();
    let json: serde_json::Value =
        serde_json::from_slice(&MetricsCalculator::to_json(&metrics).unwrap()).unwrap();

    assert!(json["accuracy"].is_f64());
    assert_eq!(json["confusionMatrix"][2][1], 1);
    assert_eq!(json["perClassMetrics"]["1"]["precision"], 0.5);
    assert_eq!(json["perClassMetrics"]["2"]["recall"], 0.0);
}

#[test]
fn test_file_round_trip_is_bit_exact() {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::new(dir.path());
    let labels = [0, 0, 1, 1, 1, 2, 2];
    let predictions = [0, 1, 1, 1, 2, 2, 0];
    let metrics = MetricsCalculator::from_predictions(&labels, &predictions).unwrap();

    MetricsCalculator::save(&store, "patch_metrics.json", &metrics).unwrap();
    assert!(store.exists("patch_metrics.json"));
    let restored = MetricsCalculator::load(&store, "patch_metrics.json").unwrap();

    assert_eq!(restored.accuracy.to_bits(), metrics.accuracy.to_bits());
    for (label, class) in &metrics.per_class_metrics {
        let other = restored.class(*label).unwrap();
        assert_eq!(other.precision.to_bits(), class.precision.to_bits());
        assert_eq!(other.recall.to_bits(), class.recall.to_bits());
        assert_eq!(other.f1.to_bits(), class.f1.to_bits());
    }
    assert_eq!(restored, metrics);
}
