use image::{GrayImage, ImageFormat, Luma};
use medscan_svm::config::{Config, StorageConfig};
use medscan_svm::storage::{BlobStore, MemoryStore};
use medscan_svm::*;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn stripes(class: i32, variant: u8, width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let coord = if class == 0 { y } else { x };
        let bright = (coord / 8) % 2 == 0;
        Luma([if bright { 200 + variant } else { 30 + variant }])
    })
}

fn png_bytes(image: &GrayImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

fn write_dataset(root: &Path, per_class: u8) {
    for (class, name) in [(0, "healthy"), (1, "other")] {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            stripes(class, i * 2, 256, 256)
                .save(dir.join(format!("scan_{:02}.png", i)))
                .unwrap();
        }
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.svm.max_iter = 50;
    config
}

fn ready_service(store: Arc<dyn BlobStore>) -> ClassificationService {
    let service = ClassificationService::new(test_config(), store).unwrap();
    assert!(service.load_models());
    service
}

/// Store whose lookups block, standing in for slow remote storage
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl BlobStore for SlowStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.inner.save(key, bytes)
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        std::thread::sleep(self.delay);
        self.inner.load(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> bool {
        std::thread::sleep(self.delay);
        self.inner.exists(key)
    }
}

/// Store that refuses to write one key while `failing` is set
struct FailingStore {
    inner: MemoryStore,
    poisoned_key: String,
    failing: AtomicBool,
}

impl FailingStore {
    fn new(poisoned_key: &str, failing: bool) -> Self {
        Self {
            inner: MemoryStore::new(),
            poisoned_key: poisoned_key.to_string(),
            failing: AtomicBool::new(failing),
        }
    }
}

impl BlobStore for FailingStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if key == self.poisoned_key && self.failing.load(Ordering::SeqCst) {
            return Err(ClassifierError::Storage {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.save(key, bytes)
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.load(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> bool {
        self.inner.exists(key)
    }
}

/// Store whose first write of `stalled_key` reports itself and then stalls
struct StallingStore {
    inner: MemoryStore,
    stalled_key: String,
    first: AtomicBool,
    entered: Mutex<Sender<()>>,
    delay: Duration,
}

impl BlobStore for StallingStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if key == self.stalled_key && self.first.swap(false, Ordering::SeqCst) {
            let _ = self.entered.lock().unwrap().send(());
            std::thread::sleep(self.delay);
        }
        self.inner.save(key, bytes)
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.load(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> bool {
        self.inner.exists(key)
    }
}

#[tokio::test]
async fn test_inference_fails_fast_while_models_load() {
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(200),
    });
    let service = Arc::new(ClassificationService::new(test_config(), store).unwrap());
    let scan = png_bytes(&stripes(0, 0, 256, 256));

    let handle = Arc::clone(&service).preload();
    let err = service.classify(&scan, true).unwrap_err();
    assert!(matches!(err, ClassifierError::ModelsNotReady));
    assert!(err.is_retryable());

    handle.await.unwrap().unwrap();
    assert!(service.is_ready());
    assert!(matches!(
        service.classify(&scan, true),
        Err(ClassifierError::UntrainedModel(ModelSlot::Patch))
    ));
}

#[tokio::test]
async fn test_preload_runs_once() {
    let service = Arc::new(ClassificationService::new(test_config(), Arc::new(MemoryStore::new())).unwrap());
    Arc::clone(&service).preload().await.unwrap().unwrap();
    assert!(service.is_ready());
    assert!(!service.load_models());
}

#[test]
fn test_training_persists_model_and_metrics() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path(), 6);
    let store = Arc::new(MemoryStore::new());
    let service = ready_service(store.clone());

    let outcome = service.train_from_directory(dir.path(), false).unwrap();
    assert_eq!(outcome.samples, 12);

    let keys = StorageConfig::default();
    assert_eq!(
        store.keys(),
        vec![
            keys.whole_metrics_key.clone(),
            keys.whole_model_key.clone()
        ]
    );
    let stored = service.load_metrics(false).unwrap();
    assert_eq!(stored, outcome.metrics);

    // A fresh service picks the persisted model up
    let fresh = ready_service(store);
    let scan = png_bytes(&stripes(1, 5, 256, 256));
    assert_eq!(fresh.classify(&scan, false).unwrap(), 1);
}

#[test]
fn test_failed_first_metrics_write_leaves_store_empty() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path(), 3);
    let keys = StorageConfig::default();
    let store = Arc::new(FailingStore::new(&keys.patch_metrics_key, true));
    let service = ready_service(store.clone());

    let err = service.train_from_directory(dir.path(), true).unwrap_err();
    assert!(matches!(err, ClassifierError::Storage { .. }));
    assert!(!store.exists(&keys.patch_model_key));
    assert!(!store.exists(&keys.patch_metrics_key));
    assert!(service.manager().model(ModelSlot::Patch).is_none());
}

#[test]
fn test_failed_retrain_keeps_previous_pair() {
    let first = TempDir::new().unwrap();
    write_dataset(first.path(), 3);
    let second = TempDir::new().unwrap();
    write_dataset(second.path(), 5);
    let keys = StorageConfig::default();
    let store = Arc::new(FailingStore::new(&keys.whole_metrics_key, false));
    let service = ready_service(store.clone());

    service.train_from_directory(first.path(), false).unwrap();
    let model_before = store.load(&keys.whole_model_key).unwrap();
    let metrics_before = store.load(&keys.whole_metrics_key).unwrap();
    let serving_before = service.manager().model(ModelSlot::WholeImage).unwrap();

    store.failing.store(true, Ordering::SeqCst);
    let err = service.train_from_directory(second.path(), false).unwrap_err();
    assert!(matches!(err, ClassifierError::Storage { .. }));

    assert_eq!(store.load(&keys.whole_model_key).unwrap(), model_before);
    assert_eq!(store.load(&keys.whole_metrics_key).unwrap(), metrics_before);
    let serving_after = service.manager().model(ModelSlot::WholeImage).unwrap();
    assert!(Arc::ptr_eq(&serving_before, &serving_after));
    assert_eq!(serving_after.samples(), 6);
}

#[test]
fn test_concurrent_same_slot_trainings_store_one_pair() {
    let small = TempDir::new().unwrap();
    write_dataset(small.path(), 3);
    let large = TempDir::new().unwrap();
    write_dataset(large.path(), 6);
    let keys = StorageConfig::default();
    let (entered_tx, entered_rx) = mpsc::channel();
    let store = Arc::new(StallingStore {
        inner: MemoryStore::new(),
        stalled_key: keys.whole_metrics_key.clone(),
        first: AtomicBool::new(true),
        entered: Mutex::new(entered_tx),
        delay: Duration::from_millis(300),
    });
    let service = Arc::new(ready_service(store.clone()));

    let slow = {
        let service = Arc::clone(&service);
        let path = small.path().to_path_buf();
        std::thread::spawn(move || service.train_from_directory(path, false))
    };
    // The small run is now inside its metrics write
    entered_rx.recv().unwrap();
    let fast = {
        let service = Arc::clone(&service);
        let path = large.path().to_path_buf();
        std::thread::spawn(move || service.train_from_directory(path, false))
    };
    let slow = slow.join().unwrap().unwrap();
    let fast = fast.join().unwrap().unwrap();
    assert_eq!((slow.samples, fast.samples), (6, 12));

    let model = LinearSvm::from_json_bytes(&store.load(&keys.whole_model_key).unwrap()).unwrap();
    let metrics = MetricsCalculator::from_json(&store.load(&keys.whole_metrics_key).unwrap()).unwrap();
    let scored: u32 = metrics.confusion_matrix.iter().flatten().sum();
    assert_eq!(model.samples(), 12);
    assert_eq!(scored as usize, model.samples());

    let serving = service.manager().model(ModelSlot::WholeImage).unwrap();
    assert!(Arc::ptr_eq(&serving, &fast.model));
}

#[test]
fn test_evaluate_on_separable_set_is_perfect() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path(), 5);
    let service = ready_service(Arc::new(MemoryStore::new()));
    service.train_from_directory(dir.path(), false).unwrap();

    let dataset = DatasetLoader::default().load(dir.path()).unwrap();
    let metrics = service.evaluate(&dataset.images, &dataset.labels, false).unwrap();

    assert_eq!(metrics.accuracy, 1.0);
    assert_eq!(metrics.confusion_matrix, vec![vec![5, 0], vec![0, 5]]);
}

#[test]
fn test_analyze_reports_diagnosis_and_metrics() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path(), 4);
    let service = ready_service(Arc::new(MemoryStore::new()));
    service.train_from_directory(dir.path(), true).unwrap();

    let scan = png_bytes(&stripes(1, 3, 256, 256));
    let report = service.analyze(&scan, true).unwrap();

    assert_eq!(report.label, 1);
    assert_eq!(report.class, DiagnosisClass::Other);
    assert_eq!(report.info, DiagnosisClass::Other.info());
    assert!(report.accuracy >= 0.9);
    assert!(report.precision > 0.0 && report.recall > 0.0);

    let votes = service.patch_pathologies(&scan).unwrap();
    assert_eq!(votes.get(&1), Some(&49));
}

#[test]
fn test_heatmaps_render_at_input_resolution() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path(), 3);
    let service = ready_service(Arc::new(MemoryStore::new()));
    service.train_from_directory(dir.path(), true).unwrap();

    let scan = png_bytes(&stripes(0, 1, 320, 240));
    let overlay = service.generate_heatmap(&scan, true).unwrap();
    assert_eq!(overlay.dimensions(), (320, 240));

    let other = png_bytes(&stripes(1, 1, 320, 240));
    let diff = service.generate_difference_heatmap(&scan, &other, true).unwrap();
    assert_eq!(diff.dimensions(), (256, 256));
}

#[test]
fn test_unknown_labels_fall_back() {
    assert_eq!(ClassificationService::diagnosis_for(7), DiagnosisClass::Unknown.info());
    assert_eq!(
        ClassificationService::diagnosis_for(2).diagnosis,
        DiagnosisClass::Pneumonia.info().diagnosis
    );
}
