//! Process-wide, lazily loaded model handle.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::{Result, VoxscribeError};
use crate::model::AcousticModel;

/// Produces a model on demand.
pub trait ModelLoader: Send + Sync {
    /// Human-readable description for logs, e.g. the tier name.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Arc<dyn AcousticModel>>;
}

/// Loader that hands out an already constructed model.
pub struct StaticLoader(Arc<dyn AcousticModel>);

impl StaticLoader {
    pub fn new(model: Arc<dyn AcousticModel>) -> Self {
        Self(model)
    }
}

impl ModelLoader for StaticLoader {
    fn describe(&self) -> String {
        self.0.name().to_string()
    }

    fn load(&self) -> Result<Arc<dyn AcousticModel>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Model loaded at most once per process and shared read-only afterwards.
///
/// The first caller of [`SharedModel::get`] performs the load while holding
/// the lock; concurrent callers block on the same lock and receive the result.
/// A failed load is not cached, so a later request retries.
pub struct SharedModel {
    loader: Box<dyn ModelLoader>,
    model: Mutex<Option<Arc<dyn AcousticModel>>>,
    loads: AtomicUsize,
}

impl fmt::Debug for SharedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedModel")
            .field("loader", &self.loader.describe())
            .field("loads", &self.load_count())
            .finish()
    }
}

impl SharedModel {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            model: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Wrap a model that is already in memory. It is still handed out lazily.
    pub fn preloaded(model: Arc<dyn AcousticModel>) -> Self {
        Self::new(StaticLoader::new(model))
    }

    pub fn describe(&self) -> String {
        self.loader.describe()
    }

    /// Return the model, loading it on first use.
    pub fn get(&self) -> Result<Arc<dyn AcousticModel>> {
        let mut slot = self
            .model
            .lock()
            .map_err(|e| VoxscribeError::inference(format!("Model lock poisoned: {e}")))?;

        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        info!(model = %self.loader.describe(), "Loading acoustic model");
        let model = self.loader.load()?;
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Number of load attempts so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::MockModel;
    use std::thread;
    use std::time::Duration;

    struct SlowLoader {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    impl ModelLoader for SlowLoader {
        fn describe(&self) -> String {
            "slow-mock".to_string()
        }

        fn load(&self) -> Result<Arc<dyn AcousticModel>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            if self.fail_first && call == 0 {
                return Err(VoxscribeError::model_load("slow-mock", "disk on fire"));
            }
            Ok(Arc::new(MockModel::new()))
        }
    }

    #[test]
    fn concurrent_callers_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = SharedModel::new(SlowLoader {
            calls: Arc::clone(&calls),
            fail_first: false,
        });

        let models: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| shared.get().unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared.load_count(), 1);
        assert!(models.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn failed_load_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = SharedModel::new(SlowLoader {
            calls: Arc::clone(&calls),
            fail_first: true,
        });

        assert!(matches!(
            shared.get(),
            Err(VoxscribeError::ModelLoad { .. })
        ));
        assert!(!shared.is_loaded());
        assert!(shared.get().is_ok());
        assert_eq!(shared.load_count(), 2);
    }

    #[test]
    fn preloaded_is_lazy() {
        let shared = SharedModel::preloaded(Arc::new(MockModel::new()));
        assert!(!shared.is_loaded());
        assert_eq!(shared.get().unwrap().name(), "mock");
        assert!(shared.is_loaded());
        assert_eq!(shared.describe(), "mock");
    }
}
