use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::certificate::CertificateClient;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::inference::InferenceAdapter;
use crate::policy::DecisionPolicy;

/// Everything a request handler needs, passed explicitly instead of living
/// in globals.
pub struct AppContext {
    /// `None` when the model failed to load; each request then reports the
    /// load error instead of taking the service down.
    pub adapter: Option<Arc<InferenceAdapter>>,
    pub load_error: Option<String>,
    pub policy: DecisionPolicy,
    pub certificates: CertificateClient,
    pub predictions: PredictionStore,
    pub mint_guard: MintGuard,
    pub model_path: String,
}

impl AppContext {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let policy = DecisionPolicy::from(&config.policy);
        let certificates =
            CertificateClient::from_config(&config.certificate, policy.mint_threshold())?;

        let (adapter, load_error) = match InferenceAdapter::load(&config.model) {
            Ok(adapter) => (Some(Arc::new(adapter)), None),
            Err(e) => {
                tracing::error!(error = %e, "model unavailable, predictions will fail");
                (None, Some(e.to_string()))
            }
        };

        Ok(Self {
            adapter,
            load_error,
            policy,
            certificates,
            predictions: PredictionStore::new(config.session.prediction_capacity),
            mint_guard: MintGuard::default(),
            model_path: config.model.model_path.display().to_string(),
        })
    }

    pub fn require_adapter(&self) -> Result<Arc<InferenceAdapter>> {
        self.adapter.clone().ok_or_else(|| AppError::ModelLoad {
            path: self.model_path.clone(),
            reason: self
                .load_error
                .clone()
                .unwrap_or_else(|| "model not loaded".to_string()),
        })
    }
}

/// Recent confidence values keyed by prediction id. Bounded; the oldest
/// entry is evicted once capacity is reached.
pub struct PredictionStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    order: VecDeque<Uuid>,
    values: HashMap<Uuid, f32>,
}

impl PredictionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(StoreInner::default()),
        }
    }

    pub fn insert(&self, confidence: f32) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        while inner.order.len() >= self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.values.remove(&old);
            }
        }
        inner.order.push_back(id);
        inner.values.insert(id, confidence);
        id
    }

    pub fn get(&self, id: &str) -> Result<f32> {
        let parsed = Uuid::parse_str(id.trim())
            .map_err(|_| AppError::UnknownPrediction(id.to_string()))?;
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner
            .values
            .get(&parsed)
            .copied()
            .ok_or_else(|| AppError::UnknownPrediction(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).order.len()
    }
}

/// Allows one mint at a time. The returned permit releases on drop, so
/// every exit path of a mint frees the slot.
#[derive(Default)]
pub struct MintGuard {
    busy: AtomicBool,
}

pub struct MintPermit<'a> {
    guard: &'a MintGuard,
}

impl MintGuard {
    pub fn try_acquire(&self) -> Result<MintPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::MintInProgress)?;
        Ok(MintPermit { guard: self })
    }
}

impl Drop for MintPermit<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}
