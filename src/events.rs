use serde::Serialize;
use tokio::sync::broadcast;

/// Fire-and-forget cache notifications. JSON-shaped via serde when the value
/// type serializes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum CacheEvent<T> {
    #[serde(rename = "cache.hit")]
    Hit {
        key: String,
        value: T,
        store: String,
        graced: bool,
    },
    #[serde(rename = "cache.miss")]
    Miss { key: String, store: String },
    #[serde(rename = "cache.written")]
    Written { key: String, store: String },
    #[serde(rename = "cache.deleted")]
    Deleted { key: String, store: String },
}

/// Broadcast emitter shared by a cache stack. Emitting never blocks and never
/// fails: with no subscribers the event is simply dropped.
#[derive(Debug)]
pub struct CacheEvents<T> {
    sender: broadcast::Sender<CacheEvent<T>>,
    store: String,
}

impl<T> Clone for CacheEvents<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            store: self.store.clone(),
        }
    }
}

impl<T: Clone> CacheEvents<T> {
    const CAPACITY: usize = 256;

    pub fn new(store: &str) -> Self {
        let (sender, _) = broadcast::channel(Self::CAPACITY);
        Self {
            sender,
            store: store.to_string(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<T>> {
        self.sender.subscribe()
    }

    fn emit(&self, event: CacheEvent<T>) {
        let _ = self.sender.send(event);
    }

    pub fn hit(&self, key: &str, value: T, graced: bool) {
        self.emit(CacheEvent::Hit {
            key: key.to_string(),
            value,
            store: self.store.clone(),
            graced,
        });
    }

    pub fn miss(&self, key: &str) {
        self.emit(CacheEvent::Miss {
            key: key.to_string(),
            store: self.store.clone(),
        });
    }

    pub fn written(&self, key: &str) {
        self.emit(CacheEvent::Written {
            key: key.to_string(),
            store: self.store.clone(),
        });
    }

    pub fn deleted(&self, key: &str) {
        self.emit(CacheEvent::Deleted {
            key: key.to_string(),
            store: self.store.clone(),
        });
    }
}
