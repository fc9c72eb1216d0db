//! Context shared by both front ends

use std::sync::Arc;

use usersvc_core::UserStore;

/// Built once at startup and handed to the HTTP and gRPC services.
///
/// Cloning is cheap; every clone points at the same store and therefore the
/// same connection pool.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<AppContextInner>,
}

struct AppContextInner {
    store: Arc<dyn UserStore>,
}

impl AppContext {
    pub fn new(store: impl UserStore) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<dyn UserStore>) -> Self {
        Self {
            inner: Arc::new(AppContextInner { store }),
        }
    }

    pub fn store(&self) -> &dyn UserStore {
        self.inner.store.as_ref()
    }
}
