use parking_lot::Mutex;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

use crate::task_host::types::{BoxError, TaskResult};

type Instance = Arc<dyn Any + Send + Sync>;
type CreateFn = Arc<dyn Fn(&Scope) -> TaskResult<Instance> + Send + Sync>;
type ReleaseFn = Arc<dyn Fn(&Instance) + Send + Sync>;

/// Errors raised while resolving a dependency from a [`Scope`]
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("no provider registered for {0}")]
    NotRegistered(&'static str),
    #[error("scope {0} has already been released")]
    Released(ScopeId),
    #[error("failed to create {type_name} in scope {scope}: {source}")]
    Factory {
        type_name: &'static str,
        scope: ScopeId,
        #[source]
        source: BoxError,
    },
}

/// Unique, increasing identifier of a scope
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

enum Registration {
    Singleton(Instance),
    Scoped {
        create: CreateFn,
        release: Option<ReleaseFn>,
    },
}

struct Provider {
    type_name: &'static str,
    registration: Registration,
}

struct FactoryInner {
    providers: HashMap<TypeId, Provider>,
    next_scope_id: AtomicU64,
    created: AtomicU64,
    released: AtomicU64,
}

/// Builder collecting type-keyed registrations for a [`ScopedResourceFactory`]
#[derive(Default)]
pub struct ScopedResourceFactoryBuilder {
    providers: HashMap<TypeId, Provider>,
}

impl ScopedResourceFactoryBuilder {
    /// One shared instance handed to every scope
    pub fn singleton<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.insert::<T>(Registration::Singleton(Arc::new(value)));
        self
    }

    /// One instance per scope, created on first resolve
    pub fn scoped<T, F>(mut self, create: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Scope) -> TaskResult<T> + Send + Sync + 'static,
    {
        self.insert::<T>(Registration::Scoped {
            create: Self::erase(create),
            release: None,
        });
        self
    }

    /// Like [`scoped`](Self::scoped), with a hook run when the scope is released
    pub fn scoped_with_release<T, F, R>(mut self, create: F, release: R) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Scope) -> TaskResult<T> + Send + Sync + 'static,
        R: Fn(&T) + Send + Sync + 'static,
    {
        let release: ReleaseFn = Arc::new(move |instance: &Instance| {
            if let Some(value) = instance.downcast_ref::<T>() {
                release(value);
            }
        });
        self.insert::<T>(Registration::Scoped {
            create: Self::erase(create),
            release: Some(release),
        });
        self
    }

    fn erase<T, F>(create: F) -> CreateFn
    where
        T: Any + Send + Sync,
        F: Fn(&Scope) -> TaskResult<T> + Send + Sync + 'static,
    {
        Arc::new(move |scope: &Scope| create(scope).map(|value| Arc::new(value) as Instance))
    }

    fn insert<T: Any>(&mut self, registration: Registration) {
        let previous = self.providers.insert(
            TypeId::of::<T>(),
            Provider {
                type_name: type_name::<T>(),
                registration,
            },
        );
        if previous.is_some() {
            tracing::debug!(type_name = type_name::<T>(), "Replacing existing registration");
        }
    }

    pub fn build(self) -> ScopedResourceFactory {
        ScopedResourceFactory {
            inner: Arc::new(FactoryInner {
                providers: self.providers,
                next_scope_id: AtomicU64::new(1),
                created: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }
}

/// Creates isolated per-invocation dependency scopes.
///
/// Cloning is cheap; clones share registrations and leak accounting.
#[derive(Clone)]
pub struct ScopedResourceFactory {
    inner: Arc<FactoryInner>,
}

impl ScopedResourceFactory {
    pub fn builder() -> ScopedResourceFactoryBuilder {
        ScopedResourceFactoryBuilder::default()
    }

    pub fn create_scope(&self) -> Scope {
        let id = ScopeId(self.inner.next_scope_id.fetch_add(1, Ordering::SeqCst));
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(scope_id = %id, "Scope created");

        Scope {
            id,
            factory: self.inner.clone(),
            instances: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }
    }

    /// Total number of scopes created so far
    pub fn scopes_created(&self) -> u64 {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Scopes created but not yet released
    pub fn outstanding_scopes(&self) -> u64 {
        self.inner
            .created
            .load(Ordering::SeqCst)
            .saturating_sub(self.inner.released.load(Ordering::SeqCst))
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.inner.providers.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for ScopedResourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<&str> = self.inner.providers.values().map(|p| p.type_name).collect();
        f.debug_struct("ScopedResourceFactory")
            .field("registrations", &types)
            .field("scopes_created", &self.scopes_created())
            .field("outstanding_scopes", &self.outstanding_scopes())
            .finish()
    }
}

/// Dependencies resolved for exactly one invocation.
///
/// Released exactly once: explicitly via [`release`](Scope::release) or
/// when dropped, whichever comes first.
pub struct Scope {
    id: ScopeId,
    factory: Arc<FactoryInner>,
    instances: Mutex<Vec<(TypeId, Instance)>>,
    released: AtomicBool,
}

impl Scope {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Resolve a registered dependency.
    ///
    /// Scoped registrations are created once per scope; the factory runs
    /// without holding the scope lock so it may resolve other dependencies.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ScopeError> {
        if self.is_released() {
            return Err(ScopeError::Released(self.id));
        }

        let key = TypeId::of::<T>();
        let provider = self
            .factory
            .providers
            .get(&key)
            .ok_or(ScopeError::NotRegistered(type_name::<T>()))?;

        let instance = match &provider.registration {
            Registration::Singleton(instance) => instance.clone(),
            Registration::Scoped { create, .. } => {
                if let Some(existing) = self.cached(key) {
                    existing
                } else {
                    let created = create(self).map_err(|source| ScopeError::Factory {
                        type_name: provider.type_name,
                        scope: self.id,
                        source,
                    })?;
                    let mut instances = self.instances.lock();
                    if self.is_released() {
                        drop(instances);
                        self.release_instance(provider, &created);
                        return Err(ScopeError::Released(self.id));
                    }
                    let raced = instances
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, instance)| instance.clone());
                    match raced {
                        Some(existing) => {
                            // Lost a creation race; the duplicate never becomes visible
                            drop(instances);
                            self.release_instance(provider, &created);
                            existing
                        }
                        None => {
                            instances.push((key, created.clone()));
                            created
                        }
                    }
                }
            }
        };

        instance
            .downcast::<T>()
            .map_err(|_| ScopeError::NotRegistered(type_name::<T>()))
    }

    fn cached(&self, key: TypeId) -> Option<Instance> {
        self.instances
            .lock()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, instance)| instance.clone())
    }

    /// Release the scope now instead of at drop; later calls and the drop are no-ops
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let instances = std::mem::take(&mut *self.instances.lock());
        let resolved = instances.len();
        for (key, instance) in instances.iter().rev() {
            if let Some(provider) = self.factory.providers.get(key) {
                self.release_instance(provider, instance);
            }
        }

        self.factory.released.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(scope_id = %self.id, resolved, "Scope released");
    }

    /// Run the provider's release hook for one instance, containing panics
    fn release_instance(&self, provider: &Provider, instance: &Instance) {
        let Registration::Scoped {
            release: Some(release),
            ..
        } = &provider.registration
        else {
            return;
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| release(instance)));
        if outcome.is_err() {
            tracing::error!(
                scope_id = %self.id,
                type_name = provider.type_name,
                "Release hook panicked"
            );
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
