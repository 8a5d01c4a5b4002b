//! C2 — reference-counted native bundle pool.
//!
//! Grounded on `plugin-catalog.hpp`'s `PluginBundlePool`, which takes
//! loader/unloader as constructor-injected `std::function`s rather than
//! virtual methods; the Rust equivalent is a pair of boxed closures handed
//! to the pool once at construction by the per-format driver.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::HostError;

/// An opaque handle to a loaded native bundle (dlopen handle, COM factory
/// pointer, CLAP entry pointer, …). The pool never inspects it — only the
/// per-format loader/unloader that produced it know what it means.
#[derive(Debug, Clone)]
pub struct BundleHandle(pub usize);

/// Whether a bundle is dropped as soon as its last reference goes away, or
/// kept alive until the pool itself is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    UnloadImmediately,
    Retain,
}

type Loader = Box<dyn Fn(&Path) -> Result<BundleHandle, HostError> + Send + Sync>;
type Unloader = Box<dyn Fn(&Path, &BundleHandle) -> Result<(), HostError> + Send + Sync>;

struct BundleRecord {
    handle: BundleHandle,
    ref_count: usize,
}

/// Reference-counted loader/unloader for native plugin bundles, keyed by
/// normalized bundle path.
pub struct BundlePool {
    load: Loader,
    unload: Unloader,
    policy: RetentionPolicy,
    bundles: HashMap<PathBuf, BundleRecord>,
}

impl BundlePool {
    pub fn new(policy: RetentionPolicy, load: Loader, unload: Unloader) -> Self {
        Self {
            load,
            unload,
            policy,
            bundles: HashMap::new(),
        }
    }

    pub fn set_retention_policy(&mut self, policy: RetentionPolicy) {
        self.policy = policy;
    }

    fn normalize(path: &Path) -> PathBuf {
        // `canonicalize` requires the path to exist; fall back to the raw
        // path (already absolute in practice — search paths are expanded
        // by the scanner) so pool lookups stay stable in tests that use
        // synthetic, non-existent paths.
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Returns the bundle's handle, loading it on a miss. `loaded_as_new`
    /// is `true` only when this call actually invoked the injected loader.
    ///
    /// Per §4.2 this must run on the UI thread for formats that require it
    /// — the pool itself does not enforce that; callers invoke it from
    /// within the appropriate [`crate::event_loop::EventLoop`] hop.
    pub fn load_or_add_reference(&mut self, path: &Path) -> Result<(BundleHandle, bool), HostError> {
        let key = Self::normalize(path);
        if let Some(record) = self.bundles.get_mut(&key) {
            record.ref_count += 1;
            return Ok((record.handle.clone_ref(), false));
        }

        let handle = (self.load)(&key).map_err(|e| match e {
            HostError::BundleLoadFailed { .. } => e,
            other => other,
        })?;
        log::info!("bundle pool: loaded {}", key.display());
        self.bundles.insert(
            key,
            BundleRecord {
                handle: handle.clone_ref(),
                ref_count: 1,
            },
        );
        Ok((handle, true))
    }

    /// Decrements the refcount for `path`; at zero, unloads iff the policy
    /// is [`RetentionPolicy::UnloadImmediately`].
    pub fn remove_reference(&mut self, path: &Path) -> Result<(), HostError> {
        let key = Self::normalize(path);
        let still_referenced = {
            let record = self
                .bundles
                .get_mut(&key)
                .ok_or_else(|| HostError::BundleNotFound(key.clone()))?;
            record.ref_count = record.ref_count.saturating_sub(1);
            record.ref_count > 0
        };

        if still_referenced {
            return Ok(());
        }

        if self.policy == RetentionPolicy::UnloadImmediately {
            if let Some(record) = self.bundles.remove(&key) {
                (self.unload)(&key, &record.handle)?;
                log::info!("bundle pool: unloaded {}", key.display());
            }
        }
        Ok(())
    }

    pub fn ref_count(&self, path: &Path) -> usize {
        self.bundles
            .get(&Self::normalize(path))
            .map(|r| r.ref_count)
            .unwrap_or(0)
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.bundles.contains_key(&Self::normalize(path))
    }
}

impl BundleHandle {
    fn clone_ref(&self) -> Self {
        BundleHandle(self.0)
    }
}

impl Drop for BundlePool {
    /// Destruction unloads every remaining bundle regardless of policy.
    fn drop(&mut self) {
        for (path, record) in self.bundles.drain() {
            if let Err(e) = (self.unload)(&path, &record.handle) {
                log::warn!("bundle pool: unload of {} failed on drop: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_pool(policy: RetentionPolicy) -> (BundlePool, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let unloads = Arc::new(AtomicUsize::new(0));
        let l = loads.clone();
        let u = unloads.clone();
        let pool = BundlePool::new(
            policy,
            Box::new(move |_path| {
                l.fetch_add(1, Ordering::SeqCst);
                Ok(BundleHandle(1))
            }),
            Box::new(move |_path, _handle| {
                u.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        (pool, loads, unloads)
    }

    #[test]
    fn scenario_unload_immediately_balances_refcount() {
        let (mut pool, loads, unloads) = counting_pool(RetentionPolicy::UnloadImmediately);
        let p = Path::new("/p");

        pool.load_or_add_reference(p).unwrap();
        pool.load_or_add_reference(p).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        pool.remove_reference(p).unwrap();
        assert_eq!(unloads.load(Ordering::SeqCst), 0);
        assert_eq!(pool.ref_count(p), 1);

        pool.remove_reference(p).unwrap();
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
        assert!(!pool.is_loaded(p));

        assert!(matches!(
            pool.remove_reference(p),
            Err(HostError::BundleNotFound(_))
        ));
    }

    #[test]
    fn retain_policy_keeps_bundle_until_drop() {
        let (mut pool, _loads, unloads) = counting_pool(RetentionPolicy::Retain);
        let p = Path::new("/p");
        pool.load_or_add_reference(p).unwrap();
        pool.remove_reference(p).unwrap();
        assert!(pool.is_loaded(p));
        assert_eq!(unloads.load(Ordering::SeqCst), 0);
        drop(pool);
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
    }
}
