//! Accelerator-resident model handles and the exclusive span that
//! serializes access to them.
//!
//! One [`ModelPool`] value is constructed by the embedding service and
//! shared by every worker; all hardware-bound work funnels through
//! [`ModelPool::acquire`], so the effective accelerator workload is
//! serialized no matter how many episodes run concurrently.

use crate::backend::{AlignHandle, AuxHandle, HandleLoader, RawCue, SpeechHandle};
use crate::error::PipelineError;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use sysinfo::System;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identifies a logical owner of the exclusive span. Clones share the same
/// identity, so nested acquires by the same owner re-enter instead of
/// deadlocking, while distinct owners always serialize. Deliberately not
/// tied to OS-thread identity: an owner may migrate across executor
/// threads between acquires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerToken(u64);

impl OwnerToken {
    pub fn new() -> Self {
        OwnerToken(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct SpanState {
    owner: Option<u64>,
    depth: u32,
}

#[derive(Default)]
struct Handles {
    primary: Option<Box<dyn SpeechHandle>>,
    /// Single-slot keyed cache; requesting a different key evicts this.
    aux: Option<(String, Box<dyn AuxHandle>)>,
    /// Explicit load/release lifetime; never evicted on aux key change.
    secondary: Option<Box<dyn AlignHandle>>,
}

pub struct ModelPool {
    loader: Box<dyn HandleLoader>,
    handles: Mutex<Handles>,
    span: Mutex<SpanState>,
    span_freed: Condvar,
    memory_warn_threshold: f32,
}

/// RAII guard for exclusive accelerator access. Dropping it releases one
/// level of re-entrancy; the span frees when the outermost guard drops.
pub struct PoolSpan<'a> {
    pool: &'a ModelPool,
}

impl ModelPool {
    pub fn new(loader: Box<dyn HandleLoader>, memory_warn_threshold: f32) -> Self {
        Self {
            loader,
            handles: Mutex::new(Handles::default()),
            span: Mutex::new(SpanState::default()),
            span_freed: Condvar::new(),
            memory_warn_threshold,
        }
    }

    /// Block (without spinning) until `owner` holds exclusive access.
    /// Re-entrant: a nested acquire by the same owner returns immediately.
    pub fn acquire(&self, owner: &OwnerToken) -> PoolSpan<'_> {
        let mut state = self.span.lock().unwrap();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(owner.0);
                    state.depth = 1;
                    break;
                }
                Some(id) if id == owner.0 => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self.span_freed.wait(state).unwrap();
                }
            }
        }
        PoolSpan { pool: self }
    }

    /// Load the primary speech model. Called once at process start; an
    /// allocation failure from the loader is fatal.
    pub fn load_primary(&self, model_id: &str) -> Result<(), PipelineError> {
        self.check_memory_pressure("primary");
        let handle = self.loader.load_primary(model_id)?;
        self.handles.lock().unwrap().primary = Some(handle);
        log::info!("primary model '{}' loaded", model_id);
        Ok(())
    }

    /// Make the auxiliary handle for `key` resident, evicting whichever
    /// other key currently occupies the single cache slot. Takes the span
    /// itself so it can be called from inside an already-held span.
    pub fn ensure_auxiliary(&self, owner: &OwnerToken, key: &str) -> Result<(), PipelineError> {
        let _span = self.acquire(owner);
        {
            let mut handles = self.handles.lock().unwrap();
            if let Some((resident, _)) = &handles.aux {
                if resident == key {
                    return Ok(());
                }
                log::info!("evicting auxiliary handle '{}' for '{}'", resident, key);
                handles.aux = None;
            }
        }
        self.check_memory_pressure("auxiliary");
        let handle = self.loader.load_auxiliary(key)?;
        self.handles.lock().unwrap().aux = Some((key.to_string(), handle));
        Ok(())
    }

    /// Load the secondary (alignment) handle. Idempotent: loading when
    /// already loaded is a no-op. It stays resident across an episode's
    /// whole segment loop until released explicitly.
    pub fn load_secondary(&self) -> Result<(), PipelineError> {
        if self.handles.lock().unwrap().secondary.is_some() {
            return Ok(());
        }
        self.check_memory_pressure("secondary");
        let handle = self.loader.load_secondary()?;
        self.handles.lock().unwrap().secondary = Some(handle);
        log::info!("secondary alignment handle loaded");
        Ok(())
    }

    /// Release the secondary handle, if resident, and run a best-effort
    /// memory reclamation pass. Idempotent.
    pub fn release_secondary(&self) {
        let released = self.handles.lock().unwrap().secondary.take();
        if released.is_some() {
            drop(released);
            self.reclaim_memory();
            log::info!("secondary alignment handle released");
        }
    }

    fn reclaim_memory(&self) {
        let mut sys = System::new();
        sys.refresh_memory();
        log::debug!(
            "memory after release: {} MiB used of {} MiB",
            sys.used_memory() / (1024 * 1024),
            sys.total_memory() / (1024 * 1024)
        );
    }

    /// Pre-flight check before every load: warning-only, never fatal.
    fn check_memory_pressure(&self, what: &str) {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return;
        }
        let fraction = sys.used_memory() as f32 / total as f32;
        if fraction > self.memory_warn_threshold {
            log::warn!(
                "memory pressure at {:.0}% before {} load (threshold {:.0}%)",
                fraction * 100.0,
                what,
                self.memory_warn_threshold * 100.0
            );
        }
    }
}

impl PoolSpan<'_> {
    /// Run primary-model inference over a local artifact.
    pub fn infer(&self, artifact: &Path, lang: &str) -> Result<Vec<RawCue>, PipelineError> {
        let handles = self.pool.handles.lock().unwrap();
        let primary = handles
            .primary
            .as_ref()
            .ok_or("primary model not loaded")?;
        primary.infer(artifact, lang)
    }

    /// Refine cue timestamps with the secondary handle, when resident.
    pub fn refine(&self, cues: &mut [RawCue]) -> Result<(), PipelineError> {
        let handles = self.pool.handles.lock().unwrap();
        if let Some(secondary) = handles.secondary.as_ref() {
            secondary.refine(cues)?;
        }
        Ok(())
    }
}

impl Drop for PoolSpan<'_> {
    fn drop(&mut self) {
        let mut state = self.pool.span.lock().unwrap();
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.pool.span_freed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AlignHandle, AuxHandle, HandleLoader, RawCue, SpeechHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeSpeech;
    impl SpeechHandle for FakeSpeech {
        fn infer(&self, _artifact: &Path, _lang: &str) -> Result<Vec<RawCue>, PipelineError> {
            Ok(vec![])
        }
    }

    struct FakeAux(String);
    impl AuxHandle for FakeAux {
        fn key(&self) -> &str {
            &self.0
        }
    }

    struct FakeAlign;
    impl AlignHandle for FakeAlign {
        fn refine(&self, _cues: &mut [RawCue]) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLoader {
        aux_loads: AtomicUsize,
        secondary_loads: AtomicUsize,
    }

    impl HandleLoader for FakeLoader {
        fn load_primary(&self, _model_id: &str) -> Result<Box<dyn SpeechHandle>, PipelineError> {
            Ok(Box::new(FakeSpeech))
        }
        fn load_auxiliary(&self, key: &str) -> Result<Box<dyn AuxHandle>, PipelineError> {
            self.aux_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeAux(key.to_string())))
        }
        fn load_secondary(&self) -> Result<Box<dyn AlignHandle>, PipelineError> {
            self.secondary_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeAlign))
        }
    }

    fn pool_with_counts() -> (Arc<ModelPool>, Arc<FakeLoader>) {
        // The pool owns a boxed loader, so hand it a proxy that shares the
        // counters with the test.
        struct Proxy(Arc<FakeLoader>);
        impl HandleLoader for Proxy {
            fn load_primary(
                &self,
                model_id: &str,
            ) -> Result<Box<dyn SpeechHandle>, PipelineError> {
                self.0.load_primary(model_id)
            }
            fn load_auxiliary(&self, key: &str) -> Result<Box<dyn AuxHandle>, PipelineError> {
                self.0.load_auxiliary(key)
            }
            fn load_secondary(&self) -> Result<Box<dyn AlignHandle>, PipelineError> {
                self.0.load_secondary()
            }
        }
        let loader = Arc::new(FakeLoader::default());
        let pool = Arc::new(ModelPool::new(Box::new(Proxy(loader.clone())), 0.85));
        (pool, loader)
    }

    #[test]
    fn span_is_mutually_exclusive() {
        let (pool, _) = pool_with_counts();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(std::thread::spawn(move || {
                let owner = OwnerToken::new();
                for _ in 0..50 {
                    let _span = pool.acquire(&owner);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_acquire_by_same_owner_does_not_block() {
        let (pool, _) = pool_with_counts();
        let owner = OwnerToken::new();
        let outer = pool.acquire(&owner);
        {
            let _inner = pool.acquire(&owner);
        }
        // Still held by the outer span: another owner must not get in.
        {
            let state = pool.span.lock().unwrap();
            assert_eq!(state.depth, 1);
            assert!(state.owner.is_some());
        }
        drop(outer);
        let state = pool.span.lock().unwrap();
        assert!(state.owner.is_none());
    }

    #[test]
    fn ensure_auxiliary_reenters_held_span() {
        let (pool, loader) = pool_with_counts();
        let owner = OwnerToken::new();
        let _span = pool.acquire(&owner);
        // Would deadlock without owner-token re-entrancy.
        pool.ensure_auxiliary(&owner, "es").unwrap();
        assert_eq!(loader.aux_loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auxiliary_cache_evicts_on_key_change() {
        let (pool, loader) = pool_with_counts();
        let owner = OwnerToken::new();
        pool.ensure_auxiliary(&owner, "es").unwrap();
        pool.ensure_auxiliary(&owner, "es").unwrap();
        assert_eq!(loader.aux_loads.load(Ordering::SeqCst), 1);

        pool.ensure_auxiliary(&owner, "de").unwrap();
        assert_eq!(loader.aux_loads.load(Ordering::SeqCst), 2);

        // Coming back to the first key reloads: only one slot exists.
        pool.ensure_auxiliary(&owner, "es").unwrap();
        assert_eq!(loader.aux_loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn secondary_load_and_release_are_idempotent() {
        let (pool, loader) = pool_with_counts();
        pool.load_secondary().unwrap();
        pool.load_secondary().unwrap();
        assert_eq!(loader.secondary_loads.load(Ordering::SeqCst), 1);

        pool.release_secondary();
        pool.release_secondary();

        pool.load_secondary().unwrap();
        assert_eq!(loader.secondary_loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn secondary_survives_auxiliary_key_changes() {
        let (pool, loader) = pool_with_counts();
        let owner = OwnerToken::new();
        pool.load_secondary().unwrap();
        pool.ensure_auxiliary(&owner, "es").unwrap();
        pool.ensure_auxiliary(&owner, "de").unwrap();
        // No re-load of the secondary handle despite two evictions.
        assert_eq!(loader.secondary_loads.load(Ordering::SeqCst), 1);
        assert!(pool.handles.lock().unwrap().secondary.is_some());
    }
}
