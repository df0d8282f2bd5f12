//! Pipeline variant cache
//!
//! One compiled pipeline per [`PipelineKey`], created on first use and kept
//! until the owning backend shuts down. Creation goes through a
//! [`PipelineFactory`] so the bookkeeping is independent of Vulkan.

use std::collections::HashMap;
use std::fmt;

use vh_core::gpu_debug;

use crate::pipeline::PipelineKey;

/// Creates and destroys the pipeline objects behind cache entries
pub trait PipelineFactory {
    type Handle: Copy + Eq + fmt::Debug;
    type Error: fmt::Display;

    fn create_pipeline(&mut self, key: &PipelineKey) -> Result<Self::Handle, Self::Error>;

    fn destroy_pipeline(&mut self, handle: Self::Handle);
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
}

/// Memoized pipeline variants plus the currently bound one
#[derive(Debug)]
pub struct PipelineVariantCache<H> {
    variants: HashMap<PipelineKey, H>,
    current: Option<(PipelineKey, H)>,
    stats: CacheStats,
}

impl<H: Copy + Eq + fmt::Debug> PipelineVariantCache<H> {
    pub fn new() -> Self {
        Self {
            variants: HashMap::new(),
            current: None,
            stats: CacheStats::default(),
        }
    }

    /// Return the cached handle for `key`, creating it on first request
    pub fn get_or_create<F>(&mut self, key: &PipelineKey, factory: &mut F) -> Result<H, F::Error>
    where
        F: PipelineFactory<Handle = H>,
    {
        if let Some(&handle) = self.variants.get(key) {
            self.stats.hits += 1;
            return Ok(handle);
        }
        let handle = factory.create_pipeline(key).inspect_err(|_| {
            self.stats.failures += 1;
        })?;
        self.stats.misses += 1;
        gpu_debug!(?key, variants = self.variants.len() + 1, "created pipeline variant");
        self.variants.insert(*key, handle);
        Ok(handle)
    }

    /// Make `key`'s variant current. If it cannot be created the previous
    /// handle stays bound and is returned.
    pub fn bind<F>(&mut self, key: &PipelineKey, factory: &mut F) -> Option<H>
    where
        F: PipelineFactory<Handle = H>,
    {
        if let Some((current_key, handle)) = self.current {
            if current_key == *key {
                return Some(handle);
            }
        }
        match self.get_or_create(key, factory) {
            Ok(handle) => {
                self.current = Some((*key, handle));
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(?key, "pipeline creation failed, keeping previous variant: {e}");
                self.current.map(|(_, h)| h)
            }
        }
    }

    pub fn current(&self) -> Option<H> {
        self.current.map(|(_, h)| h)
    }

    pub fn current_key(&self) -> Option<PipelineKey> {
        self.current.map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn contains(&self, key: &PipelineKey) -> bool {
        self.variants.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Destroy every cached variant and forget the current binding
    pub fn destroy_all<F>(&mut self, factory: &mut F)
    where
        F: PipelineFactory<Handle = H>,
    {
        for (_, handle) in self.variants.drain() {
            factory.destroy_pipeline(handle);
        }
        self.current = None;
    }
}

impl<H: Copy + Eq + fmt::Debug> Default for PipelineVariantCache<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{AlphaMode, CompareFunc, FbzMode};

    /// Hands out sequential ids and can be told to fail
    #[derive(Default)]
    struct CountingFactory {
        next: u32,
        fail: bool,
        destroyed: Vec<u32>,
    }

    impl PipelineFactory for CountingFactory {
        type Handle = u32;
        type Error = String;

        fn create_pipeline(&mut self, _key: &PipelineKey) -> Result<u32, String> {
            if self.fail {
                return Err("out of memory".into());
            }
            self.next += 1;
            Ok(self.next)
        }

        fn destroy_pipeline(&mut self, handle: u32) {
            self.destroyed.push(handle);
        }
    }

    fn key(fbz: u32, alpha: u32) -> PipelineKey {
        PipelineKey::from_registers(fbz, alpha)
    }

    #[test]
    fn test_same_key_same_handle() {
        let mut cache = PipelineVariantCache::new();
        let mut factory = CountingFactory::default();
        let k = PipelineKey::default();

        let a = cache.get_or_create(&k, &mut factory).unwrap();
        let b = cache.get_or_create(&k, &mut factory).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, failures: 0 });
    }

    #[test]
    fn test_per_fragment_state_shares_variant() {
        // Per-fragment state such as dither or alpha test lives outside the key
        let mut cache = PipelineVariantCache::new();
        let mut factory = CountingFactory::default();
        let plain = key(FbzMode::DEFAULT_BITS, 0);
        let dithered = key(FbzMode::DEFAULT_BITS | FbzMode::DITHER.bits(), AlphaMode::TEST_ENABLE.bits());

        let a = cache.get_or_create(&plain, &mut factory).unwrap();
        let b = cache.get_or_create(&dithered, &mut factory).unwrap();
        assert_eq!(a, b);
        assert_eq!(factory.next, 1);
    }

    #[test]
    fn test_distinct_keys() {
        let mut cache = PipelineVariantCache::new();
        let mut factory = CountingFactory::default();
        for func in CompareFunc::ALL {
            let fbz = FbzMode::DEPTH_ENABLE.bits() | (func as u32) << 5;
            cache.get_or_create(&key(fbz, 0), &mut factory).unwrap();
        }
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_bind_switches_current_without_recreating() {
        let mut cache = PipelineVariantCache::new();
        let mut factory = CountingFactory::default();
        let less = PipelineKey::default();
        let blend = key(FbzMode::DEFAULT_BITS, AlphaMode::BLEND_ENABLE.bits() | 1 << 8 | 5 << 12);

        let h1 = cache.bind(&less, &mut factory).unwrap();
        let h2 = cache.bind(&blend, &mut factory).unwrap();
        let h3 = cache.bind(&less, &mut factory).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(h1, h3);
        assert_eq!(cache.current(), Some(h1));
        assert_eq!(cache.current_key(), Some(less));
        assert_eq!(factory.next, 2);
    }

    #[test]
    fn test_bind_failure_keeps_previous() {
        let mut cache = PipelineVariantCache::new();
        let mut factory = CountingFactory::default();
        let less = PipelineKey::default();
        let h1 = cache.bind(&less, &mut factory).unwrap();

        factory.fail = true;
        let greater = key(FbzMode::DEPTH_ENABLE.bits() | 4 << 5, 0);
        assert_eq!(cache.bind(&greater, &mut factory), Some(h1));
        assert_eq!(cache.current_key(), Some(less));
        assert!(!cache.contains(&greater));
        assert_eq!(cache.stats().failures, 1);

        // Nothing bound yet and creation failing: no handle at all
        let mut empty = PipelineVariantCache::new();
        assert_eq!(empty.bind(&less, &mut factory), None);
    }

    #[test]
    fn test_destroy_all() {
        let mut cache = PipelineVariantCache::new();
        let mut factory = CountingFactory::default();
        cache.bind(&PipelineKey::default(), &mut factory);
        cache.get_or_create(&key(0, 0), &mut factory).unwrap();

        cache.destroy_all(&mut factory);
        factory.destroyed.sort_unstable();
        assert_eq!(factory.destroyed, vec![1, 2]);
        assert!(cache.is_empty());
        assert_eq!(cache.current(), None);
    }
}
