//! In-memory rate provider for tests.

use super::{RateError, RateProvider};
use crate::domain::{Decimal, GlobalRate, GroupConfig, GroupId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Mock provider holding configs in memory. Values can be changed after
/// construction to simulate the configuration service moving rates.
#[derive(Debug, Default)]
pub struct MockRateProvider {
    groups: RwLock<HashMap<GroupId, GroupConfig>>,
    globals: RwLock<HashMap<GlobalRate, Decimal>>,
    fail_reads: AtomicBool,
    reads: AtomicUsize,
}

impl MockRateProvider {
    /// Create a new mock provider with nothing configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group config.
    pub fn with_group(self, config: GroupConfig) -> Self {
        self.set_group(config);
        self
    }

    /// Set a global rate.
    pub fn with_global_rate(self, rate: GlobalRate, value: Decimal) -> Self {
        self.set_global_rate(rate, value);
        self
    }

    /// Make every read fail with `RateError::Store`.
    pub fn failing(self) -> Self {
        self.fail_reads.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_group(&self, config: GroupConfig) {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.group_id.clone(), config);
    }

    pub fn set_global_rate(&self, rate: GlobalRate, value: Decimal) {
        self.globals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rate, value);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RateError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RateError::Store("mock provider unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RateProvider for MockRateProvider {
    async fn group_config(&self, group_id: &GroupId) -> Result<GroupConfig, RateError> {
        self.check()?;
        Ok(self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group_id)
            .cloned()
            .unwrap_or_else(|| GroupConfig::unconfigured(group_id.clone())))
    }

    async fn global_rate(&self, rate: GlobalRate) -> Result<Option<Decimal>, RateError> {
        self.check()?;
        Ok(self
            .globals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&rate)
            .copied())
    }
}
