//! The capability a poller drives to read counters from a broker.
//!
//! How counters are actually obtained (JMX bridge, REST management API, ...)
//! is up to the implementation; the poller only sees success or
//! [`FetchError`].

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::core::error::{FetchError, Result};
use crate::core::model::{BrokerId, BrokerLocation, BrokerStatsPackage};

use super::target::PollTarget;

pub trait MetricSource: Send + Sync {
    /// Reads current counters for the broker and every destination named by
    /// `target`.
    fn fetch<'a>(
        &'a self,
        target: &'a PollTarget,
    ) -> BoxFuture<'a, std::result::Result<BrokerStatsPackage, FetchError>>;

    /// Called once a target has been superseded and no future cycle will
    /// use it. A cycle already in flight may still hold it.
    fn release_target(&self, _target: &PollTarget) {}
}

/// Creates the metric source for one broker at poller setup time.
pub trait MetricSourceFactory: Send + Sync {
    fn create(&self, broker: &BrokerId, location: &BrokerLocation) -> Result<Arc<dyn MetricSource>>;
}

impl<F> MetricSourceFactory for F
where
    F: Fn(&BrokerId, &BrokerLocation) -> Result<Arc<dyn MetricSource>> + Send + Sync,
{
    fn create(&self, broker: &BrokerId, location: &BrokerLocation) -> Result<Arc<dyn MetricSource>> {
        self(broker, location)
    }
}
