//! Statsd metrics for coordinators and the tools driving them.
//!
//! Nothing is reported until [`configure_statsd`] has been called. Before that, and in tests,
//! the [`metric!`](crate::metric) macro does nothing.
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use cadence::{Metric, MetricBuilder, StatsdClient, UdpMetricSink};

static CLIENT: OnceLock<MetricsClient> = OnceLock::new();

/// Traits the [`metric!`](crate::metric) macro needs in scope.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// A statsd client that attaches a fixed set of tags to everything it sends.
#[derive(Debug)]
pub struct MetricsClient {
    statsd: StatsdClient,
    global_tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Adds the global tags to `metric` and sends it.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        self.global_tags
            .iter()
            .fold(metric, |metric, (key, value)| metric.with_tag(key, value))
            .send()
    }
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd
    }
}

/// Starts reporting metrics to the statsd server at `host`, with every metric name prefixed by
/// `prefix` and carrying `tags`.
///
/// Fails if `host` does not resolve, or if metrics were configured before.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> Result<()> {
    let addrs: Vec<_> = host
        .to_socket_addrs()
        .context("failed to resolve statsd host")?
        .collect();
    let Some(addr) = addrs.first() else {
        anyhow::bail!("statsd host resolved to no addresses");
    };
    tracing::info!(%addr, prefix, "Reporting metrics to statsd");

    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind metrics socket")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket).context("failed to create statsd sink")?;

    let client = MetricsClient {
        statsd: StatsdClient::from_sink(prefix, sink),
        global_tags: tags,
    };
    CLIENT
        .set(client)
        .map_err(|_| anyhow::anyhow!("metrics are already configured"))
}

/// Runs `f` with the configured client, or returns `R::default()` when there is none.
///
/// Prefer the [`metric!`](crate::metric) macro.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CLIENT.get().map(f).unwrap_or_default()
}

/// Emits a metric, optionally with `"tag" => value` pairs.
///
/// ```
/// use memoflight_service::metric;
///
/// metric!(counter("caches.access") += 1, "cache" => "squares");
/// metric!(gauge("caches.entries") = 42u64);
/// metric!(timer("caches.computation.duration") = std::time::Duration::from_millis(5));
/// metric!(histogram("caches.waiters.notified") = 3u64, "cache" => "squares");
/// ```
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send count_with_tags, $id, $value $(, $k => $v)*)
    };
    (gauge($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send gauge_with_tags, $id, $value $(, $k => $v)*)
    };
    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send time_with_tags, $id, $value $(, $k => $v)*)
    };
    // distributions of plain numbers, such as how many waiters a computation had
    (histogram($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send histogram_with_tags, $id, $value $(, $k => $v)*)
    };

    (@send $method:ident, $id:expr, $value:expr $(, $k:expr => $v:expr)*) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(client.$method($id, $value) $(.with_tag($k, $v))*);
        })
    }};
}
