//! Counters, timings and sizes reported to statsd.
//!
//! Nothing is sent until [`configure_statsd`] has been called, which the server does once on
//! startup. Until then, and in tests, [`metric!`](crate::metric) is a no-op.
use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::panic::RefUnwindSafe;
use std::sync::OnceLock;

use cadence::{Metric, MetricBuilder, MetricSink, StatsdClient, UdpMetricSink};

static STATSD: OnceLock<TaggedClient> = OnceLock::new();

/// Traits needed by the [`metric!`](crate::metric) macro.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// A statsd client attaching the configured tags to every metric it sends.
#[derive(Debug)]
pub struct TaggedClient {
    statsd: StatsdClient,
    tags: BTreeMap<String, String>,
}

impl TaggedClient {
    fn new(prefix: &str, sink: impl MetricSink + Send + Sync + RefUnwindSafe + 'static) -> Self {
        Self {
            statsd: StatsdClient::from_sink(prefix, sink),
            tags: BTreeMap::new(),
        }
    }

    pub fn statsd(&self) -> &StatsdClient {
        &self.statsd
    }

    #[inline(always)]
    pub fn send<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        self.tags
            .iter()
            .fold(metric, |metric, (tag, value)| metric.with_tag(tag, value))
            .send()
    }
}

/// Starts reporting metrics to the statsd server at `host`.
///
/// Only the first call has an effect.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> io::Result<()> {
    let addrs: Vec<SocketAddr> = host.to_socket_addrs()?.collect();
    let Some(addr) = addrs.first() else {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "statsd host did not resolve",
        ));
    };
    tracing::info!(%addr, "Reporting metrics to statsd");

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket).map_err(io::Error::other)?;

    let client = TaggedClient {
        tags,
        ..TaggedClient::new(prefix, sink)
    };
    if STATSD.set(client).is_err() {
        tracing::warn!("statsd was configured twice, keeping the first client");
    }
    Ok(())
}

/// Runs `f` with the statsd client, if one is configured.
#[inline(always)]
pub fn with_client<F>(f: F)
where
    F: FnOnce(&TaggedClient),
{
    if let Some(client) = STATSD.get() {
        f(client)
    }
}

/// Emits a metric.
///
/// ```ignore
/// metric!(counter("network.fetch") += 1, "status" => "200");
/// metric!(timer("http.duration") = start.elapsed());
/// metric!(histogram("caches.entry.size") = body.len() as u64);
/// ```
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send count_with_tags($id, $value) $(, $k => $v)*)
    };
    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send time_with_tags($id, $value) $(, $k => $v)*)
    };
    (histogram($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send histogram_with_tags($id, $value) $(, $k => $v)*)
    };
    (@send $method:ident($id:expr, $value:expr) $(, $k:expr => $v:expr)*) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send(client.statsd().$method($id, $value) $(.with_tag($k, $v))*);
        })
    }};
}
