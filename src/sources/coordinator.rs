//! Process-wide source coordination: one gateway per canonical URL.
//!
//! The coordinator owns two resolved maps - normalized name to canonical URL,
//! canonical URL to gateway - plus a registry of in-flight set-up work.
//! Concurrent requests for the same normalized name fold onto one worker
//! (the single-flight pattern); distinct names that settle on the same
//! canonical URL converge on the same gateway, so disk access for a source is
//! serialized no matter how callers spell its identity.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::project::ProjectIdentifier;
use crate::deduce::Deducer;
use crate::sources::errors::{SharedError, SourceError};
use crate::sources::gateway::SourceGateway;
use crate::supervisor::Supervisor;

type SetupResult = Result<Arc<SourceGateway>, SharedError>;

#[derive(Default)]
struct ResolvedMaps {
    /// normalized name → canonical URL. Every value must be a key of
    /// `gateways`; the two maps are updated under one write lock.
    name_to_url: HashMap<String, String>,
    /// canonical URL → the one gateway for that URL.
    gateways: HashMap<String, Arc<SourceGateway>>,
}

impl ResolvedMaps {
    /// Look up by normalized name. A name mapped to a URL without a gateway
    /// means the two maps have diverged, which the write paths make
    /// impossible; observing it is a bug worth dying for.
    fn lookup(&self, name: &str) -> Option<Arc<SourceGateway>> {
        let url = self.name_to_url.get(name)?;
        match self.gateways.get(url) {
            Some(gateway) => Some(Arc::clone(gateway)),
            None => panic!(
                "{url:?} is the URL for {name:?} in name_to_url, \
                 but no corresponding gateway exists"
            ),
        }
    }
}

struct CoordInner {
    supervisor: Arc<Supervisor>,
    deducer: Arc<dyn Deducer>,
    cache_dir: PathBuf,
    maps: RwLock<ResolvedMaps>,
    /// normalized name → waiters folded onto the in-flight set-up worker.
    /// Short critical sections only; never held across set-up work.
    pending: Mutex<HashMap<String, Vec<oneshot::Sender<SetupResult>>>>,
}

/// Hands out the one [`SourceGateway`] per canonical source URL.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SourceCoordinator {
    inner: Arc<CoordInner>,
}

impl SourceCoordinator {
    pub fn new(
        supervisor: Arc<Supervisor>,
        deducer: Arc<dyn Deducer>,
        cache_dir: PathBuf,
    ) -> Self {
        SourceCoordinator {
            inner: Arc::new(CoordInner {
                supervisor,
                deducer,
                cache_dir,
                maps: RwLock::new(ResolvedMaps::default()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The gateway for `id`, constructing it (and everything it depends on)
    /// if this is the first demand for its source.
    pub async fn get_gateway(
        &self,
        ctx: &CancellationToken,
        id: &ProjectIdentifier,
    ) -> Result<Arc<SourceGateway>> {
        if self.inner.supervisor.lifetime().is_cancelled() {
            bail!(SourceError::Terminated);
        }

        let name = id.normalized();

        // Fast path: the name has been resolved before.
        if let Some(gateway) = self.inner.maps.read().await.lookup(&name) {
            return Ok(gateway);
        }

        // Slow path: join (or become) the set-up worker for this name and
        // wait for its verdict.
        let (tx, rx) = oneshot::channel();
        tokio::spawn(CoordInner::set_up_gateway(
            Arc::clone(&self.inner),
            ctx.clone(),
            name,
            tx,
        ));

        match rx.await {
            Ok(Ok(gateway)) => Ok(gateway),
            Ok(Err(err)) => Err(anyhow::Error::new(err)),
            Err(_) => bail!("source set-up worker disappeared without answering"),
        }
    }

    /// Number of distinct canonical URLs with a gateway.
    pub async fn gateway_count(&self) -> usize {
        self.inner.maps.read().await.gateways.len()
    }

    /// Number of normalized names resolved so far.
    pub async fn name_count(&self) -> usize {
        self.inner.maps.read().await.name_to_url.len()
    }
}

impl CoordInner {
    /// Not intended to be called directly - `get_gateway` spawns this.
    async fn set_up_gateway(
        self: Arc<Self>,
        ctx: CancellationToken,
        name: String,
        tx: oneshot::Sender<SetupResult>,
    ) {
        {
            let mut pending = self.pending.lock().await;
            if let Some(waiters) = pending.get_mut(&name) {
                // Another worker is already on this name; fold in by
                // attaching our return channel to its waiter list.
                waiters.push(tx);
                return;
            }
            pending.insert(name.clone(), vec![tx]);
        }

        let result: SetupResult = self
            .build_gateway(&ctx, &name)
            .await
            .map_err(SharedError::new);

        // Deliver to everyone who folded in while we worked, then drop the
        // entry so later demand starts fresh.
        let mut pending = self.pending.lock().await;
        if let Some(waiters) = pending.remove(&name) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    async fn build_gateway(
        &self,
        ctx: &CancellationToken,
        name: &str,
    ) -> Result<Arc<SourceGateway>> {
        // Deduction failures are not cached anywhere: externally-driven retry
        // strategies must be able to reach the deducer again.
        let deduction = self.deducer.deduce(ctx, name).await?;

        // A gateway for this name may have slid into the resolved maps
        // between the caller's fast-path check and this worker getting
        // scheduled. Check again before doing real work.
        if let Some(gateway) = self.maps.read().await.lookup(name) {
            return Ok(gateway);
        }

        let gateway = Arc::new(SourceGateway::new(
            deduction.candidates,
            Arc::clone(&self.supervisor),
            self.cache_dir.clone(),
        ));

        // The normalized name usually differs from the canonical URL, and
        // several names can share one URL - yet all of them must reach the
        // same gateway for clone access to stay serialized. Asking for the
        // source URL forces set-up and yields the key the gateway must be
        // registered under.
        let url = gateway.source_url(ctx).await?.to_string();

        let mut maps = self.maps.write().await;
        maps.name_to_url.insert(name.to_string(), url.clone());

        if let Some(existing) = maps.gateways.get(&url) {
            // Another name's worker installed a gateway for this URL first;
            // that one wins and the fresh gateway is discarded.
            debug!(%name, %url, "folded onto existing gateway");
            return Ok(Arc::clone(existing));
        }

        debug!(%name, %url, "gateway installed");
        maps.gateways.insert(url, Arc::clone(&gateway));
        Ok(gateway)
    }
}
