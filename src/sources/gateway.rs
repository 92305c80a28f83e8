//! Per-source gateway: the serialized state machine over one clone.
//!
//! All incoming calls for data from one source funnel through its gateway,
//! which serializes them, lazily advances the source's state, and memoizes
//! what the backend reports. The gateway mutex is deliberately held across
//! suspension points: the on-disk clone is single-writer, and splitting the
//! lock would require an explicit adapter-level queue instead.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::manifest::{Analyzer, Lock, Manifest};
use crate::core::package::PackageTree;
use crate::core::project::ProjectRoot;
use crate::core::version::{PairedVersion, Revision, Version};
use crate::sources::cache::SourceCache;
use crate::sources::errors::SourceError;
use crate::sources::probe::CandidateSet;
use crate::sources::source::SourceAdapter;
use crate::supervisor::{CallKind, Supervisor};

/// Monotone progress bits for one source. Bits, once set, stay set for the
/// gateway's lifetime.
///
/// The bit values are load-bearing: `require` visits unmet bits from least to
/// most significant, and each bit's work assumes every lower bit is already
/// satisfied. The order is
/// `SET_UP < EXISTS_UPSTREAM < EXISTS_LOCALLY < HAS_LATEST_VERSION_LIST <
/// HAS_LATEST_LOCALLY`.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceState(u8);

impl SourceState {
    pub const NONE: SourceState = SourceState(0);
    /// Adapter selected and bound to an on-disk location.
    pub const SET_UP: SourceState = SourceState(1 << 0);
    /// Upstream reachable at least once.
    pub const EXISTS_UPSTREAM: SourceState = SourceState(1 << 1);
    /// On-disk clone present.
    pub const EXISTS_LOCALLY: SourceState = SourceState(1 << 2);
    /// In-memory version list reflects an upstream query.
    pub const HAS_LATEST_VERSION_LIST: SourceState = SourceState(1 << 3);
    /// On-disk clone synced within this process lifetime.
    pub const HAS_LATEST_LOCALLY: SourceState = SourceState(1 << 4);

    pub fn contains(self, other: SourceState) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for SourceState {
    type Output = SourceState;
    fn bitor(self, rhs: SourceState) -> SourceState {
        SourceState(self.0 | rhs.0)
    }
}

impl BitOrAssign for SourceState {
    fn bitor_assign(&mut self, rhs: SourceState) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(SourceState, &str)] = &[
            (SourceState::SET_UP, "SET_UP"),
            (SourceState::EXISTS_UPSTREAM, "EXISTS_UPSTREAM"),
            (SourceState::EXISTS_LOCALLY, "EXISTS_LOCALLY"),
            (SourceState::HAS_LATEST_VERSION_LIST, "HAS_LATEST_VERSION_LIST"),
            (SourceState::HAS_LATEST_LOCALLY, "HAS_LATEST_LOCALLY"),
        ];
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(*bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

struct GatewayState {
    state: SourceState,
    adapter: Option<Arc<dyn SourceAdapter>>,
    cache: SourceCache,
}

/// The per-source serialized façade.
///
/// One gateway exists per canonical URL, process-wide; the coordinator
/// guarantees it. Every public operation acquires the gateway mutex first and
/// holds it to completion, so operations on one source are totally ordered.
pub struct SourceGateway {
    cache_dir: PathBuf,
    candidates: CandidateSet,
    supervisor: Arc<Supervisor>,
    inner: Mutex<GatewayState>,
}

impl SourceGateway {
    pub(crate) fn new(
        candidates: CandidateSet,
        supervisor: Arc<Supervisor>,
        cache_dir: PathBuf,
    ) -> Self {
        SourceGateway {
            cache_dir,
            candidates,
            supervisor,
            inner: Mutex::new(GatewayState {
                state: SourceState::NONE,
                adapter: None,
                cache: SourceCache::new(),
            }),
        }
    }

    /// The canonical upstream URL, forcing set-up if it has not happened.
    pub async fn source_url(&self, ctx: &CancellationToken) -> Result<url::Url> {
        let mut st = self.inner.lock().await;
        self.require(&mut st, ctx, SourceState::SET_UP).await?;
        Ok(self.adapter_of(&st)?.upstream_url().clone())
    }

    /// Bring the on-disk clone into existence and up to date.
    pub async fn sync_local(&self, ctx: &CancellationToken) -> Result<()> {
        let mut st = self.inner.lock().await;
        self.require(
            &mut st,
            ctx,
            SourceState::SET_UP | SourceState::EXISTS_LOCALLY | SourceState::HAS_LATEST_LOCALLY,
        )
        .await
    }

    /// Whether the source meets the requested existence levels. Errors along
    /// the way read as "no".
    pub async fn check_existence(&self, ctx: &CancellationToken, flags: SourceState) -> bool {
        let mut st = self.inner.lock().await;

        if flags.contains(SourceState::EXISTS_UPSTREAM) {
            let wanted = SourceState::SET_UP | SourceState::EXISTS_UPSTREAM;
            if self.require(&mut st, ctx, wanted).await.is_err() {
                return false;
            }
        }
        if flags.contains(SourceState::EXISTS_LOCALLY) {
            let wanted = SourceState::SET_UP | SourceState::EXISTS_LOCALLY;
            if self.require(&mut st, ctx, wanted).await.is_err() {
                return false;
            }
        }
        true
    }

    /// All paired versions the source offers, refreshed against upstream if
    /// this process has not done so yet.
    pub async fn list_versions(&self, ctx: &CancellationToken) -> Result<Vec<PairedVersion>> {
        let mut st = self.inner.lock().await;
        self.require(
            &mut st,
            ctx,
            SourceState::SET_UP
                | SourceState::EXISTS_UPSTREAM
                | SourceState::HAS_LATEST_VERSION_LIST,
        )
        .await?;
        Ok(st.cache.all_versions())
    }

    /// Whether `revision` exists in the clone. A positive answer is memoized;
    /// a negative one is not, since a later fetch could change it.
    pub async fn revision_present_in(
        &self,
        ctx: &CancellationToken,
        revision: &Revision,
    ) -> Result<bool> {
        let mut st = self.inner.lock().await;
        self.require(&mut st, ctx, SourceState::SET_UP | SourceState::EXISTS_LOCALLY)
            .await?;

        if st.cache.versions_for(revision).is_some() {
            return Ok(true);
        }

        let present = self.adapter_of(&st)?.revision_present_in(revision)?;
        if present {
            st.cache.mark_revision_exists(revision);
        }
        Ok(present)
    }

    /// Resolve a version to the revision it currently points at.
    pub async fn convert_to_revision(
        &self,
        ctx: &CancellationToken,
        version: &Version,
    ) -> Result<Revision> {
        let mut st = self.inner.lock().await;
        self.convert_locked(&mut st, ctx, version).await
    }

    async fn convert_locked(
        &self,
        st: &mut GatewayState,
        ctx: &CancellationToken,
        version: &Version,
    ) -> Result<Revision> {
        // Four parties can hold an opinion about a version→revision mapping:
        // upstream, the local clone, this cache, and the caller's input. A
        // caller arriving with a mapping the others no longer agree with is
        // respected, never silently rewritten; correcting a stale mapping is
        // an intentional act that belongs to the caller.
        if let Some(revision) = st.cache.to_revision(version) {
            return Ok(revision);
        }

        if st.state.contains(SourceState::HAS_LATEST_VERSION_LIST) {
            // The list already reflects upstream; absence is authoritative.
            return Err(SourceError::NoSuchVersion {
                version: version.to_string(),
            }
            .into());
        }

        self.require(
            st,
            ctx,
            SourceState::SET_UP | SourceState::HAS_LATEST_VERSION_LIST,
        )
        .await?;

        st.cache.to_revision(version).ok_or_else(|| {
            SourceError::NoSuchVersion {
                version: version.to_string(),
            }
            .into()
        })
    }

    /// Manifest and lock for `version`, derived by `analyzer`.
    ///
    /// A cache hit for `(revision, analyzer)` is served without requiring the
    /// clone to exist.
    pub async fn get_manifest_and_lock(
        &self,
        ctx: &CancellationToken,
        root: &ProjectRoot,
        version: &Version,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<(Manifest, Option<Lock>)> {
        let mut st = self.inner.lock().await;
        let revision = self.convert_locked(&mut st, ctx, version).await?;

        let info = analyzer.info();
        if let Some(hit) = st.cache.manifest_and_lock(&revision, &info) {
            return Ok(hit);
        }

        self.require(&mut st, ctx, SourceState::SET_UP | SourceState::EXISTS_LOCALLY)
            .await?;

        let adapter = self.adapter_of(&st)?;
        let url = adapter.upstream_url().clone();
        let label = format!("{url}:{info}");
        let (manifest, lock) = {
            let root = root.clone();
            let revision_for_call = revision.clone();
            let analyzer = Arc::clone(&analyzer);
            self.supervisor
                .run(ctx, &label, CallKind::GetManifestAndLock, move || {
                    adapter.get_manifest_and_lock(&root, &revision_for_call, analyzer.as_ref())
                })
                .await
                .with_context(|| format!("failed to derive manifest for {url} at {revision}"))?
        };

        st.cache
            .set_manifest_and_lock(&revision, info, manifest.clone(), lock.clone());
        Ok((manifest, lock))
    }

    /// The package tree beneath `root` at `version`.
    pub async fn list_packages(
        &self,
        ctx: &CancellationToken,
        root: &ProjectRoot,
        version: &Version,
    ) -> Result<PackageTree> {
        let mut st = self.inner.lock().await;
        let revision = self.convert_locked(&mut st, ctx, version).await?;

        if let Some(tree) = st.cache.package_tree(&revision, root) {
            return Ok(tree);
        }

        self.require(&mut st, ctx, SourceState::SET_UP | SourceState::EXISTS_LOCALLY)
            .await?;

        let adapter = self.adapter_of(&st)?;
        let url = adapter.upstream_url().clone();
        let label = format!("{root}:{url}");
        let tree = {
            let root = root.clone();
            let revision_for_call = revision.clone();
            self.supervisor
                .run(ctx, &label, CallKind::ListPackages, move || {
                    adapter.list_packages(&root, &revision_for_call)
                })
                .await
                .with_context(|| format!("failed to list packages of {url} at {revision}"))?
        };

        st.cache
            .set_package_tree(&revision, root.clone(), tree.clone());
        Ok(tree)
    }

    /// Check out `version` and copy its tree into `to`.
    pub async fn export_version_to(
        &self,
        ctx: &CancellationToken,
        version: &Version,
        to: &Path,
    ) -> Result<()> {
        let mut st = self.inner.lock().await;
        let revision = self.convert_locked(&mut st, ctx, version).await?;

        self.require(&mut st, ctx, SourceState::SET_UP | SourceState::EXISTS_LOCALLY)
            .await?;

        let adapter = self.adapter_of(&st)?;
        let url = adapter.upstream_url().clone();
        let to = to.to_path_buf();
        self.supervisor
            .run(ctx, url.as_str(), CallKind::ExportTree, move || {
                adapter.export_revision_to(&revision, &to)
            })
            .await
            .with_context(|| format!("failed to export {url}"))
    }

    /// Current state bits. Observability only; by the time the caller looks,
    /// more bits may have been set, but never fewer.
    pub async fn state(&self) -> SourceState {
        self.inner.lock().await.state
    }

    fn adapter_of(&self, st: &GatewayState) -> Result<Arc<dyn SourceAdapter>> {
        st.adapter
            .clone()
            .ok_or_else(|| anyhow!("source gateway used before set-up"))
    }

    /// Advance the state machine until every bit in `wanted` is set.
    ///
    /// Bits are visited LSB→MSB, so lower bits act as prerequisites. A step
    /// failure aborts and leaves the bits already earned set; the next call
    /// resumes from the first unmet bit. Steps may report incidental bits
    /// (e.g. a fresh clone is necessarily current), which are folded in.
    async fn require(
        &self,
        st: &mut GatewayState,
        ctx: &CancellationToken,
        wanted: SourceState,
    ) -> Result<()> {
        let mut todo = !st.state.bits() & wanted.bits();
        let mut flag: u8 = 1;

        while todo != 0 {
            if todo & flag != 0 {
                let bit = SourceState(flag);
                let mut addl = SourceState::NONE;

                match bit {
                    SourceState::SET_UP => {
                        let (adapter, extra) = self
                            .candidates
                            .try_sources(ctx, &self.cache_dir, &self.supervisor)
                            .await?;
                        debug!(
                            url = %adapter.upstream_url(),
                            backend = adapter.source_type(),
                            "source set up"
                        );
                        st.adapter = Some(adapter);
                        addl = extra;
                    }
                    SourceState::EXISTS_UPSTREAM => {
                        let adapter = self.adapter_of(st)?;
                        if adapter.ping_requires_local()
                            && !st.state.contains(SourceState::EXISTS_LOCALLY)
                        {
                            // This backend cannot answer a remote ping from
                            // thin air; materialize the clone first.
                            addl |= self.ensure_local(ctx, &adapter).await?;
                        }
                        let pinged = Arc::clone(&adapter);
                        self.supervisor
                            .run(ctx, adapter.source_type(), CallKind::SourcePing, move || {
                                if pinged.exists_upstream() {
                                    Ok(())
                                } else {
                                    anyhow::bail!(
                                        "{} does not exist upstream",
                                        pinged.upstream_url()
                                    )
                                }
                            })
                            .await?;
                    }
                    SourceState::EXISTS_LOCALLY => {
                        let adapter = self.adapter_of(st)?;
                        addl |= self.ensure_local(ctx, &adapter).await?;
                    }
                    SourceState::HAS_LATEST_VERSION_LIST => {
                        let adapter = self.adapter_of(st)?;
                        let url = adapter.upstream_url().clone();
                        let lister = Arc::clone(&adapter);
                        let pairs = self
                            .supervisor
                            .run(ctx, adapter.source_type(), CallKind::ListVersions, move || {
                                lister.list_versions()
                            })
                            .await
                            .with_context(|| format!("failed to list versions of {url}"))?;
                        st.cache.store_version_map(pairs, true);
                    }
                    SourceState::HAS_LATEST_LOCALLY => {
                        let adapter = self.adapter_of(st)?;
                        let url = adapter.upstream_url().clone();
                        let updater = Arc::clone(&adapter);
                        self.supervisor
                            .run(ctx, adapter.source_type(), CallKind::SourceFetch, move || {
                                updater.update_local()
                            })
                            .await
                            .with_context(|| format!("failed to update local clone of {url}"))?;
                    }
                    _ => {}
                }

                let checked = bit | addl;
                st.state |= checked;
                todo &= !checked.bits();
            }

            flag <<= 1;
        }

        Ok(())
    }

    /// Satisfy `EXISTS_LOCALLY`, cloning if the adapter does not already see
    /// a clone. A fresh clone is current by construction.
    async fn ensure_local(
        &self,
        ctx: &CancellationToken,
        adapter: &Arc<dyn SourceAdapter>,
    ) -> Result<SourceState> {
        if adapter.exists_locally() {
            return Ok(SourceState::EXISTS_LOCALLY);
        }

        let url = adapter.upstream_url().clone();
        let cloner = Arc::clone(adapter);
        self.supervisor
            .run(ctx, adapter.source_type(), CallKind::SourceInit, move || {
                cloner.init_local()
            })
            .await
            .with_context(|| {
                format!("{url} does not exist in the local cache and fetching failed")
            })?;

        Ok(SourceState::EXISTS_LOCALLY | SourceState::HAS_LATEST_LOCALLY)
    }
}

impl fmt::Debug for SourceGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceGateway")
            .field("candidates", &self.candidates)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}
