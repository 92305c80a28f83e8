//! Test doubles for the coordination core.
//!
//! Provides a scriptable [`MockAdapter`], a [`MockProbe`] that hands it out,
//! and a [`MockDeducer`], so gateway and coordinator behavior can be tested
//! without touching a real backend or the network.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::manifest::{Analyzer, AnalyzerInfo, Lock, Manifest};
use crate::core::package::{Package, PackageOrErr, PackageTree};
use crate::core::project::ProjectRoot;
use crate::core::version::{PairedVersion, Revision, Version};
use crate::deduce::{Deducer, Deduction};
use crate::sources::gateway::{SourceGateway, SourceState};
use crate::sources::probe::{CandidateProbe, CandidateSet};
use crate::sources::source::SourceAdapter;
use crate::supervisor::Supervisor;

/// Revision the mock's `main` branch points at.
pub const FAKE_REV_MAIN: &str = "aaaa1111aaaa1111";
/// Revision the mock's `v1.2.3` tag points at.
pub const FAKE_REV_TAG: &str = "bbbb2222bbbb2222";

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct CallLog {
    ping: AtomicU64,
    init: AtomicU64,
    update: AtomicU64,
    list_versions: AtomicU64,
    manifest: AtomicU64,
    packages: AtomicU64,
    present: AtomicU64,
    export: AtomicU64,
}

impl CallLog {
    pub fn ping(&self) -> u64 {
        self.ping.load(Ordering::SeqCst)
    }
    pub fn init(&self) -> u64 {
        self.init.load(Ordering::SeqCst)
    }
    pub fn update(&self) -> u64 {
        self.update.load(Ordering::SeqCst)
    }
    pub fn list_versions(&self) -> u64 {
        self.list_versions.load(Ordering::SeqCst)
    }
    pub fn manifest(&self) -> u64 {
        self.manifest.load(Ordering::SeqCst)
    }
    pub fn packages(&self) -> u64 {
        self.packages.load(Ordering::SeqCst)
    }
    pub fn present(&self) -> u64 {
        self.present.load(Ordering::SeqCst)
    }
    pub fn export(&self) -> u64 {
        self.export.load(Ordering::SeqCst)
    }
}

/// A scriptable in-memory source adapter.
pub struct MockAdapter {
    url: Url,
    versions: Mutex<Vec<PairedVersion>>,
    present: Mutex<HashSet<Revision>>,
    local: AtomicBool,
    ping_requires_local: AtomicBool,
    fail_next_list_versions: AtomicBool,
    block_next_list_packages: Mutex<Option<Duration>>,
    last_export: Mutex<Option<Revision>>,
    pub calls: CallLog,
}

impl MockAdapter {
    /// A mock advertising `main` and `v1.2.3`, with no clone yet.
    pub fn with_default_versions(url: &str) -> Arc<Self> {
        let versions = vec![
            PairedVersion::new(
                Version::Branch("main".into()),
                Revision::from(FAKE_REV_MAIN),
            ),
            PairedVersion::new(Version::from_tag("v1.2.3"), Revision::from(FAKE_REV_TAG)),
        ];
        let present = versions.iter().map(|pv| pv.revision.clone()).collect();
        Arc::new(MockAdapter {
            url: Url::parse(url).expect("mock url"),
            versions: Mutex::new(versions),
            present: Mutex::new(present),
            local: AtomicBool::new(false),
            ping_requires_local: AtomicBool::new(false),
            fail_next_list_versions: AtomicBool::new(false),
            block_next_list_packages: Mutex::new(None),
            last_export: Mutex::new(None),
            calls: CallLog::default(),
        })
    }

    pub fn fail_next_list_versions(&self) {
        self.fail_next_list_versions.store(true, Ordering::SeqCst);
    }

    pub fn block_next_list_packages(&self, wait: Duration) {
        *lock(&self.block_next_list_packages) = Some(wait);
    }

    pub fn set_ping_requires_local(&self) {
        self.ping_requires_local.store(true, Ordering::SeqCst);
    }

    pub fn forget_local(&self) {
        self.local.store(false, Ordering::SeqCst);
    }

    pub fn last_export_revision(&self) -> Option<Revision> {
        lock(&self.last_export).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SourceAdapter for MockAdapter {
    fn source_type(&self) -> &'static str {
        "mock"
    }

    fn upstream_url(&self) -> &Url {
        &self.url
    }

    fn exists_locally(&self) -> bool {
        self.local.load(Ordering::SeqCst)
    }

    fn exists_upstream(&self) -> bool {
        self.calls.ping.fetch_add(1, Ordering::SeqCst);
        if self.ping_requires_local.load(Ordering::SeqCst) {
            // Simulates a backend that can only confirm upstream via local
            // state.
            self.local.load(Ordering::SeqCst)
        } else {
            true
        }
    }

    fn ping_requires_local(&self) -> bool {
        self.ping_requires_local.load(Ordering::SeqCst)
    }

    fn init_local(&self) -> Result<()> {
        self.calls.init.fetch_add(1, Ordering::SeqCst);
        self.local.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn update_local(&self) -> Result<()> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_versions(&self) -> Result<Vec<PairedVersion>> {
        self.calls.list_versions.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_list_versions.swap(false, Ordering::SeqCst) {
            bail!("scripted version-list failure");
        }
        Ok(lock(&self.versions).clone())
    }

    fn get_manifest_and_lock(
        &self,
        root: &ProjectRoot,
        _revision: &Revision,
        analyzer: &dyn Analyzer,
    ) -> Result<(Manifest, Option<Lock>)> {
        self.calls.manifest.fetch_add(1, Ordering::SeqCst);
        let mut manifest = Manifest::default();
        manifest.package.name = format!("{}:{}", root, analyzer.info());
        Ok((manifest, None))
    }

    fn list_packages(&self, root: &ProjectRoot, _revision: &Revision) -> Result<PackageTree> {
        self.calls.packages.fetch_add(1, Ordering::SeqCst);
        if let Some(wait) = lock(&self.block_next_list_packages).take() {
            std::thread::sleep(wait);
        }
        let mut packages = std::collections::BTreeMap::new();
        packages.insert(
            root.to_string(),
            PackageOrErr::Package(Package {
                name: "mock".to_string(),
                import_path: root.to_string(),
            }),
        );
        Ok(PackageTree {
            import_root: root.to_string(),
            packages,
        })
    }

    fn revision_present_in(&self, revision: &Revision) -> Result<bool> {
        self.calls.present.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.present).contains(revision))
    }

    fn export_revision_to(&self, revision: &Revision, _to: &Path) -> Result<()> {
        self.calls.export.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_export) = Some(revision.clone());
        Ok(())
    }
}

/// A probe handing out a prepared [`MockAdapter`], optionally refusing the
/// first N attempts.
pub struct MockProbe {
    adapter: Arc<MockAdapter>,
    fail_remaining: AtomicU64,
    probes: AtomicU64,
}

impl MockProbe {
    pub fn new(adapter: Arc<MockAdapter>) -> Self {
        Self::failing_times(adapter, 0)
    }

    pub fn failing_times(adapter: Arc<MockAdapter>, times: u64) -> Self {
        MockProbe {
            adapter,
            fail_remaining: AtomicU64::new(times),
            probes: AtomicU64::new(0),
        }
    }

    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateProbe for MockProbe {
    fn label(&self) -> String {
        format!("mock:{}", self.adapter.url)
    }

    async fn probe(
        &self,
        _ctx: &CancellationToken,
        _cache_dir: &Path,
        _supervisor: &Supervisor,
    ) -> Result<(Arc<dyn SourceAdapter>, SourceState)> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            bail!("scripted probe refusal");
        }
        let extra = if self.adapter.exists_locally() {
            SourceState::EXISTS_LOCALLY
        } else {
            SourceState::NONE
        };
        Ok((Arc::clone(&self.adapter) as Arc<dyn SourceAdapter>, extra))
    }
}

/// A deducer that returns the same candidate set for every name.
pub struct MockDeducer {
    candidates: CandidateSet,
    calls: AtomicU64,
    fail_remaining: AtomicU64,
}

impl MockDeducer {
    pub fn for_probe(probe: Arc<MockProbe>) -> Arc<Self> {
        Arc::new(MockDeducer {
            candidates: CandidateSet::new("mock", vec![probe as Arc<dyn CandidateProbe>]),
            calls: AtomicU64::new(0),
            fail_remaining: AtomicU64::new(0),
        })
    }

    pub fn failing_times(probe: Arc<MockProbe>, times: u64) -> Arc<Self> {
        Arc::new(MockDeducer {
            candidates: CandidateSet::new("mock", vec![probe as Arc<dyn CandidateProbe>]),
            calls: AtomicU64::new(0),
            fail_remaining: AtomicU64::new(times),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deducer for MockDeducer {
    async fn deduce(&self, _ctx: &CancellationToken, name: &str) -> Result<Deduction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Keep concurrent requesters in flight long enough to observe the
        // fold; the timing is generous, not load-bearing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            bail!("scripted deduction failure for {name}");
        }
        Ok(Deduction {
            root: ProjectRoot::new(name),
            candidates: self.candidates.clone(),
        })
    }
}

/// A scripted analyzer whose identity is `(name, major.0.0)`.
pub struct MockAnalyzer {
    name: String,
    major: u64,
}

impl MockAnalyzer {
    pub fn new(name: &str, major: u64) -> Self {
        MockAnalyzer {
            name: name.to_string(),
            major,
        }
    }
}

impl Analyzer for MockAnalyzer {
    fn info(&self) -> AnalyzerInfo {
        AnalyzerInfo::new(&self.name, semver::Version::new(self.major, 0, 0))
    }

    fn derive(&self, _local_path: &Path, root: &ProjectRoot) -> Result<(Manifest, Option<Lock>)> {
        let mut manifest = Manifest::default();
        manifest.package.name = format!("{}:{}", root, self.info());
        Ok((manifest, None))
    }
}

/// A gateway over the given adapter, with a fresh supervisor.
pub fn mock_gateway(adapter: Arc<MockAdapter>) -> (SourceGateway, Arc<Supervisor>) {
    gateway_with_probe(MockProbe::new(adapter))
}

/// A gateway over the given probe, with a fresh supervisor.
pub fn gateway_with_probe(probe: MockProbe) -> (SourceGateway, Arc<Supervisor>) {
    let supervisor = Arc::new(Supervisor::new(CancellationToken::new()));
    let candidates = CandidateSet::new("mock", vec![Arc::new(probe) as Arc<dyn CandidateProbe>]);
    let gateway = SourceGateway::new(candidates, Arc::clone(&supervisor), mock_cache_dir());
    (gateway, supervisor)
}

fn mock_cache_dir() -> PathBuf {
    // Mock adapters never touch it; any path will do.
    std::env::temp_dir().join("quay-mock-cache")
}
