//! End-to-end coordination tests over real local sources.
//!
//! Everything here goes through the public API - coordinator, gateway,
//! default deducer and analyzer - against projects materialized in temp
//! directories, so no network is ever involved.

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use quay::{
    Analyzer, ManifestAnalyzer, ProjectIdentifier, ProjectRoot, SourceCoordinator, SourceError,
    SourceState, Supervisor, UrlDeducer, Version,
};

fn ctx() -> CancellationToken {
    CancellationToken::new()
}

fn coordinator(cache: &TempDir) -> (SourceCoordinator, CancellationToken) {
    let lifetime = CancellationToken::new();
    let supervisor = Arc::new(Supervisor::new(lifetime.clone()));
    let coord = SourceCoordinator::new(
        supervisor,
        Arc::new(UrlDeducer),
        cache.path().to_path_buf(),
    );
    (coord, lifetime)
}

/// A project directory with a manifest, a lock and a nested package.
fn write_project(name: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("Quay.toml"),
        format!(
            "[package]\nname = \"{name}\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nleftpad = {{ req = \"^1.0\" }}\n"
        ),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("Quay.lock"),
        "[[project]]\nname = \"leftpad\"\nrevision = \"cafe0001\"\n",
    )
    .unwrap();

    let sub = tmp.path().join("tools").join("gen");
    std::fs::create_dir_all(&sub).unwrap();
    std::fs::write(
        sub.join("Quay.toml"),
        "[package]\nname = \"gen\"\n".to_string(),
    )
    .unwrap();
    tmp
}

#[tokio::test]
async fn test_alias_spellings_share_one_gateway() {
    let project = write_project("aliased");
    let cache = TempDir::new().unwrap();
    let (coord, _lifetime) = coordinator(&cache);

    let by_path = ProjectIdentifier::new(project.path().to_string_lossy().to_string());
    let by_url = ProjectIdentifier::new(format!("file://{}", project.path().display()));

    let ctx_token = ctx();
    let (a, b) = tokio::join!(
        coord.get_gateway(&ctx_token, &by_path),
        coord.get_gateway(&ctx_token, &by_url),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(coord.name_count().await, 2);
    assert_eq!(coord.gateway_count().await, 1);
}

#[tokio::test]
async fn test_versions_revisions_and_manifests_end_to_end() {
    let project = write_project("demo");
    let cache = TempDir::new().unwrap();
    let (coord, _lifetime) = coordinator(&cache);

    let id = ProjectIdentifier::new(project.path().to_string_lossy().to_string());
    let gateway = coord.get_gateway(&ctx(), &id).await.unwrap();

    // One synthetic branch, refreshed against the "upstream" directory.
    let versions = gateway.list_versions(&ctx()).await.unwrap();
    assert_eq!(versions.len(), 1);
    let local = Version::Branch("local".to_string());
    assert_eq!(versions[0].version, local);

    let revision = gateway.convert_to_revision(&ctx(), &local).await.unwrap();
    assert_eq!(revision, versions[0].revision);
    assert!(gateway
        .revision_present_in(&ctx(), &revision)
        .await
        .unwrap());

    // Manifest and lock derive once, then come from the cache.
    let root = ProjectRoot::from("example.com/demo");
    let analyzer: Arc<dyn Analyzer> = Arc::new(ManifestAnalyzer);
    let first = gateway
        .get_manifest_and_lock(&ctx(), &root, &local, Arc::clone(&analyzer))
        .await
        .unwrap();
    assert_eq!(first.0.package.name, "demo");
    assert_eq!(first.1.as_ref().unwrap().projects.len(), 1);

    let second = gateway
        .get_manifest_and_lock(&ctx(), &root, &local, analyzer)
        .await
        .unwrap();
    assert_eq!(first, second);

    // Both packages of the tree show up.
    let tree = gateway.list_packages(&ctx(), &root, &local).await.unwrap();
    assert_eq!(tree.packages.len(), 2);
    assert!(tree.packages.contains_key("example.com/demo/tools/gen"));
}

#[tokio::test]
async fn test_missing_version_is_authoritative_after_refresh() {
    let project = write_project("strict");
    let cache = TempDir::new().unwrap();
    let (coord, _lifetime) = coordinator(&cache);

    let id = ProjectIdentifier::new(project.path().to_string_lossy().to_string());
    let gateway = coord.get_gateway(&ctx(), &id).await.unwrap();

    gateway
        .convert_to_revision(&ctx(), &Version::Branch("local".to_string()))
        .await
        .unwrap();

    let err = gateway
        .convert_to_revision(&ctx(), &Version::from_tag("v9.9.9"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::NoSuchVersion { .. })
    ));
}

#[tokio::test]
async fn test_export_writes_the_tree() {
    let project = write_project("exported");
    let cache = TempDir::new().unwrap();
    let (coord, _lifetime) = coordinator(&cache);

    let id = ProjectIdentifier::new(project.path().to_string_lossy().to_string());
    let gateway = coord.get_gateway(&ctx(), &id).await.unwrap();

    let out_root = TempDir::new().unwrap();
    let dest = out_root.path().join("vendor").join("exported");
    gateway
        .export_version_to(&ctx(), &Version::Branch("local".to_string()), &dest)
        .await
        .unwrap();

    assert!(dest.join("Quay.toml").is_file());
    assert!(dest.join("tools").join("gen").join("Quay.toml").is_file());
}

#[tokio::test]
async fn test_existence_and_sync_promote_state() {
    let project = write_project("stateful");
    let cache = TempDir::new().unwrap();
    let (coord, _lifetime) = coordinator(&cache);

    let id = ProjectIdentifier::new(project.path().to_string_lossy().to_string());
    let gateway = coord.get_gateway(&ctx(), &id).await.unwrap();

    assert!(
        gateway
            .check_existence(&ctx(), SourceState::EXISTS_UPSTREAM | SourceState::EXISTS_LOCALLY)
            .await
    );
    gateway.sync_local(&ctx()).await.unwrap();

    let state = gateway.state().await;
    assert!(state.contains(SourceState::SET_UP));
    assert!(state.contains(SourceState::EXISTS_LOCALLY));
    assert!(state.contains(SourceState::HAS_LATEST_LOCALLY));
}

#[tokio::test]
async fn test_canceled_lifetime_refuses_new_requests() {
    let project = write_project("late");
    let cache = TempDir::new().unwrap();
    let (coord, lifetime) = coordinator(&cache);

    let id = ProjectIdentifier::new(project.path().to_string_lossy().to_string());
    coord.get_gateway(&ctx(), &id).await.unwrap();

    lifetime.cancel();
    let err = coord.get_gateway(&ctx(), &id).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::Terminated)
    ));
}

#[tokio::test]
async fn test_nonexistent_path_fails_without_being_cached() {
    let cache = TempDir::new().unwrap();
    let (coord, _lifetime) = coordinator(&cache);

    let id = ProjectIdentifier::new("/definitely/not/here");
    let err = coord.get_gateway(&ctx(), &id).await.unwrap_err();
    assert!(err.to_string().contains("no usable source"));
    assert_eq!(coord.gateway_count().await, 0);
    assert_eq!(coord.name_count().await, 0);
}
