mod common;

use std::fs;

use chrono::Utc;
use common::*;
use httpmock::MockServer;
use uuid::Uuid;
use volboot_common::lock::LockHolder;
use volboot_common::manifest::InstallManifest;
use volboot_common::model::{RawDownload, UpdatePolicy};
use volboot_common::pipeline::{BootStage, ItemKind, ItemOutcome};
use volboot_common::BootError;
use volboot_core::{ensure_plugin, Bootstrap};
use volboot_net::Fetcher;

#[cfg(unix)]
#[tokio::test]
async fn second_run_is_a_no_op() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("home");
    let mut config = test_config(dir.path(), &server);
    config.plugins = vec![plugin("alpha")];
    config.models = vec![model("checkpoints", "base.safetensors", "org/base")];
    config.downloads = vec![RawDownload {
        url: server.url("/files/4x_upscaler.pth"),
        dest: "upscale_models/4x_upscaler.pth".into(),
        min_size: Some(MIN_MODEL_SIZE),
        sha256: None,
    }];
    config.tool_caches = vec![tool_cache(&server, &home)];

    let plugin_mock = mock_plugin(&server, "alpha", plugin_archive("alpha", b"v1")).await;
    let model_mock = mock_model(&server, "org/base", "base.safetensors").await;
    let download_mock = server
        .mock_async(|when, then| {
            when.path("/files/4x_upscaler.pth");
            then.status(200).body(vec![1u8; MODEL_BYTES]);
        })
        .await;
    let cache_body = zip_bytes(&[("det_10g.onnx", b"det"), ("w600k_r50.onnx", b"rec")]);
    let cache_mock = server
        .mock_async(|when, then| {
            when.path("/releases/download/v0.7/buffalo_l.zip");
            then.status(200).body(cache_body);
        })
        .await;

    let report = Bootstrap::new(&config).unwrap().provision().await.unwrap();
    assert!(report.seeded);
    assert!(!report.is_degraded(), "{:?}", report.items);
    assert_eq!(
        report.outcome_of(ItemKind::Plugin, "alpha"),
        Some(&ItemOutcome::Installed)
    );
    assert!(config.plugin_path("alpha").join("nodes/node.py").is_file());
    assert_eq!(
        fs::metadata(config.model_path("checkpoints", "base.safetensors"))
            .unwrap()
            .len(),
        MODEL_BYTES as u64
    );
    assert!(home.join(".insightface/models/buffalo_l/det_10g.onnx").is_file());
    assert_eq!(InstallManifest::load(&config.install_manifest_path()).len(), 4);

    let before = snapshot(dir.path());
    fs::create_dir_all(config.logs_dir()).unwrap();
    fs::write(config.logs_dir().join("volboot.log"), b"second run\n").unwrap();
    let mut bootstrap = Bootstrap::new(&config).unwrap();
    let second = bootstrap.provision().await.unwrap();
    assert_eq!(bootstrap.stage(), BootStage::LinkingAssets);

    assert!(!second.seeded);
    assert!(second
        .items
        .iter()
        .all(|item| item.outcome == ItemOutcome::Skipped));
    for mock in [&plugin_mock, &model_mock, &download_mock, &cache_mock] {
        assert_eq!(mock.hits_async().await, 1);
    }
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn undersized_model_is_fetched_again() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server);
    config.models = vec![
        model("vae", "empty.safetensors", "org/vae"),
        model("loras", "full.safetensors", "org/lora"),
    ];
    let empty = config.model_path("vae", "empty.safetensors");
    let full = config.model_path("loras", "full.safetensors");
    fs::create_dir_all(empty.parent().unwrap()).unwrap();
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(&empty, b"").unwrap();
    fs::write(&full, vec![0u8; MIN_MODEL_SIZE as usize]).unwrap();

    let empty_mock = mock_model(&server, "org/vae", "empty.safetensors").await;
    let full_mock = mock_model(&server, "org/lora", "full.safetensors").await;

    let report = Bootstrap::new(&config)
        .unwrap()
        .provision_stages(&[BootStage::FetchingModels])
        .await
        .unwrap();

    assert_eq!(empty_mock.hits_async().await, 1);
    assert_eq!(full_mock.hits_async().await, 0);
    assert_eq!(fs::metadata(&empty).unwrap().len(), MODEL_BYTES as u64);
    assert_eq!(
        report.outcome_of(ItemKind::Model, "loras/full.safetensors"),
        Some(&ItemOutcome::Skipped)
    );
}

#[tokio::test]
async fn short_download_is_rejected() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server);
    config.models = vec![model("checkpoints", "trunc.safetensors", "org/trunc")];
    server
        .mock_async(|when, then| {
            when.path("/org/trunc/resolve/main/trunc.safetensors");
            then.status(200).body(vec![1u8; 10]);
        })
        .await;

    let report = Bootstrap::new(&config)
        .unwrap()
        .provision_stages(&[BootStage::FetchingModels])
        .await
        .unwrap();

    assert!(matches!(
        report.outcome_of(ItemKind::Model, "checkpoints/trunc.safetensors"),
        Some(ItemOutcome::Failed(_))
    ));
    assert!(!config.model_path("checkpoints", "trunc.safetensors").exists());
}

#[tokio::test]
async fn forced_refresh_replaces_old_contents() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server);
    config.plugins = vec![plugin("alpha")];
    let dest = config.plugin_path("alpha");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("OLD_SENTINEL"), b"previous install").unwrap();
    let mock = mock_plugin(&server, "alpha", plugin_archive("alpha", b"v2")).await;

    let report = Bootstrap::new(&config)
        .unwrap()
        .with_policy(UpdatePolicy::ForceRefresh)
        .provision_stages(&[BootStage::InstallingPlugins])
        .await
        .unwrap();

    assert_eq!(mock.hits_async().await, 1);
    assert_eq!(
        report.outcome_of(ItemKind::Plugin, "alpha"),
        Some(&ItemOutcome::Installed)
    );
    assert!(!dest.join("OLD_SENTINEL").exists());
    assert_eq!(fs::read(dest.join("__init__.py")).unwrap(), b"v2");
}

#[tokio::test]
async fn one_missing_plugin_does_not_stop_the_rest() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server);
    config.plugins = vec![plugin("one"), plugin("two"), plugin("three")];
    config.models = vec![model("checkpoints", "base.safetensors", "org/base")];

    mock_plugin(&server, "one", plugin_archive("one", b"1")).await;
    let missing = mock_missing(&server, "/org/two/archive/refs/heads/main.zip").await;
    mock_plugin(&server, "three", plugin_archive("three", b"3")).await;
    let model_mock = mock_model(&server, "org/base", "base.safetensors").await;

    let report = Bootstrap::new(&config).unwrap().provision().await.unwrap();

    assert!(config.plugin_path("one").is_dir());
    assert!(!config.plugin_path("two").exists());
    assert!(config.plugin_path("three").is_dir());
    assert_eq!(missing.hits_async().await, config.fetch.retries as usize);
    assert!(matches!(
        report.outcome_of(ItemKind::Plugin, "two"),
        Some(ItemOutcome::Failed(_))
    ));
    assert_eq!(model_mock.hits_async().await, 1);
    assert!(report.is_degraded());

    let manifest = InstallManifest::load(&config.install_manifest_path());
    assert!(manifest.get(&InstallManifest::plugin_key("one")).is_some());
    assert!(manifest.get(&InstallManifest::plugin_key("two")).is_none());
}

#[tokio::test]
async fn archive_without_matching_directory_is_skipped() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server);
    config.plugins = vec![plugin("alpha")];
    mock_plugin(&server, "alpha", plugin_archive("unrelated", b"x")).await;

    let report = Bootstrap::new(&config)
        .unwrap()
        .provision_stages(&[BootStage::InstallingPlugins])
        .await
        .unwrap();

    assert!(matches!(
        report.outcome_of(ItemKind::Plugin, "alpha"),
        Some(ItemOutcome::Failed(_))
    ));
    assert!(!config.plugin_path("alpha").exists());
}

#[tokio::test]
async fn missing_default_tree_aborts() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server);
    config.volume.default_app = dir.path().join("no-such-image-tree");
    config.plugins = vec![plugin("alpha")];
    let mock = mock_plugin(&server, "alpha", plugin_archive("alpha", b"v1")).await;

    let mut bootstrap = Bootstrap::new(&config).unwrap();
    let err = bootstrap.provision().await.unwrap_err();

    assert!(matches!(err, BootError::SeedError(_)));
    assert_eq!(bootstrap.stage(), BootStage::Aborted);
    assert!(!config.marker_path().exists());
    assert_eq!(mock.hits_async().await, 0);
    assert!(!config.lock_path().exists());
}

#[tokio::test]
async fn busy_volume_is_left_alone() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server);
    config.plugins = vec![plugin("alpha")];
    config.lock.wait = "50ms".to_string();
    let mock = mock_plugin(&server, "alpha", plugin_archive("alpha", b"v1")).await;

    let holder = LockHolder {
        owner: Uuid::new_v4(),
        host: "other-container".to_string(),
        pid: 42,
        acquired_at: Utc::now(),
    };
    fs::create_dir_all(config.state_dir()).unwrap();
    fs::write(config.lock_path(), serde_json::to_vec(&holder).unwrap()).unwrap();

    let report = Bootstrap::new(&config).unwrap().provision().await.unwrap();

    assert!(report.lock_skipped);
    assert!(report.is_degraded());
    assert_eq!(mock.hits_async().await, 0);
    assert!(!config.marker_path().exists());
    assert!(config.lock_path().exists());
}

#[tokio::test]
async fn ensure_plugin_fetches_once() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &server);
    let mock = mock_plugin(&server, "repo", plugin_archive("repo", b"v1")).await;
    let fetcher = Fetcher::new(&config).unwrap();
    let mut manifest = InstallManifest::default();
    let spec = plugin("repo");

    let first = ensure_plugin(
        &spec,
        UpdatePolicy::KeepExisting,
        &config,
        &fetcher,
        &mut manifest,
    )
    .await
    .unwrap();
    assert_eq!(first, ItemOutcome::Installed);
    assert!(config.plugin_path("repo").join("__init__.py").is_file());

    let second = ensure_plugin(
        &spec,
        UpdatePolicy::KeepExisting,
        &config,
        &fetcher,
        &mut manifest,
    )
    .await
    .unwrap();
    assert_eq!(second, ItemOutcome::Skipped);
    assert_eq!(mock.hits_async().await, 1);
}
