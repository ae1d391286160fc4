#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use httpmock::Method::GET;
use httpmock::{Mock, MockServer};
use volboot_common::config::{Config, FetchSettings};
use volboot_common::model::{ModelSpec, PluginSpec, ToolCache};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const MODEL_BYTES: usize = 8 * 1024;
pub const MIN_MODEL_SIZE: u64 = 4 * 1024;

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

/// Source archive for `org/<repo>` as a git host would serve it.
pub fn plugin_archive(repo: &str, marker: &[u8]) -> Vec<u8> {
    let init = format!("{repo}-main/__init__.py");
    let nodes = format!("{repo}-main/nodes/node.py");
    zip_bytes(&[(init.as_str(), marker), (nodes.as_str(), b"NODE_CLASS_MAPPINGS = {}")])
}

pub async fn mock_plugin<'a>(server: &'a MockServer, repo: &str, body: Vec<u8>) -> Mock<'a> {
    let path = format!("/org/{repo}/archive/refs/heads/main.zip");
    server
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(200)
                .header("content-type", "application/zip")
                .body(body);
        })
        .await
}

pub async fn mock_missing<'a>(server: &'a MockServer, path: &str) -> Mock<'a> {
    let path = path.to_string();
    server
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(404);
        })
        .await
}

pub async fn mock_model<'a>(server: &'a MockServer, id: &str, filename: &str) -> Mock<'a> {
    let path = format!("/{id}/resolve/main/{filename}");
    server
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(200).body(vec![9u8; MODEL_BYTES]);
        })
        .await
}

pub fn model(subdir: &str, filename: &str, id: &str) -> ModelSpec {
    let mut spec = ModelSpec::new(subdir, filename, id);
    spec.min_size = Some(MIN_MODEL_SIZE);
    spec
}

pub fn plugin(repo: &str) -> PluginSpec {
    PluginSpec::new(format!("org/{repo}"))
}

pub fn tool_cache(server: &MockServer, home: &Path) -> ToolCache {
    ToolCache {
        name: "buffalo_l".to_string(),
        url: server.url("/releases/download/v0.7/buffalo_l.zip"),
        volume_subdir: PathBuf::from(".insightface/models"),
        alias: home.join(".insightface/models"),
        archive_prefix: None,
    }
}

/// A volume under `root/vol` with a baked-in default tree under
/// `root/image`, talking to `server` for every registry.
pub fn test_config(root: &Path, server: &MockServer) -> Config {
    let default_app = root.join("image/ComfyUI");
    fs::create_dir_all(default_app.join("comfy")).unwrap();
    fs::write(default_app.join("main.py"), b"print('server')").unwrap();
    fs::write(default_app.join("comfy/sd.py"), b"").unwrap();

    let mut config = Config::for_volume(root.join("vol"));
    config.volume.default_app = default_app;
    config.registries.git_base = server.base_url();
    config.registries.model_base = server.base_url();
    config.fetch = FetchSettings {
        retries: 2,
        timeout_secs: 5,
        connect_timeout_secs: 5,
        backoff_base_ms: 1,
    };
    config.lock.poll_interval_ms = 10;
    config
}

/// Every file's bytes and every symlink's target below `root`. The log
/// directory under `.volboot/` is left out: it grows on every run.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.ends_with(".volboot/logs") {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap().to_path_buf();
        let meta = fs::symlink_metadata(&path).unwrap();
        if meta.file_type().is_symlink() {
            let target = fs::read_link(&path).unwrap();
            out.insert(rel, target.to_string_lossy().as_bytes().to_vec());
        } else if meta.is_dir() {
            out.insert(rel, Vec::new());
            walk(root, &path, out);
        } else {
            out.insert(rel, fs::read(&path).unwrap());
        }
    }
}
