use scriptbatch_runtime::{validate_source, RuntimeError, ScriptRuntime, VersionOrigin};
use std::fs;
use tempfile::TempDir;

fn generated(name: &str, default_size: u32) -> String {
    format!(
        r##"#!/usr/bin/env python3
# ---
# name: {name}
# description: Generated image tool.
# input-types: "Images (*.png)"
# entry-points:
#   single: main
#   batch: process_files
# parameters:
#   - name: size
#     type: int
#     default: {default_size}
# ---
def main(files, output_dir, **params):
    process_files(files, output_dir, **params)

def process_files(files, output_dir, **params):
    for f in files:
        print(f)
"##
    )
}

#[test]
fn test_generated_script_is_validated_before_install() {
    let temp = TempDir::new().unwrap();
    let runtime = ScriptRuntime::from_directories(temp.path(), temp.path().join("out")).unwrap();

    let broken = generated("Thumbnailer", 10).replace("def process_files", "def other");
    assert!(validate_source("thumbs.py", &broken).is_err());

    let err = runtime
        .install_script("thumbs.py", &broken, VersionOrigin::Generated, "first try")
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidPlugin(_)));
    assert!(!temp.path().join("thumbs.py").exists());
    assert!(runtime.list_plugins().is_empty());
}

#[test]
fn test_install_makes_plugin_visible_and_keeps_history() {
    let temp = TempDir::new().unwrap();
    let runtime = ScriptRuntime::from_directories(temp.path(), temp.path().join("out")).unwrap();

    runtime
        .install_script("thumbs.py", &generated("Thumbnailer", 64), VersionOrigin::Generated, "initial")
        .unwrap();
    let plugin = runtime.plugin("Thumbnailer").expect("installed plugin is listed");
    assert_eq!(plugin.manifest.parameters[0].default.to_string(), "64");

    runtime
        .install_script("thumbs.py", &generated("Thumbnailer", 128), VersionOrigin::Manual, "bigger")
        .unwrap();
    let plugin = runtime.plugin("Thumbnailer").unwrap();
    assert_eq!(plugin.manifest.parameters[0].default.to_string(), "128");

    let versions = runtime.store().versions("thumbs.py").unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].change_note, "bigger");

    runtime.restore_script("thumbs.py", versions[0].version).unwrap();
    let plugin = runtime.plugin("Thumbnailer").unwrap();
    assert_eq!(plugin.manifest.parameters[0].default.to_string(), "64");

    // The backup folder is hidden from the scan.
    assert!(temp.path().join(".script_versions").is_dir());
    assert!(runtime.snapshot().rejected().is_empty());
    assert_eq!(runtime.store().versions("thumbs.py").unwrap().len(), 2);
    assert!(fs::read_to_string(temp.path().join("thumbs.py")).unwrap().contains("default: 64"));
}
