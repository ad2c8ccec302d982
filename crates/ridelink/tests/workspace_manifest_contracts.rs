use std::fs;
use std::path::PathBuf;

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|path| path.parent())
        .expect("crates/ridelink should have a workspace root parent")
        .to_path_buf()
}

#[test]
fn workspace_manifest_lists_every_crate() {
    let root = repo_root();
    let workspace_manifest =
        fs::read_to_string(root.join("Cargo.toml")).expect("read workspace Cargo.toml");

    let crates_dir = root.join("crates");
    let entries = fs::read_dir(&crates_dir).expect("read crates directory");
    for entry in entries {
        let entry = entry.expect("read crate entry");
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if !path.join("Cargo.toml").exists() {
            continue;
        }

        let crate_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("crate directory name must be valid UTF-8");
        let expected_member = format!("\"crates/{crate_name}\"");
        assert!(
            workspace_manifest.contains(&expected_member),
            "workspace manifest is missing member {expected_member}",
        );
    }
}

#[test]
fn crate_manifests_resolve_internal_dependencies_through_the_workspace() {
    let root = repo_root();
    let crates_dir = root.join("crates");
    let entries = fs::read_dir(&crates_dir).expect("read crates directory");
    for entry in entries {
        let entry = entry.expect("read crate entry");
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let manifest_path = path.join("Cargo.toml");
        if !manifest_path.exists() {
            continue;
        }

        let manifest = fs::read_to_string(&manifest_path)
            .unwrap_or_else(|_| panic!("read {}", manifest_path.display()));
        assert!(
            !manifest.contains("path = \""),
            "{} declares a path dependency; internal crates resolve through [workspace.dependencies]",
            manifest_path.display(),
        );
    }
}

#[test]
fn facade_depends_on_every_library_crate() {
    let manifest = fs::read_to_string(
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"),
    )
    .expect("read facade Cargo.toml");

    for dependency in [
        "gateway-http",
        "ridelink-channel",
        "ridelink-config",
        "ridelink-eventbus",
        "ridelink-protocol",
        "ridelink-trip",
    ] {
        assert!(
            manifest.contains(dependency),
            "facade manifest must re-export {dependency} and therefore depend on it",
        );
    }
}
