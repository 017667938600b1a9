// CLI integration tests for the pack/inspect/unpack flow.
use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;

use fragbuf::core::fragment::Fragment;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_fragbuf");
    Command::new(exe)
}

fn parse_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("valid json")
}

fn write_fragment(path: &Path, sequence_id: u64, fragment_id: u32, fragment_type: u8, fill: u8) {
    let mut fragment = Fragment::with_header(sequence_id, fragment_id, fragment_type, 4);
    fragment.payload_mut().fill(fill);
    fs::write(path, fragment.as_bytes()).expect("write fragment");
}

#[test]
fn pack_inspect_unpack_flow() {
    let temp = tempfile::tempdir().expect("tempdir");
    let a = temp.path().join("a.frag");
    let b = temp.path().join("b.frag");
    write_fragment(&a, 1, 10, 7, 0xAA);
    write_fragment(&b, 2, 11, 7, 0xBB);
    let container = temp.path().join("packed.frag");

    let pack = cmd()
        .args([
            "pack",
            "--out",
            container.to_str().unwrap(),
            "--sequence-id",
            "900",
            "--fragment-id",
            "5",
            a.to_str().unwrap(),
            b.to_str().unwrap(),
        ])
        .output()
        .expect("pack");
    assert!(pack.status.success(), "pack failed: {:?}", pack);
    let pack_json = parse_json(&pack.stdout);
    assert_eq!(pack_json["packed"], 2);

    let inspect = cmd()
        .args(["inspect", container.to_str().unwrap()])
        .output()
        .expect("inspect");
    assert!(inspect.status.success());
    let summary = parse_json(&inspect.stdout);
    assert_eq!(summary["sequence_id"], 900);
    assert_eq!(summary["fragment_id"], 5);
    assert_eq!(summary["container"]["block_count"], 2);
    assert_eq!(summary["container"]["fragment_type"], 7);
    assert_eq!(summary["container"]["children"][0]["sequence_id"], 900);
    assert_eq!(summary["container"]["children"][1]["sequence_id"], 900);
    assert_eq!(summary["container"]["children"][0]["type"], 7);

    let out_dir = temp.path().join("children");
    let unpack = cmd()
        .args([
            "unpack",
            "--out-dir",
            out_dir.to_str().unwrap(),
            container.to_str().unwrap(),
        ])
        .output()
        .expect("unpack");
    assert!(unpack.status.success());
    let unpack_json = parse_json(&unpack.stdout);
    assert_eq!(unpack_json["unpacked"], 2);

    let first = fs::read(out_dir.join("packed-000.frag")).expect("read child");
    let child = Fragment::from_bytes(first).expect("child image");
    assert_eq!(child.sequence_id(), 900);
    assert_eq!(child.fragment_id(), 10);
    assert!(child.payload().iter().all(|byte| *byte == 0xAA));
}

#[test]
fn pack_rejects_mixed_types_with_a_json_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let a = temp.path().join("a.frag");
    let b = temp.path().join("b.frag");
    write_fragment(&a, 1, 10, 7, 0xAA);
    write_fragment(&b, 2, 11, 8, 0xBB);
    let container = temp.path().join("packed.frag");

    let pack = cmd()
        .args([
            "pack",
            "--out",
            container.to_str().unwrap(),
            "--sequence-id",
            "900",
            a.to_str().unwrap(),
            b.to_str().unwrap(),
        ])
        .output()
        .expect("pack");
    assert!(!pack.status.success());
    assert_eq!(pack.status.code(), Some(3));
    let err_json = parse_json(&pack.stderr);
    assert_eq!(err_json["error"]["kind"], "WrongFragmentType");
}

#[test]
fn inspect_rejects_a_truncated_image() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("bad.frag");
    fs::write(&path, [0u8; 11]).expect("write");

    let inspect = cmd()
        .args(["inspect", path.to_str().unwrap()])
        .output()
        .expect("inspect");
    assert!(!inspect.status.success());
    assert_eq!(inspect.status.code(), Some(1));
    let err_json = parse_json(&inspect.stderr);
    assert_eq!(err_json["error"]["kind"], "InvalidFormat");
}
