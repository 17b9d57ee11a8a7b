//! FileCheck-style tests over the `.sir` files in `tests/filetest`.

use std::fs;
use std::path::{Path, PathBuf};

use sfn::ir::{TestRunner, TestSpec};

fn filetest_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("filetest")
}

/// Discovers all .sir files in a directory recursively
fn discover_sir_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(discover_sir_files(&path));
            } else if path.extension().and_then(|s| s.to_str()) == Some("sir") {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

fn run_filecheck_test(name: &str) {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = filetest_dir().join(name);
    let contents =
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    let spec = TestSpec::parse(&contents).unwrap_or_else(|e| panic!("Failed to parse test spec from {}: {}", name, e));
    TestRunner::new(false)
        .run_test(&spec)
        .unwrap_or_else(|e| panic!("Test {} failed: {}", name, e));
}

#[test]
fn test_vertex_passthrough_filecheck() {
    run_filecheck_test("vertex_passthrough.sir");
}

#[test]
fn test_if_else_filecheck() {
    run_filecheck_test("if_else.sir");
}

#[test]
fn test_loop_jumps_filecheck() {
    run_filecheck_test("loop_jumps.sir");
}

#[test]
fn test_constant_split_filecheck() {
    run_filecheck_test("constant_split.sir");
}

#[test]
fn test_binding_error_filecheck() {
    run_filecheck_test("binding_error.sir");
}

#[test]
fn test_fragment_interp_filecheck() {
    run_filecheck_test("fragment_interp.sir");
}

#[test]
fn test_malformed_call_filecheck() {
    run_filecheck_test("malformed_call.sir");
}

#[test]
fn run_all_sir_files() {
    let files = discover_sir_files(&filetest_dir());
    assert!(!files.is_empty(), "no .sir files in {}", filetest_dir().display());

    let runner = TestRunner::new(false);
    let mut failures = Vec::new();
    for file in &files {
        let result = fs::read_to_string(file)
            .map_err(|e| e.to_string())
            .and_then(|content| TestSpec::parse(&content))
            .and_then(|spec| runner.run_test(&spec));
        match result {
            Ok(()) => println!("PASS {}", file.display()),
            Err(e) => {
                println!("FAIL {}", file.display());
                failures.push((file.clone(), e));
            }
        }
    }

    if !failures.is_empty() {
        eprintln!("\nFailures:");
        for (file, error) in &failures {
            eprintln!("  {}: {}", file.display(), error);
        }
        panic!("{} tests failed", failures.len());
    }
}
