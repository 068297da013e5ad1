//! Exit-code and output contract of the precompile binary.

use assert_cmd::Command;
use tempfile::tempdir;

fn write_template(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).expect("write template");
    path
}

#[test]
fn success_prints_ir_and_blocks() {
    let dir = tempdir().unwrap();
    let path = write_template(
        &dir,
        "page.html",
        "Hello {{ name }}{% block footer %}bye{% endblock %}",
    );
    let assert = Command::cargo_bin("tessera-precompile")
        .unwrap()
        .arg(&path)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(
        stdout.contains("function root(env, context, frame, runtime, cb) {"),
        "Expected root function. Got:\n{}",
        stdout
    );
    assert!(stdout.contains("// blocks: footer"), "Got:\n{}", stdout);
    assert!(stdout.contains("b_footer"), "Got:\n{}", stdout);
}

#[test]
fn parse_error_exits_one_with_span() {
    let dir = tempdir().unwrap();
    let path = write_template(&dir, "bad.html", "line one\n{% if %}");
    let assert = Command::cargo_bin("tessera-precompile")
        .unwrap()
        .arg(&path)
        .assert()
        .code(1);
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("bad.html:2:"), "Got:\n{}", stderr);
}

#[test]
fn missing_file_exits_two() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("tessera-precompile")
        .unwrap()
        .arg(dir.path().join("nope.html"))
        .assert()
        .code(2);
}

#[test]
fn async_filter_flag_changes_emission() {
    let dir = tempdir().unwrap();
    let path = write_template(&dir, "t.html", "{{ x | fetch }}");
    let assert = Command::cargo_bin("tessera-precompile")
        .unwrap()
        .arg(&path)
        .args(["--async-filter", "fetch"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(
        stdout.contains("function(err, t_await_1)"),
        "Got:\n{}",
        stdout
    );
}

#[test]
fn out_flag_writes_file() {
    let dir = tempdir().unwrap();
    let path = write_template(&dir, "t.html", "hi");
    let out_path = dir.path().join("t.ir");
    Command::cargo_bin("tessera-precompile")
        .unwrap()
        .arg(&path)
        .args(["--out", out_path.to_str().unwrap()])
        .assert()
        .success();
    let written = std::fs::read_to_string(&out_path).unwrap();
    assert!(written.contains("function root"));
}

#[test]
fn compile_error_reports_duplicate_block() {
    let dir = tempdir().unwrap();
    let path = write_template(
        &dir,
        "dup.html",
        "{% block a %}{% endblock %}{% block a %}{% endblock %}",
    );
    let assert = Command::cargo_bin("tessera-precompile")
        .unwrap()
        .arg(&path)
        .assert()
        .code(1);
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("defined twice"), "Got:\n{}", stderr);
}
