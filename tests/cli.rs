use std::io::Write;
use std::process::{Command, Output, Stdio};

fn dicelang() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dicelang"))
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

fn run_expr(src: &str) -> Output {
    dicelang().args(["--seed", "42", "-e", src]).output().expect("failed to run dicelang")
}

// --- Printing and evaluation ---

#[test]
fn prints_arithmetic() {
    let out = run_expr("!1 + 2 * 3");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "7\n");
}

#[test]
fn unprinted_values_produce_no_output() {
    let out = run_expr("3d6 [1 2 3] 5@1d1");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "");
}

#[test]
fn conditional_branches() {
    let out = run_expr("!{1,2|0} !{0,2|5}");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "2\n5\n");
}

#[test]
fn variables_persist_between_expressions() {
    let out = run_expr("10@1d2 !&1d2 - 3 !&(1d1)");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "7\n0\n");
}

#[test]
fn seeded_rolls_are_reproducible() {
    let first = run_expr("![4d6 4d6 4d6 4d6]");
    let second = run_expr("![4d6 4d6 4d6 4d6]");
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    assert_eq!(stdout(&first), stdout(&second));
}

#[test]
fn dice_results_in_range() {
    for seed in 0..20 {
        let out = dicelang()
            .args(["--seed", &seed.to_string(), "-e", "!4d6kh3"])
            .output()
            .expect("failed to run dicelang");
        assert!(out.status.success(), "stderr: {}", stderr(&out));
        let n: i64 = stdout(&out).trim().parse().expect("numeric output");
        assert!((3..=18).contains(&n), "4d6kh3 gave {}", n);
    }
}

#[test]
fn reads_program_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "// attack roll").unwrap();
    writeln!(file, "!20 + 5").unwrap();
    let out = dicelang().arg(file.path()).output().expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "25\n");
}

#[test]
fn prompt_reads_stdin() {
    let mut child = dicelang()
        .args(["-e", "!(?) * 3"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to run dicelang");
    child.stdin.take().unwrap().write_all(b"14\n").unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "42\n");
}

// --- Files ---

#[test]
fn writes_and_reads_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let out = dicelang()
        .current_dir(dir.path())
        .args(["-e", "v7@1d1 !|&1d1 42 !|&1d1 [1 2] |&1d1"])
        .output()
        .expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let written = std::fs::read_to_string(dir.path().join("7")).unwrap();
    assert_eq!(written, "42\n[1, 2]\n");

    let out = dicelang()
        .current_dir(dir.path())
        .args(["-e", "^7@2d2 !(?|&2d2) * 2 |&2d2"])
        .output()
        .expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "84\n");
}

#[test]
fn unclosed_files_are_flushed() {
    let dir = tempfile::tempdir().expect("temp dir");
    let out = dicelang()
        .current_dir(dir.path())
        .args(["-e", "v3@1d1 !|&1d1 9"])
        .output()
        .expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(std::fs::read_to_string(dir.path().join("3")).unwrap(), "9\n");
}

// --- Errors ---

#[test]
fn parse_error_reports_position() {
    let out = run_expr("1d6\n  + kz");
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("Error line 2 column 5: unrecognised input, got \"kz\" instead"), "{}", err);
    assert!(err.contains("--> 2:5"), "{}", err);
}

#[test]
fn parse_error_as_json() {
    let out = dicelang()
        .args(["--error-format", "json", "-e", "(1d6"])
        .output()
        .expect("failed to run dicelang");
    assert!(!out.status.success());
    let v: serde_json::Value = serde_json::from_str(stderr(&out).trim()).expect("json diagnostic");
    assert_eq!(v["phase"], "parse");
    assert_eq!(v["message"], "Error line 1 column 4: unexpected end of input");
}

#[test]
fn runtime_error_exits_nonzero() {
    let out = run_expr("!1 / 0");
    assert!(!out.status.success());
    assert!(stderr(&out).contains("division by zero"), "{}", stderr(&out));
}

#[test]
fn closing_unopened_handle_fails() {
    let out = run_expr("|&4d4");
    assert!(!out.status.success());
    assert!(stderr(&out).contains("no open file handle 4d4"), "{}", stderr(&out));
}

#[test]
fn missing_input_shows_usage() {
    let out = dicelang().output().expect("failed to run dicelang");
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Usage"), "{}", stderr(&out));
}

// --- Emit modes ---

#[test]
fn emit_asm_shows_labels() {
    let out = dicelang().args(["--emit", "asm", "-e", "{1,2|3}"]).output().expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let listing = stdout(&out);
    assert!(listing.contains("JMPZ :L1"), "{}", listing);
    assert!(listing.lines().any(|l| l == ":L0"), "{}", listing);
}

#[test]
fn emit_ast_is_json() {
    let out = dicelang().args(["--emit", "ast", "-e", "4d6kh3"]).output().expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).expect("ast json");
    assert!(v["body"].is_array());
}

#[test]
fn bytecode_round_trips_through_cli() {
    let out = dicelang().args(["--emit", "bytecode", "-e", "!6 * 7"]).output().expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&out.stdout).unwrap();
    let out = dicelang().arg("--bytecode").arg(file.path()).output().expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "42\n");
}

#[test]
fn reroll_limit_is_configurable() {
    let out = dicelang()
        .args(["--max-rerolls", "3", "-e", "!5d1r1"])
        .output()
        .expect("failed to run dicelang");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "5\n");
}

#[test]
fn non_numeric_die_size_from_stdin_is_an_error() {
    for input in ["nan\n", "inf\n"] {
        let mut child = dicelang()
            .args(["-e", "!1d(?)"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to run dicelang");
        child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
        let out = child.wait_with_output().unwrap();
        assert_eq!(out.status.code(), Some(1), "stderr: {}", stderr(&out));
        assert!(stderr(&out).contains("type mismatch"), "{}", stderr(&out));
        assert!(!stderr(&out).contains("panicked"), "{}", stderr(&out));
    }
}
