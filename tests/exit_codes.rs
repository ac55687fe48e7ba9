use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn fiscaudit_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fiscaudit"));
    cmd.env("HOME", home);
    for var in [
        "FISCAUDIT_CONFIG",
        "FISCAUDIT_UI_COLOR",
        "FISCAUDIT_UI_MAX_TABLE_ROWS",
        "FISCAUDIT_TABLE_PATH",
        "FISCAUDIT_TABLE_VERSION",
        "FISCAUDIT_AUDIT_TOTAL_TOLERANCE",
        "FISCAUDIT_AUDIT_RATE_TOLERANCE",
        "FISCAUDIT_AUDIT_EXTRA_CFOP",
        "FISCAUDIT_BATCH_WORKERS",
        "FISCAUDIT_OUTPUT_INCLUDE_CONTEXT",
        "FISCAUDIT_OUTPUT_RESULTS_DIR",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    fiscaudit_cmd(home).args(args).output().expect("run fiscaudit")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!(
        "fiscaudit-exit-test-{}-{seq}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

fn write_table(home: &Path) -> String {
    let path = home.join("tipi.json");
    write_file(
        &path,
        br#"{"version": "tipi-test", "fetched_at": "2024-01-15T12:00:00Z",
             "entries": [{"code": "12345678", "rate": "10", "description": "Teste"}]}"#,
    );
    path.display().to_string()
}

fn invoice(declared_rate: &str) -> Vec<u8> {
    format!(
        r#"<NFe><infNFe Id="NFe0042"><ide><nNF>42</nNF><dhEmi>2024-01-20</dhEmi></ide>
        <emit><CNPJ>11.222.333/0001-81</CNPJ></emit><dest><CNPJ>11444777000161</CNPJ></dest>
        <det><prod><NCM>12345678</NCM><CFOP>5102</CFOP><vProd>100.00</vProd></prod>
        <imposto><IPI><IPITrib><pIPI>{declared_rate}</pIPI></IPITrib></IPI></imposto></det>
        <total><ICMSTot><vNF>100.00</vNF></ICMSTot></total></infNFe></NFe>"#
    )
    .into_bytes()
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn json_and_markdown_together_exit_2() {
    let home = make_temp_home();
    let out = run(&home, &["--json", "--markdown", "config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn broken_config_exits_2() {
    let home = make_temp_home();
    write_file(
        &home.join(".config/fiscaudit/config.toml"),
        b"[audit]\ntotal_tolerance = \"muito\"\n",
    );
    let out = run(&home, &["config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn missing_document_and_unknown_extension_exit_2() {
    let home = make_temp_home();
    let table = write_table(&home);
    let missing = home.join("nao-existe.xml").display().to_string();
    let out = run(&home, &["--table", &table, "audit", &missing]);
    assert_eq!(out.status.code(), Some(2));

    let odd = home.join("nota.bin");
    write_file(&odd, &invoice("10"));
    let out = run(&home, &["--table", &table, "audit", &odd.display().to_string()]);
    assert_eq!(out.status.code(), Some(2));

    let out = run(
        &home,
        &[
            "--table",
            &table,
            "audit",
            "--format",
            "markup",
            &odd.display().to_string(),
        ],
    );
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn audit_without_table_exits_20() {
    let home = make_temp_home();
    let doc = home.join("nota.xml");
    write_file(&doc, &invoice("10"));

    let out = run(&home, &["audit", &doc.display().to_string()]);
    assert_eq!(out.status.code(), Some(20));

    let missing_table = home.join("sumiu.json").display().to_string();
    let out = run(
        &home,
        &["--table", &missing_table, "audit", &doc.display().to_string()],
    );
    assert_eq!(out.status.code(), Some(20));

    let out = run(&home, &["table", "info"]);
    assert_eq!(out.status.code(), Some(20));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn rejected_document_exits_10() {
    let home = make_temp_home();
    let table = write_table(&home);
    let doc = home.join("quebrado.xml");
    write_file(&doc, b"<NFe><infNFe><ide>");

    let out = run(&home, &["--table", &table, "audit", &doc.display().to_string()]);
    assert_eq!(out.status.code(), Some(10));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("formato não suportado"), "stderr={stderr}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn fail_on_threshold_exits_3() {
    let home = make_temp_home();
    let table = write_table(&home);
    let doc = home.join("nota.xml");
    write_file(&doc, &invoice("12"));
    let doc = doc.display().to_string();

    let out = run(&home, &["--table", &table, "audit", &doc]);
    assert_eq!(out.status.code(), Some(0));

    let out = run(&home, &["--table", &table, "audit", "--fail-on", "error", &doc]);
    assert_eq!(out.status.code(), Some(0));

    let out = run(&home, &["--table", &table, "audit", "--fail-on", "warning", &doc]);
    assert_eq!(out.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn batch_invalid_exclude_exits_2_and_rejections_exit_10() {
    let home = make_temp_home();
    let table = write_table(&home);
    let dir = home.join("lote");
    write_file(&dir.join("a.xml"), &invoice("10"));
    let dir_s = dir.display().to_string();

    let out = run(&home, &["--table", &table, "batch", &dir_s, "--exclude", "["]);
    assert_eq!(out.status.code(), Some(2));

    let out = run(&home, &["--table", &table, "batch", &dir_s]);
    assert_eq!(out.status.code(), Some(0));

    write_file(&dir.join("b.xml"), b"<html/>");
    let out = run(&home, &["--table", &table, "batch", &dir_s]);
    assert_eq!(out.status.code(), Some(10));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn failed_result_write_exits_1_not_10() {
    let home = make_temp_home();
    let table = write_table(&home);
    let doc = home.join("nota.xml");
    write_file(&doc, &invoice("10"));
    let blocker = home.join("bloqueio");
    write_file(&blocker, b"arquivo comum");
    let results_dir = blocker.join("resultados").display().to_string();

    let out = fiscaudit_cmd(&home)
        .env("FISCAUDIT_OUTPUT_RESULTS_DIR", &results_dir)
        .args(["--table", &table, "audit", "--save", &doc.display().to_string()])
        .output()
        .expect("run fiscaudit");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("falha ao criar o diretório de resultados"),
        "stderr={stderr}"
    );
    let _ = std::fs::remove_dir_all(&home);
}

#[cfg(unix)]
#[test]
fn batch_with_unreadable_subdirectory_exits_10_and_reports_it() {
    use std::os::unix::fs::PermissionsExt;

    let home = make_temp_home();
    let table = write_table(&home);
    let dir = home.join("lote");
    write_file(&dir.join("a.xml"), &invoice("10"));
    let locked = dir.join("trancado");
    write_file(&locked.join("b.xml"), &invoice("10"));
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).expect("chmod");

    // Privileged users read through mode bits; nothing to observe then.
    if std::fs::read_dir(&locked).is_err() {
        let out = run(
            &home,
            &["--json", "--table", &table, "batch", &dir.display().to_string()],
        );
        assert_eq!(out.status.code(), Some(10));
        let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
        assert_eq!(v["documents"].as_array().map(Vec::len), Some(1));
        assert_eq!(v["unreadable"][0]["path"], "trancado");
    }

    let _ = std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755));
    let _ = std::fs::remove_dir_all(&home);
}
