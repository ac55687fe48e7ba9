use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::AuditResult;

/// Expands a leading `~` against `home_dir`.
pub fn resolve_dir(raw: &str, home_dir: &Path) -> PathBuf {
    if raw == "~" {
        return home_dir.to_path_buf();
    }
    match raw.strip_prefix("~/") {
        Some(rest) => home_dir.join(rest),
        None => PathBuf::from(raw),
    }
}

/// Writes `result` as `<dir>/<document id>.json`, replacing an earlier result
/// for the same document.
pub fn write_result(dir: &Path, result: &AuditResult) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| {
        format!(
            "falha ao criar o diretório de resultados: {}",
            dir.display()
        )
    })?;

    let path = dir.join(format!("{}.json", file_stem(&result.document_id)));
    let tmp = path.with_extension("json.tmp");

    let buf =
        serde_json::to_vec_pretty(result).context("falha ao serializar o resultado (JSON)")?;
    std::fs::write(&tmp, buf)
        .with_context(|| format!("falha ao gravar o resultado: {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("falha ao gravar o resultado: {}", path.display()))?;
    Ok(path)
}

pub fn mask_home(path: &Path, home_dir: &Path) -> String {
    let Ok(stripped) = path.strip_prefix(home_dir) else {
        return path.display().to_string();
    };
    let stripped = stripped.display().to_string();
    if stripped.is_empty() {
        "~".to_string()
    } else {
        format!("~/{stripped}")
    }
}

fn file_stem(document_id: &str) -> String {
    let stem: String = document_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        "documento".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocumentType, TableStamp};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn file_stem_keeps_ids_filesystem_safe() {
        assert_eq!(file_stem("NF-e-11222333000181-42"), "NF-e-11222333000181-42");
        assert_eq!(file_stem("lote/nota 1.xml"), "lote_nota_1.xml");
        assert_eq!(file_stem("../.."), "_");
        assert_eq!(file_stem(""), "documento");
    }

    #[test]
    fn resolve_dir_expands_home() {
        let home = Path::new("/home/auditor");
        assert_eq!(
            resolve_dir("~/res", home),
            PathBuf::from("/home/auditor/res")
        );
        assert_eq!(resolve_dir("/srv/res", home), PathBuf::from("/srv/res"));
        assert_eq!(mask_home(&home.join("res/a.json"), home), "~/res/a.json");
    }

    #[test]
    fn write_result_overwrites_by_document_id() {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "fiscaudit-results-test-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);

        let result = crate::report::build_at(
            "nota-1",
            DocumentType::ServiceInvoice,
            Vec::new(),
            TableStamp {
                version: "t1".to_string(),
                fetched_at: None,
            },
            "2024-01-01T00:00:00Z".to_string(),
        );
        let first = write_result(&dir, &result).expect("write");
        let second = write_result(&dir, &result).expect("write again");
        assert_eq!(first, second);
        assert_eq!(first, dir.join("nota-1.json"));

        let v: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&first).expect("read")).expect("json");
        assert_eq!(v["document_id"], "nota-1");
        assert_eq!(std::fs::read_dir(&dir).expect("list").count(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
