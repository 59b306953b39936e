use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE_NAME;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/raport.sqlite3";
pub const BUNDLE_FORMAT: &str = "raport-workspace-v1";
const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleManifest {
    format: String,
    version: u32,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    exported_at: Option<String>,
    db_entry: String,
    db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> anyhow::Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("bundle has no {} entry", name))?;
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("failed to read bundle entry {}", name))?;
    Ok(buf)
}

/// Writes the workspace database and a manifest carrying its SHA-256 into a
/// zip at `out_path`.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.display());
    }
    let db_bytes =
        std::fs::read(&db_path).with_context(|| format!("failed to read {}", db_path.display()))?;

    let manifest = BundleManifest {
        format: BUNDLE_FORMAT.to_string(),
        version: BUNDLE_VERSION,
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(chrono::Utc::now().to_rfc3339()),
        db_entry: DB_ENTRY.to_string(),
        db_sha256: sha256_hex(&db_bytes),
    };
    let manifest_json =
        serde_json::to_vec_pretty(&manifest).context("failed to serialize manifest")?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in [(MANIFEST_ENTRY, &manifest_json), (DB_ENTRY, &db_bytes)] {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        zip.write_all(bytes)
            .with_context(|| format!("failed to write entry {}", name))?;
    }
    zip.finish().context("failed to finalize bundle")?;

    info!(out = %out_path.display(), sha256 = %manifest.db_sha256, "exported workspace bundle");
    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: 2,
        db_sha256: manifest.db_sha256,
    })
}

/// Restores a bundle into `workspace_path`. The database is extracted next to
/// the target and only moved into place once its checksum matches the
/// manifest.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let file =
        File::open(in_path).with_context(|| format!("failed to open {}", in_path.display()))?;
    let mut archive = ZipArchive::new(file).context("bundle is not a zip archive")?;

    let manifest: BundleManifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT {
        bail!("unsupported bundle format: {}", manifest.format);
    }
    if manifest.version > BUNDLE_VERSION {
        bail!("bundle version {} is newer than this build supports", manifest.version);
    }

    let db_bytes = read_entry(&mut archive, &manifest.db_entry)?;
    let actual = sha256_hex(&db_bytes);
    if !actual.eq_ignore_ascii_case(&manifest.db_sha256) {
        return Err(anyhow!(
            "database checksum mismatch: manifest {}, bundle {}",
            manifest.db_sha256,
            actual
        ));
    }

    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create {}", workspace_path.display()))?;
    let dst = workspace_path.join(DB_FILE_NAME);
    let staged = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    std::fs::write(&staged, &db_bytes)
        .with_context(|| format!("failed to write {}", staged.display()))?;

    // Journal files of the old database must not be replayed onto the new one.
    for suffix in ["-wal", "-shm"] {
        let side = workspace_path.join(format!("{}{}", DB_FILE_NAME, suffix));
        if side.exists() {
            std::fs::remove_file(&side)
                .with_context(|| format!("failed to remove {}", side.display()))?;
            debug!(path = %side.display(), "removed stale journal file");
        }
    }
    std::fs::rename(&staged, &dst)
        .with_context(|| format!("failed to move database into {}", dst.display()))?;

    info!(workspace = %workspace_path.display(), sha256 = %actual, "imported workspace bundle");
    Ok(ImportSummary {
        bundle_format_detected: manifest.format,
        db_sha256: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn sha256_hex_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn export_then_import_restores_identical_database() {
        let src = temp_dir("raportd-backup-src");
        let dst = temp_dir("raportd-backup-dst");
        std::fs::write(src.join(DB_FILE_NAME), b"not really sqlite").expect("seed db");
        let bundle = src.join("out").join("bundle.zip");

        let exported = export_workspace_bundle(&src, &bundle).expect("export");
        assert_eq!(exported.entry_count, 2);
        let imported = import_workspace_bundle(&bundle, &dst).expect("import");
        assert_eq!(imported.db_sha256, exported.db_sha256);
        assert_eq!(
            std::fs::read(dst.join(DB_FILE_NAME)).expect("read restored"),
            b"not really sqlite"
        );
        let _ = std::fs::remove_dir_all(src);
        let _ = std::fs::remove_dir_all(dst);
    }

    #[test]
    fn tampered_bundle_is_rejected() {
        let dir = temp_dir("raportd-backup-tamper");
        let bundle = dir.join("bad.zip");
        {
            let f = File::create(&bundle).expect("create");
            let mut zip = ZipWriter::new(f);
            let opts = FileOptions::default();
            zip.start_file(MANIFEST_ENTRY, opts).expect("manifest");
            zip.write_all(
                serde_json::json!({
                    "format": BUNDLE_FORMAT,
                    "version": 1,
                    "dbEntry": DB_ENTRY,
                    "dbSha256": "00"
                })
                    .to_string()
                    .as_bytes(),
            )
            .expect("write manifest");
            zip.start_file(DB_ENTRY, opts).expect("db");
            zip.write_all(b"payload").expect("write db");
            zip.finish().expect("finish");
        }
        let ws = dir.join("ws");
        let e = import_workspace_bundle(&bundle, &ws).expect_err("checksum");
        assert!(e.to_string().contains("checksum"));
        assert!(!ws.join(DB_FILE_NAME).exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let dir = temp_dir("raportd-backup-format");
        let bundle = dir.join("other.zip");
        {
            let f = File::create(&bundle).expect("create");
            let mut zip = ZipWriter::new(f);
            zip.start_file(MANIFEST_ENTRY, FileOptions::default())
                .expect("manifest");
            zip.write_all(
                serde_json::json!({
                    "format": "gradebook-export-v3",
                    "version": 1,
                    "dbEntry": DB_ENTRY,
                    "dbSha256": "00"
                })
                .to_string()
                .as_bytes(),
            )
            .expect("write manifest");
            zip.finish().expect("finish");
        }
        let e = import_workspace_bundle(&bundle, &dir.join("ws")).expect_err("format");
        assert!(e.to_string().contains("unsupported bundle format"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
