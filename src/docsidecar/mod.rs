use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

const ELIGIBLE_EXTENSIONS: &[&str] = &["pdf", "docx", "pptx", "rtf"];

pub fn is_eligible(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ELIGIBLE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Deterministic sidecar path for a source file, keyed by its path
/// relative to the repository root.
pub fn sidecar_path(sidecar_dir: &Path, relative_path: &Path) -> PathBuf {
    sidecar_dir.join(relative_path).with_extension(
        format!(
            "{}.md.gz",
            relative_path.extension().and_then(|e| e.to_str()).unwrap_or("bin")
        ),
    )
}

/// Best-effort plain-text extraction for binary/semi-structured formats.
/// This crate does not carry a full pdf/docx/pptx/rtf parser; it strips
/// non-printable bytes so the sidecar still carries whatever plain-text
/// content the container exposes. A real extractor is a drop-in
/// replacement behind this same function signature.
fn extract_markdown(source: &Path) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    std::fs::File::open(source)?.read_to_end(&mut bytes)?;
    let text: String = bytes
        .into_iter()
        .map(|b| if b.is_ascii_graphic() || b == b' ' || b == b'\n' { b as char } else { ' ' })
        .collect();
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(format!("# {}\n\n{}\n", source.display(), collapsed))
}

/// Regenerates the sidecar if missing or stale relative to the source's
/// modification time (spec §4.9).
pub fn ensure_sidecar(source: &Path, sidecar_dir: &Path, relative_path: &Path) -> std::io::Result<PathBuf> {
    let target = sidecar_path(sidecar_dir, relative_path);
    let source_mtime = std::fs::metadata(source)?.modified()?;

    let needs_regen = match std::fs::metadata(&target) {
        Ok(meta) => meta.modified()? < source_mtime,
        Err(_) => true,
    };

    if needs_regen {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let markdown = extract_markdown(source)?;
        let tmp = target.with_extension("md.gz.tmp");
        {
            let file = std::fs::File::create(&tmp)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(markdown.as_bytes())?;
            encoder.finish()?;
        }
        std::fs::rename(&tmp, &target)?;
        info!(source = %source.display(), sidecar = %target.display(), "sidecar regenerated");
    } else {
        debug!(sidecar = %target.display(), "sidecar up to date");
    }

    Ok(target)
}

pub fn read_sidecar_text(sidecar: &Path) -> std::io::Result<String> {
    let file = std::fs::File::open(sidecar)?;
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    Ok(text)
}

pub fn delete_sidecar(sidecar: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(sidecar) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Walks the sidecar tree and deletes any sidecar whose original no longer
/// exists under `repo_root`.
pub fn sweep_orphans(sidecar_dir: &Path, repo_root: &Path) -> std::io::Result<usize> {
    if !sidecar_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in walkdir::WalkDir::new(sidecar_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(sidecar_dir) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let original_candidate = repo_root.join(relative).with_extension("");
        let has_original = ELIGIBLE_EXTENSIONS
            .iter()
            .any(|ext| original_candidate.with_extension(ext).exists());
        if !has_original {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligible_extensions_are_recognized_case_insensitively() {
        assert!(is_eligible(Path::new("doc.PDF")));
        assert!(is_eligible(Path::new("slides.pptx")));
        assert!(!is_eligible(Path::new("main.rs")));
    }

    #[test]
    fn sidecar_round_trips_through_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.pdf");
        std::fs::write(&source, b"Hello World plain text content").unwrap();

        let sidecar_dir = dir.path().join("sidecars");
        let target = ensure_sidecar(&source, &sidecar_dir, Path::new("report.pdf")).unwrap();
        let text = read_sidecar_text(&target).unwrap();
        assert!(text.contains("Hello World"));
    }

    #[test]
    fn stale_sidecar_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.pdf");
        std::fs::write(&source, b"first version").unwrap();
        let sidecar_dir = dir.path().join("sidecars");

        let target = ensure_sidecar(&source, &sidecar_dir, Path::new("report.pdf")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&source, b"second version, much longer content here").unwrap();

        let target2 = ensure_sidecar(&source, &sidecar_dir, Path::new("report.pdf")).unwrap();
        assert_eq!(target, target2);
        let text = read_sidecar_text(&target2).unwrap();
        assert!(text.contains("second version"));
    }
}
