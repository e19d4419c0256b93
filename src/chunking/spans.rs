use std::path::Path;

use crate::db::spans::{compute_span_hash, NewSpan};

use super::languages::TSLanguageParsing;

const DOC_EXTENSIONS: &[&str] = &["md", "mdx", "rst", "txt"];

fn content_type_for(extension: Option<&str>) -> &'static str {
    match extension {
        Some(ext) if DOC_EXTENSIONS.contains(&ext) => "docs",
        _ => "code",
    }
}

/// Normalizes chunk text before hashing: trailing whitespace on each line
/// is insignificant to a span's semantic content, so it is stripped before
/// the hash is taken. This keeps `span_hash` stable across whitespace-only
/// edits while still changing on any textual edit.
fn normalize(text: &str) -> String {
    text.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turns one file's contents into the spans the differential reconciler
/// (`replace_spans`) expects, using the teacher's tree-sitter chunker for
/// known languages and falling back to fixed-size line chunks for
/// everything else (spec §6: "languages the parser does not know are
/// still ingested as whole-file spans").
pub fn file_to_spans(parser: &TSLanguageParsing, file_hash: &str, relative_path: &str, buffer: &str) -> Vec<NewSpan> {
    let extension = Path::new(relative_path)
        .extension()
        .and_then(|e| e.to_str());
    let language = extension
        .and_then(|ext| parser.for_file_extension(ext))
        .and_then(|config| config.get_language());
    let content_type = content_type_for(extension);

    let chunks = parser.chunk_file(relative_path, buffer, extension);
    let lines: Vec<&str> = buffer.lines().collect();

    if chunks.is_empty() {
        let normalized_text = normalize(buffer);
        let span_hash = compute_span_hash(file_hash, 0, lines.len() as i64, &normalized_text);
        return vec![NewSpan {
            span_hash,
            start_line: 0,
            end_line: lines.len() as i64,
            content_type: content_type.to_string(),
            language,
            symbol: None,
            normalized_text,
        }];
    }

    chunks
        .into_iter()
        .filter(|chunk| chunk.end > chunk.start)
        .map(|chunk| {
            let text = chunk
                .data
                .unwrap_or_else(|| lines[chunk.start..chunk.end.min(lines.len())].join("\n"));
            let normalized_text = normalize(&text);
            let span_hash = compute_span_hash(file_hash, chunk.start as i64, chunk.end as i64, &normalized_text);
            NewSpan {
                span_hash,
                start_line: chunk.start as i64,
                end_line: chunk.end as i64,
                content_type: content_type.to_string(),
                language: language.clone(),
                symbol: None,
                normalized_text,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reindexing_unchanged_file_yields_identical_hashes() {
        let parser = TSLanguageParsing::init();
        let buffer = "fn main() {\n    println!(\"hi\");\n}\n";
        let first = file_to_spans(&parser, "filehash", "src/main.rs", buffer);
        let second = file_to_spans(&parser, "filehash", "src/main.rs", buffer);
        assert_eq!(
            first.iter().map(|s| &s.span_hash).collect::<Vec<_>>(),
            second.iter().map(|s| &s.span_hash).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn markdown_files_are_classified_as_docs() {
        let parser = TSLanguageParsing::init();
        let spans = file_to_spans(&parser, "filehash", "README.md", "# Title\n\nSome text.\n");
        assert!(spans.iter().all(|s| s.content_type == "docs"));
    }
}
