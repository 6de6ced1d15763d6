//! Code chunking for embedding generation
//!
//! Splits source files into retrievable chunks. Structured source yields one chunk per
//! function or class definition (nested ones included); everything else, and any
//! structured file that fails to parse, is cut into fixed-size character windows.

use super::error::RetrievalError;
use super::tree_sitter_parser::{extract_definitions, parse_source, Definition, SupportedLanguage};
use super::{Chunk, ChunkKind, LineSpan, SourceFile};
use std::path::Path;

pub const DEFAULT_MAX_WINDOW_SIZE: usize = 1000;

/// Soft-failure signal: a structured file did not parse and was windowed instead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRecoveryApplied {
    pub source_path: String,
    pub reason: String,
}

/// Chunks plus any parse recoveries from one chunking pass
#[derive(Debug, Clone, Default)]
pub struct ChunkReport {
    pub chunks: Vec<Chunk>,
    pub recoveries: Vec<ParseRecoveryApplied>,
}

/// Chunk a set of files, in input order
pub fn chunk_files(files: &[SourceFile], max_window_size: usize) -> Result<Vec<Chunk>, RetrievalError> {
    chunk_files_with_diagnostics(files, max_window_size).map(|report| report.chunks)
}

/// Chunk a set of files and report which ones fell back to windowing after a parse failure
pub fn chunk_files_with_diagnostics(
    files: &[SourceFile],
    max_window_size: usize,
) -> Result<ChunkReport, RetrievalError> {
    validate_window_size(max_window_size)?;

    let mut report = ChunkReport::default();
    for file in files {
        let (chunks, recovery) = chunk_file(file, max_window_size);
        log::debug!("Chunked {} into {} chunks", file.path, chunks.len());
        report.chunks.extend(chunks);
        if let Some(recovery) = recovery {
            log::warn!(
                "Parse recovery applied for {}: {}; using text windows",
                recovery.source_path,
                recovery.reason
            );
            report.recoveries.push(recovery);
        }
    }

    Ok(report)
}

/// Chunk one file's content
///
/// Uses tree-sitter when the language is supported, falling back to text windows
/// for unsupported languages, parse failures, or files with no definitions.
/// `max_window_size` must already be validated as positive.
pub fn chunk_file(file: &SourceFile, max_window_size: usize) -> (Vec<Chunk>, Option<ParseRecoveryApplied>) {
    if file.content.is_empty() {
        return (vec![], None);
    }

    let mut recovery = None;
    if let Some(language) = detect_supported_language(&file.path) {
        match parse_source(&file.content, language) {
            Ok(parsed) => {
                let chunks: Vec<Chunk> = extract_definitions(&parsed)
                    .into_iter()
                    .map(|definition| definition_chunk(file, language, definition))
                    .collect();
                if !chunks.is_empty() {
                    return (chunks, None);
                }
            }
            Err(failure) => {
                recovery = Some(ParseRecoveryApplied {
                    source_path: file.path.clone(),
                    reason: failure.to_string(),
                });
            }
        }
    }

    (chunk_text_windows(file, max_window_size), recovery)
}

fn definition_chunk(file: &SourceFile, language: SupportedLanguage, definition: Definition) -> Chunk {
    let (kind, span) = match definition {
        Definition::Function(span) => (ChunkKind::Function, span),
        Definition::Class(span) => (ChunkKind::Class, span),
    };

    Chunk {
        source_path: file.path.clone(),
        kind,
        name: span.name,
        content: span.content,
        sequence_index: None,
        lines: Some(LineSpan {
            start_line: (span.start_line + 1) as u32, // Convert to 1-indexed
            end_line: (span.end_line + 1) as u32,
        }),
        language: Some(language.name().to_string()),
        last_modified: file.last_modified,
    }
}

/// Split content into consecutive, non-overlapping windows of `max_window_size` characters
fn chunk_text_windows(file: &SourceFile, max_window_size: usize) -> Vec<Chunk> {
    let language = detect_language(&file.path);
    let window = |content: &str, sequence_index: Option<usize>| Chunk {
        source_path: file.path.clone(),
        kind: ChunkKind::TextWindow,
        name: None,
        content: content.to_string(),
        sequence_index,
        lines: None,
        language: language.clone(),
        last_modified: file.last_modified,
    };

    let content = file.content.as_str();
    if content.chars().count() <= max_window_size {
        return vec![window(content, None)];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut taken = 0;
    for (offset, _) in content.char_indices() {
        if taken == max_window_size {
            chunks.push(window(&content[start..offset], Some(chunks.len())));
            start = offset;
            taken = 0;
        }
        taken += 1;
    }
    chunks.push(window(&content[start..], Some(chunks.len())));

    chunks
}

fn validate_window_size(max_window_size: usize) -> Result<(), RetrievalError> {
    if max_window_size == 0 {
        return Err(RetrievalError::InvalidConfiguration(
            "max_window_size must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

/// Detect if a file has a language supported by tree-sitter
fn detect_supported_language(file_path: &str) -> Option<SupportedLanguage> {
    let path = Path::new(file_path);
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(SupportedLanguage::from_extension)
}

/// Detect language from file extension
fn detect_language(file_path: &str) -> Option<String> {
    let path = Path::new(file_path);
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| match ext.to_lowercase().as_str() {
            "rs" => "rust".to_string(),
            "ts" | "tsx" => "typescript".to_string(),
            "js" | "jsx" | "mjs" | "cjs" => "javascript".to_string(),
            "py" => "python".to_string(),
            "go" => "go".to_string(),
            "java" => "java".to_string(),
            "c" | "h" => "c".to_string(),
            "cpp" | "hpp" | "cc" | "cxx" => "cpp".to_string(),
            "rb" => "ruby".to_string(),
            "sh" | "bash" | "zsh" => "shell".to_string(),
            "yaml" | "yml" => "yaml".to_string(),
            "md" => "markdown".to_string(),
            other => other.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn file(path: &str, content: &str) -> SourceFile {
        SourceFile::new(path, content, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    fn reassemble(chunks: &[Chunk]) -> String {
        let mut windows: Vec<&Chunk> = chunks.iter().filter(|c| c.kind == ChunkKind::TextWindow).collect();
        windows.sort_by_key(|c| c.sequence_index.unwrap_or(0));
        windows.iter().map(|c| c.content.as_str()).collect()
    }

    #[test]
    fn test_chunk_small_file() {
        let chunks = chunk_files(&[file("notes.txt", "line 1\nline 2\nline 3")], 1000).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::TextWindow);
        assert_eq!(chunks[0].sequence_index, None);
        assert_eq!(chunks[0].content, "line 1\nline 2\nline 3");
        assert_eq!(chunks[0].language, Some("txt".to_string()));
    }

    #[test]
    fn test_window_boundary_at_exact_size() {
        let exact = "a".repeat(1000);
        let chunks = chunk_files(&[file("data.txt", &exact)], 1000).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence_index, None);

        let over = "a".repeat(1001);
        let chunks = chunk_files(&[file("data.txt", &over)], 1000).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content.len(), 1000);
        assert_eq!(chunks[1].content.len(), 1);
        assert_eq!(chunks[0].sequence_index, Some(0));
        assert_eq!(chunks[1].sequence_index, Some(1));
    }

    #[test]
    fn test_windows_reassemble_exactly() {
        let content: String = (0..257).map(|i| format!("row {} ✓\n", i)).collect();
        let chunks = chunk_files(&[file("log.md", &content)], 97).unwrap();

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 97));
        assert_eq!(reassemble(&chunks), content);
    }

    #[test]
    fn test_windows_count_characters_not_bytes() {
        let content = "ééééé";
        let chunks = chunk_files(&[file("accents.txt", content)], 2).unwrap();

        let parts: Vec<_> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(parts, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_zero_window_is_invalid_configuration() {
        let err = chunk_files(&[file("a.txt", "abc")], 0).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_chunk_rust_with_tree_sitter() {
        let content = r#"
fn foo() {
    println!("foo");
}

fn bar() {
    println!("bar");
}

struct MyStruct {
    field: i32,
}
"#;
        let chunks = chunk_files(&[file("src/lib.rs", content)], 1000).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].kind, ChunkKind::Function);
        assert_eq!(chunks[0].name.as_deref(), Some("foo"));
        assert_eq!(chunks[0].lines, Some(LineSpan { start_line: 2, end_line: 4 }));
        assert_eq!(chunks[1].name.as_deref(), Some("bar"));
        assert_eq!(chunks[2].kind, ChunkKind::Class);
        assert_eq!(chunks[2].name.as_deref(), Some("MyStruct"));
        assert_eq!(chunks[0].language, Some("rust".to_string()));
        assert!(chunks.iter().all(|c| c.sequence_index.is_none()));
    }

    #[test]
    fn test_nested_python_functions_are_independent_chunks() {
        let content = "def outer():\n    def inner():\n        return 1\n    return inner()\n";
        let chunks = chunk_files(&[file("nested.py", content)], 1000).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].name.as_deref(), Some("outer"));
        assert_eq!(chunks[0].lines, Some(LineSpan { start_line: 1, end_line: 4 }));
        assert_eq!(chunks[0].content, content.trim_end());
        assert_eq!(chunks[1].name.as_deref(), Some("inner"));
        assert_eq!(chunks[1].lines, Some(LineSpan { start_line: 2, end_line: 3 }));
        assert_eq!(chunks[1].content, "    def inner():\n        return 1");
    }

    #[test]
    fn test_syntax_error_falls_back_to_windows() {
        let content = "def broken(:\n    return 1\n";
        let report = chunk_files_with_diagnostics(&[file("broken.py", content)], 1000).unwrap();

        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.chunks[0].kind, ChunkKind::TextWindow);
        assert_eq!(report.chunks[0].content, content);
        assert_eq!(report.recoveries.len(), 1);
        assert_eq!(report.recoveries[0].source_path, "broken.py");
        assert!(report.recoveries[0].reason.contains("syntax error"));
    }

    #[test]
    fn test_bad_file_does_not_abort_pass() {
        let files = vec![
            file("broken.py", "class (:\n"),
            file("ok.py", "def fine():\n    return 2\n"),
        ];
        let report = chunk_files_with_diagnostics(&files, 1000).unwrap();

        assert_eq!(report.chunks.len(), 2);
        assert_eq!(report.chunks[0].source_path, "broken.py");
        assert_eq!(report.chunks[1].name.as_deref(), Some("fine"));
        assert_eq!(report.recoveries.len(), 1);
    }

    #[test]
    fn test_structured_file_without_definitions_is_windowed() {
        let content = "import os\nprint(os.getcwd())\n";
        let report = chunk_files_with_diagnostics(&[file("script.py", content)], 1000).unwrap();

        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.chunks[0].kind, ChunkKind::TextWindow);
        assert!(report.recoveries.is_empty());
    }

    #[test]
    fn test_chunk_empty_file() {
        let chunks = chunk_files(&[file("test.rs", "")], 1000).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunks_carry_last_modified() {
        let source = file("a.go", "package main\n\nfunc Main() {}\n");
        let chunks = chunk_files(&[source.clone()], 1000).unwrap();
        assert_eq!(chunks[0].last_modified, source.last_modified);
        assert_eq!(chunks[0].source_path, "a.go");
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("foo.rs"), Some("rust".to_string()));
        assert_eq!(detect_language("bar.ts"), Some("typescript".to_string()));
        assert_eq!(detect_language("baz.py"), Some("python".to_string()));
        assert_eq!(detect_language("Makefile"), None);
    }

    #[test]
    fn test_detect_supported_language() {
        assert_eq!(detect_supported_language("test.rs"), Some(SupportedLanguage::Rust));
        assert_eq!(detect_supported_language("test.tsx"), Some(SupportedLanguage::Tsx));
        assert_eq!(detect_supported_language("test.py"), Some(SupportedLanguage::Python));
        assert_eq!(detect_supported_language("test.txt"), None);
        assert_eq!(detect_supported_language("test.java"), None);
    }
}
