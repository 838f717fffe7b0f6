// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

/// Content classification derived from a blob's bytes and path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
	pub mime_type: String,
	pub is_binary: bool,
	/// Only set when the full content was inspected and it is text.
	pub line_count: Option<i64>,
}

/// A NUL byte in the sampled prefix marks the content as binary.
pub fn is_binary(sample: &[u8]) -> bool {
	sample.contains(&0)
}

pub fn extension(path: &str) -> Option<String> {
	let name = path.rsplit('/').next()?;
	let (stem, ext) = name.rsplit_once('.')?;
	if stem.is_empty() || ext.is_empty() {
		return None;
	}
	Some(ext.to_ascii_lowercase())
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
	let mime = match ext {
		"rs" | "c" | "h" | "cpp" | "hpp" | "go" | "java" | "kt" | "py" | "rb" | "sh" => "text/x-source",
		"js" | "mjs" => "text/javascript",
		"ts" | "tsx" | "jsx" => "text/x-source",
		"html" | "htm" => "text/html",
		"css" => "text/css",
		"md" | "markdown" => "text/markdown",
		"txt" | "text" | "log" => "text/plain",
		"json" => "application/json",
		"yaml" | "yml" => "application/yaml",
		"toml" => "application/toml",
		"xml" => "application/xml",
		"csv" => "text/csv",
		"pdf" => "application/pdf",
		"png" => "image/png",
		"jpg" | "jpeg" => "image/jpeg",
		"gif" => "image/gif",
		"svg" => "image/svg+xml",
		"webp" => "image/webp",
		"ico" => "image/x-icon",
		"mp3" => "audio/mpeg",
		"mp4" => "video/mp4",
		"zip" => "application/zip",
		"gz" | "tgz" => "application/gzip",
		"tar" => "application/x-tar",
		"wasm" => "application/wasm",
		"woff" => "font/woff",
		"woff2" => "font/woff2",
		_ => return None,
	};
	Some(mime)
}

fn count_lines(content: &[u8]) -> i64 {
	if content.is_empty() {
		return 0;
	}
	let newlines = content.iter().filter(|b| **b == b'\n').count() as i64;
	if content.ends_with(b"\n") {
		newlines
	} else {
		newlines + 1
	}
}

/// Classify a blob from its path and a byte sample.
///
/// `full_content` tells whether `sample` is the complete blob; line counts are
/// only reported in that case, since a count over a prefix would be wrong.
pub fn classify(path: &str, sample: &[u8], full_content: bool) -> Classification {
	let binary = is_binary(sample);
	let mime_type = extension(path)
		.and_then(|ext| mime_for_extension(&ext))
		.unwrap_or(if binary {
			"application/octet-stream"
		} else {
			"text/plain"
		})
		.to_string();

	let line_count = if full_content && !binary {
		Some(count_lines(sample))
	} else {
		None
	};

	Classification {
		mime_type,
		is_binary: binary,
		line_count,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_text_file_full_content() {
		let c = classify("src/main.rs", b"fn main() {}\n", true);
		assert_eq!(c.mime_type, "text/x-source");
		assert!(!c.is_binary);
		assert_eq!(c.line_count, Some(1));
	}

	#[test]
	fn test_missing_trailing_newline_counts_last_line() {
		let c = classify("notes.txt", b"one\ntwo", true);
		assert_eq!(c.line_count, Some(2));
	}

	#[test]
	fn test_empty_file_has_zero_lines() {
		let c = classify("empty.txt", b"", true);
		assert_eq!(c.line_count, Some(0));
	}

	#[test]
	fn test_binary_detected_by_nul() {
		let c = classify("logo.png", &[0x89, b'P', b'N', b'G', 0x00, 0x1a], true);
		assert!(c.is_binary);
		assert_eq!(c.mime_type, "image/png");
		assert_eq!(c.line_count, None);
	}

	#[test]
	fn test_sampled_content_never_reports_lines() {
		let c = classify("big.csv", b"a,b,c\n1,2,3\n", false);
		assert!(!c.is_binary);
		assert_eq!(c.line_count, None);
	}

	#[test]
	fn test_unknown_extension_falls_back() {
		assert_eq!(classify("a.xyz", b"hello", true).mime_type, "text/plain");
		assert_eq!(
			classify("a.xyz", &[0x00, 0x01], true).mime_type,
			"application/octet-stream"
		);
	}

	#[test]
	fn test_extension_parsing() {
		assert_eq!(extension("src/lib.rs"), Some("rs".to_string()));
		assert_eq!(extension("Makefile"), None);
		assert_eq!(extension(".gitignore"), None);
		assert_eq!(extension("archive.tar.GZ"), Some("gz".to_string()));
	}
}
