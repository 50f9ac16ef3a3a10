//! Diff chunking for analysis requests.
//!
//! Files are packed into chunks in diff order until adding the next one
//! would cross the byte limit. A file that alone exceeds the limit is split
//! at hunk boundaries, and every part repeats the file header so the
//! analysis service always knows which file it is looking at. Hunk text is
//! never split.

use std::path::{Path, PathBuf};

use prwarden_core::FileChange;

/// A bounded slice of the diff submitted as one analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk in diff order.
    pub index: usize,
    /// Files whose content appears in this chunk, in diff order.
    pub files: Vec<PathBuf>,
    /// Raw unified-diff text sent to the service.
    pub text: String,
}

#[derive(Default)]
struct Pending {
    files: Vec<PathBuf>,
    text: String,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn add_file(&mut self, path: &Path) {
        if self.files.last().map(PathBuf::as_path) != Some(path) {
            self.files.push(path.to_path_buf());
        }
    }
}

struct Chunker {
    max_bytes: usize,
    chunks: Vec<Chunk>,
    pending: Pending,
}

impl Chunker {
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let Pending { files, text } = std::mem::take(&mut self.pending);
        self.chunks.push(Chunk {
            index: self.chunks.len(),
            files,
            text,
        });
    }

    fn push_file(&mut self, file: &FileChange) {
        let len = file.byte_len();
        if len <= self.max_bytes {
            if self.pending.text.len() + len > self.max_bytes {
                self.flush();
            }
            self.pending.add_file(&file.path);
            file.write_text(&mut self.pending.text);
            return;
        }

        self.flush();
        let mut hunks_in_part = 0;
        for hunk in &file.hunks {
            if hunks_in_part > 0 && self.pending.text.len() + hunk.text.len() > self.max_bytes {
                self.flush();
                hunks_in_part = 0;
            }
            if hunks_in_part == 0 {
                self.pending.add_file(&file.path);
                self.pending.text.push_str(&file.header);
            }
            self.pending.text.push_str(&hunk.text);
            hunks_in_part += 1;
        }
        self.flush();
    }
}

/// Partition `files` into chunks of at most `max_bytes` each.
///
/// The limit is exceeded only by a single hunk that is larger than the
/// limit on its own (plus its file header); such a hunk becomes a chunk by
/// itself. Chunk indices follow diff order.
///
/// # Examples
///
/// ```
/// use prwarden_core::{ChangeKind, FileChange, Hunk};
/// use prwarden_review::chunk::build_chunks;
/// use std::path::PathBuf;
///
/// let file = FileChange {
///     path: PathBuf::from("a.py"),
///     old_path: None,
///     kind: ChangeKind::Modified,
///     header: "--- a/a.py\n+++ b/a.py\n".into(),
///     hunks: vec![Hunk {
///         old_start: 1,
///         old_lines: 1,
///         new_start: 1,
///         new_lines: 1,
///         text: "@@ -1 +1 @@\n-x\n+y\n".into(),
///     }],
///     binary: false,
/// };
/// let chunks = build_chunks(&[&file], 48_000);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].files, vec![PathBuf::from("a.py")]);
/// ```
pub fn build_chunks(files: &[&FileChange], max_bytes: usize) -> Vec<Chunk> {
    let mut chunker = Chunker {
        max_bytes: max_bytes.max(1),
        chunks: Vec::new(),
        pending: Pending::default(),
    };
    for file in files {
        chunker.push_file(file);
    }
    chunker.flush();
    chunker.chunks
}
