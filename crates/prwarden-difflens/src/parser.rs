use std::iter::Peekable;
use std::path::PathBuf;
use std::str::SplitInclusive;

use prwarden_core::{ChangeKind, DiffDocument, FileChange, Hunk, WardenError};

/// Parse a unified diff (as produced by `git diff`) into a [`DiffDocument`].
///
/// Every input byte ends up in the document: text before the first file goes
/// to the preamble, header lines to each file's header, hunk lines (including
/// `\ No newline at end of file` markers and `\r\n` endings) to the hunk text,
/// and whitespace-only lines after the last hunk to the trailer. The result of
/// [`DiffDocument::as_text`] is therefore identical to `input`.
///
/// Hunk bodies are checked against the line counts in their `@@` header. A
/// final hunk is allowed to miss exactly one trailing context line when the
/// input also lacks its final line terminator, which is what trimming
/// trailing whitespace does to a hunk ending in a blank line. Any other
/// shortfall is a cut-off diff.
///
/// # Errors
///
/// Returns [`WardenError::DiffUnavailable`] if a hunk header is malformed, a
/// hunk body does not match its header, or stray text follows a hunk.
///
/// # Examples
///
/// ```
/// use prwarden_difflens::parser::parse_unified_diff;
///
/// let diff = concat!(
///     "diff --git a/hello.rs b/hello.rs\n",
///     "--- a/hello.rs\n",
///     "+++ b/hello.rs\n",
///     "@@ -1,2 +1,3 @@\n",
///     " fn main() {\n",
///     "+    println!(\"hello\");\n",
///     " }\n",
/// );
/// let doc = parse_unified_diff(diff).unwrap();
/// assert_eq!(doc.files.len(), 1);
/// assert_eq!(doc.files[0].hunks.len(), 1);
/// assert_eq!(doc.as_text(), diff);
/// ```
pub fn parse_unified_diff(input: &str) -> Result<DiffDocument, WardenError> {
    let mut parser = Parser::default();
    let mut lines = input.split_inclusive('\n').peekable();
    while let Some(raw) = lines.next() {
        parser.feed(raw, &mut lines)?;
    }
    parser.finish()
}

#[derive(Default)]
struct Parser {
    doc: DiffDocument,
    file: Option<FileBuilder>,
    hunk: Option<OpenHunk>,
    /// Whitespace-only lines seen outside a hunk, placed once we know what follows.
    pending: String,
    line_no: usize,
}

struct FileBuilder {
    header: String,
    hunks: Vec<Hunk>,
    git_paths: Option<(PathBuf, PathBuf)>,
    old_path: Option<PathBuf>,
    new_path: Option<PathBuf>,
    rename_from: Option<PathBuf>,
    rename_to: Option<PathBuf>,
    new_file: bool,
    deleted_file: bool,
    binary: bool,
}

struct OpenHunk {
    hunk: Hunk,
    old_left: u32,
    new_left: u32,
}

impl OpenHunk {
    fn expects_more(&self) -> bool {
        self.old_left > 0 || self.new_left > 0
    }

    fn accept(&mut self, line: &str) -> bool {
        if line.starts_with('\\') {
            return true;
        }
        if line.is_empty() || line.starts_with(' ') {
            if self.old_left == 0 || self.new_left == 0 {
                return false;
            }
            self.old_left -= 1;
            self.new_left -= 1;
            return true;
        }
        if line.starts_with('-') && self.old_left > 0 {
            self.old_left -= 1;
            return true;
        }
        if line.starts_with('+') && self.new_left > 0 {
            self.new_left -= 1;
            return true;
        }
        false
    }
}

impl Parser {
    fn feed(
        &mut self,
        raw: &str,
        rest: &mut Peekable<SplitInclusive<'_, char>>,
    ) -> Result<(), WardenError> {
        self.line_no += 1;
        let line = raw.trim_end_matches(['\n', '\r']);

        if let Some(open) = self.hunk.as_mut() {
            if open.expects_more() {
                if open.accept(line) {
                    open.hunk.text.push_str(raw);
                    return Ok(());
                }
                return Err(self.malformed("hunk body does not match its header"));
            }
            if line.starts_with('\\') {
                open.hunk.text.push_str(raw);
                return Ok(());
            }
            self.close_hunk();
        }

        if line.trim().is_empty() {
            if self.file.is_none() {
                self.doc.preamble.push_str(raw);
            } else {
                self.pending.push_str(raw);
            }
            return Ok(());
        }

        let next_is_new_path = rest.peek().is_some_and(|n| n.starts_with("+++ "));

        if line.starts_with("diff --git ") || (line.starts_with("--- ") && next_is_new_path) {
            let starts_new = match self.file.as_ref() {
                None => true,
                Some(f) => line.starts_with("diff --git ") || !f.hunks.is_empty(),
            };
            if starts_new {
                self.close_file()?;
                let mut builder = FileBuilder::new(std::mem::take(&mut self.pending));
                if let Some(rest) = line.strip_prefix("diff --git ") {
                    builder.git_paths = parse_git_paths(rest);
                }
                self.file = Some(builder);
            }
        }

        let Some(file) = self.file.as_mut() else {
            self.doc.preamble.push_str(raw);
            return Ok(());
        };

        if line.starts_with("@@") {
            let (old_start, old_lines, new_start, new_lines) = parse_hunk_header(line)
                .map_err(|reason| malformed_at(self.line_no, &reason))?;
            let mut text = std::mem::take(&mut self.pending);
            text.push_str(raw);
            self.hunk = Some(OpenHunk {
                hunk: Hunk {
                    old_start,
                    old_lines,
                    new_start,
                    new_lines,
                    text,
                },
                old_left: old_lines,
                new_left: new_lines,
            });
            return Ok(());
        }

        if !file.hunks.is_empty() {
            return Err(self.malformed("unexpected text after hunk"));
        }

        file.header.push_str(&self.pending);
        self.pending.clear();
        file.header.push_str(raw);
        file.observe_header_line(line);
        Ok(())
    }

    fn close_hunk(&mut self) {
        if let Some(open) = self.hunk.take() {
            if let Some(file) = self.file.as_mut() {
                file.hunks.push(open.hunk);
            }
        }
    }

    fn close_file(&mut self) -> Result<(), WardenError> {
        self.close_hunk();
        if let Some(builder) = self.file.take() {
            let change = builder
                .build()
                .ok_or_else(|| self.malformed("file entry without a path"))?;
            self.doc.files.push(change);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<DiffDocument, WardenError> {
        if let Some(open) = self.hunk.as_ref() {
            // Trimming trailing whitespace drops a final blank context line
            // together with the line terminator before it.
            let trimmed_blank_context = open.old_left == 1
                && open.new_left == 1
                && !open.hunk.text.ends_with('\n');
            if open.expects_more() && !trimmed_blank_context {
                return Err(self.malformed("diff ends inside a hunk"));
            }
        }
        self.close_file()?;
        self.doc.trailer = std::mem::take(&mut self.pending);
        Ok(self.doc)
    }

    fn malformed(&self, reason: &str) -> WardenError {
        malformed_at(self.line_no, reason)
    }
}

fn malformed_at(line_no: usize, reason: &str) -> WardenError {
    WardenError::DiffUnavailable(format!("malformed diff at line {line_no}: {reason}"))
}

impl FileBuilder {
    fn new(header: String) -> Self {
        Self {
            header,
            hunks: Vec::new(),
            git_paths: None,
            old_path: None,
            new_path: None,
            rename_from: None,
            rename_to: None,
            new_file: false,
            deleted_file: false,
            binary: false,
        }
    }

    fn observe_header_line(&mut self, line: &str) {
        if line.starts_with("new file mode") {
            self.new_file = true;
        } else if line.starts_with("deleted file mode") {
            self.deleted_file = true;
        } else if let Some(path) = line.strip_prefix("rename from ") {
            self.rename_from = Some(PathBuf::from(unquote(path)));
        } else if let Some(path) = line.strip_prefix("rename to ") {
            self.rename_to = Some(PathBuf::from(unquote(path)));
        } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            self.binary = true;
        } else if let Some(path) = line.strip_prefix("--- ") {
            self.old_path = parse_path(path);
            if self.old_path.is_none() {
                self.new_file = true;
            }
        } else if let Some(path) = line.strip_prefix("+++ ") {
            self.new_path = parse_path(path);
            if self.new_path.is_none() {
                self.deleted_file = true;
            }
        }
    }

    fn build(self) -> Option<FileChange> {
        let (git_old, git_new) = match self.git_paths {
            Some((old, new)) => (Some(old), Some(new)),
            None => (None, None),
        };
        let old = self.rename_from.or(self.old_path).or(git_old);
        let new = self.rename_to.or(self.new_path).or(git_new);

        let kind = if self.new_file {
            ChangeKind::Added
        } else if self.deleted_file {
            ChangeKind::Deleted
        } else if old.is_some() && new.is_some() && old != new {
            ChangeKind::Renamed
        } else {
            ChangeKind::Modified
        };

        let (path, old_path) = match kind {
            ChangeKind::Deleted => (old.or(new)?, None),
            ChangeKind::Renamed => (new?, old),
            _ => (new.or(old)?, None),
        };

        Some(FileChange {
            path,
            old_path,
            kind,
            header: self.header,
            hunks: self.hunks,
            binary: self.binary,
        })
    }
}

/// Split the `a/<old> b/<new>` part of a `diff --git` line.
fn parse_git_paths(rest: &str) -> Option<(PathBuf, PathBuf)> {
    let rest = rest.trim_end();
    if let Some(stripped) = rest.strip_prefix('"') {
        let (old, new) = stripped.split_once("\" ")?;
        return Some((strip_side(old), strip_side(unquote(new))));
    }
    let (old, new) = rest.rsplit_once(" b/")?;
    Some((strip_side(old), PathBuf::from(new)))
}

fn strip_side(raw: &str) -> PathBuf {
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    PathBuf::from(stripped)
}

fn unquote(raw: &str) -> &str {
    raw.trim().trim_matches('"')
}

/// Path from a `---`/`+++` line; `None` for `/dev/null`.
fn parse_path(raw: &str) -> Option<PathBuf> {
    // Some tools append a tab and a timestamp after the path.
    let raw = raw.split('\t').next().unwrap_or(raw);
    let normalized = unquote(raw);
    if normalized == "/dev/null" {
        return None;
    }
    Some(strip_side(normalized))
}

fn parse_hunk_header(line: &str) -> Result<(u32, u32, u32, u32), String> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| format!("invalid hunk header: {line}"))?;

    let parts: Vec<&str> = inner.split(' ').collect();
    if parts.len() != 2 {
        return Err(format!("invalid hunk header: {line}"));
    }

    let old = parts[0]
        .strip_prefix('-')
        .ok_or_else(|| format!("invalid old range in hunk: {line}"))?;
    let new = parts[1]
        .strip_prefix('+')
        .ok_or_else(|| format!("invalid new range in hunk: {line}"))?;

    let (old_start, old_lines) = parse_range(old, line)?;
    let (new_start, new_lines) = parse_range(new, line)?;

    Ok((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), String> {
    if let Some((start, count)) = range.split_once(',') {
        let s = start
            .parse()
            .map_err(|_| format!("invalid range number in: {context}"))?;
        let c = count
            .parse()
            .map_err(|_| format!("invalid range count in: {context}"))?;
        Ok((s, c))
    } else {
        let s = range
            .parse()
            .map_err(|_| format!("invalid range number in: {context}"))?;
        Ok((s, 1))
    }
}
