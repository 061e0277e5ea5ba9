
use fancy_regex::Regex;
use std::sync::LazyLock;

static LATEX_WITH_ARGUMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[a-zA-Z]+\{[^}]*\}").expect("valid regex"));

static LATEX_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[a-zA-Z]+").expect("valid regex"));

static DISALLOWED_CHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s\.,!?;:\-]").expect("valid regex"));

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize an abstract for chunking and embedding.
///
/// Drops LaTeX commands (with a braced argument first, then bare), replaces
/// everything but ASCII letters, digits, whitespace and `. , ! ? ; : -` with a
/// space, then collapses whitespace runs and trims.
#[inline]
pub fn clean_text(text: &str) -> String {
    let text = LATEX_WITH_ARGUMENT.replace_all(text, "");
    let text = LATEX_COMMAND.replace_all(&text, "");
    let text = DISALLOWED_CHARACTERS.replace_all(&text, " ");
    let text = WHITESPACE_RUN.replace_all(&text, " ");
    text.trim().to_string()
}

/// Collapse internal whitespace, e.g. in titles that span several lines
#[inline]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
