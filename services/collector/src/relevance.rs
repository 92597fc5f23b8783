use std::path::{Path, PathBuf};

/// Name fragments that mark a file as expense/claims content.
const EXPENSE_KEYWORDS: &[&str] = &["despesas", "sinistros", "eventos"];

/// Tabular formats the parser knows how to read.
const TABULAR_EXTENSIONS: &[&str] = &["csv", "txt", "xlsx"];

/// True when the file name signals expense content and the extension is a
/// supported tabular format. Only the file name is inspected, never the
/// directories above it.
pub fn is_relevant(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return false;
    };

    let has_keyword = EXPENSE_KEYWORDS.iter().any(|k| name.contains(k));
    let tabular = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| TABULAR_EXTENSIONS.contains(&ext))
        .unwrap_or(false);

    has_keyword && tabular
}

/// Keep relevant paths, preserving input order.
pub fn filter_relevant(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths.iter().filter(|p| is_relevant(p)).cloned().collect()
}
