use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Every PDF under `root`, sorted so extraction order is stable.
/// Hidden files and ignore-file rules are honoured via the `ignore` walker.
pub fn walk_pdfs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    let walker = WalkBuilder::new(root)
        .standard_filters(true)
        .git_ignore(false)
        .build();

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if is_pdf(entry.path()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Name of the directory directly containing `path`, used as the country folder.
pub fn parent_dir_name(path: &Path) -> Option<&str> {
    path.parent()?.file_name()?.to_str()
}
