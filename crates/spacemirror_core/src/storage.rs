use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use percent_encoding::percent_decode_str;

/// Map a web-relative path (`/spaces/KEY/pages/1/Title`,
/// `/download/attachments/1/file%20name.png`) to its file under `data_dir`.
///
/// Page and overview routes get an `.html` suffix. Only the final segment is
/// percent-decoded. Parent directories are created before returning.
pub fn resolve(data_dir: &Path, web_path: &str) -> Result<PathBuf> {
    let local = local_path(data_dir, web_path)?;
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(local)
}

/// Pure half of [`resolve`]: no directories are touched.
pub fn local_path(data_dir: &Path, web_path: &str) -> Result<PathBuf> {
    let mut web_path = web_path.to_string();
    if is_page_route(&web_path) {
        web_path.push_str(".html");
    }

    let trimmed = web_path.trim_start_matches('/');
    let (directory, file_name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
    let file_name = percent_decode_str(file_name).decode_utf8_lossy();
    validate_file_name(&file_name, &web_path)?;

    let mut local = data_dir.to_path_buf();
    for segment in directory.split('/') {
        match segment {
            "" | "." => {}
            ".." => bail!("web path escapes the mirror directory: {web_path}"),
            segment => local.push(segment),
        }
    }
    local.push(file_name.as_ref());
    Ok(local)
}

fn is_page_route(web_path: &str) -> bool {
    web_path.contains("/pages/") || web_path.contains("/overview")
}

fn validate_file_name(file_name: &str, web_path: &str) -> Result<()> {
    if file_name.is_empty() || file_name == "." || file_name == ".." {
        bail!("web path has no usable file name: {web_path}");
    }
    if file_name.contains('/') || file_name.contains('\\') {
        bail!("decoded file name contains a path separator: {web_path}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_routes_get_html_suffix_and_parents() {
        let temp = tempdir().expect("tempdir");
        let path = resolve(temp.path(), "/spaces/DOC/pages/123/Getting+Started").expect("resolve");
        assert_eq!(
            path,
            temp.path()
                .join("spaces/DOC/pages/123")
                .join("Getting+Started.html")
        );
        assert!(temp.path().join("spaces/DOC/pages/123").is_dir());
        assert!(!path.exists());
    }

    #[test]
    fn overview_routes_get_html_suffix() {
        let temp = tempdir().expect("tempdir");
        let path = resolve(temp.path(), "/spaces/DOC/overview").expect("resolve");
        assert_eq!(path, temp.path().join("spaces/DOC/overview.html"));
    }

    #[test]
    fn only_final_segment_is_decoded() {
        let temp = tempdir().expect("tempdir");
        let path = resolve(temp.path(), "/download/attachments/12%2034/my%20file%C3%A9.png")
            .expect("resolve");
        assert_eq!(
            path,
            temp.path()
                .join("download/attachments/12%2034")
                .join("my file\u{e9}.png")
        );
    }

    #[test]
    fn other_paths_are_kept_verbatim() {
        let temp = tempdir().expect("tempdir");
        let path = resolve(temp.path(), "/spaces/DOC/index.html").expect("resolve");
        assert_eq!(path, temp.path().join("spaces/DOC/index.html"));
    }

    #[test]
    fn resolve_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let first = resolve(temp.path(), "/download/attachments/1/a.png").expect("first");
        let second = resolve(temp.path(), "/download/attachments/1/a.png").expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn parent_segments_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let error = resolve(temp.path(), "/download/../../etc/passwd").expect_err("must fail");
        assert!(error.to_string().contains("escapes"));
    }

    #[test]
    fn encoded_separators_in_file_name_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let error =
            resolve(temp.path(), "/download/attachments/1/..%2F..%2Fsecret").expect_err("must fail");
        assert!(error.to_string().contains("path separator"));
        assert!(resolve(temp.path(), "/download/attachments/1/%2E%2E").is_err());
    }
}
