use crate::markup::{escape_attr, escape_text};
use crate::tree::ContentTree;

/// Nested `<ul>` lists for the whole tree, starting at the root.
pub fn render_toc(tree: &ContentTree) -> String {
    let mut out = String::new();
    render_level(tree, None, &mut out);
    out
}

fn render_level(tree: &ContentTree, parent: Option<&str>, out: &mut String) {
    let children = tree.children_of(parent);
    if children.is_empty() {
        return;
    }
    out.push_str("<ul>");
    for child in children {
        out.push_str("<li><a href=\"");
        out.push_str(&escape_attr(&child.link));
        out.push_str("\">");
        out.push_str(&escape_text(&child.title));
        out.push_str("</a>");
        render_level(tree, Some(&child.id), out);
        out.push_str("</li>");
    }
    out.push_str("</ul>");
}

/// The standalone `spaces/<key>/index.html` document.
pub fn render_index(tree: &ContentTree) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Content</title>\n</head>\n<body>\n<h1>Content</h1>\n{}\n</body>\n</html>\n",
        render_toc(tree)
    )
}
