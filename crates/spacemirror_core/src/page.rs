//! Standalone page rendering.
//!
//! A page body is parsed once and run through independent passes, each
//! returning a new tree: hyperlinks, images, and removal of head-only
//! elements. The passes match disjoint element kinds, so their order does
//! not change the result.

use percent_encoding::percent_decode_str;

use crate::client::ContentItem;
use crate::markup::{Element, Node, escape_attr, escape_text, parse_fragment};

const WIKI_ROOT: &str = "/wiki/";
const THUMBNAILS_SEGMENT: &str = "/thumbnails/";

const MACRO_STYLE: &str = "[data-macro-name] {\n  min-height: 20px;\n  border: 1px solid red;\n  padding: 5px;\n}\n[data-macro-name]::before {\n  content: \"Macro\";\n  font-family: monospace;\n  color: red;\n}";

/// An attachment as listed at the bottom of its page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLink {
    pub title: String,
    /// Web-relative, query stripped, still percent-encoded.
    pub download_path: String,
}

/// `"../"` once per directory between the page file and the data root.
pub fn relative_prefix(webui: &str) -> String {
    "../".repeat(page_depth(webui))
}

pub fn page_depth(webui: &str) -> usize {
    webui.matches('/').count().saturating_sub(1)
}

pub fn render_page(space_key: &str, item: &ContentItem, attachments: &[AttachmentLink]) -> String {
    let prefix = relative_prefix(item.webui());
    let body = rewrite_body(item.markup(), &prefix);
    let title = escape_text(&item.title);

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n{MACRO_STYLE}\n</style>\n</head>\n<body>\n{breadcrumb}\n<h1>{title}</h1>\n{body}\n{attachments}\n</body>\n</html>\n",
        breadcrumb = render_breadcrumb(space_key, item, &prefix),
        attachments = render_attachments(attachments, &prefix),
    )
}

pub fn rewrite_body(markup: &str, prefix: &str) -> String {
    let links = |element: Element| Some(Node::Element(rewrite_anchor(element, prefix)));
    let images = |element: Element| rewrite_image(element, prefix);

    parse_fragment(markup)
        .rewrite(&links)
        .rewrite(&images)
        .rewrite(&strip_head_elements)
        .inner_html()
}

fn rewrite_anchor(element: Element, prefix: &str) -> Element {
    if element.tag != "a" {
        return element;
    }
    let Some(target) = element.attr("href").and_then(|href| href.strip_prefix(WIKI_ROOT)) else {
        return element;
    };
    let rewritten = local_page_target(target, prefix);
    element.with_attr("href", rewritten)
}

/// Map the part of a link after `/wiki/` onto the mirrored file.
///
/// Attachment downloads are stored under their own names; everything else
/// is a page and gains `.html` ahead of any query or fragment.
fn local_page_target(target: &str, prefix: &str) -> String {
    if target.starts_with("download/") {
        return format!("{prefix}{target}");
    }
    let split = target.find(['?', '#']).unwrap_or(target.len());
    let (path, tail) = target.split_at(split);
    format!("{prefix}{path}.html{tail}")
}

fn rewrite_image(element: Element, prefix: &str) -> Option<Node> {
    if element.tag != "img" {
        return Some(Node::Element(element));
    }
    if let Some(label) = element
        .attr("data-emoji-fallback")
        .filter(|label| !label.is_empty())
    {
        return Some(Node::Element(Element::new("span").with_text(label)));
    }

    let Some(src) = element.attr("src").map(str::to_string) else {
        return Some(Node::Element(element));
    };
    if let Some((_, attachment)) = src.split_once(THUMBNAILS_SEGMENT) {
        let full = format!("{prefix}download/attachments/{attachment}");
        return Some(Node::Element(
            element.with_attr("src", full).without_attr("srcset"),
        ));
    }
    if let Some(rest) = src.strip_prefix(WIKI_ROOT) {
        return Some(Node::Element(element.with_attr("src", format!("{prefix}{rest}"))));
    }
    Some(Node::Element(element))
}

fn strip_head_elements(element: Element) -> Option<Node> {
    match element.tag.as_str() {
        "title" | "base" => None,
        _ => Some(Node::Element(element)),
    }
}

fn render_breadcrumb(space_key: &str, item: &ContentItem, prefix: &str) -> String {
    let mut crumbs = vec![format!(
        "<a href=\"{}\">{}</a>",
        escape_attr(&format!("{prefix}spaces/{space_key}/index.html")),
        escape_text(space_key)
    )];
    for ancestor in &item.ancestors {
        let href = format!("{prefix}{}.html", ancestor.links.webui.trim_matches('/'));
        crumbs.push(format!(
            "<a href=\"{}\">{}</a>",
            escape_attr(&href),
            escape_text(&ancestor.title)
        ));
    }
    crumbs.join(" &gt; ")
}

fn render_attachments(attachments: &[AttachmentLink], prefix: &str) -> String {
    if attachments.is_empty() {
        return String::new();
    }
    let mut out = String::from("<hr><h2>Attachments</h2><ul>");
    for attachment in attachments {
        let decoded = percent_decode_str(&attachment.download_path).decode_utf8_lossy();
        let href = format!("{prefix}{}", decoded.trim_start_matches('/'));
        out.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>",
            escape_attr(&href),
            escape_text(&attachment.title)
        ));
    }
    out.push_str("</ul>");
    out
}

#[cfg(test)]
mod tests {
    use std::path::{Component, Path, PathBuf};

    use super::*;
    use crate::tree::tests::item;

    fn page_with_body(webui: &str, body: &str) -> ContentItem {
        let mut page = item("5", "Page", webui, &[]);
        page.body.styled_view = Some(crate::client::BodyValue {
            value: body.to_string(),
        });
        page
    }

    /// Lexically resolve `relative` against the directory of the page file.
    fn resolve_from(page_dir: &Path, relative: &str) -> PathBuf {
        let mut out = PathBuf::new();
        for component in page_dir.join(relative).components() {
            match component {
                Component::ParentDir => {
                    out.pop();
                }
                other => out.push(other.as_os_str()),
            }
        }
        out
    }

    #[test]
    fn prefix_has_one_parent_token_per_depth() {
        assert_eq!(relative_prefix("/spaces/X/overview"), "../../");
        assert_eq!(relative_prefix("/spaces/X/pages/123/Foo"), "../../../../");
        assert_eq!(relative_prefix("/Home"), "");
        assert_eq!(relative_prefix(""), "");
    }

    #[test]
    fn wiki_link_at_depth_two_points_at_local_file() {
        let body = rewrite_body(
            "<p><a href=\"/wiki/spaces/X/pages/123/Foo\">Foo</a></p>",
            &relative_prefix("/spaces/X/overview"),
        );
        assert_eq!(
            body,
            "<p><a href=\"../../spaces/X/pages/123/Foo.html\">Foo</a></p>"
        );
    }

    #[test]
    fn rewritten_links_resolve_to_the_same_target() {
        let data = Path::new("/mirror");
        for webui in ["/spaces/X/overview", "/spaces/X/pages/1/Deep", "/spaces/X/pages/1/a/b"] {
            let prefix = relative_prefix(webui);
            let page_file = data.join(format!("{}.html", webui.trim_start_matches('/')));
            let page_dir = page_file.parent().expect("page dir");

            let body = rewrite_body("<a href=\"/wiki/spaces/Y/pages/9/Target\">t</a>", &prefix);
            let href = body
                .split("href=\"")
                .nth(1)
                .and_then(|rest| rest.split('"').next())
                .expect("href");
            assert_eq!(
                resolve_from(page_dir, href),
                data.join("spaces/Y/pages/9/Target.html"),
                "from {webui}"
            );
        }
    }

    #[test]
    fn suffix_goes_before_query_and_fragment() {
        let body = rewrite_body(
            "<a href=\"/wiki/spaces/X/pages/1/A#section\">a</a><a href=\"/wiki/spaces/X/pages/1/A?focus=1\">b</a>",
            "../",
        );
        assert_eq!(
            body,
            "<a href=\"../spaces/X/pages/1/A.html#section\">a</a><a href=\"../spaces/X/pages/1/A.html?focus=1\">b</a>"
        );
    }

    #[test]
    fn download_links_and_external_links() {
        let body = rewrite_body(
            "<a href=\"/wiki/download/attachments/1/a.pdf\">pdf</a><a href=\"https://example.com/wiki/x\">ext</a><a name=\"anchor\">n</a>",
            "../",
        );
        assert_eq!(
            body,
            "<a href=\"../download/attachments/1/a.pdf\">pdf</a><a href=\"https://example.com/wiki/x\">ext</a><a name=\"anchor\">n</a>"
        );
    }

    #[test]
    fn emoji_images_become_text() {
        let body = rewrite_body(
            "<p>Done <img class=\"emoticon\" data-emoji-fallback=\"\u{2705}\" src=\"/wiki/s/emoji/check.png\"></p>",
            "../",
        );
        assert_eq!(body, "<p>Done <span>\u{2705}</span></p>");
        assert!(!body.contains("<img"));
    }

    #[test]
    fn thumbnails_point_at_full_attachment_without_srcset() {
        let body = rewrite_body(
            "<img src=\"/wiki/download/thumbnails/46760067/logo.png?version=2&amp;api=v2\" srcset=\"/wiki/download/thumbnails/46760067/logo.png 2x\" alt=\"logo\">",
            "../../",
        );
        assert_eq!(
            body,
            "<img src=\"../../download/attachments/46760067/logo.png?version=2&amp;api=v2\" alt=\"logo\">"
        );
    }

    #[test]
    fn other_wiki_images_only_get_prefix() {
        let body = rewrite_body("<img src=\"/wiki/download/attachments/3/x.png\">", "../");
        assert_eq!(body, "<img src=\"../download/attachments/3/x.png\">");
    }

    #[test]
    fn script_bodies_survive_rewriting() {
        let body = rewrite_body("<script>if (a < b) { x(); }</script><p>after</p>", "../");
        assert_eq!(body, "<script>if (a < b) { x(); }</script><p>after</p>");
    }

    #[test]
    fn query_references_are_escaped_once() {
        let body = rewrite_body(
            "<a href=\"/wiki/spaces/X/pages/1/A?a=1&amp;b=2&c\">A</a>",
            "../",
        );
        assert_eq!(
            body,
            "<a href=\"../spaces/X/pages/1/A.html?a=1&amp;b=2&amp;c\">A</a>"
        );
    }

    #[test]
    fn title_and_base_are_removed() {
        let body = rewrite_body(
            "<title>Old</title><base href=\"https://site.atlassian.net/wiki/\"><p>kept</p>",
            "",
        );
        assert_eq!(body, "<p>kept</p>");
    }

    #[test]
    fn page_has_breadcrumb_heading_and_attachments() {
        let mut page = item(
            "3",
            "Child & Co",
            "/spaces/DOC/pages/3/Child",
            &[("1", "Home", "/spaces/DOC/overview"), ("2", "Guide", "/spaces/DOC/pages/2/Guide")],
        );
        page.body.styled_view = Some(crate::client::BodyValue {
            value: "<p data-macro-name=\"toc\">x</p>".to_string(),
        });
        let html = render_page(
            "DOC",
            &page,
            &[AttachmentLink {
                title: "My File.pdf".to_string(),
                download_path: "/download/attachments/3/My%20File.pdf".to_string(),
            }],
        );

        assert!(html.contains("<meta charset=\"utf-8\">"));
        assert!(html.contains("[data-macro-name]::before"));
        assert!(html.contains(
            "<a href=\"../../../../spaces/DOC/index.html\">DOC</a> &gt; \
             <a href=\"../../../../spaces/DOC/overview.html\">Home</a> &gt; \
             <a href=\"../../../../spaces/DOC/pages/2/Guide.html\">Guide</a>"
        ));
        assert!(html.contains("<h1>Child &amp; Co</h1>"));
        assert!(html.contains("<p data-macro-name=\"toc\">x</p>"));
        assert!(html.contains(
            "<hr><h2>Attachments</h2><ul><li><a href=\"../../../../download/attachments/3/My File.pdf\">My File.pdf</a></li></ul>"
        ));
        let heading = html.find("<h1>").expect("heading");
        let attachments = html.find("<h2>Attachments").expect("attachments");
        assert!(heading < attachments);
    }

    #[test]
    fn attachments_section_is_omitted_when_empty() {
        let html = render_page("DOC", &page_with_body("/spaces/DOC/overview", "<p>x</p>"), &[]);
        assert!(!html.contains("Attachments"));
        assert!(html.contains("<a href=\"../../spaces/DOC/index.html\">DOC</a>\n<h1>Page</h1>"));
    }

    #[test]
    fn rendering_is_byte_identical_across_runs() {
        let page = page_with_body(
            "/spaces/DOC/pages/5/Page",
            "<div a=\"1\" b=\"2\"><img src=\"/wiki/download/thumbnails/5/x.png\" srcset=\"y\"></div>",
        );
        assert_eq!(render_page("DOC", &page, &[]), render_page("DOC", &page, &[]));
    }
}
