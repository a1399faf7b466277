use std::collections::HashMap;

use crate::client::ContentItem;

/// One direct child of a tree key: what the table of contents links to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub id: String,
    pub title: String,
    /// Relative to `spaces/<key>/index.html`.
    pub link: String,
}

/// Parent id -> children adjacency list, with the root held separately.
///
/// Items may arrive in any order; children are kept in discovery order and
/// nothing is resolved until the stream has been consumed.
#[derive(Debug, Clone, Default)]
pub struct ContentTree {
    root: Vec<ChildEntry>,
    by_parent: HashMap<String, Vec<ChildEntry>>,
}

impl ContentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one non-archived item under its immediate parent.
    ///
    /// The parent is the last ancestor, even when that ancestor was archived
    /// and will never be rendered itself.
    pub fn observe(&mut self, space_key: &str, item: &ContentItem) {
        let entry = ChildEntry {
            id: item.id.clone(),
            title: item.title.clone(),
            link: child_link(space_key, item.webui()),
        };
        match item.ancestors.last() {
            Some(parent) => self
                .by_parent
                .entry(parent.id.clone())
                .or_default()
                .push(entry),
            None => self.root.push(entry),
        }
    }

    /// Children of `parent`, or of the root when `None`. Unknown keys are empty.
    pub fn children_of(&self, parent: Option<&str>) -> &[ChildEntry] {
        match parent {
            None => &self.root,
            Some(id) => self.by_parent.get(id).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    pub fn len(&self) -> usize {
        self.root.len() + self.by_parent.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parent keys that hold children but were never observed themselves.
    /// These are reachable from nowhere in the rendered index.
    pub fn orphan_keys(&self) -> Vec<&str> {
        let mut known = std::collections::HashSet::new();
        for entry in self
            .root
            .iter()
            .chain(self.by_parent.values().flatten())
        {
            known.insert(entry.id.as_str());
        }
        let mut orphans: Vec<&str> = self
            .by_parent
            .keys()
            .map(String::as_str)
            .filter(|key| !known.contains(key))
            .collect();
        orphans.sort_unstable();
        orphans
    }
}

fn child_link(space_key: &str, webui: &str) -> String {
    format!("{}.html", webui.replace(&format!("/spaces/{space_key}/"), ""))
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn item(
        id: &str,
        title: &str,
        webui: &str,
        ancestors: &[(&str, &str, &str)],
    ) -> ContentItem {
        serde_json::from_value(json!({
            "id": id,
            "title": title,
            "status": "current",
            "ancestors": ancestors
                .iter()
                .map(|(id, title, webui)| {
                    json!({"id": id, "title": title, "_links": {"webui": webui}})
                })
                .collect::<Vec<_>>(),
            "_links": {"webui": webui},
            "body": {"styled_view": {"value": ""}},
        }))
        .expect("content item")
    }

    #[test]
    fn builds_root_child_grandchild_chain() {
        let r = item("1", "R", "/spaces/DOC/overview", &[]);
        let a = item("2", "A", "/spaces/DOC/pages/2/A", &[("1", "R", "/spaces/DOC/overview")]);
        let b = item(
            "3",
            "B",
            "/spaces/DOC/pages/3/B",
            &[("1", "R", "/spaces/DOC/overview"), ("2", "A", "/spaces/DOC/pages/2/A")],
        );

        let mut tree = ContentTree::new();
        for content in [&b, &r, &a] {
            tree.observe("DOC", content);
        }

        let root = tree.children_of(None);
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].id, "1");
        assert_eq!(root[0].link, "overview.html");
        assert_eq!(tree.children_of(Some("1"))[0].title, "A");
        assert_eq!(tree.children_of(Some("1"))[0].link, "pages/2/A.html");
        assert_eq!(tree.children_of(Some("2"))[0].id, "3");
        assert!(tree.children_of(Some("3")).is_empty());
        assert_eq!(tree.len(), 3);
        assert!(tree.orphan_keys().is_empty());
    }

    #[test]
    fn every_item_lands_under_exactly_one_key() {
        let items = [
            item("1", "R", "/spaces/DOC/overview", &[]),
            item("2", "A", "/spaces/DOC/pages/2/A", &[("1", "R", "/spaces/DOC/overview")]),
            item("4", "C", "/spaces/DOC/pages/4/C", &[("1", "R", "/spaces/DOC/overview")]),
            item("5", "Loose", "/spaces/DOC/pages/5/Loose", &[]),
        ];
        let mut tree = ContentTree::new();
        for content in &items {
            tree.observe("DOC", content);
        }

        for content in &items {
            let expected_key = content.ancestors.last().map(|parent| parent.id.as_str());
            let hits = tree
                .children_of(expected_key)
                .iter()
                .filter(|entry| entry.id == content.id)
                .count();
            assert_eq!(hits, 1, "item {} under {:?}", content.id, expected_key);
        }
        assert_eq!(tree.len(), items.len());
        let siblings: Vec<_> = tree.children_of(Some("1")).iter().map(|e| e.id.as_str()).collect();
        assert_eq!(siblings, vec!["2", "4"]);
    }

    #[test]
    fn child_of_archived_parent_stays_under_that_parent() {
        let child = item(
            "9",
            "Survivor",
            "/spaces/DOC/pages/9/Survivor",
            &[("1", "R", "/spaces/DOC/overview"), ("8", "Gone", "/spaces/DOC/pages/8/Gone")],
        );
        let mut tree = ContentTree::new();
        tree.observe("DOC", &child);

        assert!(tree.children_of(None).is_empty());
        assert!(tree.children_of(Some("1")).is_empty());
        assert_eq!(tree.children_of(Some("8"))[0].id, "9");
        assert_eq!(tree.orphan_keys(), vec!["8"]);
    }

    #[test]
    fn repeated_ids_are_not_deduplicated() {
        let page = item("2", "A", "/spaces/DOC/pages/2/A", &[]);
        let mut tree = ContentTree::new();
        tree.observe("DOC", &page);
        tree.observe("DOC", &page);
        assert_eq!(tree.children_of(None).len(), 2);
    }
}
