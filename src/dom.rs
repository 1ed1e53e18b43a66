use scraper::{ElementRef, Html, Selector};

use crate::table::Table;

/// Elements whose text never counts as visible page text.
const HIDDEN_TAGS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

const LINK_ATTRS: [&str; 3] = ["href", "src", "action"];

/// Text views of a page's markup, each newline-joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkupText {
    pub visible: String,
    pub pre: String,
    pub script: String,
    /// Attribute URLs, each quoted so relative paths keep their delimiters.
    pub links: String,
}

/// Split raw HTML into visible text, `<pre>` text, script text and link
/// attributes.
pub fn extract_text(html: &str) -> MarkupText {
    let document = Html::parse_document(html);
    MarkupText {
        visible: visible_text(&document),
        pre: joined_text(&document, "pre", "\n", "\n\n"),
        script: joined_text(&document, "script", "", "\n\n"),
        links: link_attributes(&document),
    }
}

/// Visible text of a document (used for secondary pages too).
pub fn visible_text_of(html: &str) -> String {
    visible_text(&Html::parse_document(html))
}

fn visible_text(document: &Html) -> String {
    let root = document.root_element();
    let mut parts = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_TAGS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }
    parts.join("\n")
}

fn joined_text(document: &Html, selector: &str, inner_sep: &str, outer_sep: &str) -> String {
    let Ok(sel) = Selector::parse(selector) else {
        return String::new();
    };
    document
        .select(&sel)
        .map(|el| el.text().collect::<Vec<_>>().join(inner_sep))
        .collect::<Vec<_>>()
        .join(outer_sep)
}

fn link_attributes(document: &Html) -> String {
    let Ok(sel) = Selector::parse("[href], [src], [action]") else {
        return String::new();
    };
    let mut out = Vec::new();
    for el in document.select(&sel) {
        for attr in LINK_ATTRS {
            if let Some(v) = el.value().attr(attr) {
                let v = v.trim();
                if !v.is_empty() {
                    out.push(format!("\"{v}\""));
                }
            }
        }
    }
    out.join("\n")
}

/// Every `<table>` in the markup that has a header row and at least one data
/// row.
pub fn extract_tables(html: &str) -> Vec<Table> {
    let document = Html::parse_document(html);
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("th, td"),
    ) else {
        return Vec::new();
    };

    let mut tables = Vec::new();
    for table in document.select(&table_sel) {
        let mut rows = table
            .select(&row_sel)
            .map(|tr| tr.select(&cell_sel).map(cell_text).collect::<Vec<_>>())
            .filter(|cells| !cells.is_empty());
        let Some(header) = rows.next() else {
            continue;
        };
        let records: Vec<Vec<String>> = rows.collect();
        if !records.is_empty() {
            tables.push(Table::from_records(header, records));
        }
    }
    tables
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Q1</title><style>p{}</style></head>
<body>
  <h1>Quiz</h1>
  <p>Download <a href="/files/data.csv">the data</a>.</p>
  <pre>POST to https://quiz.example/submit</pre>
  <form action="/submit/7"></form>
  <script>var x = atob(`aGVsbG8=`);</script>
</body></html>"#;

    #[test]
    fn splits_markup_into_views() {
        let m = extract_text(PAGE);
        assert!(m.visible.contains("Quiz"));
        assert!(m.visible.contains("the data"));
        assert!(!m.visible.contains("atob"));
        assert!(!m.visible.contains("p{}"));
        assert!(!m.visible.contains("Q1"));
        assert_eq!(m.pre, "POST to https://quiz.example/submit");
        assert!(m.script.contains("atob(`aGVsbG8=`)"));
        assert!(m.links.contains("\"/files/data.csv\""));
        assert!(m.links.contains("\"/submit/7\""));
    }

    #[test]
    fn visible_lines_are_trimmed_and_non_blank() {
        let text = visible_text_of("<body><p>  one </p>\n\n<p>two</p><div>   </div></body>");
        assert_eq!(text, "one\ntwo");
    }

    #[test]
    fn html_tables_become_tables() {
        let html = r#"<table>
            <tr><th>month</th><th>sales</th></tr>
            <tr><td>jan</td><td>10</td></tr>
            <tr><td>feb</td><td> 12.5 </td></tr>
        </table>
        <table><tr><th>lonely header</th></tr></table>"#;
        let tables = extract_tables(html);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].columns, vec!["month", "sales"]);
        assert_eq!(tables[0].numeric_values(1), vec![10.0, 12.5]);
    }
}
