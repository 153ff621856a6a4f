//! Minimal element tree over quick-xml events, for documents too nested to
//! walk comfortably with a flat event loop (JATS article sets).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::apis::SourceError;
use crate::normalize::clean_text;

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlChild>,
}

#[derive(Debug, Clone)]
enum XmlChild {
    Element(XmlNode),
    Text(String),
}

impl XmlNode {
    /// Parse a whole document. The returned node is a synthetic root whose
    /// children are the document's top-level elements.
    pub fn parse(xml: &str) -> Result<XmlNode, SourceError> {
        let mut reader = Reader::from_str(xml);
        let mut stack = vec![XmlNode {
            name: "#document".to_string(),
            ..Default::default()
        }];

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => stack.push(XmlNode::from_start(&e)),
                Ok(Event::Empty(e)) => attach(&mut stack, XmlChild::Element(XmlNode::from_start(&e))),
                Ok(Event::End(_)) => close_top(&mut stack),
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                    attach(&mut stack, XmlChild::Text(text));
                }
                Ok(Event::CData(c)) => {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    attach(&mut stack, XmlChild::Text(text));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(SourceError::Parse(format!(
                        "XML parse error at byte {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        while stack.len() > 1 {
            close_top(&mut stack);
        }
        Ok(stack.pop().unwrap_or_default())
    }

    fn from_start(e: &BytesStart<'_>) -> XmlNode {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let attrs = e
            .attributes()
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = attr
                    .unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
                (key, value)
            })
            .collect();
        XmlNode {
            name,
            attrs,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Direct child elements.
    pub fn elements(&self) -> impl Iterator<Item = &XmlNode> {
        self.children.iter().filter_map(|c| match c {
            XmlChild::Element(node) => Some(node),
            XmlChild::Text(_) => None,
        })
    }

    /// Direct child elements named `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.elements().filter(move |n| n.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.elements().find(|n| n.name == name)
    }

    /// Every descendant element named `name`, in document order.
    pub fn descendants(&self, name: &str) -> Vec<&XmlNode> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlNode>) {
        for child in self.elements() {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    /// First descendant element named `name`.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        self.elements()
            .find_map(|child| if child.name == name { Some(child) } else { child.find(name) })
    }

    /// First descendant named `name` whose attribute `key` equals `value`.
    pub fn find_with_attr(&self, name: &str, key: &str, value: &str) -> Option<&XmlNode> {
        self.descendants(name)
            .into_iter()
            .find(|n| n.attr(key) == Some(value))
    }

    /// All text beneath this node with whitespace collapsed.
    pub fn text(&self) -> String {
        let mut raw = String::new();
        self.collect_text(&mut raw);
        clean_text(&raw)
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlChild::Text(t) => out.push_str(t),
                XmlChild::Element(node) => node.collect_text(out),
            }
        }
    }

    /// Text of the first descendant named `name`, if it is non-empty.
    pub fn find_text(&self, name: &str) -> Option<String> {
        self.find(name).map(XmlNode::text).filter(|t| !t.is_empty())
    }
}

fn attach(stack: &mut [XmlNode], child: XmlChild) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(child);
    }
}

fn close_top(stack: &mut Vec<XmlNode>) {
    if stack.len() > 1 {
        if let Some(node) = stack.pop() {
            attach(stack, XmlChild::Element(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<set>
        <article>
            <article-id pub-id-type="doi">10.1/x</article-id>
            <article-id pub-id-type="pmc">PMC1</article-id>
            <p>Mixed <italic>inline</italic> text &amp; more</p>
            <empty flag="yes"/>
        </article>
    </set>"#;

    #[test]
    fn test_find_and_attributes() {
        let root = XmlNode::parse(DOC).unwrap();
        let article = root.find("article").unwrap();
        assert_eq!(
            article.find_with_attr("article-id", "pub-id-type", "pmc").unwrap().text(),
            "PMC1"
        );
        assert_eq!(article.descendants("article-id").len(), 2);
        assert_eq!(article.child("empty").unwrap().attr("flag"), Some("yes"));
    }

    #[test]
    fn test_text_includes_inline_markup() {
        let root = XmlNode::parse(DOC).unwrap();
        assert_eq!(root.find_text("p").unwrap(), "Mixed inline text & more");
        assert!(root.find_text("empty").is_none());
    }

    #[test]
    fn test_mismatched_tags_are_parse_errors() {
        assert!(matches!(XmlNode::parse("<a><b></a>"), Err(SourceError::Parse(_))));
    }
}
