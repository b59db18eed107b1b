//! A minimal document model extracted from fixture HTML.
//!
//! The rendering and script engines are external to this crate; navigations
//! still need to observe the cookie writes, `window.open` calls and links a
//! document carries. This scanner recognizes exactly that subset.

use std::collections::HashMap;

use url::Url;

use crate::cookies::Cookie;

/// An `<a>` element of the document.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub href: String,
    pub target: Option<String>,
    pub noreferrer: bool,
}

/// What running a piece of script would do.
#[derive(Debug, Default)]
pub(crate) struct ScriptEffects {
    /// Urls passed to `window.open(..)`.
    pub opens: Vec<String>,
    /// `(name, value)` pairs written via `document.cookie`.
    pub cookies: Vec<(String, String)>,
}

/// The parsed document of one navigation.
#[derive(Debug)]
pub(crate) struct PageModel {
    url: Url,
    /// Effects of the top-level script statements, applied at load time.
    load_effects: ScriptEffects,
    /// Script functions the page defines, name to body.
    functions: HashMap<String, String>,
    links: Vec<Link>,
}

impl PageModel {
    pub(crate) fn parse(url: Url, html: &str) -> Self {
        let mut functions = HashMap::new();
        let mut top_level = String::new();
        for block in script_blocks(html) {
            top_level.push_str(&extract_functions(block, &mut functions));
        }
        Self {
            url,
            load_effects: scan_script(&top_level),
            functions,
            links: scan_links(html),
        }
    }

    /// A document with no content, used for failed loads.
    pub(crate) fn empty(url: Url) -> Self {
        Self {
            url,
            load_effects: ScriptEffects::default(),
            functions: HashMap::new(),
            links: Vec::new(),
        }
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    /// Cookies the document writes while loading, scoped to its own host.
    pub(crate) fn load_cookies(&self) -> Vec<Cookie> {
        self.load_effects
            .cookies
            .iter()
            .map(|(name, value)| Cookie::for_url(name, value, &self.url))
            .collect()
    }

    /// Urls the document opens while loading.
    pub(crate) fn load_opens(&self) -> &[String] {
        &self.load_effects.opens
    }

    /// Effects of executing `js` against this document. A bare call to a
    /// function the page defines runs that function's body; anything else is
    /// scanned as-is.
    pub(crate) fn invoke(&self, js: &str) -> ScriptEffects {
        let trimmed = js.trim().trim_end_matches(';').trim_end();
        if let Some(name) = trimmed.strip_suffix("()") {
            if let Some(body) = self.functions.get(name.trim()) {
                return scan_script(body);
            }
        }
        scan_script(js)
    }

    /// The link a click activates. Hit testing belongs to the view layer;
    /// fixture documents carry at most one link.
    pub(crate) fn primary_link(&self) -> Option<&Link> {
        self.links.first()
    }
}

/// Collect the contents of every `<script>` element.
fn script_blocks(html: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find("<script") {
        let after_tag = &rest[start..];
        let Some(open_end) = after_tag.find('>') else {
            break;
        };
        let body = &after_tag[open_end + 1..];
        let Some(close) = body.find("</script>") else {
            break;
        };
        blocks.push(&body[..close]);
        rest = &body[close..];
    }
    blocks
}

/// Split function definitions out of `src`, returning the remaining
/// top-level statements.
fn extract_functions(src: &str, out: &mut HashMap<String, String>) -> String {
    let mut top_level = String::new();
    let mut rest = src;
    while let Some(start) = rest.find("function ") {
        top_level.push_str(&rest[..start]);
        let def = &rest[start + "function ".len()..];
        let (name, body, consumed) = match parse_function(def) {
            Some(parts) => parts,
            None => {
                // not a well-formed definition, keep it as plain text
                top_level.push_str(&rest[start..start + "function ".len()]);
                rest = def;
                continue;
            }
        };
        out.insert(name, body);
        rest = &def[consumed..];
    }
    top_level.push_str(rest);
    top_level
}

/// Parse `name(..) { body }`, returning the name, the body and how many
/// bytes of the input were consumed.
fn parse_function(src: &str) -> Option<(String, String, usize)> {
    let paren = src.find('(')?;
    let name = src[..paren].trim().to_string();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
        return None;
    }
    let brace = src[paren..].find('{')? + paren;
    let body_len = matching_brace(&src[brace..])?;
    let body = src[brace + 1..brace + body_len].to_string();
    Some((name, body, brace + body_len + 1))
}

/// Index of the brace closing the one `s` starts with.
fn matching_brace(s: &str) -> Option<usize> {
    debug_assert!(s.starts_with('{'));
    let mut depth = 0usize;
    for (idx, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Scan script text for the effects this crate models.
pub(crate) fn scan_script(src: &str) -> ScriptEffects {
    let mut effects = ScriptEffects::default();

    let mut rest = src;
    while let Some(idx) = rest.find("window.open(") {
        rest = rest[idx + "window.open(".len()..].trim_start();
        if let Some((url, consumed)) = quoted(rest) {
            effects.opens.push(url);
            rest = &rest[consumed..];
        }
    }

    let mut rest = src;
    while let Some(idx) = rest.find("document.cookie") {
        rest = rest[idx + "document.cookie".len()..].trim_start();
        let Some(assignment) = rest.strip_prefix('=') else {
            continue;
        };
        rest = assignment.trim_start();
        if let Some((pair, consumed)) = quoted(rest) {
            if let Some((name, value)) = pair.split_once('=') {
                effects
                    .cookies
                    .push((name.trim().to_string(), value.trim().to_string()));
            }
            rest = &rest[consumed..];
        }
    }

    effects
}

/// Read a single- or double-quoted string literal off the front of `s`.
fn quoted(s: &str) -> Option<(String, usize)> {
    let quote = s.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = &s[1..];
    let end = inner.find(quote)?;
    Some((inner[..end].to_string(), end + 2))
}

fn scan_links(html: &str) -> Vec<Link> {
    let mut links = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find("<a") {
        let tag_start = &rest[start..];
        let Some(tag_end) = tag_start.find('>') else {
            break;
        };
        let tag = &tag_start[..tag_end];
        if let Some(href) = attr(tag, "href") {
            let rel = attr(tag, "rel").unwrap_or_default();
            links.push(Link {
                href,
                target: attr(tag, "target"),
                noreferrer: rel.split_whitespace().any(|r| r == "noreferrer"),
            });
        }
        rest = &tag_start[tag_end..];
    }
    links
}

/// Extract an attribute value from the text of a start tag.
fn attr(tag: &str, name: &str) -> Option<String> {
    let mut rest = tag;
    loop {
        let idx = rest.find(name)?;
        let after = rest[idx + name.len()..].trim_start();
        if let Some(value_start) = after.strip_prefix('=') {
            let (value, _) = quoted(value_start.trim_start())?;
            return Some(value);
        }
        rest = &rest[idx + name.len()..];
    }
}
