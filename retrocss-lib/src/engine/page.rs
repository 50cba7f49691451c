//! The host page: its document, the stylesheets the engine loaded for it
//! and the write surface the passes use.

use crate::dom::dom_tree::{
    attribute, is_tag, text_content, Document, NodeRef,
};
use crate::engine::loader::{same_origin, Fetcher, RequestMode};
use crate::error::RetrocssError;
use crate::style::cssom::parse_stylesheet;
use crate::style::owned_css::OwnedStylesheet;
use crate::transform::{hash_string, to_base36};
use log::{debug, trace};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetOrigin {
    SameOrigin,
    CrossOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SheetKey {
    Inline { node: usize, text_hash: u32 },
    Linked { url: String, cors: bool },
}

/// A stylesheet as the engine holds it.
#[derive(Debug)]
struct LoadedSheet {
    text: String,
    rules_accessible: bool,
    rules: Rc<RefCell<OwnedStylesheet>>,
    edited: Rc<RefCell<bool>>,
}

/// One entry of `document.styleSheets`.
#[derive(Debug, Clone)]
pub struct StyleSheetHandle {
    pub owner: NodeRef,
    pub href: Option<Url>,
    pub origin: SheetOrigin,
    pub rules_accessible: bool,
    /// Source text as the engine received it.
    pub raw_text: Option<String>,
    rules: Rc<RefCell<OwnedStylesheet>>,
    edited: Rc<RefCell<bool>>,
}

impl StyleSheetHandle {
    pub fn is_inline(&self) -> bool {
        self.href.is_none()
    }

    pub fn label(&self) -> String {
        self.href
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_else(|| "[inline]".to_string())
    }

    /// `sheet.cssRules`.
    pub fn css_rules(&self) -> Result<Ref<'_, OwnedStylesheet>, RetrocssError> {
        if !self.rules_accessible {
            return Err(RetrocssError::AccessDenied { href: self.label() });
        }
        Ok(self.rules.borrow())
    }

    /// Mutable `cssRules` for in-place edits.
    pub fn css_rules_mut(&self) -> Result<RefMut<'_, OwnedStylesheet>, RetrocssError> {
        if !self.rules_accessible {
            return Err(RetrocssError::AccessDenied { href: self.label() });
        }
        Ok(self.rules.borrow_mut())
    }

    /// Rules as the engine sees them, accessible to scripts or not.
    pub fn engine_rules(&self) -> Ref<'_, OwnedStylesheet> {
        self.rules.borrow()
    }

    /// Text reconstructed from `cssRules`.
    pub fn css_text(&self) -> Result<String, RetrocssError> {
        Ok(self.css_rules()?.css_text())
    }

    /// Whether an in-place edit ever changed this sheet.
    pub fn was_edited(&self) -> bool {
        *self.edited.borrow()
    }

    pub fn mark_edited(&self) {
        *self.edited.borrow_mut() = true;
    }
}

pub struct Page<F: Fetcher> {
    pub document: Document,
    url: Url,
    fetcher: F,
    sheets: RefCell<HashMap<SheetKey, Option<LoadedSheet>>>,
}

impl<F: Fetcher> Page<F> {
    pub fn new(document: Document, url: Url, fetcher: F) -> Self {
        Page {
            document,
            url,
            fetcher,
            sheets: RefCell::new(HashMap::new()),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn resolve(&self, href: &str) -> Result<Url, RetrocssError> {
        Ok(self.url.join(href.trim())?)
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        same_origin(url, &self.url)
    }

    /// `fetch(url, { mode: 'cors' })` from the page.
    pub async fn fetch_cors(&self, url: &Url) -> Result<String, RetrocssError> {
        Ok(self.fetcher.fetch(url, RequestMode::Cors, &self.url).await?)
    }

    /// `document.styleSheets`: `<style>` elements and loaded
    /// `<link rel=stylesheet>` elements in document order. Linked sheets
    /// are loaded on first sight; a sheet that failed to load is absent.
    pub async fn style_sheets(&self) -> Vec<StyleSheetHandle> {
        let mut handles = Vec::new();
        let mut seen_inline = HashSet::new();
        for node in self.document.elements() {
            if is_tag(&node, "style") {
                let text = text_content(&node);
                let key = SheetKey::Inline {
                    node: Rc::as_ptr(&node) as usize,
                    text_hash: hash_string(&text),
                };
                seen_inline.insert(key.clone());
                let mut sheets = self.sheets.borrow_mut();
                let loaded = sheets.entry(key).or_insert_with(|| {
                    Some(LoadedSheet {
                        rules: Rc::new(RefCell::new(parse_stylesheet(&text))),
                        text,
                        rules_accessible: true,
                        edited: Rc::new(RefCell::new(false)),
                    })
                });
                if let Some(loaded) = loaded {
                    handles.push(handle(&node, None, SheetOrigin::SameOrigin, loaded));
                }
                continue;
            }

            let is_link = node
                .borrow()
                .as_element()
                .map(|elem| elem.tag == "link" && elem.is_stylesheet_link())
                .unwrap_or(false);
            if !is_link {
                continue;
            }
            let Some(href) = attribute(&node, "href") else {
                continue;
            };
            let url = match self.resolve(&href) {
                Ok(url) => url,
                Err(err) => {
                    debug!("skipping stylesheet link: {}", err);
                    continue;
                }
            };
            let cors = attribute(&node, "crossorigin").is_some();
            let key = SheetKey::Linked {
                url: url.to_string(),
                cors,
            };
            if !self.sheets.borrow().contains_key(&key) {
                let loaded = self.load_linked(&url, cors).await;
                self.sheets.borrow_mut().insert(key.clone(), loaded);
            }
            let origin = if self.is_same_origin(&url) {
                SheetOrigin::SameOrigin
            } else {
                SheetOrigin::CrossOrigin
            };
            if let Some(Some(loaded)) = self.sheets.borrow().get(&key) {
                handles.push(handle(&node, Some(url), origin, loaded));
            }
        }
        self.sheets.borrow_mut().retain(|key, _| match key {
            SheetKey::Inline { .. } => seen_inline.contains(key),
            SheetKey::Linked { .. } => true,
        });
        handles
    }

    async fn load_linked(&self, url: &Url, cors: bool) -> Option<LoadedSheet> {
        let same = self.is_same_origin(url);
        let mode = if cors { RequestMode::Cors } else { RequestMode::NoCors };
        match self.fetcher.fetch(url, mode, &self.url).await {
            Ok(text) => {
                trace!("engine loaded {} ({} bytes)", url, text.len());
                Some(LoadedSheet {
                    rules: Rc::new(RefCell::new(parse_stylesheet(&text))),
                    text,
                    rules_accessible: same || cors,
                    edited: Rc::new(RefCell::new(false)),
                })
            }
            Err(err) => {
                debug!("engine failed to load {}: {}", url, err);
                None
            }
        }
    }

    /// Append a `<style>` with `css` to `<head>`. When `id` is given and an
    /// element with that id exists, nothing is injected. Returns whether a
    /// new element was added.
    pub fn inject_style(&self, css: &str, id: Option<&str>) -> bool {
        if let Some(id) = id {
            if self.document.get_element_by_id(id).is_some() {
                trace!("style #{} already injected", id);
                return false;
            }
        }
        let style = self.document.create_element("style");
        if let Some(id) = id {
            self.document.set_attribute(&style, "id", id);
        }
        self.document.set_text_content(&style, css);
        let parent = self
            .document
            .head()
            .or_else(|| self.document.document_element())
            .unwrap_or_else(|| Rc::clone(&self.document.root));
        self.document.append_child(&parent, &style);
        true
    }

    /// Replace `link` by a clone carrying `crossorigin="anonymous"`, placed
    /// where the original was. The engine loads it on the next enumeration.
    pub fn reload_with_cross_origin(&self, link: &NodeRef, marker: Option<&str>) -> Option<NodeRef> {
        let attributes = link.borrow().as_element()?.attributes.clone();
        let replacement = self.document.create_element("link");
        for (name, value) in &attributes {
            self.document.set_attribute(&replacement, name, value);
        }
        self.document.set_attribute(&replacement, "crossorigin", "anonymous");
        if let Some(marker) = marker {
            self.document.set_attribute(&replacement, marker, "1");
        }
        if !self.document.insert_after(link, &replacement) {
            return None;
        }
        self.document.remove(link);
        Some(replacement)
    }

    /// Write in-place CSSOM edits back into the document so they survive
    /// serialization: inline sheets get their text replaced, linked sheets
    /// get a `<style>` with the edited rules right after the link.
    pub async fn materialize_cssom_edits(&self, finish: impl Fn(&str) -> String) -> usize {
        let mut written = 0;
        for sheet in self.style_sheets().await {
            if !sheet.was_edited() {
                continue;
            }
            let css = finish(&sheet.engine_rules().css_text());
            match &sheet.href {
                None => {
                    if text_content(&sheet.owner) != css {
                        self.document.set_text_content(&sheet.owner, &css);
                        written += 1;
                    }
                }
                Some(href) => {
                    let id = format!("retrocss-cssom-{}", to_base36(hash_string(href.as_str())));
                    if self.document.get_element_by_id(&id).is_some() {
                        continue;
                    }
                    let style = self.document.create_element("style");
                    self.document.set_attribute(&style, "id", &id);
                    self.document.set_text_content(&style, &css);
                    if self.document.insert_after(&sheet.owner, &style) {
                        written += 1;
                    }
                }
            }
        }
        written
    }
}

fn handle(
    owner: &NodeRef,
    href: Option<Url>,
    origin: SheetOrigin,
    loaded: &LoadedSheet,
) -> StyleSheetHandle {
    StyleSheetHandle {
        owner: Rc::clone(owner),
        href,
        origin,
        rules_accessible: loaded.rules_accessible,
        raw_text: Some(loaded.text.clone()),
        rules: Rc::clone(&loaded.rules),
        edited: Rc::clone(&loaded.edited),
    }
}
