//! Selector parsing and matching against the document tree.
//!
//! This is the `element.matches()` primitive of the host model. Selectors
//! are parsed into compound selectors joined by combinators and matched
//! right to left with backtracking over ancestors and siblings.

use crate::dom::dom_tree::{
    descendant_elements, element_children, next_element_sibling, parent_element, parent_node,
    previous_element_sibling, Node, NodeRef,
};
use crate::transform::{matching_paren, split_top_level};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Which selector functions the target engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorSupport {
    /// `:is()` and `:where()`.
    pub is_where: bool,
    /// `:has()`.
    pub has: bool,
}

impl SelectorSupport {
    pub const ALL: SelectorSupport = SelectorSupport {
        is_where: true,
        has: true,
    };
}

/// A selector the engine refuses to parse (`SyntaxError` in a browser).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

impl SelectorError {
    fn new(selector: &str, reason: impl Into<String>) -> Self {
        SelectorError {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid selector `{}`: {}", self.selector, self.reason)
    }
}

impl std::error::Error for SelectorError {}

/// Supported attribute selector operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOperator {
    /// [attr="value"]
    Exact,
    /// [attr~="value"]
    Includes,
    /// [attr|="value"]
    DashMatch,
    /// [attr^="value"]
    Prefix,
    /// [attr$="value"]
    Suffix,
    /// [attr*="value"]
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSelector {
    pub name: String,
    /// None means only an existence check.
    pub operator: Option<AttributeOperator>,
    pub value: String,
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoClass {
    Root,
    FirstChild,
    LastChild,
    OnlyChild,
    FirstOfType,
    LastOfType,
    Empty,
    /// `:nth-child(an+b)`, counted from the end when the flag is set.
    NthChild { a: i32, b: i32, from_end: bool },
    Not(Vec<ComplexSelector>),
    Is(Vec<ComplexSelector>),
    Where(Vec<ComplexSelector>),
    /// Relative selectors anchored at the subject element.
    Has(Vec<ComplexSelector>),
    /// User-action and form-state pseudo-classes. A static document never
    /// matches them.
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleSelector {
    Universal,
    Type(String),
    Id(String),
    Class(String),
    Attribute(AttributeSelector),
    PseudoClass(PseudoClass),
    PseudoElement(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundSelector {
    pub simple: Vec<SimpleSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Descendant combinator (a space).
    Descendant,
    /// Child combinator (`>`).
    Child,
    /// Adjacent sibling combinator (`+`).
    AdjacentSibling,
    /// General sibling combinator (`~`).
    GeneralSibling,
}

/// Compounds from left to right. Each compound carries the combinator that
/// joins it to the compound on its left; for the first compound of a
/// relative selector (`:has(> .a)`) that is the relation to the anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexSelector {
    pub parts: Vec<(Combinator, CompoundSelector)>,
}

const LEGACY_PSEUDO_ELEMENTS: [&str; 4] = ["before", "after", "first-line", "first-letter"];

const DYNAMIC_PSEUDO_CLASSES: [&str; 27] = [
    "hover",
    "active",
    "focus",
    "focus-within",
    "focus-visible",
    "visited",
    "link",
    "any-link",
    "target",
    "checked",
    "disabled",
    "enabled",
    "required",
    "optional",
    "valid",
    "invalid",
    "in-range",
    "out-of-range",
    "placeholder-shown",
    "indeterminate",
    "default",
    "read-only",
    "read-write",
    "autofill",
    "defined",
    "fullscreen",
    "open",
];

/// Parse a comma-separated selector list.
pub fn parse_selector_list(
    text: &str,
    support: SelectorSupport,
) -> Result<Vec<ComplexSelector>, SelectorError> {
    parse_list(text, support, false)
}

fn parse_list(
    text: &str,
    support: SelectorSupport,
    relative: bool,
) -> Result<Vec<ComplexSelector>, SelectorError> {
    split_top_level(text, ',')
        .into_iter()
        .map(|branch| SelectorParser::new(branch, support).complex(relative))
        .collect()
}

struct SelectorParser<'a> {
    source: &'a str,
    pos: usize,
    support: SelectorSupport,
}

impl<'a> SelectorParser<'a> {
    fn new(source: &'a str, support: SelectorSupport) -> Self {
        SelectorParser {
            source,
            pos: 0,
            support,
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::new(self.source, reason)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Skip whitespace, returning whether any was skipped.
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
        self.pos > start
    }

    fn combinator(&mut self) -> Option<Combinator> {
        let combinator = match self.peek()? {
            '>' => Combinator::Child,
            '+' => Combinator::AdjacentSibling,
            '~' => Combinator::GeneralSibling,
            _ => return None,
        };
        self.pos += 1;
        self.skip_ws();
        Some(combinator)
    }

    fn complex(mut self, relative: bool) -> Result<ComplexSelector, SelectorError> {
        self.skip_ws();
        let mut combinator = Combinator::Descendant;
        if relative {
            if let Some(leading) = self.combinator() {
                combinator = leading;
            }
        }
        let mut parts = Vec::new();
        loop {
            let compound = self.compound()?;
            parts.push((combinator, compound));
            let had_ws = self.skip_ws();
            if self.peek().is_none() {
                break;
            }
            combinator = match self.combinator() {
                Some(explicit) => explicit,
                None if had_ws => Combinator::Descendant,
                None => return Err(self.error("unexpected character")),
            };
        }
        Ok(ComplexSelector { parts })
    }

    fn compound(&mut self) -> Result<CompoundSelector, SelectorError> {
        let mut simple = Vec::new();
        while let Some(c) = self.peek() {
            let selector = match c {
                '*' => {
                    self.pos += 1;
                    SimpleSelector::Universal
                }
                '#' => {
                    self.pos += 1;
                    SimpleSelector::Id(self.ident()?)
                }
                '.' => {
                    self.pos += 1;
                    SimpleSelector::Class(self.ident()?)
                }
                '[' => {
                    self.pos += 1;
                    SimpleSelector::Attribute(self.attribute()?)
                }
                ':' => {
                    self.pos += 1;
                    self.pseudo()?
                }
                c if is_ident_start(c) => {
                    if !simple.is_empty() {
                        return Err(self.error("type selector must come first"));
                    }
                    SimpleSelector::Type(self.ident()?.to_ascii_lowercase())
                }
                _ => break,
            };
            simple.push(selector);
        }
        if simple.is_empty() {
            return Err(self.error("expected a selector"));
        }
        Ok(CompoundSelector { simple })
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.pos += 1;
                out.push(self.escape()?);
            } else if is_ident_char(c) {
                out.push(c);
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(self.error("expected an identifier"));
        }
        Ok(out)
    }

    /// The character after a backslash: a hex code point or a literal.
    fn escape(&mut self) -> Result<char, SelectorError> {
        let hex: String = self.source[self.pos..]
            .chars()
            .take_while(char::is_ascii_hexdigit)
            .take(6)
            .collect();
        if hex.is_empty() {
            return self.bump().ok_or_else(|| self.error("dangling escape"));
        }
        self.pos += hex.len();
        if self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.pos += 1;
        }
        let code = u32::from_str_radix(&hex, 16).map_err(|_| self.error("bad escape"))?;
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn attribute(&mut self) -> Result<AttributeSelector, SelectorError> {
        self.skip_ws();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_ws();
        if self.eat(']') {
            return Ok(AttributeSelector {
                name,
                operator: None,
                value: String::new(),
                case_insensitive: false,
            });
        }
        let operator = match self.bump() {
            Some('=') => AttributeOperator::Exact,
            Some(c) => {
                let operator = match c {
                    '~' => AttributeOperator::Includes,
                    '|' => AttributeOperator::DashMatch,
                    '^' => AttributeOperator::Prefix,
                    '$' => AttributeOperator::Suffix,
                    '*' => AttributeOperator::Substring,
                    _ => return Err(self.error("unknown attribute operator")),
                };
                if !self.eat('=') {
                    return Err(self.error("unknown attribute operator"));
                }
                operator
            }
            None => return Err(self.error("unclosed attribute selector")),
        };
        self.skip_ws();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                self.quoted(q)?
            }
            _ => self.ident()?,
        };
        self.skip_ws();
        let mut case_insensitive = false;
        match self.peek() {
            Some('i') | Some('I') => {
                case_insensitive = true;
                self.pos += 1;
            }
            Some('s') | Some('S') => self.pos += 1,
            _ => {}
        }
        self.skip_ws();
        if !self.eat(']') {
            return Err(self.error("unclosed attribute selector"));
        }
        Ok(AttributeSelector {
            name,
            operator: Some(operator),
            value,
            case_insensitive,
        })
    }

    fn quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.escape()?),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    /// Text of a functional pseudo's arguments; the `(` is at `self.pos`.
    fn arguments(&mut self) -> Result<&'a str, SelectorError> {
        let close = matching_paren(self.source, self.pos)
            .ok_or_else(|| self.error("unclosed parenthesis"))?;
        let args = &self.source[self.pos + 1..close];
        self.pos = close + 1;
        Ok(args)
    }

    fn pseudo(&mut self) -> Result<SimpleSelector, SelectorError> {
        if self.eat(':') {
            let name = self.ident()?.to_ascii_lowercase();
            if self.peek() == Some('(') {
                self.arguments()?;
            }
            return Ok(SimpleSelector::PseudoElement(name));
        }
        let name = self.ident()?.to_ascii_lowercase();
        if LEGACY_PSEUDO_ELEMENTS.contains(&name.as_str()) {
            return Ok(SimpleSelector::PseudoElement(name));
        }
        if self.peek() == Some('(') {
            let args = self.arguments()?;
            return self.functional_pseudo(&name, args).map(SimpleSelector::PseudoClass);
        }
        let pseudo = match name.as_str() {
            "root" => PseudoClass::Root,
            "first-child" => PseudoClass::FirstChild,
            "last-child" => PseudoClass::LastChild,
            "only-child" => PseudoClass::OnlyChild,
            "first-of-type" => PseudoClass::FirstOfType,
            "last-of-type" => PseudoClass::LastOfType,
            "empty" => PseudoClass::Empty,
            other if DYNAMIC_PSEUDO_CLASSES.contains(&other) => {
                PseudoClass::Dynamic(other.to_string())
            }
            _ => return Err(self.error(format!("unknown pseudo-class :{}", name))),
        };
        Ok(SimpleSelector::PseudoClass(pseudo))
    }

    fn functional_pseudo(&self, name: &str, args: &str) -> Result<PseudoClass, SelectorError> {
        match name {
            "not" => Ok(PseudoClass::Not(parse_list(args, self.support, false)?)),
            "is" | "matches" | "where" => {
                if !self.support.is_where {
                    return Err(self.error(format!(":{}() is not supported", name)));
                }
                let list = parse_list(args, self.support, false)?;
                Ok(if name == "where" {
                    PseudoClass::Where(list)
                } else {
                    PseudoClass::Is(list)
                })
            }
            "has" => {
                if !self.support.has {
                    return Err(self.error(":has() is not supported"));
                }
                Ok(PseudoClass::Has(parse_list(args, self.support, true)?))
            }
            "nth-child" | "nth-last-child" => {
                let (a, b) =
                    parse_an_plus_b(args).ok_or_else(|| self.error("bad :nth-child() argument"))?;
                Ok(PseudoClass::NthChild {
                    a,
                    b,
                    from_end: name == "nth-last-child",
                })
            }
            _ => Err(self.error(format!("unknown pseudo-class :{}()", name))),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-' || c == '\\' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii()
}

/// Parse `An+B` microsyntax (`odd`, `even`, `3`, `2n+1`, `-n+3`).
fn parse_an_plus_b(text: &str) -> Option<(i32, i32)> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match compact.as_str() {
        "odd" => return Some((2, 1)),
        "even" => return Some((2, 0)),
        _ => {}
    }
    let Some(n_pos) = compact.find('n') else {
        return compact.parse().ok().map(|b| (0, b));
    };
    let a = match &compact[..n_pos] {
        "" | "+" => 1,
        "-" => -1,
        digits => digits.parse().ok()?,
    };
    let rest = &compact[n_pos + 1..];
    let b = if rest.is_empty() {
        0
    } else {
        rest.strip_prefix('+').unwrap_or(rest).parse().ok()?
    };
    Some((a, b))
}

/// Whether `element` matches any selector of `list`.
pub fn matches_any(element: &NodeRef, list: &[ComplexSelector]) -> bool {
    list.iter().any(|selector| matches_complex(element, selector))
}

pub fn matches_complex(element: &NodeRef, selector: &ComplexSelector) -> bool {
    match selector.parts.len() {
        0 => false,
        n => match_at(element, &selector.parts, n - 1, None),
    }
}

/// `element.matches(selector_text)`.
pub fn matches(
    element: &NodeRef,
    selector_text: &str,
    support: SelectorSupport,
) -> Result<bool, SelectorError> {
    let list = parse_selector_list(selector_text, support)?;
    Ok(matches_any(element, &list))
}

fn match_at(
    element: &NodeRef,
    parts: &[(Combinator, CompoundSelector)],
    index: usize,
    anchor: Option<&NodeRef>,
) -> bool {
    let (combinator, compound) = &parts[index];
    if !matches_compound(element, compound) {
        return false;
    }
    if index == 0 {
        return anchor
            .map(|anchor| relation_holds(anchor, element, *combinator))
            .unwrap_or(true);
    }
    match combinator {
        Combinator::Descendant => {
            let mut ancestor = parent_element(element);
            while let Some(current) = ancestor {
                if match_at(&current, parts, index - 1, anchor) {
                    return true;
                }
                ancestor = parent_element(&current);
            }
            false
        }
        Combinator::Child => parent_element(element)
            .map(|parent| match_at(&parent, parts, index - 1, anchor))
            .unwrap_or(false),
        Combinator::AdjacentSibling => previous_element_sibling(element)
            .map(|sibling| match_at(&sibling, parts, index - 1, anchor))
            .unwrap_or(false),
        Combinator::GeneralSibling => preceding_siblings(element)
            .iter()
            .any(|sibling| match_at(sibling, parts, index - 1, anchor)),
    }
}

fn relation_holds(anchor: &NodeRef, element: &NodeRef, combinator: Combinator) -> bool {
    match combinator {
        Combinator::Descendant => {
            let mut ancestor = parent_element(element);
            while let Some(current) = ancestor {
                if Rc::ptr_eq(&current, anchor) {
                    return true;
                }
                ancestor = parent_element(&current);
            }
            false
        }
        Combinator::Child => parent_element(element)
            .map(|parent| Rc::ptr_eq(&parent, anchor))
            .unwrap_or(false),
        Combinator::AdjacentSibling => previous_element_sibling(element)
            .map(|sibling| Rc::ptr_eq(&sibling, anchor))
            .unwrap_or(false),
        Combinator::GeneralSibling => preceding_siblings(element)
            .iter()
            .any(|sibling| Rc::ptr_eq(sibling, anchor)),
    }
}

fn preceding_siblings(element: &NodeRef) -> Vec<NodeRef> {
    let Some(parent) = parent_node(element) else {
        return Vec::new();
    };
    let siblings = element_children(&parent);
    match siblings.iter().position(|s| Rc::ptr_eq(s, element)) {
        Some(pos) => siblings[..pos].to_vec(),
        None => Vec::new(),
    }
}

fn has_relative_match(anchor: &NodeRef, relative: &ComplexSelector) -> bool {
    let Some((leading, _)) = relative.parts.first() else {
        return false;
    };
    let candidates = match leading {
        Combinator::Descendant | Combinator::Child => descendant_elements(anchor),
        Combinator::AdjacentSibling | Combinator::GeneralSibling => {
            let mut following = Vec::new();
            let mut sibling = next_element_sibling(anchor);
            while let Some(current) = sibling {
                following.push(Rc::clone(&current));
                following.extend(descendant_elements(&current));
                sibling = next_element_sibling(&current);
            }
            following
        }
    };
    let last = relative.parts.len() - 1;
    candidates
        .iter()
        .any(|candidate| match_at(candidate, &relative.parts, last, Some(anchor)))
}

fn matches_compound(element: &NodeRef, compound: &CompoundSelector) -> bool {
    compound
        .simple
        .iter()
        .all(|simple| matches_simple(element, simple))
}

fn matches_simple(element: &NodeRef, simple: &SimpleSelector) -> bool {
    match simple {
        SimpleSelector::PseudoClass(pseudo) => return matches_pseudo_class(element, pseudo),
        SimpleSelector::PseudoElement(_) => return false,
        _ => {}
    }
    let node = element.borrow();
    let Some(elem) = node.as_element() else {
        return false;
    };
    match simple {
        SimpleSelector::Universal => true,
        SimpleSelector::Type(tag) => elem.tag.eq_ignore_ascii_case(tag),
        SimpleSelector::Id(id) => elem.id() == Some(id.as_str()),
        SimpleSelector::Class(class_name) => elem.has_class(class_name),
        SimpleSelector::Attribute(attribute) => elem
            .attr(&attribute.name)
            .map(|actual| matches_attribute(actual, attribute))
            .unwrap_or(false),
        SimpleSelector::PseudoClass(_) | SimpleSelector::PseudoElement(_) => false,
    }
}

fn matches_attribute(actual: &str, selector: &AttributeSelector) -> bool {
    let Some(operator) = selector.operator else {
        return true;
    };
    let (actual, expected) = if selector.case_insensitive {
        (actual.to_lowercase(), selector.value.to_lowercase())
    } else {
        (actual.to_string(), selector.value.clone())
    };
    match operator {
        AttributeOperator::Exact => actual == expected,
        AttributeOperator::Includes => {
            !expected.is_empty() && actual.split_whitespace().any(|word| word == expected)
        }
        AttributeOperator::DashMatch => {
            actual == expected || actual.starts_with(&format!("{}-", expected))
        }
        AttributeOperator::Prefix => !expected.is_empty() && actual.starts_with(&expected),
        AttributeOperator::Suffix => !expected.is_empty() && actual.ends_with(&expected),
        AttributeOperator::Substring => !expected.is_empty() && actual.contains(&expected),
    }
}

fn same_tag(a: &NodeRef, b: &NodeRef) -> bool {
    match (a.borrow().as_element(), b.borrow().as_element()) {
        (Some(x), Some(y)) => x.tag.eq_ignore_ascii_case(&y.tag),
        _ => false,
    }
}

fn matches_pseudo_class(element: &NodeRef, pseudo: &PseudoClass) -> bool {
    match pseudo {
        PseudoClass::Root => parent_element(element).is_none() && parent_node(element).is_some(),
        PseudoClass::FirstChild => {
            parent_node(element).is_some() && previous_element_sibling(element).is_none()
        }
        PseudoClass::LastChild => {
            parent_node(element).is_some() && next_element_sibling(element).is_none()
        }
        PseudoClass::OnlyChild => {
            parent_node(element).is_some()
                && previous_element_sibling(element).is_none()
                && next_element_sibling(element).is_none()
        }
        PseudoClass::FirstOfType => {
            parent_node(element).is_some()
                && !preceding_siblings(element)
                    .iter()
                    .any(|sibling| same_tag(sibling, element))
        }
        PseudoClass::LastOfType => {
            let mut sibling = next_element_sibling(element);
            while let Some(current) = sibling {
                if same_tag(&current, element) {
                    return false;
                }
                sibling = next_element_sibling(&current);
            }
            parent_node(element).is_some()
        }
        PseudoClass::Empty => element
            .borrow()
            .children()
            .iter()
            .all(|child| matches!(*child.borrow(), Node::Comment(_))),
        PseudoClass::NthChild { a, b, from_end } => {
            let Some(parent) = parent_node(element) else {
                return false;
            };
            let siblings = element_children(&parent);
            let Some(pos) = siblings.iter().position(|s| Rc::ptr_eq(s, element)) else {
                return false;
            };
            let index = if *from_end {
                (siblings.len() - pos) as i32
            } else {
                pos as i32 + 1
            };
            if *a == 0 {
                index == *b
            } else {
                let diff = index - b;
                diff % a == 0 && diff / a >= 0
            }
        }
        PseudoClass::Not(list) => !matches_any(element, list),
        PseudoClass::Is(list) | PseudoClass::Where(list) => matches_any(element, list),
        PseudoClass::Has(list) => list
            .iter()
            .any(|relative| has_relative_match(element, relative)),
        PseudoClass::Dynamic(_) => false,
    }
}

/// Parses each distinct selector text once and reuses the result.
pub struct SelectorMatcher {
    support: SelectorSupport,
    cache: RefCell<HashMap<String, Rc<Result<Vec<ComplexSelector>, SelectorError>>>>,
}

impl SelectorMatcher {
    pub fn new(support: SelectorSupport) -> Self {
        SelectorMatcher {
            support,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn support(&self) -> SelectorSupport {
        self.support
    }

    pub fn matches(&self, element: &NodeRef, selector_text: &str) -> Result<bool, SelectorError> {
        let parsed = self.parsed(selector_text);
        match &*parsed {
            Ok(list) => Ok(matches_any(element, list)),
            Err(err) => Err(err.clone()),
        }
    }

    fn parsed(&self, selector_text: &str) -> Rc<Result<Vec<ComplexSelector>, SelectorError>> {
        if let Some(hit) = self.cache.borrow().get(selector_text) {
            return Rc::clone(hit);
        }
        let parsed = Rc::new(parse_selector_list(selector_text, self.support));
        self.cache
            .borrow_mut()
            .insert(selector_text.to_string(), Rc::clone(&parsed));
        parsed
    }
}

fn find_function(selector: &str, name: &str) -> Option<(usize, usize)> {
    let needle = format!(":{}(", name);
    let start = selector.to_ascii_lowercase().find(&needle)?;
    let open = start + needle.len() - 1;
    let close = matching_paren(selector, open)?;
    Some((start, close))
}

/// Expand `:is()` and `:where()` into the cartesian product of their
/// branches and degrade `:has(...)` to a wildcard, producing selectors an
/// engine without those functions can still evaluate.
pub fn expand_selector_functions(selector: &str) -> Vec<String> {
    let mut queue = vec![selector.trim().to_string()];
    let mut out: Vec<String> = Vec::new();
    while let Some(current) = queue.pop() {
        let found = find_function(&current, "is")
            .map(|span| (span, "is".len()))
            .or_else(|| find_function(&current, "where").map(|span| (span, "where".len())));
        if let Some(((start, close), name_len)) = found {
            let before = &current[..start];
            let inside = &current[start + name_len + 2..close];
            let after = &current[close + 1..];
            for option in split_top_level(inside, ',') {
                let option = option.trim();
                if !option.is_empty() {
                    queue.push(format!("{}{}{}", before, option, after).trim().to_string());
                }
            }
            continue;
        }
        let sanitized = strip_has(&current);
        if !out.contains(&sanitized) {
            out.push(sanitized);
        }
    }
    out
}

fn strip_has(selector: &str) -> String {
    let mut current = selector.to_string();
    while let Some((start, close)) = find_function(&current, "has") {
        let attached = current[..start]
            .chars()
            .next_back()
            .map(|c| !c.is_whitespace() && !matches!(c, '>' | '+' | '~' | '(' | ','))
            .unwrap_or(false);
        let replacement = if attached { "" } else { "*" };
        current = format!("{}{}{}", &current[..start], replacement, &current[close + 1..]);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::dom_tree::Document;
    use crate::parser::html::create_dom_tree;

    const NO_FUNCTIONS: SelectorSupport = SelectorSupport {
        is_where: false,
        has: false,
    };

    fn element(html: &str, id: &str) -> (Document, NodeRef) {
        let doc = create_dom_tree(html);
        let found = doc.get_element_by_id(id).unwrap();
        (doc, found)
    }

    #[test]
    fn test_compound_and_combinators() {
        let (_doc, target) = element(
            r#"<div class="a"><ul id="list"><li class="x" data-k="v-1">1</li><li id="t" class="x y">2</li></ul></div>"#,
            "t",
        );
        for selector in [
            "li",
            ".x.y",
            "#t",
            "div li",
            "ul > li.y",
            ".x + .y",
            "li ~ #t",
            "div.a > ul#list > li:last-child",
            "li:nth-child(2)",
            "li:nth-child(even)",
            "[class~=y]",
            "ul li:not(.z)",
        ] {
            assert_eq!(matches(&target, selector, SelectorSupport::ALL), Ok(true), "{}", selector);
        }
        for selector in ["div > li", ".y + .x", "li:first-child", "p, span", "li::before", "li:hover"] {
            assert_eq!(matches(&target, selector, SelectorSupport::ALL), Ok(false), "{}", selector);
        }
    }

    #[test]
    fn test_attribute_operators() {
        let (_doc, target) = element(r#"<a id="t" href="https://x.test/a.css" lang="en-US">x</a>"#, "t");
        for selector in [
            "[href]",
            r#"[href^="https:"]"#,
            "[href$='.css']",
            "[href*=x]",
            "[lang|=en]",
            "[LANG=EN-us i]",
        ] {
            assert_eq!(matches(&target, selector, SelectorSupport::ALL), Ok(true), "{}", selector);
        }
    }

    #[test]
    fn test_is_where_has() {
        let (_doc, target) = element(
            r#"<section id="t"><h2 class="title">T</h2><p>body</p></section>"#,
            "t",
        );
        assert_eq!(matches(&target, ":is(section, article)", SelectorSupport::ALL), Ok(true));
        assert_eq!(matches(&target, "section:has(> .title)", SelectorSupport::ALL), Ok(true));
        assert_eq!(matches(&target, "section:has(.title + p)", SelectorSupport::ALL), Ok(true));
        assert_eq!(matches(&target, "section:has(> p > .title)", SelectorSupport::ALL), Ok(false));
        assert!(matches(&target, ":where(section)", NO_FUNCTIONS).is_err());
        assert!(matches(&target, "section:has(p)", NO_FUNCTIONS).is_err());
        assert!(matches(&target, "section:not(.a)", NO_FUNCTIONS).is_ok());
    }

    #[test]
    fn test_invalid_selectors_are_errors() {
        let (_doc, target) = element(r#"<p id="t">x</p>"#, "t");
        for selector in ["", "p >", "p,", "[href", ":unknown-thing", "p..x"] {
            assert!(matches(&target, selector, SelectorSupport::ALL).is_err(), "{}", selector);
        }
    }

    #[test]
    fn test_escaped_class_names() {
        let (_doc, target) = element(r#"<p id="t" class="hover:bg-red md:w-1/2">x</p>"#, "t");
        assert_eq!(matches(&target, r".hover\:bg-red", SelectorSupport::ALL), Ok(true));
        assert_eq!(matches(&target, r".md\:w-1\/2", SelectorSupport::ALL), Ok(true));
    }

    #[test]
    fn test_expand_selector_functions() {
        let mut expanded = expand_selector_functions(":is(.a, .b) :where(p, li)");
        expanded.sort();
        assert_eq!(expanded, vec![".a li", ".a p", ".b li", ".b p"]);
        assert_eq!(expand_selector_functions("div:has(> img) span"), vec!["div span"]);
        assert_eq!(expand_selector_functions(":has(.x)"), vec!["*"]);
    }

    #[test]
    fn test_matcher_caches_errors() {
        let (_doc, target) = element(r#"<p id="t">x</p>"#, "t");
        let matcher = SelectorMatcher::new(NO_FUNCTIONS);
        assert!(matcher.matches(&target, ":is(p)").is_err());
        assert!(matcher.matches(&target, ":is(p)").is_err());
        assert_eq!(matcher.matches(&target, "p"), Ok(true));
    }
}
