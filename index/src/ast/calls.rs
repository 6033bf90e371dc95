//! Call-site extraction, classification, and chain linking.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use tree_sitter::Node;

use crate::types::Span;

/// Classification of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Function,
    Method,
    Constructor,
    Super,
    Dynamic,
}

/// Position of a call inside a method chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallChain {
    /// Index of the preceding call in the same chain, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<usize>,
    /// Index of the following call, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<usize>,
    /// 0 for chain heads, `previous.position + 1` otherwise.
    pub position: u32,
}

/// One extracted call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSite {
    /// Enclosing function or `Class.method`; `None` at top level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    pub callee: String,
    pub kind: CallKind,
    pub arg_count: u32,
    pub span: Span,
    #[serde(default)]
    pub chain: CallChain,
}

/// Node kinds that denote a call, across the supported grammars.
fn is_call_node(kind: &str) -> bool {
    matches!(
        kind,
        "call_expression" | "new_expression" | "call" | "macro_invocation"
    )
}

fn span_of(node: Node<'_>) -> Span {
    Span {
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        start_col: node.start_position().column as u32,
        end_col: node.end_position().column as u32,
        start_byte: node.start_byte() as u32,
        end_byte: node.end_byte() as u32,
    }
}

fn node_text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// The expression in function position of a call node.
fn function_child<'a>(node: Node<'a>) -> Option<Node<'a>> {
    node.child_by_field_name("function")
        .or_else(|| node.child_by_field_name("constructor"))
}

/// Classify a call node into one of the five kinds.
pub fn classify_call(node: Node<'_>) -> CallKind {
    if node.kind() == "new_expression" {
        return CallKind::Constructor;
    }
    let Some(func) = function_child(node) else {
        return CallKind::Dynamic;
    };
    match func.kind() {
        "super" => CallKind::Super,
        "member_expression" | "attribute" | "field_expression" | "scoped_identifier" => {
            CallKind::Method
        }
        "subscript_expression" | "subscript" => CallKind::Dynamic,
        "identifier" => CallKind::Function,
        _ => CallKind::Dynamic,
    }
}

/// Extract the callee name from a call node.
///
/// Member and attribute access yield the rightmost property identifier;
/// `new X(...)` yields the constructor name; a bare identifier yields
/// itself. Indeterminate callees become `"<dynamic>"` or `"<unknown>"`.
pub fn callee_name(node: Node<'_>, source: &str) -> String {
    if node.kind() == "new_expression" {
        if let Some(ctor) = function_child(node) {
            let name = rightmost_identifier(ctor, source);
            if !name.is_empty() {
                return name;
            }
        }
        return "<unknown>".to_string();
    }
    let Some(func) = function_child(node) else {
        return "<unknown>".to_string();
    };
    match func.kind() {
        "identifier" => node_text(func, source).to_string(),
        "super" => "super".to_string(),
        "member_expression" | "attribute" | "field_expression" | "scoped_identifier" => {
            let name = rightmost_identifier(func, source);
            if name.is_empty() {
                "<unknown>".to_string()
            } else {
                name
            }
        }
        "subscript_expression" | "subscript" => "<dynamic>".to_string(),
        _ => "<unknown>".to_string(),
    }
}

/// Rightmost property/attribute identifier of a member access expression.
fn rightmost_identifier(node: Node<'_>, source: &str) -> String {
    if let Some(prop) = node
        .child_by_field_name("property")
        .or_else(|| node.child_by_field_name("attribute"))
        .or_else(|| node.child_by_field_name("field"))
        .or_else(|| node.child_by_field_name("name"))
    {
        return node_text(prop, source).to_string();
    }
    match node.kind() {
        "identifier" | "type_identifier" | "property_identifier" => {
            node_text(node, source).to_string()
        }
        _ => {
            // Fall back to the last identifier-like child.
            let mut cursor = node.walk();
            let mut last = String::new();
            for child in node.children(&mut cursor) {
                let found = rightmost_identifier(child, source);
                if !found.is_empty() {
                    last = found;
                }
            }
            last
        }
    }
}

/// Count the non-punctuation children of the call's argument list.
pub fn argument_count(node: Node<'_>) -> u32 {
    let Some(args) = node.child_by_field_name("arguments") else {
        return 0;
    };
    let mut count = 0;
    let mut cursor = args.walk();
    for child in args.children(&mut cursor) {
        if child.is_named() {
            count += 1;
        }
    }
    count
}

/// Collect every call under `root`, linking method chains.
///
/// Two passes: first gather all call nodes, then resolve `previous`/`next`
/// by node identity and compute positions from chain heads.
pub fn extract_calls(root: Node<'_>, source: &str, caller: Option<&str>) -> Vec<CallSite> {
    let mut nodes = Vec::new();
    collect_call_nodes(root, &mut nodes);

    // Node identity -> index in collection order.
    let by_id: HashMap<usize, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id(), i))
        .collect();

    let mut sites: Vec<CallSite> = nodes
        .iter()
        .map(|&node| CallSite {
            caller: caller.map(|c| c.to_string()),
            callee: callee_name(node, source),
            kind: classify_call(node),
            arg_count: argument_count(node),
            span: span_of(node),
            chain: CallChain::default(),
        })
        .collect();

    // Link previous: a call whose receiver object is itself a call.
    for (i, &node) in nodes.iter().enumerate() {
        if let Some(func) = function_child(node) {
            if let Some(object) = func
                .child_by_field_name("object")
                .or_else(|| func.child_by_field_name("value"))
            {
                if is_call_node(object.kind()) {
                    if let Some(&prev) = by_id.get(&object.id()) {
                        sites[i].chain.previous = Some(prev);
                        sites[prev].chain.next = Some(i);
                    }
                }
            }
        }
    }

    // Positions: walk forward from chain heads.
    for head in 0..sites.len() {
        if sites[head].chain.previous.is_some() {
            continue;
        }
        sites[head].chain.position = 0;
        let mut current = head;
        let mut position = 0u32;
        while let Some(next) = sites[current].chain.next {
            position += 1;
            sites[next].chain.position = position;
            current = next;
        }
    }

    sites
}

fn collect_call_nodes<'a>(node: Node<'a>, out: &mut Vec<Node<'a>>) {
    if is_call_node(node.kind()) {
        out.push(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_call_nodes(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::parser::SyntaxParser;

    fn parse_js(source: &str) -> tree_sitter::Tree {
        SyntaxParser::new()
            .parse(source, Language::JavaScript)
            .unwrap()
    }

    fn calls_of(source: &str) -> Vec<CallSite> {
        let tree = parse_js(source);
        extract_calls(tree.root_node(), source, None)
    }

    #[test]
    fn test_plain_call_is_function_kind() {
        let calls = calls_of("doWork(1, 2);");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, CallKind::Function);
        assert_eq!(calls[0].callee, "doWork");
        assert_eq!(calls[0].arg_count, 2);
    }

    #[test]
    fn test_member_call_is_method_kind() {
        let calls = calls_of("obj.save();");
        assert_eq!(calls[0].kind, CallKind::Method);
        assert_eq!(calls[0].callee, "save");
    }

    #[test]
    fn test_new_is_constructor_kind() {
        let calls = calls_of("const s = new Store(path);");
        let ctor = calls.iter().find(|c| c.kind == CallKind::Constructor);
        let ctor = ctor.expect("constructor call found");
        assert_eq!(ctor.callee, "Store");
        assert_eq!(ctor.arg_count, 1);
    }

    #[test]
    fn test_subscript_call_is_dynamic() {
        let calls = calls_of("handlers[name]();");
        assert_eq!(calls[0].kind, CallKind::Dynamic);
        assert_eq!(calls[0].callee, "<dynamic>");
    }

    #[test]
    fn test_super_call() {
        let source = "class A extends B { constructor() { super(1); } }";
        let calls = calls_of(source);
        let sup = calls.iter().find(|c| c.kind == CallKind::Super).unwrap();
        assert_eq!(sup.callee, "super");
    }

    #[test]
    fn test_chain_positions() {
        let calls = calls_of("fetch(url).then(parse).catch(log);");
        // Outer-to-inner collection order; find by callee.
        let fetch = calls.iter().find(|c| c.callee == "fetch").unwrap();
        let then = calls.iter().find(|c| c.callee == "then").unwrap();
        let catch = calls.iter().find(|c| c.callee == "catch").unwrap();

        assert_eq!(fetch.chain.position, 0);
        assert!(fetch.chain.previous.is_none());
        assert_eq!(then.chain.position, 1);
        assert_eq!(catch.chain.position, 2);
        assert!(catch.chain.next.is_none());
    }

    #[test]
    fn test_caller_attribution() {
        let source = "function outer() { inner(); }";
        let tree = parse_js(source);
        let calls = extract_calls(tree.root_node(), source, Some("outer"));
        assert_eq!(calls[0].caller.as_deref(), Some("outer"));
    }
}
