//! Tree walkers that populate the document builder per language family.

use tree_sitter::Node;
use tree_sitter::Tree;

use crate::ast::builder::DocumentBuilder;
use crate::ast::calls::extract_calls;
use crate::ast::document::AstDocument;
use crate::ast::document::ClassSymbol;
use crate::ast::document::Comment;
use crate::ast::document::CommentKind;
use crate::ast::document::ComponentSymbol;
use crate::ast::document::ConstantSymbol;
use crate::ast::document::EnumSymbol;
use crate::ast::document::ExportStatement;
use crate::ast::document::FunctionSymbol;
use crate::ast::document::ImportStatement;
use crate::ast::document::InterfaceSymbol;
use crate::ast::document::ModuleSymbol;
use crate::ast::document::PropertySymbol;
use crate::ast::document::SymbolBase;
use crate::ast::document::TypeAliasSymbol;
use crate::language::Language;
use crate::parser::extract_errors;
use crate::types::Span;

/// Build a full [`AstDocument`] from a parsed tree.
pub fn build_document(
    path: &str,
    source: &str,
    language: Language,
    tree: &Tree,
    parser_version: &str,
) -> AstDocument {
    let mut builder = DocumentBuilder::new(path, language, source.len() as u64);
    let root = tree.root_node();

    match language {
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            walk_js(root, source, language, &mut builder, false);
        }
        Language::Python => walk_py(root, source, &mut builder),
        Language::Rust => walk_rs(root, source, &mut builder),
    }

    collect_comments(root, source, language, &mut builder);
    builder.add_errors(extract_errors(tree, source));

    let line_count = source.lines().count().max(1) as u32;
    builder.build(line_count, parser_version)
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

fn text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| text(n, source).to_string())
}

/// Signature: source text from the declaration start to its body.
fn signature_of(node: Node<'_>, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let start = node.start_byte();
    let end = body.start_byte().min(source.len());
    if start >= end {
        return None;
    }
    let sig = source[start..end].trim();
    if sig.is_empty() {
        None
    } else {
        Some(sig.to_string())
    }
}

fn has_child_token(node: Node<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    node.children(&mut cursor).any(|c| c.kind() == token)
}

fn named_param_texts(node: Node<'_>, source: &str) -> Vec<String> {
    let Some(params) = node.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut cursor = params.walk();
    params
        .children(&mut cursor)
        .filter(|c| c.is_named())
        .map(|c| text(c, source).to_string())
        .collect()
}

fn contains_kind(node: Node<'_>, kinds: &[&str]) -> bool {
    if kinds.contains(&node.kind()) {
        return true;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if contains_kind(child, kinds) {
            return true;
        }
    }
    false
}

fn decorators_of(node: Node<'_>, source: &str) -> Vec<String> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|c| c.kind() == "decorator")
        .map(|c| text(c, source).trim_start_matches('@').to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// JavaScript / TypeScript
// ---------------------------------------------------------------------------

fn walk_js(
    node: Node<'_>,
    source: &str,
    language: Language,
    builder: &mut DocumentBuilder,
    exported: bool,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "export_statement" => handle_js_export(child, source, language, builder),
            "import_statement" => handle_js_import(child, source, builder),
            "function_declaration" | "generator_function_declaration" => {
                handle_js_function(child, source, builder, exported);
            }
            "class_declaration" => handle_js_class(child, source, builder, exported),
            "interface_declaration" => handle_ts_interface(child, source, builder, exported),
            "type_alias_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    builder.add_type_alias(TypeAliasSymbol {
                        base: SymbolBase {
                            name,
                            span: span_of(child),
                            exported,
                            ..Default::default()
                        },
                    });
                }
            }
            "enum_declaration" => handle_ts_enum(child, source, builder, exported),
            "lexical_declaration" | "variable_declaration" => {
                handle_js_variable(child, source, language, builder, exported);
            }
            "internal_module" | "module" => {
                if let Some(name) = field_text(child, "name", source) {
                    builder.add_namespace(ModuleSymbol {
                        base: SymbolBase {
                            name,
                            span: span_of(child),
                            exported,
                            ..Default::default()
                        },
                    });
                }
                if let Some(body) = child.child_by_field_name("body") {
                    walk_js(body, source, language, builder, exported);
                }
            }
            // Recovery: declarations after a syntax error still register.
            "statement_block" | "program" | "ERROR" => {
                walk_js(child, source, language, builder, exported);
            }
            _ => {}
        }
    }
}

fn handle_js_export(node: Node<'_>, source: &str, language: Language, builder: &mut DocumentBuilder) {
    let re_export_source = node
        .child_by_field_name("source")
        .map(|s| strip_quotes(text(s, source)));

    let mut specifiers = Vec::new();
    if let Some(decl) = node.child_by_field_name("declaration") {
        // `export function f() {}` and friends: recurse as exported.
        if let Some(name) = field_text(decl, "name", source) {
            specifiers.push(name);
        }
        walk_declaration_js(decl, source, language, builder, true);
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "export_clause" {
                let mut inner = child.walk();
                for spec in child.children(&mut inner) {
                    if spec.kind() == "export_specifier" {
                        if let Some(name) = field_text(spec, "name", source) {
                            specifiers.push(name);
                        }
                    }
                }
            }
        }
    }

    builder.add_export(ExportStatement {
        source: re_export_source,
        specifiers,
        span: span_of(node),
    });
}

fn walk_declaration_js(
    decl: Node<'_>,
    source: &str,
    language: Language,
    builder: &mut DocumentBuilder,
    exported: bool,
) {
    match decl.kind() {
        "function_declaration" | "generator_function_declaration" => {
            handle_js_function(decl, source, builder, exported);
        }
        "class_declaration" => handle_js_class(decl, source, builder, exported),
        "interface_declaration" => handle_ts_interface(decl, source, builder, exported),
        "type_alias_declaration" => {
            if let Some(name) = field_text(decl, "name", source) {
                builder.add_type_alias(TypeAliasSymbol {
                    base: SymbolBase {
                        name,
                        span: span_of(decl),
                        exported,
                        ..Default::default()
                    },
                });
            }
        }
        "enum_declaration" => handle_ts_enum(decl, source, builder, exported),
        "lexical_declaration" | "variable_declaration" => {
            handle_js_variable(decl, source, language, builder, exported);
        }
        _ => {}
    }
}

fn handle_js_import(node: Node<'_>, source: &str, builder: &mut DocumentBuilder) {
    let Some(src) = node.child_by_field_name("source") else {
        return;
    };
    let mut specifiers = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "import_clause" {
            continue;
        }
        let mut inner = child.walk();
        for part in child.children(&mut inner) {
            match part.kind() {
                "identifier" => specifiers.push(text(part, source).to_string()),
                "named_imports" => {
                    let mut spec_cursor = part.walk();
                    for spec in part.children(&mut spec_cursor) {
                        if spec.kind() == "import_specifier" {
                            if let Some(name) = field_text(spec, "name", source) {
                                specifiers.push(name);
                            }
                        }
                    }
                }
                "namespace_import" => {
                    let mut ns = part.walk();
                    for id in part.children(&mut ns) {
                        if id.kind() == "identifier" {
                            specifiers.push(text(id, source).to_string());
                        }
                    }
                }
                _ => {}
            }
        }
    }
    builder.add_import(ImportStatement {
        source: strip_quotes(text(src, source)),
        specifiers,
        span: span_of(node),
    });
}

fn handle_js_function(node: Node<'_>, source: &str, builder: &mut DocumentBuilder, exported: bool) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };
    let is_async = has_child_token(node, "async");
    let is_generator = node.kind() == "generator_function_declaration" || has_child_token(node, "*");

    let mut symbol = FunctionSymbol {
        base: SymbolBase {
            name: name.clone(),
            span: span_of(node),
            signature: signature_of(node, source),
            exported,
            decorators: decorators_of(node, source),
            ..Default::default()
        },
        is_async,
        is_generator,
        params: named_param_texts(node, source),
        ..Default::default()
    };

    if let Some(body) = node.child_by_field_name("body") {
        builder.add_calls(extract_calls(body, source, Some(&name)));
        // Nested declarations still register as document symbols; the
        // chunker later folds them into the enclosing chunk by span.
        walk_js(body, source, Language::JavaScript, builder, false);
    }

    // A capitalized function that renders JSX is also a component.
    if is_component_candidate(&name, node) {
        builder.add_component(ComponentSymbol {
            base: symbol.base.clone(),
        });
    }
    symbol.base.decorators.dedup();
    builder.add_function(symbol);
}

fn is_component_candidate(name: &str, node: Node<'_>) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && contains_kind(node, &["jsx_element", "jsx_self_closing_element"])
}

fn handle_js_class(node: Node<'_>, source: &str, builder: &mut DocumentBuilder, exported: bool) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };
    let mut class = ClassSymbol {
        base: SymbolBase {
            name: name.clone(),
            span: span_of(node),
            exported,
            decorators: decorators_of(node, source),
            ..Default::default()
        },
        inheritance: js_heritage(node, source),
        ..Default::default()
    };

    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for member in body.children(&mut cursor) {
            match member.kind() {
                "method_definition" => {
                    let Some(method_name) = field_text(member, "name", source) else {
                        continue;
                    };
                    let qualified = format!("{name}.{method_name}");
                    let method = FunctionSymbol {
                        base: SymbolBase {
                            name: method_name.clone(),
                            span: span_of(member),
                            signature: signature_of(member, source),
                            visibility: js_accessibility(member, source),
                            decorators: decorators_of(member, source),
                            ..Default::default()
                        },
                        is_async: has_child_token(member, "async"),
                        is_generator: has_child_token(member, "*"),
                        params: named_param_texts(member, source),
                        ..Default::default()
                    };
                    if let Some(body) = member.child_by_field_name("body") {
                        builder.add_calls(extract_calls(body, source, Some(&qualified)));
                    }
                    class.methods.insert(method_name, method);
                }
                "field_definition" | "public_field_definition" => {
                    let Some(prop_name) = field_text(member, "name", source) else {
                        continue;
                    };
                    class.properties.insert(
                        prop_name.clone(),
                        PropertySymbol {
                            base: SymbolBase {
                                name: prop_name,
                                span: span_of(member),
                                visibility: js_accessibility(member, source),
                                ..Default::default()
                            },
                            is_static: has_child_token(member, "static"),
                        },
                    );
                }
                _ => {}
            }
        }
    }
    builder.add_class(class);
}

fn js_accessibility(node: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .find(|c| c.kind() == "accessibility_modifier")
        .map(|c| text(c, source).to_string())
}

fn js_heritage(node: Node<'_>, source: &str) -> Vec<String> {
    let mut parents = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "class_heritage" | "extends_clause") {
            collect_identifiers(child, source, &mut parents);
        }
    }
    parents
}

fn collect_identifiers(node: Node<'_>, source: &str, out: &mut Vec<String>) {
    match node.kind() {
        "identifier" | "type_identifier" => {
            let name = text(node, source).to_string();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                collect_identifiers(child, source, out);
            }
        }
    }
}

fn handle_ts_interface(node: Node<'_>, source: &str, builder: &mut DocumentBuilder, exported: bool) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };
    let mut extends = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "extends_clause" | "extends_type_clause") {
            collect_identifiers(child, source, &mut extends);
        }
    }
    builder.add_interface(InterfaceSymbol {
        base: SymbolBase {
            name,
            span: span_of(node),
            exported,
            ..Default::default()
        },
        extends,
    });
}

fn handle_ts_enum(node: Node<'_>, source: &str, builder: &mut DocumentBuilder, exported: bool) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };
    let mut values = Vec::new();
    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for member in body.children(&mut cursor) {
            match member.kind() {
                "enum_assignment" => {
                    if let Some(n) = field_text(member, "name", source) {
                        values.push(n);
                    }
                }
                "property_identifier" => values.push(text(member, source).to_string()),
                _ => {}
            }
        }
    }
    builder.add_enum(EnumSymbol {
        base: SymbolBase {
            name,
            span: span_of(node),
            exported,
            ..Default::default()
        },
        values,
    });
}

fn handle_js_variable(
    node: Node<'_>,
    source: &str,
    language: Language,
    builder: &mut DocumentBuilder,
    exported: bool,
) {
    let is_const = node
        .child(0)
        .is_some_and(|c| text(c, source) == "const");
    let mut cursor = node.walk();
    for declarator in node.children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(name) = field_text(declarator, "name", source) else {
            continue;
        };
        let value = declarator.child_by_field_name("value");
        let function_value = value.filter(|v| {
            matches!(
                v.kind(),
                "arrow_function" | "function_expression" | "function" | "generator_function"
            )
        });

        if let Some(value) = function_value {
            let qualified = name.clone();
            if let Some(body) = value.child_by_field_name("body") {
                builder.add_calls(extract_calls(body, source, Some(&qualified)));
            }
            let symbol = FunctionSymbol {
                base: SymbolBase {
                    name: name.clone(),
                    span: span_of(declarator),
                    signature: Some(
                        source[declarator.start_byte()
                            ..value
                                .child_by_field_name("body")
                                .map(|b| b.start_byte())
                                .unwrap_or(value.end_byte())
                                .min(source.len())]
                            .trim()
                            .trim_end_matches("=>")
                            .trim()
                            .to_string(),
                    ),
                    exported,
                    ..Default::default()
                },
                is_async: has_child_token(value, "async"),
                is_generator: value.kind() == "generator_function" || has_child_token(value, "*"),
                params: named_param_texts(value, source),
                ..Default::default()
            };
            if is_component_candidate(&name, declarator)
                && matches!(
                    language,
                    Language::Tsx | Language::JavaScript | Language::TypeScript
                )
            {
                builder.add_component(ComponentSymbol {
                    base: symbol.base.clone(),
                });
            }
            builder.add_function(symbol);
        } else if is_const {
            builder.add_constant(ConstantSymbol {
                base: SymbolBase {
                    name: name.clone(),
                    span: span_of(declarator),
                    exported,
                    ..Default::default()
                },
                value: value.map(|v| truncate_value(text(v, source))),
            });
        }
    }
}

fn truncate_value(value: &str) -> String {
    const MAX: usize = 120;
    if value.len() <= MAX {
        value.to_string()
    } else {
        let cut: String = value.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

fn strip_quotes(s: &str) -> String {
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn walk_py(node: Node<'_>, source: &str, builder: &mut DocumentBuilder) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_definition" => handle_py_function(child, source, builder, &[]),
            "class_definition" => handle_py_class(child, source, builder, &[]),
            "decorated_definition" => {
                let decorators: Vec<String> = {
                    let mut inner = child.walk();
                    child
                        .children(&mut inner)
                        .filter(|c| c.kind() == "decorator")
                        .map(|c| text(c, source).trim_start_matches('@').to_string())
                        .collect()
                };
                if let Some(def) = child.child_by_field_name("definition") {
                    match def.kind() {
                        "function_definition" => {
                            handle_py_function(def, source, builder, &decorators);
                        }
                        "class_definition" => handle_py_class(def, source, builder, &decorators),
                        _ => {}
                    }
                }
            }
            "import_statement" | "import_from_statement" => {
                handle_py_import(child, source, builder);
            }
            "expression_statement" => handle_py_assignment(child, source, builder),
            "ERROR" => walk_py(child, source, builder),
            _ => {}
        }
    }
}

fn py_docstring(body: Node<'_>, source: &str) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    Some(
        text(string, source)
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string(),
    )
}

fn handle_py_function(
    node: Node<'_>,
    source: &str,
    builder: &mut DocumentBuilder,
    decorators: &[String],
) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };
    let body = node.child_by_field_name("body");
    let doc = body.and_then(|b| py_docstring(b, source));
    let is_private = name.starts_with('_') && !name.starts_with("__");

    let symbol = FunctionSymbol {
        base: SymbolBase {
            name: name.clone(),
            span: span_of(node),
            signature: signature_of(node, source).map(|s| s.trim_end_matches(':').to_string()),
            doc,
            exported: !name.starts_with('_'),
            visibility: is_private.then(|| "private".to_string()),
            decorators: decorators.to_vec(),
        },
        is_async: has_child_token(node, "async"),
        is_generator: body.is_some_and(|b| contains_kind(b, &["yield"])),
        params: named_param_texts(node, source),
        ..Default::default()
    };
    if let Some(body) = body {
        builder.add_calls(extract_calls(body, source, Some(&name)));
    }
    builder.add_function(symbol);
}

fn handle_py_class(
    node: Node<'_>,
    source: &str,
    builder: &mut DocumentBuilder,
    decorators: &[String],
) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };
    let mut class = ClassSymbol {
        base: SymbolBase {
            name: name.clone(),
            span: span_of(node),
            exported: !name.starts_with('_'),
            decorators: decorators.to_vec(),
            ..Default::default()
        },
        ..Default::default()
    };
    if let Some(supers) = node.child_by_field_name("superclasses") {
        collect_identifiers(supers, source, &mut class.inheritance);
    }

    if let Some(body) = node.child_by_field_name("body") {
        class.base.doc = py_docstring(body, source);
        let mut cursor = body.walk();
        for member in body.children(&mut cursor) {
            let (def, member_decorators) = if member.kind() == "decorated_definition" {
                let decs: Vec<String> = {
                    let mut inner = member.walk();
                    member
                        .children(&mut inner)
                        .filter(|c| c.kind() == "decorator")
                        .map(|c| text(c, source).trim_start_matches('@').to_string())
                        .collect()
                };
                (member.child_by_field_name("definition"), decs)
            } else {
                (Some(member), Vec::new())
            };
            let Some(def) = def else { continue };
            if def.kind() != "function_definition" {
                continue;
            }
            let Some(method_name) = field_text(def, "name", source) else {
                continue;
            };
            let qualified = format!("{name}.{method_name}");
            let method_body = def.child_by_field_name("body");
            let method = FunctionSymbol {
                base: SymbolBase {
                    name: method_name.clone(),
                    span: span_of(def),
                    signature: signature_of(def, source)
                        .map(|s| s.trim_end_matches(':').to_string()),
                    doc: method_body.and_then(|b| py_docstring(b, source)),
                    visibility: (method_name.starts_with('_') && !method_name.starts_with("__"))
                        .then(|| "private".to_string()),
                    decorators: member_decorators,
                    ..Default::default()
                },
                is_async: has_child_token(def, "async"),
                is_generator: method_body.is_some_and(|b| contains_kind(b, &["yield"])),
                params: named_param_texts(def, source),
                ..Default::default()
            };
            if let Some(b) = method_body {
                builder.add_calls(extract_calls(b, source, Some(&qualified)));
            }
            class.methods.insert(method_name, method);
        }
    }
    builder.add_class(class);
}

fn handle_py_import(node: Node<'_>, source: &str, builder: &mut DocumentBuilder) {
    let span = span_of(node);
    if node.kind() == "import_from_statement" {
        let module = field_text(node, "module_name", source).unwrap_or_default();
        let mut specifiers = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if matches!(child.kind(), "dotted_name" | "aliased_import")
                && Some(text(child, source).to_string()) != Some(module.clone())
            {
                specifiers.push(text(child, source).to_string());
            }
        }
        builder.add_import(ImportStatement {
            source: module,
            specifiers,
            span,
        });
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if matches!(child.kind(), "dotted_name" | "aliased_import") {
                builder.add_import(ImportStatement {
                    source: text(child, source).to_string(),
                    specifiers: Vec::new(),
                    span,
                });
            }
        }
    }
}

fn handle_py_assignment(node: Node<'_>, source: &str, builder: &mut DocumentBuilder) {
    let Some(assign) = node.named_child(0).filter(|c| c.kind() == "assignment") else {
        return;
    };
    let Some(left) = assign.child_by_field_name("left") else {
        return;
    };
    if left.kind() != "identifier" {
        return;
    }
    let name = text(left, source).to_string();
    // Module-level constants follow the UPPER_SNAKE convention.
    if !name
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return;
    }
    builder.add_constant(ConstantSymbol {
        base: SymbolBase {
            name: name.clone(),
            span: span_of(assign),
            exported: true,
            ..Default::default()
        },
        value: assign
            .child_by_field_name("right")
            .map(|v| truncate_value(text(v, source))),
    });
}

// ---------------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------------

fn walk_rs(node: Node<'_>, source: &str, builder: &mut DocumentBuilder) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_item" => {
                let exported = has_visibility(child);
                if let Some(name) = field_text(child, "name", source) {
                    let body = child.child_by_field_name("body");
                    let symbol = FunctionSymbol {
                        base: SymbolBase {
                            name: name.clone(),
                            span: span_of(child),
                            signature: signature_of(child, source),
                            exported,
                            ..Default::default()
                        },
                        is_async: has_child_token(child, "async"),
                        params: named_param_texts(child, source),
                        ..Default::default()
                    };
                    if let Some(b) = body {
                        builder.add_calls(extract_calls(b, source, Some(&name)));
                    }
                    builder.add_function(symbol);
                }
            }
            "struct_item" => {
                if let Some(name) = field_text(child, "name", source) {
                    builder.add_class(ClassSymbol {
                        base: SymbolBase {
                            name,
                            span: span_of(child),
                            exported: has_visibility(child),
                            ..Default::default()
                        },
                        ..Default::default()
                    });
                }
            }
            "impl_item" => handle_rs_impl(child, source, builder),
            "trait_item" => {
                if let Some(name) = field_text(child, "name", source) {
                    builder.add_interface(InterfaceSymbol {
                        base: SymbolBase {
                            name,
                            span: span_of(child),
                            exported: has_visibility(child),
                            ..Default::default()
                        },
                        extends: Vec::new(),
                    });
                }
            }
            "type_item" => {
                if let Some(name) = field_text(child, "name", source) {
                    builder.add_type_alias(TypeAliasSymbol {
                        base: SymbolBase {
                            name,
                            span: span_of(child),
                            exported: has_visibility(child),
                            ..Default::default()
                        },
                    });
                }
            }
            "enum_item" => {
                if let Some(name) = field_text(child, "name", source) {
                    let mut values = Vec::new();
                    if let Some(body) = child.child_by_field_name("body") {
                        let mut inner = body.walk();
                        for variant in body.children(&mut inner) {
                            if variant.kind() == "enum_variant" {
                                if let Some(v) = field_text(variant, "name", source) {
                                    values.push(v);
                                }
                            }
                        }
                    }
                    builder.add_enum(EnumSymbol {
                        base: SymbolBase {
                            name,
                            span: span_of(child),
                            exported: has_visibility(child),
                            ..Default::default()
                        },
                        values,
                    });
                }
            }
            "const_item" | "static_item" => {
                if let Some(name) = field_text(child, "name", source) {
                    builder.add_constant(ConstantSymbol {
                        base: SymbolBase {
                            name,
                            span: span_of(child),
                            exported: has_visibility(child),
                            ..Default::default()
                        },
                        value: field_text(child, "value", source).map(|v| truncate_value(&v)),
                    });
                }
            }
            "use_declaration" => {
                if let Some(arg) = child.child_by_field_name("argument") {
                    builder.add_import(ImportStatement {
                        source: text(arg, source).to_string(),
                        specifiers: Vec::new(),
                        span: span_of(child),
                    });
                }
            }
            "mod_item" => {
                if let Some(name) = field_text(child, "name", source) {
                    builder.add_namespace(ModuleSymbol {
                        base: SymbolBase {
                            name,
                            span: span_of(child),
                            exported: has_visibility(child),
                            ..Default::default()
                        },
                    });
                }
                if let Some(body) = child.child_by_field_name("body") {
                    walk_rs(body, source, builder);
                }
            }
            "ERROR" => walk_rs(child, source, builder),
            _ => {}
        }
    }
}

fn has_visibility(node: Node<'_>) -> bool {
    has_child_token(node, "visibility_modifier")
}

fn handle_rs_impl(node: Node<'_>, source: &str, builder: &mut DocumentBuilder) {
    let Some(type_name) = field_text(node, "type", source) else {
        return;
    };
    // Generic arguments are not part of the class key.
    let type_name = type_name
        .split('<')
        .next()
        .unwrap_or(&type_name)
        .to_string();

    let mut methods = Vec::new();
    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for member in body.children(&mut cursor) {
            if member.kind() != "function_item" {
                continue;
            }
            let Some(method_name) = field_text(member, "name", source) else {
                continue;
            };
            let qualified = format!("{type_name}.{method_name}");
            if let Some(b) = member.child_by_field_name("body") {
                builder.add_calls(extract_calls(b, source, Some(&qualified)));
            }
            methods.push((
                method_name.clone(),
                FunctionSymbol {
                    base: SymbolBase {
                        name: method_name,
                        span: span_of(member),
                        signature: signature_of(member, source),
                        exported: has_visibility(member),
                        ..Default::default()
                    },
                    is_async: has_child_token(member, "async"),
                    params: named_param_texts(member, source),
                    ..Default::default()
                },
            ));
        }
    }

    // Attach to the struct's class entry, creating it if the struct was
    // declared in another block.
    let mut class = builder
        .document()
        .classes
        .get(&type_name)
        .cloned()
        .unwrap_or_else(|| ClassSymbol {
            base: SymbolBase {
                name: type_name.clone(),
                span: span_of(node),
                ..Default::default()
            },
            ..Default::default()
        });
    for (method_name, method) in methods {
        class.methods.insert(method_name, method);
    }
    builder.add_class(class);
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

fn collect_comments(
    node: Node<'_>,
    source: &str,
    language: Language,
    builder: &mut DocumentBuilder,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "comment" | "line_comment" | "block_comment" => {
                let body = text(child, source);
                let kind = classify_comment(body, language);
                builder.add_comment(Comment {
                    kind,
                    text: body.to_string(),
                    span: span_of(child),
                    associated_symbol: None,
                });
            }
            _ => collect_comments(child, source, language, builder),
        }
    }
}

fn classify_comment(body: &str, language: Language) -> CommentKind {
    match language {
        Language::Python => CommentKind::Line,
        Language::Rust => {
            if body.starts_with("///") || body.starts_with("//!") {
                CommentKind::Docstring
            } else if body.starts_with("//") {
                CommentKind::Line
            } else {
                CommentKind::Block
            }
        }
        _ => {
            if body.starts_with("/**") {
                CommentKind::Jsdoc
            } else if body.starts_with("/*") {
                CommentKind::Block
            } else {
                CommentKind::Line
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::parser::SyntaxParser;

    fn doc_for(source: &str, language: Language) -> AstDocument {
        let tree = SyntaxParser::new().parse(source, language).unwrap();
        build_document("test.src", source, language, &tree, "test")
    }

    #[test]
    fn test_js_functions_and_calls() {
        let source = "function add(a, b) { return a + b; }\n\
                      function total(xs) { return xs.reduce(add, 0); }\n";
        let doc = doc_for(source, Language::JavaScript);

        assert_eq!(doc.functions.len(), 2);
        let total = &doc.functions["total"];
        assert!(total.calls.contains(&"reduce".to_string()));
        assert_eq!(total.base.span.start_line, 2);
        assert!(total.base.signature.as_deref().unwrap().contains("total(xs)"));
    }

    #[test]
    fn test_js_class_members_and_heritage() {
        let source = "class Button extends Widget {\n\
                        label = 'ok';\n\
                        render() { return this.draw(); }\n\
                        async load() { await fetchData(); }\n\
                      }\n";
        let doc = doc_for(source, Language::JavaScript);

        let class = &doc.classes["Button"];
        assert_eq!(class.inheritance, vec!["Widget"]);
        assert!(class.methods.contains_key("render"));
        assert!(class.methods["load"].is_async);
        assert!(class.properties.contains_key("label"));
        assert_eq!(
            class.methods["render"].calls,
            vec!["draw"],
            "method adjacency populated"
        );
    }

    #[test]
    fn test_js_imports_exports() {
        let source = "import { readFile, writeFile } from './fs';\n\
                      import os from 'os';\n\
                      export function run() {}\n\
                      export { helper } from './helper';\n";
        let doc = doc_for(source, Language::JavaScript);

        assert_eq!(doc.imports.len(), 2);
        assert_eq!(doc.imports[0].source, "./fs");
        assert_eq!(doc.imports[0].specifiers, vec!["readFile", "writeFile"]);
        assert_eq!(doc.imports[1].specifiers, vec!["os"]);
        assert_eq!(doc.exports.len(), 2);
        assert!(doc.functions["run"].base.exported);
        assert_eq!(doc.exports[1].source.as_deref(), Some("./helper"));
    }

    #[test]
    fn test_js_const_and_arrow_function() {
        let source = "const LIMIT = 100;\n\
                      const fetchUser = async (id) => { return get(id); };\n";
        let doc = doc_for(source, Language::JavaScript);

        assert!(doc.constants.contains_key("LIMIT"));
        let f = &doc.functions["fetchUser"];
        assert!(f.is_async);
        assert!(f.calls.contains(&"get".to_string()));
    }

    #[test]
    fn test_ts_interface_type_enum() {
        let source = "interface Shape extends Drawable { area(): number }\n\
                      type Point = { x: number };\n\
                      enum Color { Red, Green }\n";
        let doc = doc_for(source, Language::TypeScript);

        assert_eq!(doc.interfaces["Shape"].extends, vec!["Drawable"]);
        assert!(doc.type_aliases.contains_key("Point"));
        assert_eq!(doc.enums["Color"].values, vec!["Red", "Green"]);
    }

    #[test]
    fn test_jsdoc_comment_classified_and_associated() {
        let source = "/** Adds numbers. */\nfunction add(a, b) { return a + b; }\n";
        let doc = doc_for(source, Language::JavaScript);

        let jsdoc = doc
            .comments
            .iter()
            .find(|c| c.kind == CommentKind::Jsdoc)
            .unwrap();
        assert_eq!(jsdoc.associated_symbol.as_deref(), Some("add"));
    }

    #[test]
    fn test_python_symbols() {
        let source = "import os\n\
                      from typing import List\n\n\
                      MAX_SIZE = 10\n\n\
                      def walk(root):\n    \"\"\"Walk the tree.\"\"\"\n    return scan(root)\n\n\
                      class Indexer(Base):\n    def run(self):\n        self.step()\n";
        let doc = doc_for(source, Language::Python);

        assert_eq!(doc.imports.len(), 2);
        assert!(doc.constants.contains_key("MAX_SIZE"));
        let walk = &doc.functions["walk"];
        assert_eq!(walk.base.doc.as_deref(), Some("Walk the tree."));
        assert!(walk.calls.contains(&"scan".to_string()));
        let class = &doc.classes["Indexer"];
        assert_eq!(class.inheritance, vec!["Base"]);
        assert!(class.methods["run"].calls.contains(&"step".to_string()));
    }

    #[test]
    fn test_python_generator_detection() {
        let source = "def items(xs):\n    for x in xs:\n        yield x\n";
        let doc = doc_for(source, Language::Python);
        assert!(doc.functions["items"].is_generator);
    }

    #[test]
    fn test_rust_symbols() {
        let source = "pub struct Store { path: String }\n\n\
                      impl Store {\n    pub fn open(path: &str) -> Self {\n        validate(path);\n        Self { path: path.into() }\n    }\n}\n\n\
                      pub fn validate(path: &str) {}\n\n\
                      pub enum Mode { Read, Write }\n\n\
                      pub const LIMIT: usize = 4;\n";
        let doc = doc_for(source, Language::Rust);

        let store = &doc.classes["Store"];
        assert!(store.methods.contains_key("open"));
        assert!(store.methods["open"].calls.contains(&"validate".to_string()));
        assert_eq!(doc.enums["Mode"].values, vec!["Read", "Write"]);
        assert!(doc.constants.contains_key("LIMIT"));
        assert!(doc.functions["validate"].base.exported);
        assert_eq!(
            doc.functions["validate"].called_by,
            vec!["Store.open"],
            "reverse edge from method"
        );
    }

    #[test]
    fn test_file_with_no_functions_still_records_imports() {
        let source = "import './side-effect';\nconst VERSION = '1.0';\n";
        let doc = doc_for(source, Language::JavaScript);
        assert!(doc.functions.is_empty());
        assert_eq!(doc.imports.len(), 1);
        assert!(doc.constants.contains_key("VERSION"));
    }
}
