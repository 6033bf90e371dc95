//! Per-file structured syntax document.
//!
//! The document is a name-keyed view of a file's symbols plus imports,
//! exports, comments, syntax errors, and the intra-file call graph. Call
//! edges are stored as name references (adjacency lists of owned strings),
//! never as pointers, so cyclic caller/callee relations serialize cleanly.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::parser::SyntaxError;
use crate::types::Span;

/// Shared fields of every symbol variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolBase {
    pub name: String,
    pub span: Span,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default)]
    pub exported: bool,
    /// `public`, `private`, `protected`, where the language has it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
}

/// A free function or a method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionSymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_generator: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    /// Callee names this function calls, deduplicated, in first-seen order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
    /// Caller names that call this function, deduplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub called_by: Vec<String>,
}

/// A class property / field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
    #[serde(default)]
    pub is_static: bool,
}

/// A constant (module-level or class-level).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantSymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A class (or struct in Rust sources) with owned members.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassSymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
    /// Declared parents in source order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inheritance: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub methods: BTreeMap<String, FunctionSymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, ConstantSymbol>,
}

/// An interface (or trait).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceSymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
}

/// A type alias.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeAliasSymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
}

/// An enum with its value names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnumSymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// A UI component (capitalized JSX-returning function).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentSymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
}

/// A namespace / module declaration (TS `namespace`, Rust `mod`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSymbol {
    #[serde(flatten)]
    pub base: SymbolBase,
}

/// Comment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentKind {
    Line,
    Block,
    Jsdoc,
    Docstring,
}

/// A comment with optional symbol association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub kind: CommentKind,
    pub text: String,
    pub span: Span,
    /// Set only for `jsdoc`/`docstring` comments, to at most one symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associated_symbol: Option<String>,
}

/// An import statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStatement {
    /// Module source (`"./util"`, `os.path`).
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specifiers: Vec<String>,
    pub span: Span,
}

/// An export statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStatement {
    /// Re-export source, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specifiers: Vec<String>,
    pub span: Span,
}

/// Symbol kinds for enumeration across all categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    TypeAlias,
    Enum,
    Constant,
    Component,
    Property,
    Module,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::TypeAlias => "type_alias",
            Self::Enum => "enum",
            Self::Constant => "constant",
            Self::Component => "component",
            Self::Property => "property",
            Self::Module => "module",
        }
    }
}

/// A flat symbol reference produced when enumerating a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRef {
    /// Qualified name; methods are `Class.method`.
    pub name: String,
    pub kind: SymbolKind,
    pub span: Span,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub exported: bool,
}

fn symbol_ref(name: &str, kind: SymbolKind, base: &SymbolBase) -> SymbolRef {
    SymbolRef {
        name: name.to_string(),
        kind,
        span: base.span,
        signature: base.signature.clone(),
        doc: base.doc.clone(),
        exported: base.exported,
    }
}

/// Per-file structured document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AstDocument {
    /// Project-relative path, forward-slash normalized.
    pub path: String,
    pub language: String,
    pub file_size: u64,
    pub line_count: u32,
    pub parser_version: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, FunctionSymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub classes: BTreeMap<String, ClassSymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub interfaces: BTreeMap<String, InterfaceSymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub type_aliases: BTreeMap<String, TypeAliasSymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enums: BTreeMap<String, EnumSymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, ConstantSymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentSymbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespaces: BTreeMap<String, ModuleSymbol>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<ImportStatement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<ExportStatement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SyntaxError>,
}

impl AstDocument {
    /// Enumerate all symbols as flat references; methods and properties are
    /// qualified with their class name.
    pub fn iter_symbols(&self) -> Vec<SymbolRef> {
        let mut out = Vec::new();
        for (name, f) in &self.functions {
            out.push(symbol_ref(name, SymbolKind::Function, &f.base));
        }
        for (name, c) in &self.classes {
            out.push(symbol_ref(name, SymbolKind::Class, &c.base));
            for (method, m) in &c.methods {
                out.push(symbol_ref(
                    &format!("{name}.{method}"),
                    SymbolKind::Method,
                    &m.base,
                ));
            }
            for (prop, p) in &c.properties {
                out.push(symbol_ref(
                    &format!("{name}.{prop}"),
                    SymbolKind::Property,
                    &p.base,
                ));
            }
            for (konst, k) in &c.constants {
                out.push(symbol_ref(
                    &format!("{name}.{konst}"),
                    SymbolKind::Constant,
                    &k.base,
                ));
            }
        }
        for (name, i) in &self.interfaces {
            out.push(symbol_ref(name, SymbolKind::Interface, &i.base));
        }
        for (name, t) in &self.type_aliases {
            out.push(symbol_ref(name, SymbolKind::TypeAlias, &t.base));
        }
        for (name, e) in &self.enums {
            out.push(symbol_ref(name, SymbolKind::Enum, &e.base));
        }
        for (name, k) in &self.constants {
            out.push(symbol_ref(name, SymbolKind::Constant, &k.base));
        }
        for (name, c) in &self.components {
            out.push(symbol_ref(name, SymbolKind::Component, &c.base));
        }
        for (name, m) in &self.namespaces {
            out.push(symbol_ref(name, SymbolKind::Module, &m.base));
        }
        out
    }

    /// Look up a function or `Class.method` by qualified name.
    pub fn find_callable(&self, name: &str) -> Option<&FunctionSymbol> {
        if let Some(f) = self.functions.get(name) {
            return Some(f);
        }
        if let Some((class, method)) = name.split_once('.') {
            return self.classes.get(class).and_then(|c| c.methods.get(method));
        }
        // Unqualified method lookup across all classes.
        self.classes.values().find_map(|c| c.methods.get(name))
    }

    /// Whether `name` appears anywhere in the document's symbol tables,
    /// imports, exports, or call edges.
    pub fn mentions(&self, name: &str) -> bool {
        if self.functions.contains_key(name)
            || self.classes.contains_key(name)
            || self.interfaces.contains_key(name)
            || self.type_aliases.contains_key(name)
            || self.enums.contains_key(name)
            || self.constants.contains_key(name)
            || self.components.contains_key(name)
        {
            return true;
        }
        if self.classes.values().any(|c| c.methods.contains_key(name)) {
            return true;
        }
        if self
            .imports
            .iter()
            .any(|i| i.source == name || i.specifiers.iter().any(|s| s == name))
        {
            return true;
        }
        if self
            .exports
            .iter()
            .any(|e| e.specifiers.iter().any(|s| s == name))
        {
            return true;
        }
        let calls_name = |f: &FunctionSymbol| f.calls.iter().any(|c| c == name);
        self.functions.values().any(calls_name)
            || self
                .classes
                .values()
                .any(|c| c.methods.values().any(calls_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(name: &str, line: u32) -> FunctionSymbol {
        FunctionSymbol {
            base: SymbolBase {
                name: name.to_string(),
                span: Span::point(line, 0, 0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_iter_symbols_qualifies_methods() {
        let mut doc = AstDocument::default();
        doc.functions.insert("top".to_string(), func("top", 1));
        let mut class = ClassSymbol {
            base: SymbolBase {
                name: "Widget".to_string(),
                span: Span::point(5, 0, 0),
                ..Default::default()
            },
            ..Default::default()
        };
        class.methods.insert("render".to_string(), func("render", 6));
        doc.classes.insert("Widget".to_string(), class);

        let names: Vec<String> = doc.iter_symbols().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"top".to_string()));
        assert!(names.contains(&"Widget".to_string()));
        assert!(names.contains(&"Widget.render".to_string()));
    }

    #[test]
    fn test_find_callable() {
        let mut doc = AstDocument::default();
        doc.functions.insert("free".to_string(), func("free", 1));
        let mut class = ClassSymbol::default();
        class.methods.insert("run".to_string(), func("run", 9));
        doc.classes.insert("Job".to_string(), class);

        assert!(doc.find_callable("free").is_some());
        assert!(doc.find_callable("Job.run").is_some());
        assert!(doc.find_callable("run").is_some());
        assert!(doc.find_callable("absent").is_none());
    }

    #[test]
    fn test_mentions_covers_calls_and_imports() {
        let mut doc = AstDocument::default();
        let mut f = func("caller", 1);
        f.calls.push("helper".to_string());
        doc.functions.insert("caller".to_string(), f);
        doc.imports.push(ImportStatement {
            source: "./util".to_string(),
            specifiers: vec!["readFile".to_string()],
            span: Span::point(1, 0, 0),
        });

        assert!(doc.mentions("helper"));
        assert!(doc.mentions("readFile"));
        assert!(doc.mentions("caller"));
        assert!(!doc.mentions("nothing"));
    }
}
