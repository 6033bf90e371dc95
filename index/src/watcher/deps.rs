//! File-level dependency graph.
//!
//! A lightweight import scanner (JS/TS `import`/`require`/dynamic import,
//! Python `import`/`from … import`, CSS `@import`/`url()`) feeds a
//! directed graph; change processing walks dependents of the changed set
//! in Kahn's topological order, with cycle members processed last.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use petgraph::graph::DiGraph;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use regex::Regex;

static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)(?:import\s+(?:[\w$\{\}\s,*]+\s+from\s+)?|export\s+[\w$\{\}\s,*]+\s+from\s+|require\s*\(\s*|import\s*\(\s*)["']([^"']+)["']"#,
    )
    .expect("static regex")
});

static PY_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))").expect("static regex")
});

static CSS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:@import\s+(?:url\s*\(\s*)?|url\s*\(\s*)["']?([^"'()\s]+)["']?\s*\)?"#)
        .expect("static regex")
});

/// Raw import specifiers found in a file.
pub fn scan_imports(path: &Path, content: &str) -> Vec<String> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let mut specifiers = Vec::new();
    match ext {
        "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" | "mts" | "cts" => {
            for capture in JS_IMPORT.captures_iter(content) {
                if let Some(m) = capture.get(1) {
                    specifiers.push(m.as_str().to_string());
                }
            }
        }
        "py" | "pyi" => {
            for capture in PY_IMPORT.captures_iter(content) {
                let module = capture.get(1).or_else(|| capture.get(2));
                if let Some(m) = module {
                    specifiers.push(m.as_str().to_string());
                }
            }
        }
        "css" | "scss" | "less" => {
            for capture in CSS_IMPORT.captures_iter(content) {
                if let Some(m) = capture.get(1) {
                    specifiers.push(m.as_str().to_string());
                }
            }
        }
        _ => {}
    }
    specifiers
}

/// Resolve a specifier to a project-relative file, if it names one.
///
/// Relative JS/TS specifiers try the usual extension and index-file
/// guesses; Python dotted modules map to `a/b.py` or `a/b/__init__.py`.
/// Bare package names resolve to nothing.
pub fn resolve_specifier(
    importer: &Path,
    specifier: &str,
    known_files: &HashSet<PathBuf>,
) -> Option<PathBuf> {
    let ext = importer.extension().and_then(|e| e.to_str()).unwrap_or("");
    let dir = importer.parent().unwrap_or(Path::new(""));

    if matches!(ext, "py" | "pyi") {
        let base: PathBuf = specifier.split('.').collect();
        for candidate in [base.with_extension("py"), base.join("__init__.py")] {
            if known_files.contains(&candidate) {
                return Some(candidate);
            }
        }
        return None;
    }

    if !specifier.starts_with('.') && !specifier.starts_with('/') {
        return None;
    }
    let joined = normalize_path(&dir.join(specifier.trim_start_matches('/')));
    const GUESSES: &[&str] = &["", ".ts", ".tsx", ".js", ".jsx", ".css", ".scss"];
    for guess in GUESSES {
        let candidate = if guess.is_empty() {
            joined.clone()
        } else {
            PathBuf::from(format!("{}{guess}", joined.display()))
        };
        if known_files.contains(&candidate) {
            return Some(candidate);
        }
    }
    for index in ["index.ts", "index.tsx", "index.js", "index.jsx"] {
        let candidate = joined.join(index);
        if known_files.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Lexically normalize `.` and `..` segments.
fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                parts.pop();
            }
            other => parts.push(other.as_os_str().to_os_string()),
        }
    }
    parts.iter().collect()
}

/// Directed dependency graph over project-relative paths.
///
/// An edge `a -> b` means `b` imports `a`: changes to `a` affect `b`.
#[derive(Default)]
pub struct DependencyGraph {
    graph: DiGraph<PathBuf, ()>,
    nodes: HashMap<PathBuf, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, path: &Path) -> NodeIndex {
        match self.nodes.get(path) {
            Some(&index) => index,
            None => {
                let index = self.graph.add_node(path.to_path_buf());
                self.nodes.insert(path.to_path_buf(), index);
                index
            }
        }
    }

    /// Record (or replace) the dependencies of one file.
    pub fn set_dependencies(&mut self, importer: &Path, dependencies: &[PathBuf]) {
        let importer_index = self.node(importer);
        // Drop stale incoming dependency edges.
        let stale: Vec<_> = self
            .graph
            .edges_directed(importer_index, petgraph::Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        for dependency in dependencies {
            let dep_index = self.node(dependency);
            if dep_index != importer_index {
                self.graph.add_edge(dep_index, importer_index, ());
            }
        }
    }

    /// Remove a file entirely.
    pub fn remove_file(&mut self, path: &Path) {
        if let Some(index) = self.nodes.remove(path) {
            self.graph.remove_node(index);
            // Node removal swaps indices; rebuild the map.
            self.nodes = self
                .graph
                .node_indices()
                .map(|i| (self.graph[i].clone(), i))
                .collect();
        }
    }

    /// The changed files plus every transitive dependent.
    pub fn affected_by(&self, changed: &[PathBuf]) -> BTreeSet<PathBuf> {
        let mut affected: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();

        for path in changed {
            affected.insert(path.clone());
            if let Some(&index) = self.nodes.get(path) {
                queue.push_back(index);
            }
        }
        while let Some(index) = queue.pop_front() {
            for dependent in self
                .graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
            {
                if affected.insert(self.graph[dependent].clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        affected
    }

    /// Kahn's topological order over the affected set; members of cycles
    /// come last, in graph (path) order.
    pub fn processing_order(&self, affected: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
        let indices: BTreeMap<PathBuf, NodeIndex> = affected
            .iter()
            .filter_map(|p| self.nodes.get(p).map(|&i| (p.clone(), i)))
            .collect();
        let in_set: HashSet<NodeIndex> = indices.values().copied().collect();

        // In-degrees counting only edges inside the affected set.
        let mut in_degree: BTreeMap<PathBuf, usize> = BTreeMap::new();
        for (path, &index) in &indices {
            let degree = self
                .graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .filter(|n| in_set.contains(n))
                .count();
            in_degree.insert(path.clone(), degree);
        }

        let mut ready: BTreeSet<PathBuf> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(p, _)| p.clone())
            .collect();
        let mut order: Vec<PathBuf> = Vec::with_capacity(affected.len());

        while let Some(path) = ready.iter().next().cloned() {
            ready.remove(&path);
            order.push(path.clone());
            if let Some(&index) = indices.get(&path) {
                for dependent in self
                    .graph
                    .neighbors_directed(index, petgraph::Direction::Outgoing)
                {
                    if !in_set.contains(&dependent) {
                        continue;
                    }
                    let dep_path = self.graph[dependent].clone();
                    if let Some(degree) = in_degree.get_mut(&dep_path) {
                        if *degree > 0 {
                            *degree -= 1;
                            if *degree == 0 {
                                ready.insert(dep_path);
                            }
                        }
                    }
                }
            }
        }

        // Cycle members (never reached zero in-degree) go last, in path
        // order.
        for path in affected {
            if !order.contains(path) {
                order.push(path.clone());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_scan_js_imports() {
        let content = r#"
import { a } from './a';
import b from "../lib/b";
const c = require('./c');
const d = await import('./d');
export { e } from './e';
import type { T } from './types';
"#;
        let specs = scan_imports(Path::new("src/main.ts"), content);
        assert!(specs.contains(&"./a".to_string()));
        assert!(specs.contains(&"../lib/b".to_string()));
        assert!(specs.contains(&"./c".to_string()));
        assert!(specs.contains(&"./d".to_string()));
        assert!(specs.contains(&"./e".to_string()));
    }

    #[test]
    fn test_scan_python_imports() {
        let content = "import os\nfrom pkg.util import helper\nimport local_module\n";
        let specs = scan_imports(Path::new("app/main.py"), content);
        assert!(specs.contains(&"os".to_string()));
        assert!(specs.contains(&"pkg.util".to_string()));
        assert!(specs.contains(&"local_module".to_string()));
    }

    #[test]
    fn test_scan_css_imports() {
        let content = "@import \"base.css\";\n@import url(theme.css);\nbody { background: url('bg.png'); }\n";
        let specs = scan_imports(Path::new("styles/app.css"), content);
        assert!(specs.contains(&"base.css".to_string()));
        assert!(specs.contains(&"theme.css".to_string()));
        assert!(specs.contains(&"bg.png".to_string()));
    }

    #[test]
    fn test_resolve_relative_with_extension_guess() {
        let known: HashSet<PathBuf> = [p("src/util.ts"), p("src/widgets/index.ts")]
            .into_iter()
            .collect();
        assert_eq!(
            resolve_specifier(Path::new("src/main.ts"), "./util", &known),
            Some(p("src/util.ts"))
        );
        assert_eq!(
            resolve_specifier(Path::new("src/main.ts"), "./widgets", &known),
            Some(p("src/widgets/index.ts"))
        );
        // Bare packages resolve to nothing.
        assert_eq!(
            resolve_specifier(Path::new("src/main.ts"), "react", &known),
            None
        );
    }

    #[test]
    fn test_resolve_python_module() {
        let known: HashSet<PathBuf> = [p("pkg/util.py"), p("pkg/sub/__init__.py")]
            .into_iter()
            .collect();
        assert_eq!(
            resolve_specifier(Path::new("app/main.py"), "pkg.util", &known),
            Some(p("pkg/util.py"))
        );
        assert_eq!(
            resolve_specifier(Path::new("app/main.py"), "pkg.sub", &known),
            Some(p("pkg/sub/__init__.py"))
        );
        assert_eq!(resolve_specifier(Path::new("app/main.py"), "os", &known), None);
    }

    #[test]
    fn test_affected_set_propagates_to_dependents() {
        let mut graph = DependencyGraph::new();
        // main -> util -> base (main imports util, util imports base)
        graph.set_dependencies(&p("main.ts"), &[p("util.ts")]);
        graph.set_dependencies(&p("util.ts"), &[p("base.ts")]);

        let affected = graph.affected_by(&[p("base.ts")]);
        assert_eq!(
            affected,
            [p("base.ts"), p("util.ts"), p("main.ts")].into_iter().collect()
        );

        // Changing main affects only main.
        let affected = graph.affected_by(&[p("main.ts")]);
        assert_eq!(affected, [p("main.ts")].into_iter().collect());
    }

    #[test]
    fn test_topological_order_dependencies_first() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&p("main.ts"), &[p("util.ts")]);
        graph.set_dependencies(&p("util.ts"), &[p("base.ts")]);

        let affected = graph.affected_by(&[p("base.ts")]);
        let order = graph.processing_order(&affected);
        assert_eq!(order, vec![p("base.ts"), p("util.ts"), p("main.ts")]);
    }

    #[test]
    fn test_cycle_members_processed_last() {
        let mut graph = DependencyGraph::new();
        // a <-> b cycle, c depends on nothing.
        graph.set_dependencies(&p("a.ts"), &[p("b.ts")]);
        graph.set_dependencies(&p("b.ts"), &[p("a.ts")]);
        graph.set_dependencies(&p("c.ts"), &[]);

        let affected: BTreeSet<PathBuf> =
            [p("a.ts"), p("b.ts"), p("c.ts")].into_iter().collect();
        let order = graph.processing_order(&affected);
        assert_eq!(order[0], p("c.ts"), "acyclic node first");
        // Cycle members follow in path order.
        assert_eq!(&order[1..], &[p("a.ts"), p("b.ts")]);
    }

    #[test]
    fn test_set_dependencies_replaces_stale_edges() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&p("main.ts"), &[p("old.ts")]);
        graph.set_dependencies(&p("main.ts"), &[p("new.ts")]);

        let affected = graph.affected_by(&[p("old.ts")]);
        assert_eq!(affected, [p("old.ts")].into_iter().collect());
        let affected = graph.affected_by(&[p("new.ts")]);
        assert!(affected.contains(&p("main.ts")));
    }
}
