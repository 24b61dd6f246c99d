//! Test categories and their expansion into concrete tests
//!
//! Categories and tests live in one arena of nodes addressed by name. Every
//! test is implicitly a category containing only itself. `_all_` contains
//! every test and cannot be redefined; `_default_` means `_all_` unless the
//! job configuration says otherwise.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::warn;

use crate::error::{Error, Result};

/// Category holding every defined test
pub const ALL_CATEGORY: &str = "_all_";

/// Category used when no selection is given
pub const DEFAULT_CATEGORY: &str = "_default_";

type NodeId = usize;

#[derive(Debug, Clone)]
enum Node {
    Test,
    Category(Vec<NodeId>),
}

/// Directed graph of categories over tests
#[derive(Debug, Clone)]
pub struct CategoryGraph {
    nodes: Vec<Node>,
    names: Vec<String>,
    index: HashMap<String, NodeId>,
}

impl CategoryGraph {
    /// Build the graph from test names (in definition order) and the
    /// configured `name -> members` categories.
    pub fn new<I, S>(tests: I, categories: &BTreeMap<String, Vec<String>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self { nodes: Vec::new(), names: Vec::new(), index: HashMap::new() };

        let mut test_ids = Vec::new();
        for test in tests {
            let name = test.into();
            if graph.index.contains_key(&name) {
                return Err(Error::Config(format!("Test '{}' is defined more than once", name)));
            }
            test_ids.push(graph.add(name, Node::Test));
        }

        if categories.contains_key(ALL_CATEGORY) {
            return Err(Error::Config(format!("The {} category cannot be redefined", ALL_CATEGORY)));
        }
        graph.add(ALL_CATEGORY.to_string(), Node::Category(test_ids));

        // Register names first so members may refer to categories defined later
        let mut pending = Vec::new();
        for (name, members) in categories {
            if graph.index.contains_key(name) {
                return Err(Error::Config(format!(
                    "Category '{}' has the same name as a test",
                    name
                )));
            }
            pending.push((graph.add(name.clone(), Node::Category(Vec::new())), members));
        }
        if !graph.index.contains_key(DEFAULT_CATEGORY) {
            let all = graph.index[ALL_CATEGORY];
            graph.add(DEFAULT_CATEGORY.to_string(), Node::Category(vec![all]));
        }

        for (id, members) in pending {
            let children = members
                .iter()
                .map(|member| {
                    graph.index.get(member).copied().ok_or_else(|| {
                        Error::Config(format!(
                            "Category '{}' refers to unknown test or category '{}'",
                            graph.names[id], member
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            graph.nodes[id] = Node::Category(children);
        }

        Ok(graph)
    }

    fn add(&mut self, name: String, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.index.insert(name.clone(), id);
        self.names.push(name);
        id
    }

    /// Whether `name` is a test or a category
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Every test, in definition order
    pub fn tests(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .zip(&self.names)
            .filter(|(node, _)| matches!(node, Node::Test))
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// Expand a category (or test) into the tests it reaches.
    ///
    /// Tests appear once, in first-discovered order. Revisiting a category
    /// that is still being expanded is a cycle.
    pub fn resolve(&self, name: &str) -> Result<Vec<String>> {
        let root =
            self.index.get(name).copied().ok_or_else(|| Error::UnknownCategory(name.to_string()))?;

        let mut tests = Vec::new();
        let mut seen_tests = HashSet::new();
        let mut expanded = HashSet::new();
        let mut on_path = HashSet::new();
        // (category, index of next member to visit)
        let mut stack: Vec<(NodeId, usize)> = Vec::new();

        let mut visit = |id: NodeId,
                         stack: &mut Vec<(NodeId, usize)>,
                         on_path: &mut HashSet<NodeId>|
         -> Result<()> {
            match &self.nodes[id] {
                Node::Test => {
                    if seen_tests.insert(id) {
                        tests.push(self.names[id].clone());
                    }
                }
                Node::Category(_) => {
                    if on_path.contains(&id) {
                        let start = stack.iter().position(|(node, _)| *node == id).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|(node, _)| self.names[*node].clone())
                            .collect();
                        path.push(self.names[id].clone());
                        return Err(Error::Cycle { path });
                    }
                    if expanded.insert(id) {
                        on_path.insert(id);
                        stack.push((id, 0));
                    }
                }
            }
            Ok(())
        };

        visit(root, &mut stack, &mut on_path)?;

        while let Some(&(id, next)) = stack.last() {
            let child = match &self.nodes[id] {
                Node::Category(members) => members.get(next).copied(),
                Node::Test => None,
            };
            match child {
                Some(child) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    visit(child, &mut stack, &mut on_path)?;
                }
                None => {
                    on_path.remove(&id);
                    stack.pop();
                }
            }
        }

        Ok(tests)
    }

    /// Expand several selections, keeping the first occurrence of each test.
    ///
    /// A cyclic selection is set aside in [`Selection::cycles`] and the
    /// others still resolve. An unknown name is an error.
    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Selection> {
        let mut selection = Selection::default();
        let mut seen = HashSet::new();
        for name in names {
            let name = name.as_ref();
            let tests = match self.resolve(name) {
                Ok(tests) => tests,
                Err(Error::Cycle { path }) => {
                    warn!("Category {} is cyclic: {}", name, path.join(" -> "));
                    selection.cycles.push((name.to_string(), path));
                    continue;
                }
                Err(e) => return Err(e),
            };
            for test in tests {
                if seen.insert(test.clone()) {
                    selection.tests.push(test);
                }
            }
        }
        Ok(selection)
    }
}

/// Tests reached by several selections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Tests in first-discovered order
    pub tests: Vec<String>,
    /// Selected categories that could not be expanded, with their cycle
    pub cycles: Vec<(String, Vec<String>)>,
}

impl Selection {
    /// Errors for the cyclic selections
    pub fn cycle_errors(&self) -> impl Iterator<Item = Error> + '_ {
        self.cycles.iter().map(|(_, path)| Error::Cycle { path: path.clone() })
    }
}
