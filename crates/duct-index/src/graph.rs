//! Dependency graph rendering.
//!
//! [`Graph`] is a small model of a strict, directed Graphviz graph. The
//! index fills it by walking stages the same way every other operation
//! does, and [`Graph::to_dot`] renders it.
//!
//! In full mode each stage becomes a cluster subgraph holding an invisible
//! node for the stage and one node per output; dependency edges leave the
//! cluster (`ltail`) and point at the artifact node they read. In
//! stages-only mode each stage is a single node and edges join stages.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write};

use crate::error::{IndexError, IndexResult};
use crate::index::Index;

/// Graphviz attribute list.
pub type Attrs = BTreeMap<String, String>;

/// A node and the subgraph it belongs to, if any.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    pub subgraph: Option<String>,
    pub attrs: Attrs,
}

/// A strict directed graph: at most one edge per node pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Graph {
    pub attrs: Attrs,
    pub nodes: BTreeMap<String, Node>,
    pub edges: BTreeMap<(String, String), Attrs>,
    pub subgraphs: BTreeMap<String, Attrs>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn attrs(pairs: &[(&str, &str)]) -> Attrs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Name of the cluster holding a stage's nodes. Graphviz only draws
/// subgraphs whose names start with `cluster`.
pub fn cluster_name(stage: &str) -> String {
    format!("cluster_{stage}")
}

impl Graph {
    /// An empty graph laid out left to right, with compound edges enabled.
    pub fn new() -> Self {
        Self {
            attrs: attrs(&[("compound", "true"), ("rankdir", "LR")]),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            subgraphs: BTreeMap::new(),
        }
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn add_subgraph(&mut self, name: impl Into<String>, attrs: Attrs) {
        self.subgraphs.insert(name.into(), attrs);
    }

    pub fn add_node(&mut self, subgraph: Option<&str>, name: impl Into<String>, attrs: Attrs) {
        self.nodes.insert(
            name.into(),
            Node {
                subgraph: subgraph.map(str::to_string),
                attrs,
            },
        );
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>, attrs: Attrs) {
        self.edges.insert((from.into(), to.into()), attrs);
    }

    /// Render as Graphviz DOT text.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        self.write_dot(&mut out).expect("writing to a String cannot fail");
        out
    }

    fn write_dot(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "strict digraph {{")?;
        for (k, v) in &self.attrs {
            writeln!(out, "  {}={};", quote(k), quote(v))?;
        }
        for (name, sub_attrs) in &self.subgraphs {
            writeln!(out, "  subgraph {} {{", quote(name))?;
            for (k, v) in sub_attrs {
                writeln!(out, "    {}={};", quote(k), quote(v))?;
            }
            for (node, n) in self.nodes.iter().filter(|(_, n)| n.subgraph.as_deref() == Some(name)) {
                writeln!(out, "    {}{};", quote(node), attr_list(&n.attrs))?;
            }
            writeln!(out, "  }}")?;
        }
        for (node, n) in self.nodes.iter().filter(|(_, n)| n.subgraph.is_none()) {
            writeln!(out, "  {}{};", quote(node), attr_list(&n.attrs))?;
        }
        for ((from, to), edge_attrs) in &self.edges {
            writeln!(out, "  {} -> {}{};", quote(from), quote(to), attr_list(edge_attrs))?;
        }
        writeln!(out, "}}")
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_dot())
    }
}

fn quote(id: &str) -> String {
    format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\""))
}

fn attr_list(attrs: &Attrs) -> String {
    if attrs.is_empty() {
        return String::new();
    }
    let items: Vec<String> = attrs
        .iter()
        .map(|(k, v)| format!("{}={}", quote(k), quote(v)))
        .collect();
    format!(" [{}]", items.join(", "))
}

impl Index {
    /// Add `start` and everything upstream of it to `graph`.
    ///
    /// `in_progress` is the cycle-detection set; on a cycle it is left
    /// holding the stages on the offending path.
    pub fn graph(
        &self,
        start: &str,
        in_progress: &mut BTreeSet<String>,
        graph: &mut Graph,
        only_stages: bool,
    ) -> IndexResult<()> {
        if in_progress.contains(start) {
            return Err(IndexError::CycleDetected {
                stage: start.to_string(),
            });
        }
        if graph.has_node(start) {
            return Ok(());
        }
        let entry = self.entry(start)?;
        in_progress.insert(start.to_string());

        let cluster = cluster_name(start);
        if only_stages {
            graph.add_node(None, start, Attrs::new());
        } else {
            graph.add_subgraph(cluster.clone(), Attrs::new());
            graph.add_node(Some(&cluster), start, attrs(&[("style", "invis")]));
            for art in entry.stage.outputs.values() {
                let name = entry.stage.artifact_path_for(start, &art.path);
                graph.add_node(Some(&cluster), name, Attrs::new());
            }
        }

        for dep in entry.stage.dependencies.values() {
            let full = entry.stage.artifact_path_for(start, &dep.path);
            match self.find_owner(&full)? {
                // Internal to this stage's own outputs.
                Some(owner) if owner.stage == start => {}
                Some(owner) => {
                    self.graph(owner.stage, in_progress, graph, only_stages)?;
                    if only_stages {
                        graph.add_edge(start, owner.stage, Attrs::new());
                    } else {
                        graph.add_edge(start, full, attrs(&[("ltail", cluster.as_str())]));
                    }
                }
                None if only_stages => {}
                None => {
                    graph.add_node(None, full.clone(), Attrs::new());
                    graph.add_edge(start, full, attrs(&[("ltail", cluster.as_str())]));
                }
            }
        }

        in_progress.remove(start);
        Ok(())
    }

    /// Build one graph covering `starts` (all stages when empty).
    pub fn graph_all(&self, starts: &[String], only_stages: bool) -> IndexResult<Graph> {
        let starts = if starts.is_empty() {
            self.paths()
        } else {
            starts.to_vec()
        };
        let mut graph = Graph::new();
        for start in &starts {
            let mut in_progress = BTreeSet::new();
            self.graph(start, &mut in_progress, &mut graph, only_stages)?;
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::index;

    fn graph_of(idx: &Index, start: &str, only_stages: bool) -> Graph {
        let mut graph = Graph::new();
        let mut in_progress = BTreeSet::new();
        idx.graph(start, &mut in_progress, &mut graph, only_stages).unwrap();
        graph
    }

    fn build(
        clusters: &[&str],
        nodes: &[(Option<&str>, &str, bool)],
        edges: &[(&str, &str, Option<&str>)],
    ) -> Graph {
        let mut g = Graph::new();
        for c in clusters {
            g.add_subgraph(*c, Attrs::new());
        }
        for (sub, name, hidden) in nodes {
            let a = if *hidden { attrs(&[("style", "invis")]) } else { Attrs::new() };
            g.add_node(*sub, *name, a);
        }
        for (from, to, ltail) in edges {
            let a = ltail.map_or_else(Attrs::new, |c| attrs(&[("ltail", c)]));
            g.add_edge(*from, *to, a);
        }
        g
    }

    fn disjoint() -> Index {
        index(&[
            ("foo.yaml", &["orphan.bin"], &["foo.bin"]),
            ("bar.yaml", &[], &["bar.bin"]),
        ])
    }

    fn connected() -> Index {
        index(&[
            ("foo.yaml", &["bar.bin"], &["foo.bin"]),
            ("bar.yaml", &[], &["bar.bin"]),
        ])
    }

    #[test]
    fn disjoint_stages_only() {
        let got = graph_of(&disjoint(), "foo.yaml", true);
        assert_eq!(got, build(&[], &[(None, "foo.yaml", false)], &[]));

        let all = disjoint().graph_all(&[], true).unwrap();
        assert_eq!(all.nodes.len(), 2);
        assert!(all.edges.is_empty());
    }

    #[test]
    fn disjoint_full_graph() {
        let got = graph_of(&disjoint(), "foo.yaml", false);
        let want = build(
            &["cluster_foo.yaml"],
            &[
                (Some("cluster_foo.yaml"), "foo.yaml", true),
                (Some("cluster_foo.yaml"), "foo.bin", false),
                (None, "orphan.bin", false),
            ],
            &[("foo.yaml", "orphan.bin", Some("cluster_foo.yaml"))],
        );
        assert_eq!(got, want);
    }

    #[test]
    fn connected_stages_only() {
        let got = graph_of(&connected(), "foo.yaml", true);
        let want = build(
            &[],
            &[(None, "foo.yaml", false), (None, "bar.yaml", false)],
            &[("foo.yaml", "bar.yaml", None)],
        );
        assert_eq!(got, want);
    }

    #[test]
    fn connected_full_graph() {
        let got = graph_of(&connected(), "foo.yaml", false);
        let want = build(
            &["cluster_foo.yaml", "cluster_bar.yaml"],
            &[
                (Some("cluster_foo.yaml"), "foo.yaml", true),
                (Some("cluster_bar.yaml"), "bar.yaml", true),
                (Some("cluster_foo.yaml"), "foo.bin", false),
                (Some("cluster_bar.yaml"), "bar.bin", false),
            ],
            &[("foo.yaml", "bar.bin", Some("cluster_foo.yaml"))],
        );
        assert_eq!(got, want);
    }

    #[test]
    fn skip_connections_are_kept() {
        let idx = index(&[
            ("a.yaml", &[], &["a.bin"]),
            ("b.yaml", &["a.bin"], &["b.bin"]),
            ("c.yaml", &["b.bin", "a.bin"], &["c.bin"]),
        ]);

        let got = graph_of(&idx, "c.yaml", true);
        let want = build(
            &[],
            &[(None, "a.yaml", false), (None, "b.yaml", false), (None, "c.yaml", false)],
            &[
                ("c.yaml", "a.yaml", None),
                ("c.yaml", "b.yaml", None),
                ("b.yaml", "a.yaml", None),
            ],
        );
        assert_eq!(got, want);

        let got = graph_of(&idx, "c.yaml", false);
        assert_eq!(got.subgraphs.len(), 3);
        assert_eq!(got.nodes.len(), 6);
        assert_eq!(
            got.edges.keys().cloned().collect::<Vec<_>>(),
            [
                ("b.yaml".to_string(), "a.bin".to_string()),
                ("c.yaml".to_string(), "a.bin".to_string()),
                ("c.yaml".to_string(), "b.bin".to_string()),
            ]
        );
    }

    #[test]
    fn cycles_are_detected_in_both_modes() {
        let idx = index(&[
            ("a.yaml", &["c.bin"], &["a.bin"]),
            ("b.yaml", &["a.bin"], &["b.bin"]),
            ("c.yaml", &["b.bin", "d.bin"], &["c.bin"]),
            ("d.yaml", &[], &["d.bin"]),
        ]);
        for only_stages in [true, false] {
            let mut graph = Graph::new();
            let mut in_progress = BTreeSet::new();
            let err = idx
                .graph("c.yaml", &mut in_progress, &mut graph, only_stages)
                .unwrap_err();
            assert!(matches!(err, IndexError::CycleDetected { .. }));
            let want: BTreeSet<String> = ["a.yaml", "b.yaml", "c.yaml"].map(String::from).into();
            assert_eq!(in_progress, want);
        }
    }

    #[test]
    fn dot_output_is_quoted_and_strict() {
        let dot = graph_of(&connected(), "foo.yaml", false).to_dot();
        assert!(dot.starts_with("strict digraph {"));
        assert!(dot.contains("\"compound\"=\"true\";"));
        assert!(dot.contains("subgraph \"cluster_bar.yaml\" {"));
        assert!(dot.contains("\"foo.yaml\" -> \"bar.bin\" [\"ltail\"=\"cluster_foo.yaml\"];"));
    }

    #[test]
    fn empty_graph_renders_a_complete_document() {
        let graph = Graph::new();
        let dot = graph.to_dot();
        assert!(dot.starts_with("strict digraph {"));
        assert!(dot.ends_with("}\n"));
        assert_eq!(graph.to_string(), dot);
    }
}
