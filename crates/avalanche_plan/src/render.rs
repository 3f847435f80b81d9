//! Human-readable renderings of a precedence graph.

use std::fmt::Write as _;

use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;

use crate::control::CfNodeKind;
use crate::graph::{JointEdge, JointVertex, PrecedenceGraph, Producer};

/// Indented control-flow tree followed by the data dependencies
#[must_use]
pub fn text(graph: &PrecedenceGraph) -> String {
    let mut out = String::new();
    out.push_str("control flow:\n");
    tree(graph, graph.root(), 1, &mut out);

    out.push_str("data flow:\n");
    for alg in graph.alg_indices() {
        let desc = graph.algorithm(alg);
        if desc.inputs.is_empty() {
            continue;
        }
        let inputs: Vec<String> = desc
            .inputs
            .iter()
            .map(|p| match graph.data_producer(p) {
                Some(Producer::Source) | None => format!("{} (source)", p),
                Some(producer) => {
                    let from = producer.algorithm().map_or("?", |a| graph.name(a));
                    format!("{} <- {}", p, from)
                }
            })
            .collect();
        let _ = writeln!(out, "  {}: {}", desc.name, inputs.join(", "));
    }

    let conditions = graph.conditions_algorithms();
    if !conditions.is_empty() {
        out.push_str("conditions:\n");
        for alg in conditions {
            let _ = writeln!(out, "  {}", graph.name(*alg));
        }
    }
    out
}

fn tree(graph: &PrecedenceGraph, node: avalanche_core::NodeIndex, indent: usize, out: &mut String) {
    let cf = graph.node(node);
    let pad = "  ".repeat(indent);
    match cf.kind {
        CfNodeKind::Leaf(alg) => {
            let desc = graph.algorithm(alg);
            let mut notes = Vec::new();
            if desc.effective_cardinality() > 1 {
                notes.push(format!("x{}", desc.effective_cardinality()));
            }
            if desc.blocking {
                notes.push("blocking".to_string());
            }
            if !desc.resources.is_empty() {
                notes.push(format!("holds {}", desc.resources.join("+")));
            }
            if desc.views.is_some() {
                notes.push("makes views".to_string());
            }
            if notes.is_empty() {
                let _ = writeln!(out, "{}{}", pad, cf.name);
            } else {
                let _ = writeln!(out, "{}{} [{}]", pad, cf.name, notes.join(", "));
            }
        }
        CfNodeKind::Not => {
            let _ = writeln!(out, "{}NOT {}", pad, cf.name);
        }
        CfNodeKind::Decision(flags) => {
            let mut tags = vec![if flags.mode_or { "or" } else { "and" }];
            if flags.ordered {
                tags.push("ordered");
            }
            if flags.short_circuit {
                tags.push("short-circuit");
            }
            if flags.all_pass {
                tags.push("all-pass");
            }
            if graph.is_view_node(node) {
                tags.push("views");
            }
            let _ = writeln!(out, "{}{} ({})", pad, cf.name, tags.join(" "));
        }
    }
    for child in &cf.children {
        tree(graph, *child, indent + 1, out);
    }
}

/// Joint control-flow + data-flow graph in Graphviz DOT
#[must_use]
pub fn dot(graph: &PrecedenceGraph) -> String {
    let joint = graph.joint_graph();
    let labelled: DiGraph<String, String> = joint.map(
        |_, vertex| match vertex {
            JointVertex::Alg(a) => graph.name(*a).to_string(),
            JointVertex::Begin(n) => format!("{} >", graph.node(*n).name),
            JointVertex::End(n) => format!("< {}", graph.node(*n).name),
        },
        |_, edge| match edge {
            JointEdge::Contains => String::new(),
            JointEdge::Before => "then".to_string(),
            JointEdge::Data(path) => path.to_string(),
            JointEdge::Views => "views".to_string(),
        },
    );
    format!(
        "digraph avalanche {{\n{}}}\n",
        Dot::with_config(&labelled, &[Config::GraphContentOnly])
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CfSpec;
    use crate::descriptor::AlgorithmDescriptor;

    fn linear() -> PrecedenceGraph {
        PrecedenceGraph::build(
            vec![
                AlgorithmDescriptor::new("A").writes("/x"),
                AlgorithmDescriptor::new("B").reads("/x").with_cardinality(4),
            ],
            Some(&CfSpec::seq(vec![CfSpec::alg("A"), CfSpec::alg("B")]).named("top")),
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_text_rendering() {
        let rendered = text(&linear());
        assert!(rendered.contains("top (and ordered short-circuit)"));
        assert!(rendered.contains("    B [x4]"));
        assert!(rendered.contains("B: /Event/x <- A"));
    }

    #[test]
    fn test_dot_rendering() {
        let rendered = dot(&linear());
        assert!(rendered.starts_with("digraph avalanche {"));
        assert!(rendered.trim_end().ends_with('}'));
        assert!(rendered.contains("\"A\""));
        assert!(rendered.contains("/Event/x"));
        assert!(rendered.contains("top >"));
    }
}
