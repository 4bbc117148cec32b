//! Human-readable rendering of a graph, as text or as Graphviz DOT.

use std::fmt::{self, Write};

use crate::{
    ir::{BlockId, Graph, InstId, Opcode},
    utils::escape_dot,
};

/// Display adapter for a [`Graph`].
///
/// ```text
/// graph sum (X86_64)
/// bb0: -> bb2
///     v0: Int32 = Parameter { index: 0 }
/// bb2 [loop]: bb0, bb2 -> bb2, bb3
///     v3: Int32 = Phi v1, v5
/// ```
#[derive(Debug, Clone, Copy)]
pub struct GraphDump<'a> {
    graph: &'a Graph,
}

impl<'a> GraphDump<'a> {
    /// Wraps `graph` for printing.
    #[must_use]
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    fn write_inst(&self, out: &mut impl Write, id: InstId) -> fmt::Result {
        let Ok(inst) = self.graph.inst(id) else {
            return write!(out, "{id}: <removed>");
        };
        let opcode = match inst.opcode() {
            Opcode::Phi => "Phi".to_string(),
            Opcode::SafePoint(data) => {
                let regs: Vec<String> = data.vregs.iter().map(ToString::to_string).collect();
                format!("SafePoint [{}]", regs.join(", "))
            }
            other => format!("{other:?}"),
        };
        write!(out, "{id}: {} = {opcode}", inst.ty())?;
        for (index, input) in inst.inputs().iter().enumerate() {
            let sep = if index == 0 { " " } else { ", " };
            write!(out, "{sep}{input}")?;
        }
        if !inst.flags().is_empty() {
            write!(out, " {:?}", inst.flags())?;
        }
        Ok(())
    }

    fn block_title(&self, block: BlockId) -> String {
        let mut title = block.to_string();
        if block == self.graph.start() {
            title.push_str(" (start)");
        } else if block == self.graph.end() {
            title.push_str(" (end)");
        }
        if let Ok(slot) = self.graph.block(block) {
            if slot.is_loop_header() {
                title.push_str(" [loop]");
            }
            if slot.is_osr_entry() {
                title.push_str(" [osr]");
            }
        }
        title
    }

    /// Renders the graph in DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        dot.push_str("digraph SSA {\n");
        let _ = writeln!(dot, "    label=\"{}\";", escape_dot(self.graph.name()));
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n\n");

        for block in self.graph.block_ids() {
            let Ok(slot) = self.graph.block(block) else {
                continue;
            };
            let mut label = format!("{}\\l", escape_dot(&self.block_title(block)));
            for id in slot.all_insts() {
                let mut line = String::new();
                let _ = self.write_inst(&mut line, id);
                let _ = write!(label, "{}\\l", escape_dot(&line));
            }
            let _ = writeln!(dot, "    {block} [label=\"{label}\"];");
        }
        dot.push('\n');

        for block in self.graph.block_ids() {
            let Ok(slot) = self.graph.block(block) else {
                continue;
            };
            let two_way = slot.succs().len() == 2;
            for (index, succ) in slot.succs().iter().enumerate() {
                match (two_way, index) {
                    (true, 0) => {
                        let _ = writeln!(dot, "    {block} -> {succ} [label=\"T\", color=green];");
                    }
                    (true, _) => {
                        let _ = writeln!(dot, "    {block} -> {succ} [label=\"F\", color=red];");
                    }
                    _ => {
                        let _ = writeln!(dot, "    {block} -> {succ};");
                    }
                }
            }
        }
        dot.push_str("}\n");
        dot
    }
}

impl fmt::Display for GraphDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {} ({})", self.graph.name(), self.graph.arch())?;
        for block in self.graph.block_ids() {
            let Ok(slot) = self.graph.block(block) else {
                continue;
            };
            write!(f, "{}:", self.block_title(block))?;
            let preds: Vec<String> = slot.preds().iter().map(ToString::to_string).collect();
            let succs: Vec<String> = slot.succs().iter().map(ToString::to_string).collect();
            if !preds.is_empty() {
                write!(f, " {}", preds.join(", "))?;
            }
            if !succs.is_empty() {
                write!(f, " -> {}", succs.join(", "))?;
            }
            writeln!(f)?;
            for id in slot.all_insts() {
                write!(f, "    ")?;
                self.write_inst(f, id)?;
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
