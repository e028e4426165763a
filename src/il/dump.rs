use super::{BlockId, EdgeKind, MethodIl, NodeId};
use std::collections::HashSet;
use std::fmt;

/// Indentation per tree level
const INDENT: usize = 2;

impl MethodIl {
    fn write_node(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: NodeId,
        depth: usize,
        seen: &mut HashSet<NodeId>,
    ) -> fmt::Result {
        let node = &self.nodes[id];
        write!(f, "{:<8}{:width$}", id.to_string(), "", width = depth * INDENT)?;
        if !seen.insert(id) {
            return writeln!(f, "==>{}", node.op());
        }

        write!(f, "{}", node.op())?;
        if let Some(constant) = node.constant() {
            write!(f, " {}", constant)?;
        }
        if let Some(symref) = node.symref() {
            write!(f, " {} {}", symref, self.symbols[symref])?;
        }
        if let Some(target) = node.branch_target() {
            write!(f, " --> {}", target)?;
        }
        if let Some(switch) = node.switch() {
            write!(f, " default --> {}", switch.default)?;
            for (key, target) in &switch.cases {
                write!(f, ", {} --> {}", key, target)?;
            }
        }
        if node.is_non_null() {
            f.write_str(" (nonnull)")?;
        }
        writeln!(f)?;

        for child in node.children() {
            self.write_node(f, *child, depth + 1, seen)?;
        }
        Ok(())
    }

    fn write_block(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: BlockId,
        seen: &mut HashSet<NodeId>,
    ) -> fmt::Result {
        let block = self.cfg.block(id);
        write!(f, "BBStart <{}>", id)?;
        if let Some(bc_index) = block.bc_index {
            write!(f, " bc {}", bc_index)?;
        }
        if let Some(catch) = &block.catch {
            match &catch.catch_type {
                Some(class) => write!(f, " catches {:?}", class)?,
                None => f.write_str(" catches all")?,
            }
            if catch.is_synchronized_handler {
                f.write_str(" (synchronized)")?;
            }
        }
        if block.is_cold {
            f.write_str(" (cold)")?;
        }
        writeln!(f)?;

        for root in self.tree_nodes(id) {
            self.write_node(f, root, 1, seen)?;
        }

        write!(f, "BBEnd <{}>", id)?;
        let mut separator = " -> ";
        for edge in self.cfg.edges().iter().filter(|e| e.from == id) {
            let marker = match edge.kind {
                EdgeKind::Normal => "",
                EdgeKind::Exception => "exc:",
            };
            write!(f, "{}{}{}", separator, marker, edge.to)?;
            separator = ", ";
        }
        writeln!(f)
    }
}

/// Renders the trees of every block in layout order
///
/// Each line starts with the node id. A node already printed (commoned) is shown as `==>op`
/// instead of being printed again with its children.
impl fmt::Display for MethodIl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.cfg.layout() {
            // Commoning never spans blocks
            let mut seen = HashSet::new();
            self.write_block(f, *block, &mut seen)?;
        }
        Ok(())
    }
}
