//! `Topology`: owns the parent→children edges of a logical plan, separate
//! from the value-typed `PlanNode`s themselves (spec.md §9). Traversal
//! (topological order, children-of, roots) lives here instead of on the
//! nodes.

use std::collections::{HashMap, HashSet};

use nes_core::OperatorId;

#[derive(Debug, Clone, Default)]
pub struct Topology {
    children: HashMap<OperatorId, Vec<OperatorId>>,
    all_nodes: Vec<OperatorId>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: OperatorId) {
        self.all_nodes.push(id);
        self.children.entry(id).or_default();
    }

    pub fn add_edge(&mut self, parent: OperatorId, child: OperatorId) {
        self.children.entry(parent).or_default().push(child);
    }

    pub fn children_of(&self, id: OperatorId) -> &[OperatorId] {
        self.children.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn roots(&self) -> Vec<OperatorId> {
        let non_roots: HashSet<OperatorId> = self.children.values().flatten().copied().collect();
        self.all_nodes.iter().copied().filter(|id| !non_roots.contains(id)).collect()
    }

    /// Post-order (children before parents) walk from every root, the
    /// order physical lowering and schema inference both need (spec.md
    /// §4.C: "bottom-up").
    pub fn topological_order(&self) -> Vec<OperatorId> {
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(self.all_nodes.len());
        for root in self.roots() {
            self.visit_post_order(root, &mut visited, &mut order);
        }
        order
    }

    fn visit_post_order(&self, id: OperatorId, visited: &mut HashSet<OperatorId>, order: &mut Vec<OperatorId>) {
        if !visited.insert(id) {
            return;
        }
        for &child in self.children_of(id) {
            self.visit_post_order(child, visited, order);
        }
        order.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topological_order_visits_children_before_parents() {
        let mut t = Topology::new();
        let (source, map, sink) = (OperatorId::new(1), OperatorId::new(2), OperatorId::new(3));
        t.add_node(source);
        t.add_node(map);
        t.add_node(sink);
        t.add_edge(sink, map);
        t.add_edge(map, source);
        let order = t.topological_order();
        assert_eq!(order, vec![source, map, sink]);
    }

    #[test]
    fn roots_excludes_nodes_referenced_as_children() {
        let mut t = Topology::new();
        let (source, sink) = (OperatorId::new(1), OperatorId::new(2));
        t.add_node(source);
        t.add_node(sink);
        t.add_edge(sink, source);
        assert_eq!(t.roots(), vec![sink]);
    }
}
