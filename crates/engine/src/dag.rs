use volition_core::{AgentHandle, GoalHandle};

/// One step of the best intention chain produced by the scheduler.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub desire: GoalHandle,
    /// `None` marks a delegation to a team member.
    pub plan: Option<String>,
    pub resource_locks: Vec<String>,
    pub delegate: Option<AgentHandle>,
}

impl ChainEntry {
    pub fn is_delegation(&self) -> bool {
        self.plan.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct DagNode {
    pub entry: ChainEntry,
    children: Vec<usize>,
    /// Set once the entry's plan has been staged on the desire's
    /// executor; the node closes when that intention concludes.
    pub active: bool,
}

/// The linear best chain converted into a parallel/sequenced execution
/// graph: intentions with no resource conflicts run side by side, the
/// rest queue beneath the first conflicting node.
///
/// The conflict resolution is greedy: a new node attaches under the first
/// open node (or descendant) it conflicts with.
#[derive(Debug, Default)]
pub struct IntentionDag {
    nodes: Vec<DagNode>,
    open: Vec<usize>,
}

impl IntentionDag {
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.open.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_chain(&mut self, chain: Vec<ChainEntry>) {
        self.clear();
        for entry in chain {
            self.insert(entry);
        }
    }

    fn has_conflict(&self, a: &ChainEntry, b_index: usize) -> bool {
        let b = &self.nodes[b_index].entry;
        a.resource_locks
            .iter()
            .any(|lock| b.resource_locks.contains(lock))
    }

    fn insert(&mut self, entry: ChainEntry) {
        let index = self.nodes.len();
        let no_locks = entry.resource_locks.is_empty();
        self.nodes.push(DagNode {
            entry,
            children: Vec::new(),
            active: false,
        });

        // Delegated nodes never hold local locks and always run at the
        // root, as do lock-free nodes and the first node overall.
        if self.nodes[index].entry.is_delegation() || self.open.is_empty() || no_locks {
            self.open.push(index);
            return;
        }

        // Walk the open graph for a resource conflict; queue beneath the
        // first conflicting node, descending through its children.
        let mut check_list: Vec<(usize, Option<usize>)> =
            self.open.iter().map(|&n| (n, None)).collect();
        while !check_list.is_empty() {
            let (candidate, parent) = check_list.remove(0);
            if !self.has_conflict(&self.nodes[index].entry, candidate) {
                if check_list.is_empty() {
                    // No conflicts anywhere on this path: runs in
                    // parallel.
                    match parent {
                        Some(parent) => self.nodes[parent].children.push(index),
                        None => self.open.push(index),
                    }
                    return;
                }
                continue;
            }

            // Conflict found: this node is sequenced after `candidate`
            // (or after one of its descendants).
            check_list.clear();
            if self.nodes[candidate].children.is_empty() {
                self.nodes[candidate].children.push(index);
                return;
            }
            for &child in &self.nodes[candidate].children {
                check_list.push((child, Some(candidate)));
            }
        }
    }

    /// Indices of the nodes currently allowed to execute.
    pub fn open_nodes(&self) -> Vec<usize> {
        self.open.clone()
    }

    pub fn node(&self, index: usize) -> &DagNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut DagNode {
        &mut self.nodes[index]
    }

    /// Resource locks of every open node (exclusivity diagnostics).
    pub fn open_locks(&self) -> Vec<String> {
        let mut locks = Vec::new();
        for &index in &self.open {
            locks.extend(self.nodes[index].entry.resource_locks.iter().cloned());
        }
        locks
    }

    /// Close an open node; its children graduate to the open list.
    pub fn close(&mut self, index: usize) -> Vec<usize> {
        let Some(position) = self.open.iter().position(|&n| n == index) else {
            return Vec::new();
        };
        self.open.remove(position);
        let children = std::mem::take(&mut self.nodes[index].children);
        self.open.extend(children.iter().copied());
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volition_core::UniqueId;

    fn entry(desire: &str, plan: &str, locks: &[&str]) -> ChainEntry {
        ChainEntry {
            desire: GoalHandle::new(desire, UniqueId::random()),
            plan: Some(plan.to_string()),
            resource_locks: locks.iter().map(|s| s.to_string()).collect(),
            delegate: None,
        }
    }

    #[test]
    fn test_conflict_free_nodes_run_in_parallel() {
        let mut dag = IntentionDag::default();
        dag.set_chain(vec![
            entry("g0", "p0", &["A"]),
            entry("g1", "p1", &["B"]),
        ]);
        assert_eq!(dag.open_nodes().len(), 2);
    }

    #[test]
    fn test_conflicting_nodes_sequence() {
        // The dag.cpp example: [A], [B], [A, B], [B] becomes two lanes.
        let mut dag = IntentionDag::default();
        dag.set_chain(vec![
            entry("g0", "p0", &["A"]),
            entry("g1", "p1", &["B"]),
            entry("g2", "p2", &["A", "B"]),
            entry("g3", "p3", &["B"]),
        ]);
        let open = dag.open_nodes();
        assert_eq!(open, vec![0, 1]);

        // Closing node 0 graduates node 2; closing 1 graduates 3.
        let graduated = dag.close(0);
        assert_eq!(graduated, vec![2]);
        assert_eq!(dag.close(1), vec![3]);
        assert_eq!(dag.open_nodes(), vec![2, 3]);
    }

    #[test]
    fn test_open_locks_have_no_duplicates_when_sequenced() {
        let mut dag = IntentionDag::default();
        dag.set_chain(vec![
            entry("g0", "p0", &["A"]),
            entry("g1", "p1", &["A"]),
            entry("g2", "p2", &["B"]),
        ]);
        let locks = dag.open_locks();
        let mut deduped = locks.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(locks.len(), deduped.len());
    }

    #[test]
    fn test_delegations_stay_at_root() {
        let mut dag = IntentionDag::default();
        let delegation = ChainEntry {
            desire: GoalHandle::new("g1", UniqueId::random()),
            plan: None,
            resource_locks: Vec::new(),
            delegate: Some(AgentHandle::new("member", UniqueId::random())),
        };
        dag.set_chain(vec![entry("g0", "p0", &["A"]), delegation]);
        assert_eq!(dag.open_nodes().len(), 2);
    }
}
