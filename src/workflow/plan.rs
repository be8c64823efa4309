//! Graph planning: structural checks and level ordering.
//!
//! A plan is a list of levels. Every block in level N depends only on blocks
//! in levels < N, so the blocks of one level may run concurrently. Within a
//! level, blocks keep their declaration order.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::types::{Block, BlockKind, Connection};
use crate::error::{GraphError, GraphErrorKind};

/// Ordered execution levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    levels: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Level index holding `id`.
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|b| b == id))
    }
}

/// Validate the graph and group blocks into levels (Kahn's algorithm).
///
/// Fails with the first structural problem found: duplicate block ids,
/// dangling, self-looping or repeated edges, a missing respond block, or a
/// cycle. A cycle error names a block that lies on the cycle.
pub fn plan(blocks: &[Block], connections: &[Connection]) -> Result<ExecutionPlan, GraphError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(blocks.len());
    for (pos, block) in blocks.iter().enumerate() {
        if index.insert(block.id.as_str(), pos).is_some() {
            return Err(GraphError::at(
                GraphErrorKind::DuplicateBlockId,
                &block.id,
                format!("block id '{}' is declared more than once", block.id),
            ));
        }
    }

    let n = blocks.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut seen_edges: HashSet<(usize, usize)> = HashSet::new();

    for conn in connections {
        let source = *index.get(conn.source_block_id.as_str()).ok_or_else(|| {
            GraphError::at(
                GraphErrorKind::DanglingEdge,
                &conn.source_block_id,
                format!(
                    "connection source '{}' is not a block of this workflow",
                    conn.source_block_id
                ),
            )
        })?;
        let target = *index.get(conn.target_block_id.as_str()).ok_or_else(|| {
            GraphError::at(
                GraphErrorKind::DanglingEdge,
                &conn.target_block_id,
                format!(
                    "connection target '{}' is not a block of this workflow",
                    conn.target_block_id
                ),
            )
        })?;

        if source == target {
            return Err(GraphError::at(
                GraphErrorKind::SelfLoop,
                &conn.source_block_id,
                format!("block '{}' is connected to itself", conn.source_block_id),
            ));
        }
        if !seen_edges.insert((source, target)) {
            return Err(GraphError::at(
                GraphErrorKind::DuplicateEdge,
                &conn.target_block_id,
                format!(
                    "connection '{}' -> '{}' is declared more than once",
                    conn.source_block_id, conn.target_block_id
                ),
            ));
        }

        successors[source].push(target);
        predecessors[target].push(source);
    }

    if !blocks.iter().any(|b| b.kind == BlockKind::Respond) {
        return Err(GraphError::new(
            GraphErrorKind::NoResponse,
            "workflow has no respond block",
        ));
    }

    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut levels = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
        let mut next = Vec::new();
        for &pos in &current {
            for &succ in &successors[pos] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    next.push(succ);
                }
            }
        }
        next.sort_unstable();

        placed += current.len();
        levels.push(current.iter().map(|&i| blocks[i].id.clone()).collect());
        current = next;
    }

    if placed < n {
        let on_cycle = find_cycle_member(&in_degree, &predecessors);
        let id = &blocks[on_cycle].id;
        return Err(GraphError::at(
            GraphErrorKind::Cycle,
            id,
            format!("block '{}' is part of a dependency cycle", id),
        ));
    }

    Ok(ExecutionPlan { levels })
}

/// Walk unplaced predecessors from the first unplaced block until a block
/// repeats; that block lies on a cycle.
fn find_cycle_member(in_degree: &[usize], predecessors: &[Vec<usize>]) -> usize {
    let unplaced = |i: usize| in_degree[i] > 0;
    let Some(mut pos) = (0..in_degree.len()).find(|&i| unplaced(i)) else {
        return 0;
    };
    let mut visited = HashSet::new();
    while visited.insert(pos) {
        // every unplaced block still has an unplaced predecessor
        match predecessors[pos].iter().copied().find(|&p| unplaced(p)) {
            Some(prev) => pos = prev,
            None => break,
        }
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(id: &str, kind: BlockKind) -> Block {
        Block::new(id, kind, json!({}))
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<Connection> {
        pairs.iter().map(|(s, t)| Connection::new(*s, *t)).collect()
    }

    #[test]
    fn test_diamond_levels() {
        let blocks = vec![
            block("A", BlockKind::Intake),
            block("B", BlockKind::DatastoreQuery),
            block("C", BlockKind::OutboundCall),
            block("D", BlockKind::Respond),
        ];
        let conns = edges(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]);

        let plan = plan(&blocks, &conns).unwrap();
        assert_eq!(
            plan.levels(),
            &[
                vec!["A".to_string()],
                vec!["B".to_string(), "C".to_string()],
                vec!["D".to_string()],
            ]
        );
        assert_eq!(plan.level_of("C"), Some(1));
        assert_eq!(plan.block_count(), 4);
    }

    #[test]
    fn test_level_keeps_declaration_order() {
        let blocks = vec![
            block("start", BlockKind::Intake),
            block("zeta", BlockKind::Transform),
            block("alpha", BlockKind::Transform),
            block("out", BlockKind::Respond),
        ];
        // edges declared in reverse on purpose
        let conns = edges(&[
            ("start", "alpha"),
            ("start", "zeta"),
            ("alpha", "out"),
            ("zeta", "out"),
        ]);
        let plan = plan(&blocks, &conns).unwrap();
        assert_eq!(plan.levels()[1], vec!["zeta".to_string(), "alpha".to_string()]);
    }

    #[test]
    fn test_disconnected_blocks_start_in_level_zero() {
        let blocks = vec![
            block("a", BlockKind::Intake),
            block("lonely", BlockKind::Transform),
            block("out", BlockKind::Respond),
        ];
        let plan = plan(&blocks, &edges(&[("a", "out")])).unwrap();
        assert_eq!(plan.levels()[0], vec!["a".to_string(), "lonely".to_string()]);
        assert_eq!(plan.levels()[1], vec!["out".to_string()]);
    }

    #[test]
    fn test_cycle_names_block_on_cycle() {
        let blocks = vec![
            block("in", BlockKind::Intake),
            block("X", BlockKind::Transform),
            block("Y", BlockKind::Transform),
            block("out", BlockKind::Respond),
        ];
        let conns = edges(&[("in", "X"), ("X", "Y"), ("Y", "X"), ("Y", "out")]);
        let err = plan(&blocks, &conns).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::Cycle);
        let named = err.block_id.unwrap();
        assert!(named == "X" || named == "Y", "named {}", named);
    }

    #[test]
    fn test_cycle_downstream_block_is_not_blamed() {
        let blocks = vec![
            block("tail", BlockKind::Respond),
            block("X", BlockKind::Transform),
            block("Y", BlockKind::Transform),
        ];
        let conns = edges(&[("X", "Y"), ("Y", "X"), ("Y", "tail")]);
        let err = plan(&blocks, &conns).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::Cycle);
        assert_ne!(err.block_id.as_deref(), Some("tail"));
    }

    #[test]
    fn test_long_cycle_with_entry_branch() {
        // out <- d, and b -> c -> d -> b with e feeding into c
        let blocks = vec![
            block("out", BlockKind::Respond),
            block("in", BlockKind::Intake),
            block("a", BlockKind::Transform),
            block("b", BlockKind::Transform),
            block("c", BlockKind::Transform),
            block("d", BlockKind::Transform),
            block("e", BlockKind::Transform),
        ];
        let conns = edges(&[
            ("in", "a"),
            ("a", "b"),
            ("b", "c"),
            ("c", "d"),
            ("d", "b"),
            ("e", "c"),
            ("d", "out"),
        ]);
        let err = plan(&blocks, &conns).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::Cycle);
        let named = err.block_id.unwrap();
        assert!(["b", "c", "d"].contains(&named.as_str()), "named {}", named);
    }

    /// Small linear congruential generator so the graphs are reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }
    }

    #[test]
    fn test_random_acyclic_graphs_level_invariant() {
        let mut rng = Lcg(0x5eed);

        for round in 0..300 {
            let n = 2 + rng.below(14) as usize;
            let blocks: Vec<Block> = (0..n)
                .map(|i| {
                    let kind = if i == 0 { BlockKind::Respond } else { BlockKind::Transform };
                    block(&format!("b{}", i), kind)
                })
                .collect();

            // a random topological order; edges only run forward in it
            let mut order: Vec<usize> = (0..n).collect();
            for i in (1..n).rev() {
                order.swap(i, rng.below(i as u64 + 1) as usize);
            }
            let mut conns = Vec::new();
            for x in 0..n {
                for y in x + 1..n {
                    if rng.below(100) < 30 {
                        conns.push(Connection::new(
                            format!("b{}", order[x]),
                            format!("b{}", order[y]),
                        ));
                    }
                }
            }

            let plan = plan(&blocks, &conns)
                .unwrap_or_else(|e| panic!("round {}: acyclic graph rejected: {}", round, e));

            let mut seen = HashSet::new();
            for level in plan.levels() {
                assert!(!level.is_empty(), "round {}: empty level", round);
                for id in level {
                    assert!(seen.insert(id.clone()), "round {}: {} placed twice", round, id);
                }
            }
            assert_eq!(seen.len(), n, "round {}: blocks missing", round);
            assert_eq!(plan.block_count(), n);

            for conn in &conns {
                let from = plan.level_of(&conn.source_block_id).unwrap();
                let to = plan.level_of(&conn.target_block_id).unwrap();
                assert!(
                    from < to,
                    "round {}: {} (level {}) -> {} (level {})",
                    round,
                    conn.source_block_id,
                    from,
                    conn.target_block_id,
                    to
                );
            }

            // every block past level 0 waits on something in the level before
            for (index, level) in plan.levels().iter().enumerate().skip(1) {
                for id in level {
                    assert!(
                        conns.iter().any(|c| &c.target_block_id == id
                            && plan.level_of(&c.source_block_id) == Some(index - 1)),
                        "round {}: {} could run earlier",
                        round,
                        id
                    );
                }
            }
        }
    }

    #[test]
    fn test_dangling_edge() {
        let blocks = vec![block("a", BlockKind::Intake), block("out", BlockKind::Respond)];
        let err = plan(&blocks, &edges(&[("a", "ghost")])).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::DanglingEdge);
        assert_eq!(err.block_id.as_deref(), Some("ghost"));
    }

    #[test]
    fn test_no_response() {
        let blocks = vec![block("a", BlockKind::Intake), block("b", BlockKind::Transform)];
        let err = plan(&blocks, &edges(&[("a", "b")])).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::NoResponse);
    }

    #[test]
    fn test_self_loop_and_duplicate_edge() {
        let blocks = vec![block("a", BlockKind::Intake), block("out", BlockKind::Respond)];

        let err = plan(&blocks, &edges(&[("a", "a")])).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::SelfLoop);

        let err = plan(&blocks, &edges(&[("a", "out"), ("a", "out")])).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::DuplicateEdge);
    }

    #[test]
    fn test_duplicate_block_id() {
        let blocks = vec![
            block("a", BlockKind::Intake),
            block("a", BlockKind::Respond),
        ];
        let err = plan(&blocks, &[]).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::DuplicateBlockId);
    }
}
