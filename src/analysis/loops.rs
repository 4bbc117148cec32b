//! Loop analysis: natural loops, nesting, exits and pre-headers.
//!
//! # Loop Structure
//!
//! A well-formed loop has the following structure:
//!
//! ```text
//!     [preheader]     <- Single entry predecessor (optional, may need insertion)
//!          |
//!          v
//!     [header] <------+  <- Single entry point, dominates all loop nodes
//!          |          |
//!          v          |
//!     [body ...]      |  <- Loop body nodes
//!          |          |
//!          v          |
//!     [latch] --------+  <- Back edge source(s)
//!          |
//!          v
//!     [exit ...]         <- Exit blocks (outside loop, have predecessor in loop)
//! ```
//!
//! # Classification
//!
//! - **Reducible**: every retreating edge into the header is a back edge
//!   (the header dominates the source)
//! - **Irreducible**: the cycle can be entered at more than one block
//! - **Infinite**: reducible, but no edge leaves the loop
//!
//! Only reducible loops are candidates for peeling and unrolling.
//!
//! # Pre-headers
//!
//! Analysis never edits the graph. [`ensure_preheader`] synthesizes a pre-header on
//! request; transformation passes call it only once they know they will transform
//! the loop.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::Dominance,
    ir::{BlockId, Graph},
    utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors},
    Result,
};

/// Structural classification of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// Single-entry loop whose header dominates the body
    Reducible,
    /// Cycle with more than one entry
    Irreducible,
    /// Reducible loop without exit edges
    Infinite,
}

/// Exit edge information for a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopExit {
    /// The block inside the loop that branches out.
    pub exiting_block: BlockId,
    /// The block outside the loop that is the exit target.
    pub exit_block: BlockId,
}

/// Loop information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    /// The header block (single entry point for reducible loops).
    pub header: BlockId,

    /// All blocks in the loop body (including header and nested loops).
    pub body: HashSet<BlockId>,

    /// Back edge sources, in the header's predecessor order.
    pub latches: Vec<BlockId>,

    /// The single non-loop predecessor of the header, unless that is the start
    /// block. `None` means [`ensure_preheader`] has to create one.
    pub preheader: Option<BlockId>,

    /// Exit edges from the loop, in block id then successor order.
    pub exits: Vec<LoopExit>,

    /// Loop nesting depth (0 = outermost).
    pub depth: usize,

    /// Classification of the loop.
    pub kind: LoopKind,

    /// Parent loop header, if this loop is nested.
    pub parent: Option<BlockId>,

    /// Immediate child loop headers.
    pub children: Vec<BlockId>,
}

impl Loop {
    /// Creates a loop containing only its header.
    #[must_use]
    pub fn new(header: BlockId) -> Self {
        let mut body = HashSet::new();
        body.insert(header);
        Self {
            header,
            body,
            latches: Vec::new(),
            preheader: None,
            exits: Vec::new(),
            depth: 0,
            kind: LoopKind::Reducible,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Returns true if this loop contains the given block.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }

    /// Body blocks sorted by id.
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockId> {
        let mut blocks: Vec<BlockId> = self.body.iter().copied().collect();
        blocks.sort_unstable();
        blocks
    }

    /// Returns the number of blocks in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Returns the single latch if there is exactly one.
    #[must_use]
    pub fn single_latch(&self) -> Option<BlockId> {
        match self.latches.as_slice() {
            [latch] => Some(*latch),
            _ => None,
        }
    }

    /// Returns true if this is an innermost loop (no children).
    #[must_use]
    pub fn is_innermost(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns true for reducible loops that can be left.
    #[must_use]
    pub fn is_reducible(&self) -> bool {
        self.kind == LoopKind::Reducible
    }

    /// Returns all exit blocks, deduplicated, in exit order.
    #[must_use]
    pub fn exit_blocks(&self) -> Vec<BlockId> {
        let mut blocks = Vec::new();
        for exit in &self.exits {
            if !blocks.contains(&exit.exit_block) {
                blocks.push(exit.exit_block);
            }
        }
        blocks
    }

    /// Returns all exiting blocks (blocks inside loop that branch out).
    pub fn exiting_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.exits.iter().map(|e| e.exiting_block)
    }

    /// Returns true if the header is the only exiting block.
    #[must_use]
    pub fn header_is_sole_exit(&self) -> bool {
        !self.exits.is_empty() && self.exits.iter().all(|e| e.exiting_block == self.header)
    }
}

/// Loop forest containing all loops of a graph.
///
/// Provides efficient queries for loop membership, nesting, and iteration.
#[derive(Debug, Clone)]
pub struct LoopForest {
    /// All loops, sorted by header id.
    loops: Vec<Loop>,
    /// Map from block to the innermost loop containing it.
    block_to_loop: Vec<Option<usize>>,
    /// Blocks that are the source of a back edge.
    back_edge_sources: HashSet<BlockId>,
    generation: u64,
}

impl LoopForest {
    /// Creates an empty loop forest.
    #[must_use]
    pub fn new(block_count: usize, generation: u64) -> Self {
        Self {
            loops: Vec::new(),
            block_to_loop: vec![None; block_count],
            back_edge_sources: HashSet::new(),
            generation,
        }
    }

    /// Graph generation the forest was computed for.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns all loops in the forest.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Returns the number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns true if there are no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Iterates over all loops in the forest.
    pub fn iter(&self) -> impl Iterator<Item = &Loop> {
        self.loops.iter()
    }

    /// Returns the innermost loop containing the given block.
    #[must_use]
    pub fn innermost_loop(&self, block: BlockId) -> Option<&Loop> {
        self.block_to_loop
            .get(block.index())
            .copied()
            .flatten()
            .map(|idx| &self.loops[idx])
    }

    /// Returns the loop with the given header.
    #[must_use]
    pub fn loop_for_header(&self, header: BlockId) -> Option<&Loop> {
        self.loops.iter().find(|l| l.header == header)
    }

    /// Returns the loop depth for a block (0 if not in any loop).
    #[must_use]
    pub fn loop_depth(&self, block: BlockId) -> usize {
        self.innermost_loop(block).map_or(0, |l| l.depth + 1)
    }

    /// Returns true if a block is in any loop.
    #[must_use]
    pub fn is_in_loop(&self, block: BlockId) -> bool {
        self.innermost_loop(block).is_some()
    }

    /// Returns true if `block` is the source of a back edge.
    #[must_use]
    pub fn has_back_edge(&self, block: BlockId) -> bool {
        self.back_edge_sources.contains(&block)
    }

    /// Returns true if `block` is the pre-header of some loop.
    #[must_use]
    pub fn is_preheader(&self, block: BlockId) -> bool {
        self.loops.iter().any(|l| l.preheader == Some(block))
    }

    /// Returns true if `block` heads a loop.
    #[must_use]
    pub fn is_header(&self, block: BlockId) -> bool {
        self.loops.iter().any(|l| l.header == block)
    }

    /// Returns loop headers sorted by depth, innermost first (ties by header id).
    #[must_use]
    pub fn headers_innermost_first(&self) -> Vec<BlockId> {
        let mut sorted: Vec<&Loop> = self.loops.iter().collect();
        sorted.sort_by_key(|l| (std::cmp::Reverse(l.depth), l.header));
        sorted.into_iter().map(|l| l.header).collect()
    }

    /// Structural equality ignoring the generation stamp.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.loops == other.loops
    }
}

fn block_of(node: NodeId) -> BlockId {
    BlockId::new(node.index() as u32)
}

fn node_of(block: BlockId) -> NodeId {
    NodeId::new(block.index())
}

/// Detects all loops of the graph using dominance-based back edge detection.
///
/// # Algorithm
///
/// 1. A depth-first walk finds retreating edges `n -> h` (to a block on the DFS
///    stack); when `h` dominates `n` it is a back edge, otherwise the cycle is
///    irreducible
/// 2. Back edges sharing a header form one loop whose body is the backward closure
///    from the back-edge sources up to the header
/// 3. Preheaders, exits and kinds are computed per loop
/// 4. Nesting follows header containment
#[must_use]
pub fn detect_loops(graph: &Graph, dominance: &Dominance) -> LoopForest {
    let block_count = graph.node_count();
    let mut forest = LoopForest::new(block_count, dominance.generation());
    let mut loops_by_header: HashMap<BlockId, Loop> = HashMap::new();

    for (source, target) in retreating_edges(graph) {
        let header = block_of(target);
        let source = block_of(source);
        let lp = loops_by_header
            .entry(header)
            .or_insert_with(|| Loop::new(header));

        if dominance.dominates(header, source) {
            lp.latches.push(source);
            expand_loop_body(graph, lp, source, None);
        } else {
            lp.kind = LoopKind::Irreducible;
            lp.latches.push(source);
            let region = forward_closure(graph, header);
            expand_loop_body(graph, lp, source, Some(&region));
        }
    }

    for lp in loops_by_header.values_mut() {
        // Latches in the header's predecessor order.
        if let Ok(block) = graph.block(lp.header) {
            let latches: HashSet<BlockId> = lp.latches.iter().copied().collect();
            lp.latches = block
                .preds()
                .iter()
                .copied()
                .filter(|pred| latches.contains(pred))
                .collect();
        }
        compute_preheader(graph, lp);
        compute_exits(graph, lp);
        if lp.kind == LoopKind::Reducible && lp.exits.is_empty() {
            lp.kind = LoopKind::Infinite;
        }
    }

    let mut loops: Vec<Loop> = loops_by_header.into_values().collect();
    loops.sort_by_key(|l| l.header);
    compute_nesting(&mut loops);

    // Outer loops first so that block_to_loop ends up with the deepest loop.
    let mut order: Vec<usize> = (0..loops.len()).collect();
    order.sort_by_key(|&i| loops[i].depth);
    for idx in order {
        for &block in &loops[idx].body {
            if let Some(slot) = forest.block_to_loop.get_mut(block.index()) {
                *slot = Some(idx);
            }
        }
    }
    for lp in &loops {
        if lp.kind != LoopKind::Irreducible {
            forest.back_edge_sources.extend(lp.latches.iter().copied());
        }
    }
    forest.loops = loops;

    forest
}

/// Retreating edges of a depth-first walk from the start block, in discovery order.
fn retreating_edges(graph: &Graph) -> Vec<(NodeId, NodeId)> {
    let node_count = graph.node_count();
    let mut on_stack = vec![false; node_count];
    let mut visited = vec![false; node_count];
    let mut edges = Vec::new();

    let entry = graph.entry();
    let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();
    visited[entry.index()] = true;
    on_stack[entry.index()] = true;
    stack.push((entry, graph.successors(entry).collect(), 0));

    while let Some((node, succs, cursor)) = stack.last_mut() {
        if let Some(&succ) = succs.get(*cursor) {
            *cursor += 1;
            let node = *node;
            if on_stack[succ.index()] {
                edges.push((node, succ));
            } else if !visited[succ.index()] {
                visited[succ.index()] = true;
                on_stack[succ.index()] = true;
                let next: Vec<NodeId> = graph.successors(succ).collect();
                stack.push((succ, next, 0));
            }
        } else {
            on_stack[node.index()] = false;
            stack.pop();
        }
    }
    edges
}

fn forward_closure(graph: &Graph, from: BlockId) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut worklist = vec![node_of(from)];
    while let Some(node) = worklist.pop() {
        if seen.insert(block_of(node)) {
            worklist.extend(graph.successors(node));
        }
    }
    seen
}

/// Expands the loop body to include all nodes that can reach the latch without
/// passing through the header, optionally restricted to `region`.
fn expand_loop_body(
    graph: &Graph,
    lp: &mut Loop,
    latch: BlockId,
    region: Option<&HashSet<BlockId>>,
) {
    if lp.body.contains(&latch) {
        return;
    }

    let mut worklist = vec![latch];

    while let Some(block) = worklist.pop() {
        if lp.body.insert(block) {
            for pred in graph.predecessors(node_of(block)) {
                let pred = block_of(pred);
                let allowed = region.is_none_or(|r| r.contains(&pred));
                if pred != lp.header && !lp.body.contains(&pred) && allowed {
                    worklist.push(pred);
                }
            }
        }
    }
}

/// Identifies the preheader for a loop.
///
/// A preheader is the single predecessor of the header that is outside the loop,
/// provided it is not the start block.
fn compute_preheader(graph: &Graph, lp: &mut Loop) {
    let non_loop_preds: Vec<BlockId> = graph
        .predecessors(node_of(lp.header))
        .map(block_of)
        .filter(|pred| !lp.body.contains(pred))
        .collect();

    lp.preheader = match non_loop_preds.as_slice() {
        [single] if *single != graph.start() => Some(*single),
        _ => None,
    };
}

/// Computes exit edges for a loop.
fn compute_exits(graph: &Graph, lp: &mut Loop) {
    lp.exits.clear();

    for body_block in lp.blocks() {
        for succ in graph.successors(node_of(body_block)).map(block_of) {
            if !lp.body.contains(&succ) {
                lp.exits.push(LoopExit {
                    exiting_block: body_block,
                    exit_block: succ,
                });
            }
        }
    }
}

/// Computes loop nesting relationships and depths.
fn compute_nesting(loops: &mut [Loop]) {
    let n = loops.len();

    let header_to_idx: HashMap<BlockId, usize> = loops
        .iter()
        .enumerate()
        .map(|(i, l)| (l.header, i))
        .collect();

    // Parent is the smallest other loop containing this loop's header.
    for i in 0..n {
        let header = loops[i].header;
        let parent = (0..n)
            .filter(|&j| {
                j != i && loops[j].body.contains(&header) && loops[j].size() > loops[i].size()
            })
            .min_by_key(|&j| (loops[j].size(), loops[j].header));
        loops[i].parent = parent.map(|j| loops[j].header);
    }

    for i in 0..n {
        if let Some(parent_header) = loops[i].parent {
            if let Some(&parent_idx) = header_to_idx.get(&parent_header) {
                let child = loops[i].header;
                loops[parent_idx].children.push(child);
            }
        }
    }

    for i in 0..n {
        let mut depth = 0;
        let mut current = loops[i].parent;
        while let Some(parent_header) = current {
            depth += 1;
            if depth > n {
                break;
            }
            current = header_to_idx
                .get(&parent_header)
                .and_then(|&idx| loops[idx].parent);
        }
        loops[i].depth = depth;
    }
}

/// Returns the pre-header of the loop headed by `header`, creating one if needed.
///
/// A new pre-header is spliced in when the header has more than one predecessor
/// outside the loop, or when the only one is the start block. Header Phi inputs from
/// the former outside predecessors are merged through the new block: equal inputs
/// pass through, differing ones get a new Phi in the pre-header. Analyses are
/// invalidated when the graph changes.
///
/// # Errors
///
/// [`crate::Error::Malformed`] if `header` does not head a loop or has no
/// predecessor outside it.
pub fn ensure_preheader(graph: &mut Graph, header: BlockId) -> Result<BlockId> {
    let forest = graph.loops();
    let lp = forest
        .loop_for_header(header)
        .ok_or_else(|| malformed_error!("{} is not a loop header", header))?;
    if let Some(preheader) = lp.preheader {
        return Ok(preheader);
    }

    let preds = graph.block(header)?.preds().to_vec();
    let outside: Vec<(usize, BlockId)> = preds
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, pred)| !lp.contains(*pred))
        .collect();

    match outside.as_slice() {
        [] => Err(malformed_error!("Loop {} has no entry edge", header)),
        [(_, single)] => {
            let preheader = graph.split_edge(*single, header)?;
            graph.invalidate_analyses();
            Ok(preheader)
        }
        _ => {
            let phis = graph.block(header)?.phis().to_vec();
            let mut entry_values = Vec::with_capacity(phis.len());
            for &phi in &phis {
                let inputs = graph.inst(phi)?.inputs();
                let values: Vec<_> = outside
                    .iter()
                    .map(|(index, _)| inputs.get(*index).copied())
                    .collect::<Option<_>>()
                    .ok_or_else(|| malformed_error!("Phi {} is missing inputs", phi))?;
                entry_values.push((phi, graph.inst(phi)?.ty(), values));
            }

            let preheader = graph.create_block();
            for &(_, pred) in &outside {
                graph.redirect_edge(pred, header, preheader)?;
            }
            graph.add_edge(preheader, header)?;

            for (phi, ty, values) in entry_values {
                let first = values[0];
                let merged = if values.iter().all(|&v| v == first) {
                    first
                } else {
                    graph.add_phi(preheader, ty, &values)?
                };
                graph.add_phi_input(phi, merged)?;
            }
            graph.invalidate_analyses();
            Ok(preheader)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::{ensure_preheader, LoopKind},
        ir::{builder::label, ConditionCode, DataType, GraphBuilder},
    };

    #[test]
    fn test_simple_while_loop() {
        // B0 -> B1 (header) -> B2 (body) -> B1, B1 -> B3 (exit)
        let mut graph = GraphBuilder::new("while")
            .build(|f| {
                let n = f.param(0, DataType::Int32);
                let zero = f.constant(0, DataType::Int32);
                f.block(0, |b| b.jump(1));
                f.block(1, |b| b.branch(ConditionCode::Lt, zero, n, 2, 3));
                f.block(2, |b| b.jump(1));
                f.block(3, |b| b.ret_void());
            })
            .unwrap();

        let forest = graph.loops();
        assert_eq!(forest.len(), 1);
        let header = label(1);
        let lp = forest.loop_for_header(header).unwrap();
        assert_eq!(lp.kind, LoopKind::Reducible);
        assert_eq!(lp.size(), 2);
        assert_eq!(lp.single_latch(), Some(label(2)));
        assert_eq!(lp.preheader, Some(label(0)));
        assert!(lp.header_is_sole_exit());
        assert!(forest.has_back_edge(label(2)));
        assert!(graph.block(header).unwrap().is_loop_header());
    }

    #[test]
    fn test_nested_loops() {
        let mut graph = GraphBuilder::new("nested")
            .build(|f| {
                let n = f.param(0, DataType::Int32);
                let zero = f.constant(0, DataType::Int32);
                f.block(0, |b| b.jump(1));
                f.block(1, |b| b.branch(ConditionCode::Lt, zero, n, 2, 5));
                f.block(2, |b| b.branch(ConditionCode::Lt, zero, n, 3, 4));
                f.block(3, |b| b.jump(2));
                f.block(4, |b| b.jump(1));
                f.block(5, |b| b.ret_void());
            })
            .unwrap();

        let forest = graph.loops();
        assert_eq!(forest.len(), 2);
        let outer = forest.loop_for_header(label(1)).unwrap();
        let inner = forest.loop_for_header(label(2)).unwrap();
        assert_eq!(inner.parent, Some(outer.header));
        assert_eq!(outer.children, vec![inner.header]);
        assert_eq!(inner.depth, 1);
        assert!(inner.is_innermost());
        assert_eq!(forest.loop_depth(label(3)), 2);
        assert_eq!(
            forest.headers_innermost_first(),
            vec![inner.header, outer.header]
        );
    }

    #[test]
    fn test_irreducible_and_infinite() {
        let mut graph = GraphBuilder::new("irreducible")
            .build(|f| {
                let n = f.param(0, DataType::Int32);
                let zero = f.constant(0, DataType::Int32);
                f.block(0, |b| b.branch(ConditionCode::Lt, zero, n, 1, 2));
                f.block(1, |b| b.branch(ConditionCode::Lt, zero, n, 2, 3));
                f.block(2, |b| b.jump(1));
                f.block(3, |b| b.jump(4));
                f.block(4, |b| b.jump(4));
            })
            .unwrap();

        let forest = graph.loops();
        assert!(forest.iter().any(|l| l.kind == LoopKind::Irreducible));
        let spin = forest.loop_for_header(label(4)).unwrap();
        assert_eq!(spin.kind, LoopKind::Infinite);
    }

    #[test]
    fn test_ensure_preheader_merges_entries() {
        let mut graph = GraphBuilder::new("two-entries")
            .build(|f| {
                let n = f.param(0, DataType::Int32);
                let zero = f.constant(0, DataType::Int32);
                let one = f.constant(1, DataType::Int32);
                f.block(0, |b| b.branch(ConditionCode::Lt, zero, n, 1, 2));
                f.block(1, |b| b.jump(3));
                f.block(2, |b| b.jump(3));
                let phi = f.block(3, |b| {
                    let phi = b.phi(DataType::Int32, &[(1, zero), (2, one)]);
                    b.branch(ConditionCode::Lt, phi, n, 4, 5);
                    phi
                });
                f.block(4, |b| b.jump(3));
                f.phi_input(phi, 4, one);
                f.block(5, |b| b.ret_void());
            })
            .unwrap();

        let header = label(3);
        let preheader = ensure_preheader(&mut graph, header).unwrap();
        let preds = graph.block(header).unwrap().preds().to_vec();
        assert_eq!(preds, vec![label(4), preheader]);
        assert_eq!(graph.block(preheader).unwrap().phis().len(), 1);

        let forest = graph.loops();
        assert_eq!(forest.loop_for_header(header).unwrap().preheader, Some(preheader));
        assert_eq!(ensure_preheader(&mut graph, header).unwrap(), preheader);
    }
}
