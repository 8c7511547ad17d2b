//! Dominance analysis: critical-edge splitting, DFS numbering,
//! Lengauer–Tarjan semidominators and immediate dominators, the dominator
//! tree, dominance frontiers, back edges, natural loops and the loop-nest
//! forest.
//!
//! The algorithm runs on a plain index graph extracted from the reachable
//! part of a procedure, so the unit tests can drive it with raw edge lists.

use crate::commons::{Map, Set};
use crate::middle_end::ir::{BlockId, ContEdge, Cont, Ir, Procedure};


// SECTION: public interface

#[derive(Clone, Debug)]
pub struct DominationResult {
    pub idom: Map<BlockId, BlockId>,
    pub dom: Map<BlockId, Set<BlockId>>,
    pub dtree: Map<BlockId, Set<BlockId>>,
    pub dtreeroot: BlockId,
    pub frontier: Map<BlockId, Set<BlockId>>,
}

/// A natural loop: for a back edge (v, u) with u dominating v, the nodes
/// that reach v without passing through u, plus u and v.
#[derive(Clone, Debug)]
pub struct NaturalLoop {
    pub header: BlockId,
    pub back_edge: (BlockId, BlockId),
    pub body: Set<BlockId>,
    /// Index of the smallest strictly containing loop, if any (the loop-nest
    /// forest edge).
    pub parent: Option<usize>,
}

/// The analyser: computes a [`DominationResult`] and retains back edges,
/// loops and the loop-nest forest for the allocator to consult.
#[derive(Clone, Debug)]
pub struct DominatorAnalysis {
    pub result: DominationResult,
    pub backedges: Set<(BlockId, BlockId)>,
    pub loops: Vec<NaturalLoop>,
}

/// Split critical edges, then compute dominance information for the
/// reachable part of the procedure.
pub fn analyze<T: Ir>(proc: &mut Procedure<T>) -> DominatorAnalysis {
    split_critical_edges(proc);

    // extract the reachable subgraph as an index graph.
    let blocks = proc.reachable();
    let index: Map<BlockId, usize> = blocks.iter().enumerate().map(|(i, &b)| (b, i)).collect();
    let mut graph = FlowGraph::new(blocks.len());
    for (i, &b) in blocks.iter().enumerate() {
        if let Some(cont) = &proc.block(b).cont {
            for t in cont.targets() {
                graph.add_edge(i, index[&t]);
            }
        }
    }

    let mut lt = LengauerTarjan::new(&graph);
    lt.semidominators();
    lt.idominators();
    lt.calc_backedges();
    lt.calc_loops();
    lt.calc_lnf();
    lt.dominator_tree();
    lt.calc_frontier();

    // translate node indices back to block ids.
    let blk = |i: usize| blocks[i];
    let blkset = |s: &Set<usize>| s.iter().map(|&i| blk(i)).collect::<Set<BlockId>>();
    let result = DominationResult {
        idom: lt.idom.iter().enumerate().map(|(v, &d)| (blk(v), blk(d))).collect(),
        dom: lt.dtree.iter().map(|(&v, cs)| (blk(v), blkset(cs))).collect(),
        dtree: lt.dtree.iter().map(|(&v, cs)| (blk(v), blkset(cs))).collect(),
        dtreeroot: blk(graph.root),
        frontier: lt.frontier.iter().map(|(&v, fs)| (blk(v), blkset(fs))).collect(),
    };
    DominatorAnalysis {
        result,
        backedges: lt.backedges.iter().map(|&(v, u)| (blk(v), blk(u))).collect(),
        loops: lt
            .loops
            .iter()
            .map(|l| NaturalLoop {
                header: blk(l.header),
                back_edge: (blk(l.back_edge.0), blk(l.back_edge.1)),
                body: blkset(&l.body),
                parent: l.parent,
            })
            .collect(),
    }
}

// SECTION: critical-edge splitting

/// Insert a forwarding block on every edge from a block with more than one
/// successor to a block with more than one predecessor, so that afterwards no
/// such edge remains. Parameter arguments travel through the fresh block
/// unchanged.
pub fn split_critical_edges<T: Ir>(proc: &mut Procedure<T>) {
    for v in proc.blocks().collect::<Vec<_>>() {
        if proc.block(v).succs.len() < 2 {
            continue;
        }
        let nedges = proc.block(v).cont.as_ref().map_or(0, |c| c.edges().len());
        for ei in 0..nedges {
            let u = proc.block(v).cont.as_ref().unwrap().edges()[ei].target;
            if proc.block(u).preds.len() < 2 {
                continue;
            }

            let w = proc.add_block("split");

            // mirror u's parameters on w and route the old arguments through.
            let uparams = proc.block(u).params.clone();
            let old_args = proc.block(v).cont.as_ref().unwrap().edges()[ei].args.clone();
            let mut via = ContEdge::new(u);
            let mut to_w = ContEdge::new(w);
            for pu in uparams {
                let pw = proc.param(w);
                via.args.insert(pu, T::value_operand(pw));
                if let Some(a) = old_args.get(&pu) {
                    to_w.args.insert(pw, a.clone());
                }
            }

            // rewire v's edge and the pred/succ lists; u keeps its parameter
            // list and sees w as the predecessor instead of v.
            *proc.block_mut(v).cont.as_mut().unwrap().edges_mut()[ei] = to_w;
            proc.block_mut(v).succs[ei] = w;
            let pi = proc.block(u).preds.iter().position(|&p| p == v).unwrap();
            proc.block_mut(u).preds[pi] = w;
            proc.block_mut(w).cont = Some(Cont::Jump(via));
            proc.block_mut(w).preds.push(v);
            proc.block_mut(w).succs.push(u);
        }
    }
}

// SECTION: the index graph

#[derive(Clone, Debug)]
pub struct FlowGraph {
    pub preds: Vec<Vec<usize>>,
    pub succs: Vec<Vec<usize>>,
    pub root: usize,
}

impl FlowGraph {
    pub fn new(n: usize) -> Self {
        FlowGraph {
            preds: vec![vec![]; n],
            succs: vec![vec![]; n],
            root: 0,
        }
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.succs[from].push(to);
        self.preds[to].push(from);
    }

    fn len(&self) -> usize {
        self.preds.len()
    }
}

// SECTION: Lengauer-Tarjan

const UNSET: usize = usize::MAX;

pub struct LengauerTarjan<'g> {
    g: &'g FlowGraph,
    // dfs preorder number per node
    dfs: Vec<usize>,
    // dfs tree parent per node
    parent: Vec<usize>,
    // nodes in reverse dfs preorder
    dfsnodes: Vec<usize>,
    // path-compression forest with label-of-minimum-semidominator
    ancestor: Vec<usize>,
    label: Vec<usize>,
    // semi is indexed by dfs number and holds nodes
    semi: Vec<usize>,
    pub idom: Vec<usize>,
    pub backedges: Set<(usize, usize)>,
    pub loops: Vec<IndexLoop>,
    pub dtree: Map<usize, Set<usize>>,
    pub dtreeroot: usize,
    pub frontier: Map<usize, Set<usize>>,
}

#[derive(Clone, Debug)]
pub struct IndexLoop {
    pub header: usize,
    pub back_edge: (usize, usize),
    pub body: Set<usize>,
    pub parent: Option<usize>,
}

impl<'g> LengauerTarjan<'g> {
    pub fn new(g: &'g FlowGraph) -> Self {
        let n = g.len();
        let mut lt = LengauerTarjan {
            g,
            dfs: vec![UNSET; n],
            parent: vec![UNSET; n],
            dfsnodes: vec![],
            ancestor: (0..n).collect(),
            label: (0..n).collect(),
            semi: (0..n).collect(),
            idom: vec![UNSET; n],
            backedges: Set::new(),
            loops: vec![],
            dtree: Map::new(),
            dtreeroot: g.root,
            frontier: Map::new(),
        };
        lt.dfs_number();
        lt
    }

    fn dfs_number(&mut self) {
        let mut order = vec![];
        let mut counter = 0;
        // recursive preorder walk, children numbered before siblings'
        // subtrees, matching the recursion the rest of the algorithm assumes.
        fn go(
            lt: &mut LengauerTarjan,
            order: &mut Vec<usize>,
            counter: &mut usize,
            v: usize,
        ) {
            if lt.dfs[v] != UNSET {
                return;
            }
            lt.dfs[v] = *counter;
            *counter += 1;
            order.push(v);
            for i in 0..lt.g.succs[v].len() {
                let u = lt.g.succs[v][i];
                if lt.dfs[u] == UNSET {
                    go(lt, order, counter, u);
                    lt.parent[u] = v;
                }
            }
        }
        go(self, &mut order, &mut counter, self.g.root);
        self.parent[self.g.root] = self.g.root;
        order.reverse();
        self.dfsnodes = order;
    }

    fn find(&mut self, v: usize) -> usize {
        let a = self.ancestor[v];
        if a == v {
            return v;
        }
        let r = self.find(a);
        if self.dfs[self.semi[self.dfs[self.label[a]]]] < self.dfs[self.semi[self.dfs[self.label[v]]]]
        {
            self.label[v] = self.label[a];
        }
        self.ancestor[v] = r;
        r
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v] != v {
            self.find(v);
            self.label[v]
        } else {
            v
        }
    }

    // Semidominators and provisional immediate dominators, interleaved: each
    // vertex, in reverse DFS order, is placed in its semidominator's bucket
    // and linked under its parent one tree edge at a time; the parent's
    // bucket is drained right after that link, so every `eval` ranges over
    // exactly the vertices below the waiting vertex's semidominator. Linking
    // the whole tree up front would widen that range to the root and hand
    // back wrong dominators whenever sdom(v) is not v's parent.
    pub fn semidominators(&mut self) {
        for i in 0..self.dfsnodes.len() {
            let v = self.dfsnodes[i];
            self.semi[self.dfs[v]] = v;
        }
        let mut bucket: Vec<Vec<usize>> = vec![vec![]; self.g.len()];
        for i in 0..self.dfsnodes.len() {
            let w = self.dfsnodes[i];
            if w == self.g.root {
                continue;
            }
            // the tree edge from parent(w) is also a CFG edge, so the pred
            // loop covers the parent candidate.
            for j in 0..self.g.preds[w].len() {
                let v = self.g.preds[w][j];
                if self.dfs[v] == UNSET {
                    continue; // predecessor outside the reachable subgraph
                }
                let u = self.eval(v);
                if self.dfs[self.semi[self.dfs[u]]] < self.dfs[self.semi[self.dfs[w]]] {
                    self.semi[self.dfs[w]] = self.semi[self.dfs[u]];
                }
            }
            bucket[self.semi[self.dfs[w]]].push(w);
            self.ancestor[w] = self.parent[w];
            let p = self.parent[w];
            for v in std::mem::take(&mut bucket[p]) {
                let u = self.eval(v);
                self.idom[v] =
                    if self.dfs[self.semi[self.dfs[u]]] < self.dfs[self.semi[self.dfs[v]]] {
                        // a smaller semidominator on the path: idom(v) equals
                        // idom(u), resolved by the forward pass.
                        u
                    } else {
                        p
                    };
            }
        }
    }

    // Forward pass turning the relative answers into absolute immediate
    // dominators.
    pub fn idominators(&mut self) {
        self.idom[self.g.root] = self.g.root;
        for i in (0..self.dfsnodes.len()).rev() {
            let w = self.dfsnodes[i];
            if w == self.g.root {
                continue;
            }
            if self.idom[w] != self.semi[self.dfs[w]] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }
    }

    /// Whether u dominates v.
    pub fn dominates(&self, u: usize, v: usize) -> bool {
        let mut w = v;
        while self.idom[w] != w {
            if w == u {
                return true;
            }
            w = self.idom[w];
        }
        w == u
    }

    pub fn calc_backedges(&mut self) {
        for &v in &self.dfsnodes {
            for &u in &self.g.succs[v] {
                if self.dominates(u, v) {
                    self.backedges.insert((v, u));
                }
            }
        }
    }

    pub fn calc_loops(&mut self) {
        for &(v, u) in &self.backedges {
            let mut body = Set::from([u, v]);
            let mut stack = vec![v];
            while let Some(x) = stack.pop() {
                if x == u {
                    continue;
                }
                for &p in &self.g.preds[x] {
                    if self.dfs[p] != UNSET && body.insert(p) {
                        stack.push(p);
                    }
                }
            }
            self.loops.push(IndexLoop {
                header: u,
                back_edge: (v, u),
                body,
                parent: None,
            });
        }
    }

    /// Order loops by inclusion: each loop's parent is the smallest strictly
    /// larger containing loop.
    pub fn calc_lnf(&mut self) {
        let n = self.loops.len();
        for i in 0..n {
            let mut parent: Option<usize> = None;
            for j in 0..n {
                if i == j || self.loops[i].body == self.loops[j].body {
                    continue;
                }
                if self.loops[i].body.is_subset(&self.loops[j].body) {
                    let smaller = match parent {
                        None => true,
                        Some(p) => self.loops[j].body.len() < self.loops[p].body.len(),
                    };
                    if smaller {
                        parent = Some(j);
                    }
                }
            }
            self.loops[i].parent = parent;
        }
    }

    pub fn dominator_tree(&mut self) {
        for &v in &self.dfsnodes {
            let d = self.idom[v];
            if d == v {
                self.dtreeroot = v;
            } else {
                self.dtree.entry(d).or_default().insert(v);
            }
        }
    }

    /// Dominance frontier via a dominator-tree post-order walk.
    pub fn calc_frontier(&mut self) {
        fn go(lt: &mut LengauerTarjan, b: usize) {
            assert!(lt.frontier.get(&b).is_none());
            lt.frontier.insert(b, Set::new());
            let children: Vec<usize> =
                lt.dtree.get(&b).map(|s| s.iter().copied().collect()).unwrap_or_default();
            for &c in &children {
                go(lt, c);
            }
            let mut df = Set::new();
            for &y in &lt.g.succs[b] {
                if lt.idom[y] != b {
                    df.insert(y);
                }
            }
            for &c in &children {
                for &w in &lt.frontier[&c] {
                    if lt.idom[w] != b {
                        df.insert(w);
                    }
                }
            }
            lt.frontier.insert(b, df);
        }
        go(self, self.dtreeroot);
    }
}
