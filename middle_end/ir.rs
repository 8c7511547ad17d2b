//! The IR core shared by the abstract SSA and the RISC-V SSA: procedures,
//! blocks with parameters, continuations with edge-argument maps, and value
//! forwarding.
//!
//! Blocks, parameters and instructions are arena-allocated per procedure and
//! referenced by integer ids, so the CFG has no ownership cycles. Everything
//! layer-specific (the opcode sum, the operand shapes) comes in through the
//! [`Ir`] trait; the abstract layer uses bare value ids as operands while the
//! RISC-V layer adds immediates, symbols and register operands.

use std::cell::Cell;
use std::fmt;
use std::fmt::Write as _;

use crate::commons::{Map, Set};

#[cfg(test)]
mod tests;

/// Index of a block in its procedure's arena.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockId(pub u32);

/// Index of a value (a block parameter or an instruction) in its procedure's
/// arena.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ValueId(pub u32);

/// What an IR layer must provide to live in this graph.
pub trait Ir: Sized {
    /// The opcode sum for this layer.
    type Op: Clone + fmt::Debug + PartialEq;
    /// The operand representation for this layer.
    type Operand: Clone + fmt::Debug + PartialEq;

    /// The SSA value inside an operand, if it has one (immediates, symbols
    /// and physical registers do not).
    fn operand_value(operand: &Self::Operand) -> Option<ValueId>;

    /// Wrap a value as an operand.
    fn value_operand(value: ValueId) -> Self::Operand;

    /// Rebuild an operand with its inner value (if any) mapped through `f`.
    /// This is how `find` reaches into layer-specific operand shapes.
    fn map_operand(operand: &Self::Operand, f: &mut dyn FnMut(ValueId) -> ValueId)
        -> Self::Operand;

    /// Whether the instruction produces a value.
    fn has_output(op: &Self::Op) -> bool;

    /// Whether the instruction has an observable effect and must remain.
    fn is_effectful(op: &Self::Op) -> bool;

    fn fmt_op(
        op: &Self::Op,
        args: &[Self::Operand],
        names: &Names,
        f: &mut dyn fmt::Write,
    ) -> fmt::Result;

    fn fmt_operand(operand: &Self::Operand, names: &Names, f: &mut dyn fmt::Write)
        -> fmt::Result;
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind<T: Ir> {
    /// A value defined by its owning block's parameter list.
    Param { block: BlockId, label: String },
    /// A value defined by an instruction.
    Inst { op: T::Op, args: Vec<T::Operand> },
}

#[derive(Clone, Debug)]
pub struct ValueData<T: Ir> {
    pub kind: ValueKind<T>,
    // union-find representative; Cell so `find` can path-compress behind a
    // shared reference (the pipeline is single-threaded throughout).
    forwarded: Cell<Option<ValueId>>,
}

/// A successor reference: the target block plus the mapping from the target's
/// parameters to values in the current block. This is how SSA values cross
/// edges in lieu of phi arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct ContEdge<T: Ir> {
    pub target: BlockId,
    pub args: Map<ValueId, T::Operand>,
}

impl<T: Ir> ContEdge<T> {
    pub fn new(target: BlockId) -> Self {
        ContEdge {
            target,
            args: Map::new(),
        }
    }
}

/// The continuation that leaves a block. Exactly one per complete block.
#[derive(Clone, Debug, PartialEq)]
pub enum Cont<T: Ir> {
    Return,
    Jump(ContEdge<T>),
    Branch(T::Operand, ContEdge<T>, ContEdge<T>),
    Call {
        proc: String,
        args: Vec<T::Operand>,
        then: ContEdge<T>,
    },
}

impl<T: Ir> Cont<T> {
    pub fn edges(&self) -> Vec<&ContEdge<T>> {
        match self {
            Cont::Return => vec![],
            Cont::Jump(e) => vec![e],
            Cont::Branch(_, t, f) => vec![t, f],
            Cont::Call { then, .. } => vec![then],
        }
    }

    pub fn edges_mut(&mut self) -> Vec<&mut ContEdge<T>> {
        match self {
            Cont::Return => vec![],
            Cont::Jump(e) => vec![e],
            Cont::Branch(_, t, f) => vec![t, f],
            Cont::Call { then, .. } => vec![then],
        }
    }

    pub fn targets(&self) -> Vec<BlockId> {
        self.edges().iter().map(|e| e.target).collect()
    }

    /// Operands the continuation itself reads, besides edge arguments: the
    /// branch value and call arguments.
    pub fn uses(&self) -> Vec<&T::Operand> {
        match self {
            Cont::Return | Cont::Jump(_) => vec![],
            Cont::Branch(v, _, _) => vec![v],
            Cont::Call { args, .. } => args.iter().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Block<T: Ir> {
    pub label: String,
    pub params: Vec<ValueId>,
    pub insts: Vec<ValueId>,
    pub cont: Option<Cont<T>>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

#[derive(Clone, Debug)]
pub struct Procedure<T: Ir> {
    pub label: String,
    pub procedures: Vec<Procedure<T>>,
    blocks: Vec<Block<T>>,
    values: Vec<ValueData<T>>,
    block_counter: u32,
    param_counter: u32,
}

impl<T: Ir> Procedure<T> {
    pub fn new(label: &str) -> Self {
        Procedure {
            label: label.to_string(),
            procedures: vec![],
            blocks: vec![],
            values: vec![],
            block_counter: 0,
            param_counter: 0,
        }
    }

    // SECTION: blocks

    /// Create a block labelled `b{n}_{addendum}` (or plain `b{n}`).
    pub fn add_block(&mut self, addendum: &str) -> BlockId {
        self.block_counter += 1;
        let label = if addendum.is_empty() {
            format!("b{}", self.block_counter)
        } else {
            format!("b{}_{}", self.block_counter, addendum)
        };
        self.add_block_labeled(label)
    }

    pub fn add_block_labeled(&mut self, label: String) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            label,
            params: vec![],
            insts: vec![],
            cont: None,
            preds: vec![],
            succs: vec![],
        });
        id
    }

    /// The entry block (the first block created).
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block(&self, id: BlockId) -> &Block<T> {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block<T> {
        &mut self.blocks[id.0 as usize]
    }

    /// All block ids in creation order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks reachable from the entry, in depth-first preorder.
    pub fn reachable(&self) -> Vec<BlockId> {
        let mut seen = Set::new();
        let mut order = vec![];
        let mut stack = vec![self.entry()];
        while let Some(b) = stack.pop() {
            if !seen.insert(b) {
                continue;
            }
            order.push(b);
            if let Some(cont) = &self.block(b).cont {
                for t in cont.targets().into_iter().rev() {
                    stack.push(t);
                }
            }
        }
        order
    }

    // SECTION: values

    pub fn value(&self, id: ValueId) -> &ValueData<T> {
        &self.values[id.0 as usize]
    }

    fn add_value(&mut self, kind: ValueKind<T>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            kind,
            forwarded: Cell::new(None),
        });
        id
    }

    /// Create a fresh parameter on `block`.
    pub fn param(&mut self, block: BlockId) -> ValueId {
        self.param_counter += 1;
        let label = format!("p{}", self.param_counter);
        let id = self.add_value(ValueKind::Param { block, label });
        self.block_mut(block).params.push(id);
        id
    }

    /// Append an instruction to `block`.
    pub fn emit(&mut self, block: BlockId, op: T::Op, args: Vec<T::Operand>) -> ValueId {
        let id = self.add_value(ValueKind::Inst { op, args });
        self.block_mut(block).insts.push(id);
        id
    }

    /// Insert an instruction into `block` at position `at` (used by the
    /// peepholer to place helper instructions before the one it rewrites).
    pub fn emit_before(
        &mut self,
        block: BlockId,
        at: usize,
        op: T::Op,
        args: Vec<T::Operand>,
    ) -> ValueId {
        let id = self.add_value(ValueKind::Inst { op, args });
        self.block_mut(block).insts.insert(at, id);
        id
    }

    /// The block a value is defined in.
    pub fn def_block(&self, v: ValueId) -> BlockId {
        match &self.value(v).kind {
            ValueKind::Param { block, .. } => *block,
            ValueKind::Inst { .. } => {
                for b in self.blocks() {
                    if self.block(b).insts.contains(&v) {
                        return b;
                    }
                }
                unreachable!("value {v:?} is in no block")
            }
        }
    }

    // SECTION: value forwarding

    /// Follow the forwarding chain to the representative, compressing the
    /// path on the way.
    pub fn find(&self, v: ValueId) -> ValueId {
        match self.values[v.0 as usize].forwarded.get() {
            None => v,
            Some(w) => {
                let r = self.find(w);
                self.values[v.0 as usize].forwarded.set(Some(r));
                r
            }
        }
    }

    /// Forward `v` to `w`. All consumer-side reads go through `find`, so this
    /// replaces every use of `v` in O(1). Both sides are resolved first, so
    /// repeated rewrites extend the chain at its representative; forwarding a
    /// representative to itself would create a cycle and is a programmer
    /// error.
    pub fn replace(&mut self, v: ValueId, w: ValueId) {
        let v = self.find(v);
        let w = self.find(w);
        assert!(v != w, "forwarding a value to itself");
        self.values[v.0 as usize].forwarded.set(Some(w));
    }

    /// An operand with its inner value (if any) resolved through `find`.
    pub fn resolve(&self, operand: &T::Operand) -> T::Operand {
        T::map_operand(operand, &mut |v| self.find(v))
    }

    /// Operand `i` of instruction `v`, resolved through `find`.
    pub fn arg(&self, v: ValueId, i: usize) -> T::Operand {
        let ValueKind::Inst { args, .. } = &self.value(v).kind else {
            panic!("not an instruction")
        };
        self.resolve(&args[i])
    }

    // SECTION: continuations

    fn close(&mut self, block: BlockId, cont: Cont<T>) {
        assert!(
            self.block(block).cont.is_none(),
            "block already has a continuation"
        );
        for target in cont.targets() {
            self.block_mut(block).succs.push(target);
            self.block_mut(target).preds.push(block);
        }
        self.block_mut(block).cont = Some(cont);
    }

    /// Close `block` with a fully-built continuation (the selector constructs
    /// edges with their argument maps already in hand).
    pub fn set_cont(&mut self, block: BlockId, cont: Cont<T>) {
        self.close(block, cont);
    }

    pub fn set_ret(&mut self, block: BlockId) {
        self.close(block, Cont::Return);
    }

    pub fn set_jump(&mut self, block: BlockId, target: BlockId) {
        self.close(block, Cont::Jump(ContEdge::new(target)));
    }

    pub fn set_branch(&mut self, block: BlockId, value: T::Operand, then: BlockId, alt: BlockId) {
        self.close(
            block,
            Cont::Branch(value, ContEdge::new(then), ContEdge::new(alt)),
        );
    }

    pub fn set_call(&mut self, block: BlockId, proc: &str, args: Vec<T::Operand>, then: BlockId) {
        self.close(
            block,
            Cont::Call {
                proc: proc.to_string(),
                args,
                then: ContEdge::new(then),
            },
        );
    }

    /// Record `param := operand` on every edge of `block`'s continuation that
    /// targets the parameter's block.
    pub fn add_edge_arg(&mut self, block: BlockId, param: ValueId, operand: T::Operand) {
        let ValueKind::Param { block: target, .. } = &self.value(param).kind else {
            panic!("not a parameter")
        };
        let target = *target;
        let cont = self
            .block_mut(block)
            .cont
            .as_mut()
            .expect("block has no continuation");
        for edge in cont.edges_mut() {
            if edge.target == target {
                edge.args.insert(param, operand.clone());
            }
        }
    }

    /// Whether `block` is the then-block of some call continuation, in which
    /// case its first parameter carries the call's return value.
    pub fn is_call_then(&self, block: BlockId) -> bool {
        self.block(block).preds.iter().any(|&p| {
            matches!(
                &self.block(p).cont,
                Some(Cont::Call { then, .. }) if then.target == block
            )
        })
    }

    // SECTION: validation

    /// Structural invariant checks: every reachable non-entry block has a
    /// predecessor and a continuation, preds/succs agree with the
    /// continuation edges, and every parameter has an argument on every
    /// incoming edge (call return-value parameters excepted, they materialise
    /// from the callee).
    pub fn validate(&self) -> Result<(), String> {
        for b in self.reachable() {
            let block = self.block(b);
            let Some(cont) = &block.cont else {
                return Err(format!("block {} has no continuation", block.label));
            };
            if b != self.entry() && block.preds.is_empty() {
                return Err(format!("block {} has no predecessors", block.label));
            }
            if cont.targets() != block.succs {
                return Err(format!(
                    "block {} succs disagree with continuation",
                    block.label
                ));
            }
            for &s in &block.succs {
                if !self.block(s).preds.contains(&b) {
                    return Err(format!(
                        "block {} missing from {}'s preds",
                        block.label,
                        self.block(s).label
                    ));
                }
            }
            for edge in cont.edges() {
                let target = self.block(edge.target);
                let skip_first = self.is_call_then(edge.target);
                for (i, &p) in target.params.iter().enumerate() {
                    if i == 0 && skip_first {
                        continue;
                    }
                    if !edge.args.contains_key(&p) {
                        return Err(format!(
                            "edge {} -> {} has no argument for a parameter",
                            block.label, target.label
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    // SECTION: pretty printing

    fn fmt_edge(&self, names: &Names, edge: &ContEdge<T>, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{}", self.block(edge.target).label)?;
        if !edge.args.is_empty() {
            write!(out, "(")?;
            for (i, (p, v)) in edge.args.iter().enumerate() {
                if i > 0 {
                    write!(out, ", ")?;
                }
                write!(out, "{}=", names.name(*p))?;
                T::fmt_operand(&self.resolve(v), names, out)?;
            }
            write!(out, ")")?;
        }
        Ok(())
    }

    /// The textual form of this procedure's blocks, without nested
    /// procedures (`Display` prints those first).
    pub fn body_text(&self) -> String {
        let names = Names::new(self);
        let mut out = String::new();
        let _ = writeln!(out, "{}:", self.label);
        for b in self.blocks() {
            let block = self.block(b);
            if block.params.is_empty() {
                let _ = writeln!(out, "{}:", block.label);
            } else {
                let params: Vec<String> = block.params.iter().map(|&p| names.name(p)).collect();
                let _ = writeln!(out, "{}({}):", block.label, params.join(", "));
            }
            for &v in &block.insts {
                if let ValueKind::Inst { op, args } = &self.value(v).kind {
                    let _ = write!(out, "\t");
                    if T::has_output(op) {
                        let _ = write!(out, "{} = ", names.name(v));
                    }
                    let args: Vec<T::Operand> = args.iter().map(|a| self.resolve(a)).collect();
                    let _ = T::fmt_op(op, &args, &names, &mut out);
                    let _ = writeln!(out);
                }
            }
            match &block.cont {
                None => {
                    let _ = writeln!(out, "\tno continuation");
                }
                Some(Cont::Return) => {
                    let _ = writeln!(out, "\treturn");
                }
                Some(Cont::Jump(e)) => {
                    let _ = write!(out, "\tjump ");
                    let _ = self.fmt_edge(&names, e, &mut out);
                    let _ = writeln!(out);
                }
                Some(Cont::Branch(v, t, a)) => {
                    let _ = write!(out, "\tbranch ");
                    let _ = T::fmt_operand(&self.resolve(v), &names, &mut out);
                    let _ = write!(out, " ");
                    let _ = self.fmt_edge(&names, t, &mut out);
                    let _ = write!(out, " ");
                    let _ = self.fmt_edge(&names, a, &mut out);
                    let _ = writeln!(out);
                }
                Some(Cont::Call { proc, args, then }) => {
                    let _ = write!(out, "\tcall {proc}(");
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            let _ = write!(out, ", ");
                        }
                        let _ = T::fmt_operand(&self.resolve(a), &names, &mut out);
                    }
                    let _ = write!(out, ") ");
                    let _ = self.fmt_edge(&names, then, &mut out);
                    let _ = writeln!(out);
                }
            }
        }
        out
    }
}

impl<T: Ir> fmt::Display for Procedure<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for proc in &self.procedures {
            writeln!(f, "{proc}")?;
        }
        write!(f, "{}", self.body_text())
    }
}

/// Printer-assigned value names: parameters keep their labels, instruction
/// results are numbered `v1, v2, …` in program order.
pub struct Names {
    names: Map<ValueId, String>,
}

impl Names {
    pub fn new<T: Ir>(proc: &Procedure<T>) -> Self {
        let mut names = Map::new();
        let mut counter = 0;
        for b in proc.blocks() {
            let block = proc.block(b);
            for &p in &block.params {
                if let ValueKind::Param { label, .. } = &proc.value(p).kind {
                    names.insert(p, label.clone());
                }
            }
            for &v in &block.insts {
                if let ValueKind::Inst { op, .. } = &proc.value(v).kind {
                    if T::has_output(op) {
                        counter += 1;
                        names.insert(v, format!("v{counter}"));
                    }
                }
            }
        }
        Names { names }
    }

    pub fn name(&self, v: ValueId) -> String {
        match self.names.get(&v) {
            Some(n) => n.clone(),
            None => format!("?{}", v.0),
        }
    }
}

// SECTION: graphviz dump

/// Render one procedure's CFG as a graphviz digraph, one box per block, in
/// the same textual form as the pretty printer.
pub fn dump_cfg<T: Ir>(proc: &Procedure<T>, graph_type_and_name: &str) -> String {
    let mut node_str = String::new();
    let mut edge_str = String::new();
    let p_label = &proc.label;

    // group the pretty printer's lines under their block headers.
    let text = proc.body_text();
    let mut current: Option<(String, String)> = None;
    let mut nodes = vec![];
    for line in text.lines().skip(1) {
        if let Some(rest) = line.strip_prefix('\t') {
            if let Some((_, body)) = current.as_mut() {
                body.push_str(&format!("  {rest}\\l"));
            }
        } else if let Some(header) = line.strip_suffix(':') {
            if let Some(done) = current.take() {
                nodes.push(done);
            }
            let block_name = header.split('(').next().unwrap().to_string();
            current = Some((block_name, format!("{header}:\\l")));
        }
    }
    if let Some(done) = current.take() {
        nodes.push(done);
    }
    for (name, label) in &nodes {
        let _ = write!(node_str, "\n{p_label}__{name} [label = \"{label}\"];\n");
    }

    for b in proc.blocks() {
        let from = &proc.block(b).label;
        if let Some(cont) = &proc.block(b).cont {
            for t in cont.targets() {
                let to = &proc.block(t).label;
                let _ = write!(edge_str, "\n{p_label}__{from} -> {p_label}__{to};\n");
            }
        }
    }

    format!(
        "{graph_type_and_name} {{\nlabel = \"{p_label}\";\nnode [shape=box nojustify=true];\n{node_str}\n{edge_str}\n}}\n"
    )
}

/// Graphviz for a whole compilation unit: one cluster per procedure.
pub fn dump_cfg_of_program<T: Ir>(proc: &Procedure<T>) -> String {
    let mut g = "digraph G {\n".to_string();
    let mut stack = vec![proc];
    while let Some(p) = stack.pop() {
        g.push_str(&dump_cfg(p, &format!("subgraph cluster_{}", p.label)));
        stack.extend(p.procedures.iter());
    }
    g.push_str("\n}");
    g
}
