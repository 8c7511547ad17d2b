//! SSA register allocation.
//!
//! Dominance makes liveness block-local: every use is dominated by its
//! definition and block parameters are the live-ins, so the allocator walks
//! the dominator tree in pre-order keeping a per-block assignment with
//! last-use bookkeeping. Block-argument transfers then become parallel moves
//! serialised with a scratch register to break cycles.

use crate::back_end::rv64::{Op, Operand, Register, Rv64, ARG_REGS, POOL_START, REGALLOC};
use crate::commons::{Map, RegisterAllocationFailure, Set};
use crate::middle_end::dom::DominationResult;
use crate::middle_end::ir::{BlockId, ContEdge, Ir, Procedure, ValueId, ValueKind};

#[cfg(test)]
mod tests;

// SECTION: public interface

/// The chosen register for every parameter and instruction result, per
/// block (values defined in a dominating block appear in the block that
/// defined them).
pub type Colouring = Map<BlockId, Map<ValueId, Register>>;

/// Colour the procedure and insert the parallel-move sequences that realise
/// every edge's argument transfer. Expects critical edges to have been split.
pub fn allocate(
    proc: &mut Procedure<Rv64>,
    dom: &DominationResult,
) -> Result<Colouring, RegisterAllocationFailure> {
    let mut ra = RegisterAllocator {
        proc,
        dom,
        colours: Map::new(),
    };
    ra.allocate(dom.dtreeroot)?;
    ra.parmove()?;
    Ok(ra
        .colours
        .into_iter()
        .map(|(b, m)| (b, m.into_iter().map(|(v, c)| (v, REGALLOC[c])).collect()))
        .collect())
}

// SECTION: colouring

struct RegisterAllocator<'a> {
    proc: &'a mut Procedure<Rv64>,
    dom: &'a DominationResult,
    // colour indices into REGALLOC, per block
    colours: Map<BlockId, Map<ValueId, usize>>,
}

impl RegisterAllocator<'_> {
    fn allocate(&mut self, b: BlockId) -> Result<(), RegisterAllocationFailure> {
        self.colour_block(b)?;
        if let Some(children) = self.dom.dtree.get(&b) {
            for &c in children.clone().iter() {
                self.allocate(c)?;
            }
        }
        Ok(())
    }

    // every value used in the block: instruction operands, the continuation's
    // own uses, and edge arguments; positions index `insts`, the continuation
    // sits one past the end.
    fn uses_in(&self, b: BlockId) -> Vec<(ValueId, usize)> {
        let block = self.proc.block(b);
        let cont_pos = block.insts.len();
        let mut uses = vec![];
        for (i, &inst) in block.insts.iter().enumerate() {
            if let ValueKind::Inst { args, .. } = &self.proc.value(inst).kind {
                for a in args {
                    if let Some(v) = Rv64::operand_value(&self.proc.resolve(a)) {
                        uses.push((v, i));
                    }
                }
            }
        }
        if let Some(cont) = &block.cont {
            for u in cont.uses() {
                if let Some(v) = Rv64::operand_value(&self.proc.resolve(u)) {
                    uses.push((v, cont_pos));
                }
            }
            for e in cont.edges() {
                for a in e.args.values() {
                    if let Some(v) = Rv64::operand_value(&self.proc.resolve(a)) {
                        uses.push((v, cont_pos));
                    }
                }
            }
        }
        uses
    }

    fn colour_block(&mut self, b: BlockId) -> Result<(), RegisterAllocationFailure> {
        let label = self.proc.block(b).label.clone();

        // parameters are preassigned from the argument registers; a call
        // continuation's return value is the first parameter, so it lands in
        // A0 by the same rule.
        let mut assignment: Map<ValueId, usize> = Map::new();
        let params = self.proc.block(b).params.clone();
        if params.len() > ARG_REGS {
            return Err(RegisterAllocationFailure(format!(
                "block {label} carries {} parameters, more than the {ARG_REGS} argument registers",
                params.len()
            )));
        }
        for (i, &p) in params.iter().enumerate() {
            assignment.insert(p, i);
        }

        // last use of every value used in the block.
        let uses = self.uses_in(b);
        let mut last_use: Map<ValueId, usize> = Map::new();
        for &(v, i) in &uses {
            last_use.insert(v, i);
        }

        // a use of a value from a dominating block occupies the colour it got
        // there, from entry until its last use here.
        for &(v, _) in &uses {
            if assignment.contains_key(&v) {
                continue;
            }
            let def = self.proc.def_block(v);
            if def != b {
                let c = self.colours[&def][&v];
                assignment.insert(v, c);
            }
        }

        let mut assigned: Set<usize> = assignment.values().copied().collect();
        let insts = self.proc.block(b).insts.clone();
        for (i, &inst) in insts.iter().enumerate() {
            let ValueKind::Inst { op, args } = &self.proc.value(inst).kind else {
                unreachable!("blocks hold instructions only")
            };
            let op = op.clone();
            // free the colours of operands dying here.
            for a in args.clone() {
                if let Some(v) = Rv64::operand_value(&self.proc.resolve(&a)) {
                    if last_use.get(&v) == Some(&i) {
                        if let Some(&c) = assignment.get(&v) {
                            assigned.remove(&c);
                        }
                    }
                }
            }
            if Rv64::has_output(&op) {
                let c = (POOL_START..REGALLOC.len())
                    .find(|c| !assigned.contains(c))
                    .ok_or_else(|| {
                        RegisterAllocationFailure(format!(
                            "ran out of registers in block {label}"
                        ))
                    })?;
                assignment.insert(inst, c);
                // a result with no later use dies immediately.
                if last_use.contains_key(&inst) {
                    assigned.insert(c);
                }
            }
        }

        self.colours.insert(b, assignment);
        Ok(())
    }

    // SECTION: parallel moves

    fn parmove(&mut self) -> Result<(), RegisterAllocationFailure> {
        for v in self.proc.blocks().collect::<Vec<_>>() {
            if !self.colours.contains_key(&v) {
                continue; // unreachable block, never coloured
            }
            let Some(cont) = &self.proc.block(v).cont else {
                continue;
            };
            let edges: Vec<ContEdge<Rv64>> = cont.edges().into_iter().cloned().collect();
            if edges.len() > 1 {
                for edge in edges {
                    let u = edge.target;
                    // critical-edge splitting guarantees a lone predecessor,
                    // so prepending into the target is safe.
                    assert_eq!(self.proc.block(u).preds.len(), 1);
                    let movs = self.moves_for(&edge, v, u)?;
                    for (k, &(src, dst)) in movs.iter().enumerate() {
                        self.proc.emit_before(
                            u,
                            k,
                            Op::Mv,
                            vec![Operand::Reg(REGALLOC[dst]), Operand::Reg(REGALLOC[src])],
                        );
                    }
                }
            } else if edges.len() == 1 {
                let edge = edges.into_iter().next().unwrap();
                let u = edge.target;
                let movs = self.moves_for(&edge, v, u)?;
                for &(src, dst) in &movs {
                    self.proc.emit(
                        v,
                        Op::Mv,
                        vec![Operand::Reg(REGALLOC[dst]), Operand::Reg(REGALLOC[src])],
                    );
                }
            }
        }
        Ok(())
    }

    // the move list for one edge: source colours of the arguments onto the
    // target's parameter colours.
    fn moves_for(
        &self,
        edge: &ContEdge<Rv64>,
        v: BlockId,
        u: BlockId,
    ) -> Result<Vec<(usize, usize)>, RegisterAllocationFailure> {
        let cv_map = &self.colours[&v];
        let cu_map = &self.colours[&u];
        let mut movs = vec![];
        for (pu, a) in &edge.args {
            let Some(val) = Rv64::operand_value(&self.proc.resolve(a)) else {
                unreachable!("edge arguments are selected values");
            };
            let cu = cu_map[pu];
            let cv = cv_map[&val];
            if cu != cv {
                movs.push((cv, cu));
            }
        }
        if movs.is_empty() {
            return Ok(vec![]);
        }
        // the scratch register sits strictly above every colour either
        // endpoint block uses.
        let tmp = cv_map
            .values()
            .chain(cu_map.values())
            .copied()
            .max()
            .unwrap_or(0)
            + 1;
        if tmp >= REGALLOC.len() {
            return Err(RegisterAllocationFailure(format!(
                "no scratch register left for the edge {} -> {}",
                self.proc.block(v).label,
                self.proc.block(u).label
            )));
        }
        Ok(parallel_moves(movs, tmp))
    }
}

// SECTION: parallel-move serialisation

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MoveState {
    NotMoved,
    Moving,
    Moved,
}

/// Serialise a parallel move. Moves are `(src, dst)` colour pairs; a cycle
/// parks the blocked source in `tmp` and carries on.
pub fn parallel_moves(mut moves: Vec<(usize, usize)>, tmp: usize) -> Vec<(usize, usize)> {
    let mut state = vec![MoveState::NotMoved; moves.len()];
    let mut results = vec![];

    fn pmov1(
        i: usize,
        moves: &mut Vec<(usize, usize)>,
        state: &mut Vec<MoveState>,
        results: &mut Vec<(usize, usize)>,
        tmp: usize,
    ) {
        if moves[i].0 == moves[i].1 {
            return;
        }
        state[i] = MoveState::Moving;
        for j in 0..moves.len() {
            if moves[j].0 == moves[i].1 {
                match state[j] {
                    MoveState::NotMoved => pmov1(j, moves, state, results, tmp),
                    MoveState::Moving => {
                        // a cycle: park j's source in the scratch register.
                        results.push((moves[j].0, tmp));
                        moves[j].0 = tmp;
                    }
                    MoveState::Moved => {}
                }
            }
        }
        results.push(moves[i]);
        state[i] = MoveState::Moved;
    }

    for i in 0..moves.len() {
        if state[i] == MoveState::NotMoved {
            pmov1(i, &mut moves, &mut state, &mut results, tmp);
        }
    }
    results
}
