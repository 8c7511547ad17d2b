//! The end-to-end driver: source text in, allocated RV64 SSA out.
//!
//! Ownership moves linearly through the stages: the AST feeds the builder,
//! the abstract SSA feeds the peepholer then the selector, and the RV64 SSA
//! feeds the dominance analysis then the allocator. Nested procedures are
//! compiled independently, innermost first.

use serde::Serialize;
use tracing::info;

use crate::back_end::regalloc::{self, Colouring};
use crate::back_end::rv64::{Register, Rv64};
use crate::back_end::select::select;
use crate::commons::{CompileError, Map};
use crate::front_end::parser::parse;
use crate::front_end::sema;
use crate::middle_end::build::build;
use crate::middle_end::dom::{self, DominationResult};
use crate::middle_end::ir::{Names, Procedure};
use crate::middle_end::opt::optimise;
use crate::middle_end::ssa::Abstract;


/// Dominance and allocation results for one procedure; `Compilation.procedures`
/// lists these innermost-first, matching a post-order walk of the procedure
/// tree.
#[derive(Clone, Debug)]
pub struct CompiledProcedure {
    pub label: String,
    pub dom: DominationResult,
    pub colours: Colouring,
}

#[derive(Clone, Debug)]
pub struct Compilation {
    /// The optimised abstract SSA, kept for inspection.
    pub abstract_ssa: Procedure<Abstract>,
    /// The selected RV64 SSA with critical edges split and parallel moves in
    /// place.
    pub rv64: Procedure<Rv64>,
    pub procedures: Vec<CompiledProcedure>,
}

pub fn compile(source: &str) -> Result<Compilation, CompileError> {
    let ast = parse(source)?;
    let symbols = sema::analyze(&ast)?;
    let mut ssa = build(&ast, &symbols)?;
    info!(procedures = ssa.procedures.len() + 1, "ssa construction done");
    optimise(&mut ssa);
    let mut rv64 = select(&ssa)?;
    let mut procedures = vec![];
    back_end_tree(&mut rv64, &mut procedures)?;
    Ok(Compilation {
        abstract_ssa: ssa,
        rv64,
        procedures,
    })
}

fn back_end_tree(
    proc: &mut Procedure<Rv64>,
    out: &mut Vec<CompiledProcedure>,
) -> Result<(), CompileError> {
    for i in 0..proc.procedures.len() {
        back_end_tree(&mut proc.procedures[i], out)?;
    }
    let analysis = dom::analyze(proc);
    let colours = regalloc::allocate(proc, &analysis.result)?;
    info!(proc = %proc.label, "registers allocated");
    out.push(CompiledProcedure {
        label: proc.label.clone(),
        dom: analysis.result,
        colours,
    });
    Ok(())
}

// SECTION: serialisable summary

#[derive(Clone, Debug, Serialize)]
pub struct AllocationSummary {
    pub procedures: Vec<ProcedureSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcedureSummary {
    pub label: String,
    /// block label -> value name -> register
    pub blocks: Map<String, Map<String, Register>>,
}

pub fn allocation_summary(comp: &Compilation) -> AllocationSummary {
    fn walk<'a>(proc: &'a Procedure<Rv64>, out: &mut Vec<&'a Procedure<Rv64>>) {
        for sub in &proc.procedures {
            walk(sub, out);
        }
        out.push(proc);
    }
    let mut procs = vec![];
    walk(&comp.rv64, &mut procs);

    AllocationSummary {
        procedures: procs
            .iter()
            .zip(&comp.procedures)
            .map(|(proc, compiled)| {
                let names = Names::new(*proc);
                ProcedureSummary {
                    label: compiled.label.clone(),
                    blocks: compiled
                        .colours
                        .iter()
                        .map(|(b, m)| {
                            (
                                proc.block(*b).label.clone(),
                                m.iter().map(|(v, r)| (names.name(*v), *r)).collect(),
                            )
                        })
                        .collect(),
                }
            })
            .collect(),
    }
}
