//! Register allocation for one function's virtual-register stream.
//!
//! Liveness is a backward dataflow pass over the control-flow graph the
//! labels and branches describe. Each virtual register gets one live
//! interval covering every linear position where it is live, and a linear
//! scan assigns pool registers in interval-start order. When the pool is
//! empty, the interval ending furthest away is spilled (ties spill the
//! higher-numbered register), and spilled registers are rewritten into
//! reloads/stores around each instruction through `t5`/`t6`.

use chocopy_syntax::{
    AsmItem, CodegenError, Flow, Instr, PhysReg, Reg, VirtReg, SPILL_SCRATCH, WORD_SIZE,
};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Most negative frame offset a single load/store can reach.
const MIN_FRAME_OFFSET: i32 = -2048;

/// Where a virtual register lives after allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Reg(PhysReg),
    /// Frame slot at this offset from `fp`.
    Spill(i32),
}

#[derive(Clone, Debug)]
pub struct Allocation {
    /// The rewritten stream; contains no virtual registers.
    pub items: Vec<AsmItem>,
    pub assignment: BTreeMap<VirtReg, Location>,
    /// Pool registers the stream now writes, in pool order. The prologue must
    /// save these.
    pub used: Vec<PhysReg>,
    pub spill_slots: usize,
}

/// Per-instruction live sets, indexed by position among the instructions
/// (labels are not counted).
#[derive(Clone, Debug, Default)]
pub struct Liveness {
    pub live_in: Vec<BTreeSet<VirtReg>>,
    pub live_out: Vec<BTreeSet<VirtReg>>,
}

struct Cfg<'a> {
    instrs: Vec<&'a Instr>,
    succ: Vec<Vec<usize>>,
}

fn build_cfg(items: &[AsmItem]) -> Cfg<'_> {
    let mut instrs = Vec::new();
    let mut label_at: HashMap<&str, usize> = HashMap::new();
    for item in items {
        match item {
            AsmItem::Label(l) => {
                label_at.insert(l.name(), instrs.len());
            }
            AsmItem::Instr(i) => instrs.push(i),
        }
    }
    let n = instrs.len();
    // Labels outside this stream (epilogue, runtime routines) end the path.
    let target = |name: &str| label_at.get(name).copied().filter(|&t| t < n);
    let succ = instrs
        .iter()
        .enumerate()
        .map(|(k, i)| {
            let next = Some(k + 1).filter(|&t| t < n);
            match i.flow() {
                Flow::Next => next.into_iter().collect(),
                Flow::Jump(l) => target(l.name()).into_iter().collect(),
                Flow::Branch(l) => next.into_iter().chain(target(l.name())).collect(),
                Flow::Exit => Vec::new(),
            }
        })
        .collect();
    Cfg { instrs, succ }
}

fn virt_uses(i: &Instr) -> BTreeSet<VirtReg> {
    i.uses().filter_map(Reg::as_virt).collect()
}

fn virt_def(i: &Instr) -> Option<VirtReg> {
    i.def().and_then(Reg::as_virt)
}

fn solve(cfg: &Cfg<'_>) -> Liveness {
    let n = cfg.instrs.len();
    let uses: Vec<BTreeSet<VirtReg>> = cfg.instrs.iter().map(|i| virt_uses(i)).collect();
    let defs: Vec<Option<VirtReg>> = cfg.instrs.iter().map(|i| virt_def(i)).collect();
    let mut live = Liveness {
        live_in: vec![BTreeSet::new(); n],
        live_out: vec![BTreeSet::new(); n],
    };
    let mut changed = true;
    while changed {
        changed = false;
        for k in (0..n).rev() {
            let out: BTreeSet<VirtReg> = cfg.succ[k]
                .iter()
                .flat_map(|&s| live.live_in[s].iter().copied())
                .collect();
            let mut inn: BTreeSet<VirtReg> = out
                .iter()
                .copied()
                .filter(|v| Some(*v) != defs[k])
                .collect();
            inn.extend(uses[k].iter().copied());
            if inn != live.live_in[k] || out != live.live_out[k] {
                live.live_in[k] = inn;
                live.live_out[k] = out;
                changed = true;
            }
        }
    }
    live
}

/// Live sets for every instruction of `items`.
pub fn liveness(items: &[AsmItem]) -> Liveness {
    solve(&build_cfg(items))
}

#[derive(Clone, Copy, Debug)]
struct Interval {
    vreg: VirtReg,
    start: usize,
    end: usize,
}

fn intervals(cfg: &Cfg<'_>, live: &Liveness) -> Vec<Interval> {
    let mut span: BTreeMap<VirtReg, (usize, usize)> = BTreeMap::new();
    let mut touch = |v: VirtReg, k: usize| {
        let e = span.entry(v).or_insert((k, k));
        e.0 = e.0.min(k);
        e.1 = e.1.max(k);
    };
    for (k, i) in cfg.instrs.iter().enumerate() {
        for &v in live.live_in[k].iter().chain(live.live_out[k].iter()) {
            touch(v, k);
        }
        if let Some(v) = virt_def(i) {
            touch(v, k);
        }
        for v in virt_uses(i) {
            touch(v, k);
        }
    }
    let mut out: Vec<Interval> = span
        .into_iter()
        .map(|(vreg, (start, end))| Interval { vreg, start, end })
        .collect();
    out.sort_by_key(|iv| (iv.start, iv.vreg));
    out
}

struct Active {
    end: usize,
    vreg: VirtReg,
    slot: usize,
}

/// Linear scan. Returns a location for every interval.
fn scan(
    intervals: &[Interval],
    pool: &[PhysReg],
    spill_base: i32,
    function: &str,
) -> Result<(BTreeMap<VirtReg, Location>, usize), CodegenError> {
    let mut assignment = BTreeMap::new();
    let mut free: BTreeSet<usize> = (0..pool.len()).collect();
    let mut active: Vec<Active> = Vec::new();
    let mut spill_slots = 0usize;
    let mut spill = |assignment: &mut BTreeMap<VirtReg, Location>, v: VirtReg| {
        let offset = spill_base - spill_slots as i32 * WORD_SIZE;
        spill_slots += 1;
        assignment.insert(v, Location::Spill(offset));
        if offset < MIN_FRAME_OFFSET {
            return Err(CodegenError::SpillSlotsExhausted {
                function: function.to_string(),
                slots: spill_slots,
            });
        }
        Ok(())
    };

    for iv in intervals {
        active.retain(|a| {
            if a.end < iv.start {
                free.insert(a.slot);
                false
            } else {
                true
            }
        });

        if let Some(&slot) = free.iter().next() {
            free.remove(&slot);
            assignment.insert(iv.vreg, Location::Reg(pool[slot]));
            active.push(Active {
                end: iv.end,
                vreg: iv.vreg,
                slot,
            });
            continue;
        }

        let victim = active
            .iter()
            .enumerate()
            .max_by_key(|(_, a)| (a.end, a.vreg))
            .map(|(pos, a)| (pos, a.end, a.vreg));
        match victim {
            Some((pos, end, vreg)) if (end, vreg) > (iv.end, iv.vreg) => {
                let slot = active[pos].slot;
                spill(&mut assignment, vreg)?;
                assignment.insert(iv.vreg, Location::Reg(pool[slot]));
                active[pos] = Active {
                    end: iv.end,
                    vreg: iv.vreg,
                    slot,
                };
            }
            _ => spill(&mut assignment, iv.vreg)?,
        }
    }
    Ok((assignment, spill_slots))
}

fn rewrite(items: &[AsmItem], assignment: &BTreeMap<VirtReg, Location>) -> Vec<AsmItem> {
    let fp = Reg::Phys(PhysReg::Fp);
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let instr = match item {
            AsmItem::Label(_) => {
                out.push(item.clone());
                continue;
            }
            AsmItem::Instr(i) => i,
        };
        let mut reloaded: Vec<(VirtReg, PhysReg)> = Vec::new();
        for v in instr.uses().filter_map(Reg::as_virt) {
            if let Some(Location::Spill(offset)) = assignment.get(&v) {
                if reloaded.iter().any(|(r, _)| *r == v) {
                    continue;
                }
                let scratch = SPILL_SCRATCH[reloaded.len()];
                out.push(
                    Instr::lw(scratch, fp, *offset)
                        .with_comment(format!("reload {}", v))
                        .into(),
                );
                reloaded.push((v, scratch));
            }
        }
        let mut store_after = None;
        let mapped = instr.map_regs(|r, is_def| {
            let Reg::Virt(v) = r else { return r };
            match assignment.get(&v) {
                Some(Location::Reg(p)) => Reg::Phys(*p),
                Some(Location::Spill(offset)) if is_def => {
                    store_after = Some((v, *offset));
                    Reg::Phys(SPILL_SCRATCH[0])
                }
                Some(Location::Spill(_)) => reloaded
                    .iter()
                    .find(|(rv, _)| *rv == v)
                    .map(|(_, p)| Reg::Phys(*p))
                    .unwrap_or(r),
                None => r,
            }
        });
        out.push(mapped.into());
        if let Some((v, offset)) = store_after {
            out.push(
                Instr::sw(SPILL_SCRATCH[0], fp, offset)
                    .with_comment(format!("spill {}", v))
                    .into(),
            );
        }
    }
    out
}

/// Allocate pool registers to the virtual registers of one function.
/// `spill_base` is the `fp` offset of the first spill slot; further slots
/// grow downward one word at a time.
pub fn allocate(
    items: &[AsmItem],
    pool: &[PhysReg],
    spill_base: i32,
    function: &str,
) -> Result<Allocation, CodegenError> {
    let cfg = build_cfg(items);
    let live = solve(&cfg);
    let ivs = intervals(&cfg, &live);
    let (assignment, spill_slots) = scan(&ivs, pool, spill_base, function)?;
    let used: Vec<PhysReg> = pool
        .iter()
        .copied()
        .filter(|p| assignment.values().any(|l| *l == Location::Reg(*p)))
        .collect();
    debug!(
        "regalloc {}: {} virtual registers, {} pool registers used, {} spilled",
        function,
        ivs.len(),
        used.len(),
        spill_slots
    );
    let items = rewrite(items, &assignment);
    Ok(Allocation {
        items,
        assignment,
        used,
        spill_slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chocopy_runtime::Machine;
    use chocopy_syntax::PhysReg::*;
    use chocopy_syntax::{syscall, AsmProgram, DataItem, Label, ALLOCATABLE};

    fn v(n: u32) -> Reg {
        Reg::Virt(VirtReg(n))
    }

    /// Fibonacci-style chain keeping every value live until a final sum, so
    /// the live set far exceeds a small pool.
    fn chain(len: u32) -> Vec<AsmItem> {
        let mut items: Vec<AsmItem> = vec![Instr::li(v(0), 1).into(), Instr::li(v(1), 2).into()];
        for k in 2..len {
            items.push(Instr::add(v(k), v(k - 1), v(k - 2)).into());
        }
        items.push(Instr::li(v(len), 0).into());
        for k in 0..len {
            items.push(Instr::add(v(len), v(len), v(k)).into());
        }
        items.push(Instr::la(v(len + 1), Label::global("out")).into());
        items.push(Instr::sw(v(len), v(len + 1), 0).into());
        items.push(Instr::sw(v(len - 1), v(len + 1), 4).into());
        items.push(Instr::mv(A0, v(len)).into());
        items
    }

    /// A loop summing 1..=10 while four loop-invariant values stay live.
    fn looped() -> Vec<AsmItem> {
        let top = Label::local("t$L0");
        let done = Label::local("t$L1");
        vec![
            Instr::li(v(0), 0).into(),
            Instr::li(v(1), 1).into(),
            Instr::li(v(2), 11).into(),
            Instr::li(v(3), 100).into(),
            Instr::li(v(4), 1000).into(),
            AsmItem::Label(top.clone()),
            Instr::bge(v(1), v(2), done.clone()).into(),
            Instr::add(v(0), v(0), v(1)).into(),
            Instr::addi(v(1), v(1), 1).into(),
            Instr::j(top).into(),
            AsmItem::Label(done),
            Instr::add(v(5), v(3), v(4)).into(),
            Instr::add(v(0), v(0), v(5)).into(),
            Instr::la(v(6), Label::global("out")).into(),
            Instr::sw(v(0), v(6), 0).into(),
            Instr::mv(A0, v(0)).into(),
        ]
    }

    fn program(body: Vec<AsmItem>) -> AsmProgram {
        let mut text: Vec<AsmItem> = vec![
            AsmItem::Label(Label::global("main")),
            Instr::mv(Fp, Sp).into(),
            Instr::addi(Sp, Sp, -256).into(),
        ];
        text.extend(body);
        text.push(Instr::li(A7, syscall::EXIT).into());
        text.push(Instr::ecall().into());
        AsmProgram {
            text,
            data: vec![
                DataItem::Label(Label::global("out")),
                DataItem::Word(0),
                DataItem::Word(0),
            ],
        }
    }

    /// Runs a stream and reports a0 plus the two output words.
    fn observe(body: Vec<AsmItem>) -> (i32, i32, i32) {
        let p = program(body);
        let mut m = Machine::new(&p).expect("load");
        let outcome = m.run().expect("run");
        assert_eq!(outcome.exit_code, 0);
        let out = m.label_address("out").expect("out label");
        (
            m.reg(Reg::Phys(A0)),
            m.load_word(out).expect("word 0"),
            m.load_word(out + 4).expect("word 1"),
        )
    }

    #[test]
    fn allocation_matches_unbounded_reference_with_spills() {
        let body = chain(16);
        let reference = observe(body.clone());
        for pool_size in [0usize, 1, 3, 11] {
            let alloc = allocate(&body, &ALLOCATABLE[..pool_size], -12, "chain").expect("alloc");
            assert!(alloc.items.iter().all(|i| match i {
                AsmItem::Instr(i) => !i.has_virtual(),
                AsmItem::Label(_) => true,
            }));
            if pool_size < 11 {
                assert!(alloc.spill_slots > 0, "pool {} should spill", pool_size);
            }
            assert_eq!(observe(alloc.items), reference, "pool size {}", pool_size);
        }
    }

    #[test]
    fn loops_keep_values_live_across_back_edge() {
        let body = looped();
        let reference = observe(body.clone());
        assert_eq!(reference.0, 55 + 1100);
        for pool_size in [2usize, 4, 11] {
            let alloc = allocate(&body, &ALLOCATABLE[..pool_size], -12, "loop").expect("alloc");
            assert_eq!(observe(alloc.items), reference, "pool size {}", pool_size);
        }
    }

    #[test]
    fn live_registers_never_share() {
        let body = chain(12);
        let alloc = allocate(&body, &ALLOCATABLE[..4], -12, "chain").expect("alloc");
        let cfg = build_cfg(&body);
        let live = solve(&cfg);
        for (k, set) in live.live_out.iter().enumerate() {
            let mut vregs = set.clone();
            vregs.extend(virt_def(cfg.instrs[k]));
            let mut seen = BTreeSet::new();
            for v in &vregs {
                if let Some(Location::Reg(p)) = alloc.assignment.get(v) {
                    assert!(seen.insert(*p), "{} shared at instruction {}", p, k);
                }
            }
        }
    }

    #[test]
    fn allocation_is_deterministic() {
        let body = chain(14);
        let a = allocate(&body, &ALLOCATABLE[..3], -12, "chain").expect("alloc");
        let b = allocate(&body, &ALLOCATABLE[..3], -12, "chain").expect("alloc");
        assert_eq!(a.items, b.items);
        assert_eq!(a.assignment, b.assignment);
    }

    #[test]
    fn furthest_end_is_spilled_and_lowest_index_keeps_register() {
        // v0 and v1 live to the end; v2 lives briefly in between.
        let body: Vec<AsmItem> = vec![
            Instr::li(v(0), 1).into(),
            Instr::li(v(1), 2).into(),
            Instr::li(v(2), 3).into(),
            Instr::mv(A1, v(2)).into(),
            Instr::add(A0, v(0), v(1)).into(),
        ];
        let alloc = allocate(&body, &ALLOCATABLE[..2], -12, "tie").expect("alloc");
        assert_eq!(alloc.assignment[&VirtReg(0)], Location::Reg(S1));
        assert_eq!(alloc.assignment[&VirtReg(1)], Location::Spill(-12));
        assert_eq!(alloc.assignment[&VirtReg(2)], Location::Reg(S2));
        assert_eq!(alloc.used, vec![S1, S2]);
    }

    #[test]
    fn unreachable_spill_offset_is_fatal() {
        let body = chain(8);
        let err = allocate(&body, &[], -2040, "deep").expect_err("must fail");
        assert!(matches!(err, CodegenError::SpillSlotsExhausted { .. }));
    }

    #[test]
    fn jumps_out_of_the_stream_end_liveness() {
        let out = Label::global("error.Div");
        let body: Vec<AsmItem> = vec![
            Instr::li(v(0), 0).into(),
            Instr::beqz(v(0), out).into(),
            Instr::mv(A0, v(0)).into(),
        ];
        let live = liveness(&body);
        assert!(live.live_out[1].contains(&VirtReg(0)));
        assert!(live.live_out[2].is_empty());
    }
}
