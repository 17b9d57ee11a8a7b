// This module computes live ranges of logical register values over the linear instruction
// stream produced by the shader processor. Positions are instruction indices; a range spans
// from the first to the last instruction referencing the value. Structured loops complicate
// the picture because the stream is executed repeatedly between the loop markers: a value
// whose range crosses a loop boundary must survive every iteration, and a register written
// by several instructions and referenced inside a loop may carry its value around the back
// edge. Both are extended to cover the whole loop, repeated until no range changes so nested
// loops propagate outward. Values flagged live-out (stage outputs exported after the last
// instruction) extend to one past the end of the stream. The remap pass in value_pool
// consumes the resulting LivenessInfo table.

//! Live range analysis for the register remap pass.

use super::error::{CompileError, CompileResult};
use super::value_pool::{ValueId, ValuePool};

/// Loop bracket position of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMarker {
    Begin,
    End,
}

/// Access to the values an instruction references.
///
/// Implemented by the target instruction type; the analysis only needs the
/// referenced values and the loop structure.
pub trait ValueUses {
    /// Call `f` for every value read or written by the instruction.
    fn visit_values(&self, f: &mut dyn FnMut(ValueId));

    fn loop_marker(&self) -> Option<LoopMarker>;
}

/// Live range of a single value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LivenessInfo {
    /// Position of the first reference.
    pub first: usize,
    /// Position of the last reference.
    pub last: usize,
    /// Number of references, definitions included.
    pub ref_count: u32,
    /// Whether the range was widened to cover a loop.
    pub loop_extended: bool,
}

/// Live ranges for every register value of a pool.
#[derive(Debug, Default)]
pub struct Liveness {
    info: Vec<Option<LivenessInfo>>,
    loops: Vec<(usize, usize)>,
}

impl Liveness {
    /// Compute live ranges of all non-pinned register values.
    pub fn compute<I: ValueUses>(instructions: &[I], pool: &ValuePool) -> CompileResult<Self> {
        let mut liveness = Liveness {
            info: vec![None; pool.len()],
            loops: Vec::new(),
        };

        let mut open_loops = Vec::new();
        for (pos, instr) in instructions.iter().enumerate() {
            match instr.loop_marker() {
                Some(LoopMarker::Begin) => open_loops.push(pos),
                Some(LoopMarker::End) => match open_loops.pop() {
                    Some(begin) => liveness.loops.push((begin, pos)),
                    None => {
                        return Err(CompileError::malformed(
                            None,
                            format!("loop end at position {} without loop begin", pos),
                        ))
                    }
                },
                None => {}
            }
            instr.visit_values(&mut |value| liveness.record(pool, value, pos));
        }
        if !open_loops.is_empty() {
            return Err(CompileError::malformed(None, "unterminated loop in instruction stream"));
        }

        let end = instructions.len();
        for value in pool.live_out_values() {
            liveness.record(pool, value, end);
        }

        liveness.extend_over_loops(pool);
        Ok(liveness)
    }

    fn record(&mut self, pool: &ValuePool, value: ValueId, pos: usize) {
        if !pool.needs_register(value) {
            return;
        }
        let Some(slot) = self.info.get_mut(value.0 as usize) else {
            return;
        };
        if let Some(info) = slot.as_mut() {
            info.ref_count += 1;
            info.first = info.first.min(pos);
            info.last = info.last.max(pos);
            return;
        }
        *slot = Some(LivenessInfo {
            first: pos,
            last: pos,
            ref_count: 1,
            loop_extended: false,
        });
    }

    fn extend_over_loops(&mut self, pool: &ValuePool) {
        let mut changed = true;
        while changed {
            changed = false;
            for &(begin, end) in &self.loops {
                for (idx, slot) in self.info.iter_mut().enumerate() {
                    let Some(info) = slot else { continue };
                    let overlaps = info.first <= end && info.last >= begin;
                    if !overlaps {
                        continue;
                    }
                    let contained = info.first > begin && info.last < end;
                    let multi_write = pool.is_multi_write(ValueId(idx as u32));
                    if contained && !multi_write {
                        continue;
                    }
                    if info.first > begin || info.last < end {
                        info.first = info.first.min(begin);
                        info.last = info.last.max(end);
                        info.loop_extended = true;
                        changed = true;
                    }
                }
            }
        }
    }

    pub fn get(&self, value: ValueId) -> Option<&LivenessInfo> {
        self.info.get(value.0 as usize).and_then(|i| i.as_ref())
    }

    /// Values with a live range, ordered by range start.
    pub fn ranges_by_start(&self) -> Vec<(ValueId, LivenessInfo)> {
        let mut ranges: Vec<_> = self
            .info
            .iter()
            .enumerate()
            .filter_map(|(idx, info)| info.map(|info| (ValueId(idx as u32), info)))
            .collect();
        ranges.sort_by_key(|(id, info)| (info.first, id.0));
        ranges
    }

    /// Loop spans as (begin, end) marker positions, innermost first.
    pub fn loops(&self) -> &[(usize, usize)] {
        &self.loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value_pool::ValueKind;

    struct Fake {
        values: Vec<ValueId>,
        marker: Option<LoopMarker>,
    }

    impl ValueUses for Fake {
        fn visit_values(&self, f: &mut dyn FnMut(ValueId)) {
            for v in &self.values {
                f(*v);
            }
        }

        fn loop_marker(&self) -> Option<LoopMarker> {
            self.marker
        }
    }

    fn uses(values: &[ValueId]) -> Fake {
        Fake {
            values: values.to_vec(),
            marker: None,
        }
    }

    fn marker(m: LoopMarker) -> Fake {
        Fake {
            values: Vec::new(),
            marker: Some(m),
        }
    }

    #[test]
    fn test_straight_line_ranges() {
        let mut pool = ValuePool::new();
        let a = pool.allocate(ValueKind::Register, 4);
        let b = pool.allocate(ValueKind::Register, 1);
        let lit = pool.literal([1, 0, 0, 0], 1);

        let code = vec![uses(&[a]), uses(&[b, a, lit]), uses(&[b])];
        let liveness = Liveness::compute(&code, &pool).unwrap();

        let la = liveness.get(a).unwrap();
        assert_eq!((la.first, la.last, la.ref_count), (0, 1, 2));
        let lb = liveness.get(b).unwrap();
        assert_eq!((lb.first, lb.last), (1, 2));
        assert!(liveness.get(lit).is_none());
    }

    #[test]
    fn test_value_crossing_loop_is_extended() {
        let mut pool = ValuePool::new();
        let outer = pool.allocate(ValueKind::Register, 1);
        let inner = pool.allocate(ValueKind::Register, 1);

        // 0: def outer, 1: loop begin, 2: def inner, 3: use outer+inner, 4: loop end
        let code = vec![
            uses(&[outer]),
            marker(LoopMarker::Begin),
            uses(&[inner]),
            uses(&[outer, inner]),
            marker(LoopMarker::End),
        ];
        let liveness = Liveness::compute(&code, &pool).unwrap();

        let lo = liveness.get(outer).unwrap();
        assert_eq!((lo.first, lo.last), (0, 4));
        assert!(lo.loop_extended);
        let li = liveness.get(inner).unwrap();
        assert_eq!((li.first, li.last), (2, 3));
        assert!(!li.loop_extended);
    }

    #[test]
    fn test_multi_write_register_in_loop_covers_loop() {
        let mut pool = ValuePool::new();
        let counter = pool.allocate_multi_write(1);

        let code = vec![
            marker(LoopMarker::Begin),
            uses(&[counter]),
            uses(&[counter]),
            marker(LoopMarker::End),
        ];
        let liveness = Liveness::compute(&code, &pool).unwrap();
        let info = liveness.get(counter).unwrap();
        assert_eq!((info.first, info.last), (0, 3));
    }

    #[test]
    fn test_live_out_extends_to_end() {
        let mut pool = ValuePool::new();
        let out = pool.allocate(ValueKind::Register, 4);
        pool.mark_live_out(out);
        let code = vec![uses(&[out]), uses(&[])];
        let liveness = Liveness::compute(&code, &pool).unwrap();
        assert_eq!(liveness.get(out).unwrap().last, 2);
    }

    #[test]
    fn test_unbalanced_loop_markers() {
        let pool = ValuePool::new();
        let code = vec![marker(LoopMarker::End)];
        assert!(Liveness::compute(&code, &pool).unwrap_err().is_malformed());
    }
}
