use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_FILL: u8 = 0xAE;
pub const DEFAULT_SENTINEL: u8 = 0x56;

/// Byte values used to prime the two buffers for one ramp step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPattern {
    pub fill: u8,
    pub prefill: u8,
}

impl StepPattern {
    pub fn apply(&self, write_buf: &mut [u8], read_buf: &mut [u8]) {
        write_buf.fill(self.fill);
        read_buf.fill(self.prefill);
    }
}

/// Where fill bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Fixed { fill: u8, sentinel: u8 },
    Random { seed: Option<u64> },
}

impl Default for PatternKind {
    fn default() -> Self {
        PatternKind::Fixed {
            fill: DEFAULT_FILL,
            sentinel: DEFAULT_SENTINEL,
        }
    }
}

#[derive(Debug)]
pub enum PatternSource {
    Fixed { fill: u8, sentinel: u8 },
    Random(StdRng),
}

impl PatternSource {
    pub fn new(kind: PatternKind) -> Self {
        match kind {
            PatternKind::Fixed { fill, sentinel } => PatternSource::Fixed {
                fill,
                // a sentinel equal to the fill would let a no-op read pass
                sentinel: if sentinel == fill { !fill } else { sentinel },
            },
            PatternKind::Random { seed: Some(s) } => {
                PatternSource::Random(StdRng::seed_from_u64(s))
            }
            PatternKind::Random { seed: None } => PatternSource::Random(StdRng::from_entropy()),
        }
    }

    /// Pattern for the next ramp step.
    pub fn next_step(&mut self) -> StepPattern {
        match self {
            PatternSource::Fixed { fill, sentinel } => StepPattern {
                fill: *fill,
                prefill: *sentinel,
            },
            PatternSource::Random(rng) => {
                let fill: u8 = rng.gen();
                StepPattern { fill, prefill: !fill }
            }
        }
    }
}

/// First differing byte between what was written and what came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

pub fn first_mismatch(expected: &[u8], actual: &[u8]) -> Option<Mismatch> {
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .map(|offset| Mismatch {
            offset,
            expected: expected[offset],
            actual: actual[offset],
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pattern_is_stable() {
        let mut src = PatternSource::new(PatternKind::default());
        let a = src.next_step();
        let b = src.next_step();
        assert_eq!(a, b);
        assert_eq!(a.fill, 0xAE);
        assert_eq!(a.prefill, 0x56);
    }

    #[test]
    fn fixed_sentinel_never_equals_fill() {
        let mut src = PatternSource::new(PatternKind::Fixed { fill: 0x11, sentinel: 0x11 });
        let p = src.next_step();
        assert_ne!(p.fill, p.prefill);
    }

    #[test]
    fn random_prefill_is_complement() {
        let mut src = PatternSource::new(PatternKind::Random { seed: Some(7) });
        for _ in 0..64 {
            let p = src.next_step();
            assert_eq!(p.prefill, !p.fill);
        }
    }

    #[test]
    fn random_pattern_rotates() {
        let mut src = PatternSource::new(PatternKind::Random { seed: Some(42) });
        let fills: Vec<u8> = (0..256).map(|_| src.next_step().fill).collect();
        let distinct = fills
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();
        assert!(distinct > 64, "only {distinct} distinct fill bytes");
    }

    #[test]
    fn seeded_random_is_reproducible() {
        let mut a = PatternSource::new(PatternKind::Random { seed: Some(9) });
        let mut b = PatternSource::new(PatternKind::Random { seed: Some(9) });
        for _ in 0..16 {
            assert_eq!(a.next_step(), b.next_step());
        }
    }

    #[test]
    fn apply_fills_both_buffers() {
        let mut w = [0u8; 8];
        let mut r = [0u8; 8];
        StepPattern { fill: 0xF0, prefill: 0x0F }.apply(&mut w, &mut r);
        assert!(w.iter().all(|&b| b == 0xF0));
        assert!(r.iter().all(|&b| b == 0x0F));
    }

    #[test]
    fn first_mismatch_reports_first_only() {
        let expected = [1u8, 2, 3, 4, 5];
        let actual = [1u8, 2, 9, 4, 0];
        let m = first_mismatch(&expected, &actual).unwrap();
        assert_eq!(m, Mismatch { offset: 2, expected: 3, actual: 9 });
        assert_eq!(first_mismatch(&expected, &expected), None);
    }
}
