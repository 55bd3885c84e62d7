/// A closed interval [min, max] on the real line.
///
/// Used for ray parameter ranges and as the per-axis building block of
/// [`crate::Aabb`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}

impl Interval {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> f32 {
        self.max - self.min
    }

    /// True if x lies in [min, max] (inclusive).
    pub fn contains(&self, x: f32) -> bool {
        self.min <= x && x <= self.max
    }

    /// True if x lies strictly inside (min, max).
    pub fn surrounds(&self, x: f32) -> bool {
        self.min < x && x < self.max
    }

    /// Expand by delta/2 on each side.
    pub fn expand(&self, delta: f32) -> Interval {
        let padding = delta / 2.0;
        Interval::new(self.min - padding, self.max + padding)
    }

    /// Smallest interval covering both inputs.
    pub fn surrounding(a: &Interval, b: &Interval) -> Interval {
        Interval::new(a.min.min(b.min), a.max.max(b.max))
    }

    /// Contains nothing (min > max).
    pub const EMPTY: Interval = Interval {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    /// Contains everything.
    pub const UNIVERSE: Interval = Interval {
        min: f32::NEG_INFINITY,
        max: f32::INFINITY,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_vs_surrounds() {
        let i = Interval::new(0.0, 4.0);
        assert!(i.contains(0.0));
        assert!(i.contains(4.0));
        assert!(!i.surrounds(0.0));
        assert!(!i.surrounds(4.0));
        assert!(i.surrounds(2.0));
        assert!(!i.contains(-0.5));
    }

    #[test]
    fn test_empty_contains_nothing() {
        assert!(!Interval::EMPTY.contains(0.0));
        assert!(Interval::EMPTY.size() < 0.0);
    }

    #[test]
    fn test_expand() {
        let i = Interval::new(1.0, 2.0).expand(1.0);
        assert_eq!(i.min, 0.5);
        assert_eq!(i.max, 2.5);
    }

    #[test]
    fn test_surrounding() {
        let a = Interval::new(-1.0, 1.0);
        let b = Interval::new(0.0, 5.0);
        let s = Interval::surrounding(&a, &b);
        assert_eq!(s.min, -1.0);
        assert_eq!(s.max, 5.0);
    }
}
