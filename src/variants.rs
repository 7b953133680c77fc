use _model::Coordinate;
use fastrand::Rng;

/// Jittered copies of a base coordinate, produced lazily.
///
/// Each variant moves latitude and longitude independently by a uniform
/// offset in `[-max_offset, max_offset]` degrees, then clamps into range.
#[derive(Debug)]
pub struct Variants {
    rng: Rng,
    base: Coordinate,
    max_offset: f64,
    remaining: usize,
}

pub fn generate(base: Coordinate, count: usize, max_offset: f64, rng: Rng) -> Variants {
    let max_offset = if max_offset.is_finite() && max_offset > 0.0 {
        max_offset
    } else {
        0.0
    };

    Variants {
        rng,
        base,
        max_offset,
        remaining: count,
    }
}

impl Variants {
    fn offset(&mut self) -> f64 {
        (self.rng.f64() * 2.0 - 1.0) * self.max_offset
    }
}

impl Iterator for Variants {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let latitude = self.base.latitude() + self.offset();
        let longitude = self.base.longitude() + self.offset();
        Some(Coordinate::clamped(latitude, longitude))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Variants {}

#[cfg(test)]
mod tests {
    use super::*;

    fn within(base: Coordinate, x: Coordinate, d: f64) -> bool {
        let d = d + 1e-12;
        (x.latitude() - base.latitude()).abs() <= d
            && (x.longitude() - base.longitude()).abs() <= d
            && (-90.0..=90.0).contains(&x.latitude())
            && (-180.0..=180.0).contains(&x.longitude())
    }

    #[test]
    fn exact_count() {
        let base = Coordinate::new(19.1738, -96.1342).unwrap();
        let variants = generate(base, 15, 0.0002, Rng::with_seed(7));
        assert_eq!(variants.len(), 15);
        assert_eq!(variants.count(), 15);
        assert_eq!(generate(base, 0, 0.0002, Rng::new()).count(), 0);
    }

    #[test]
    fn bounded() {
        let bases = [
            (19.1738, -96.1342),
            (89.9999, 179.9999),
            (-90.0, -180.0),
            (0.0, 180.0),
        ];
        for (lat, lon) in bases {
            let base = Coordinate::new(lat, lon).unwrap();
            for d in [0.0001, 0.01, 1.0] {
                for x in generate(base, 200, d, Rng::with_seed(42)) {
                    assert!(within(base, x, d), "{x} escaped {base} by more than {d}");
                }
            }
        }
    }

    #[test]
    fn jitter_is_independent() {
        let base = Coordinate::new(10.0, 10.0).unwrap();
        let variants: Vec<_> = generate(base, 50, 0.001, Rng::with_seed(1)).collect();
        assert!(variants.iter().any(|x| x.latitude() != base.latitude()));
        assert!(variants
            .iter()
            .any(|x| x.latitude() - base.latitude() != x.longitude() - base.longitude()));
    }

    #[test]
    fn seeded_is_deterministic() {
        let base = Coordinate::new(-33.8688, 151.2093).unwrap();
        let a: Vec<_> = generate(base, 10, 0.001, Rng::with_seed(99)).collect();
        let b: Vec<_> = generate(base, 10, 0.001, Rng::with_seed(99)).collect();
        let c: Vec<_> = generate(base, 10, 0.001, Rng::with_seed(100)).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn degenerate_offset() {
        let base = Coordinate::new(1.0, 2.0).unwrap();
        for d in [0.0, -1.0, f64::NAN] {
            assert!(generate(base, 5, d, Rng::with_seed(3)).all(|x| x == base));
        }
    }
}
