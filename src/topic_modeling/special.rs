// Digamma and trigamma for positive arguments.
//
// Both shift the argument above 6 with the recurrence relation and then use
// the asymptotic expansion, which is accurate to ~1e-10 in that region.

const SHIFT: f64 = 6.0;

pub fn digamma(mut x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    let mut result = 0.0;
    while x < SHIFT {
        result -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    result + x.ln()
        - 0.5 / x
        - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f * (1.0 / 252.0 - f * (1.0 / 240.0 - f / 132.0))))
}

pub fn trigamma(mut x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    let mut result = 0.0;
    while x < SHIFT {
        result += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    result + inv + inv2 / 2.0 + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}
