//! Arithmetic in GF(2^64) and over polynomials with GF(2^64) coefficients.
//!
//! Field elements are `u64` bit vectors reduced modulo
//! `x^64 + x^4 + x^3 + x + 1`. Polynomials are little-endian coefficient
//! vectors (`p[i]` is the coefficient of `x^i`) kept trimmed, so the zero
//! polynomial is the empty vector.

/// Low part of the reduction polynomial: `x^4 + x^3 + x + 1`.
const MODULUS_LOW: u64 = 0x1B;

/// Field multiplication.
pub fn mul(mut a: u64, mut b: u64) -> u64 {
    let mut acc = 0u64;
    while b != 0 {
        if b & 1 == 1 {
            acc ^= a;
        }
        b >>= 1;
        let carry = a >> 63;
        a <<= 1;
        if carry == 1 {
            a ^= MODULUS_LOW;
        }
    }
    acc
}

/// Field squaring.
pub fn sqr(a: u64) -> u64 {
    mul(a, a)
}

/// Multiplicative inverse, `a^(2^64 - 2)`. The inverse of 0 is 0.
pub fn inv(a: u64) -> u64 {
    let mut acc = 1u64;
    let mut power = a;
    for _ in 1..64 {
        power = sqr(power);
        acc = mul(acc, power);
    }
    acc
}

/// Drop leading zero coefficients.
pub(crate) fn trim(p: &mut Vec<u64>) {
    while p.last() == Some(&0) {
        p.pop();
    }
}

/// Degree of a trimmed polynomial; `None` for the zero polynomial.
pub(crate) fn degree(p: &[u64]) -> Option<usize> {
    p.len().checked_sub(1)
}

/// Scale a non-zero polynomial so its leading coefficient is 1.
pub(crate) fn make_monic(p: &mut [u64]) {
    if let Some(&lead) = p.last() {
        if lead != 1 && lead != 0 {
            let scale = inv(lead);
            for c in p.iter_mut() {
                *c = mul(*c, scale);
            }
        }
    }
}

/// `a += b` (addition is XOR in characteristic 2).
pub(crate) fn add_assign(a: &mut Vec<u64>, b: &[u64]) {
    if a.len() < b.len() {
        a.resize(b.len(), 0);
    }
    for (x, y) in a.iter_mut().zip(b) {
        *x ^= *y;
    }
    trim(a);
}

/// Quotient and remainder of `a / m` for a monic `m`.
pub(crate) fn divrem(a: &[u64], m: &[u64]) -> (Vec<u64>, Vec<u64>) {
    let mut r = a.to_vec();
    trim(&mut r);
    let d = match degree(m) {
        Some(d) => d,
        None => return (Vec::new(), r),
    };
    let mut q = vec![0u64; r.len().saturating_sub(d)];
    while r.len() > d {
        let lead = r[r.len() - 1];
        let shift = r.len() - 1 - d;
        q[shift] = lead;
        for (i, &mi) in m.iter().enumerate() {
            r[shift + i] ^= mul(lead, mi);
        }
        trim(&mut r);
    }
    trim(&mut q);
    (q, r)
}

/// Remainder of `a` modulo a monic `m`.
pub(crate) fn rem(a: &[u64], m: &[u64]) -> Vec<u64> {
    divrem(a, m).1
}

/// `a^2 mod m`. Squaring is linear in characteristic 2, so each
/// coefficient is squared and moved to twice its degree.
pub(crate) fn sqr_mod(a: &[u64], m: &[u64]) -> Vec<u64> {
    let mut out = vec![0u64; a.len() * 2];
    for (i, &c) in a.iter().enumerate() {
        out[2 * i] = sqr(c);
    }
    rem(&out, m)
}

/// Monic greatest common divisor.
pub(crate) fn gcd(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    trim(&mut a);
    trim(&mut b);
    while !b.is_empty() {
        make_monic(&mut b);
        let r = rem(&a, &b);
        a = b;
        b = r;
    }
    make_monic(&mut a);
    a
}

/// True iff monic `f` is a product of distinct linear factors over
/// GF(2^64), i.e. `f` divides `x^(2^64) - x`.
fn splits_completely(f: &[u64]) -> bool {
    let x = rem(&[0, 1], f);
    let mut power = x.clone();
    for _ in 0..64 {
        power = sqr_mod(&power, f);
    }
    power == x
}

/// `Tr(beta * x) mod f`, where `Tr(y) = y + y^2 + y^4 + ... + y^(2^63)`.
///
/// At every root `a` of `f` this evaluates to `Tr(beta * a)`, which is 0 or
/// 1, so `gcd(f, trace)` collects the roots with trace 0.
fn trace_mod(beta: u64, f: &[u64]) -> Vec<u64> {
    let mut term = rem(&[0, beta], f);
    let mut acc = term.clone();
    for _ in 1..64 {
        term = sqr_mod(&term, f);
        add_assign(&mut acc, &term);
    }
    acc
}

/// Split a monic, completely splitting `f` into its roots.
///
/// `start` is the first basis element `x^start` still worth trying: basis
/// elements that did not separate the parent cannot separate its factors.
fn split(f: &[u64], start: u32, out: &mut Vec<u64>) -> bool {
    match degree(f) {
        None => return false,
        Some(0) => return true,
        Some(1) => {
            out.push(f[0]);
            return true;
        }
        Some(_) => {}
    }

    for j in start..64 {
        let beta = 1u64 << j;
        let trace = trace_mod(beta, f);
        let g = gcd(f, &trace);
        let dg = degree(&g).unwrap_or(0);
        if dg > 0 && Some(dg) < degree(f) {
            let (h, r) = divrem(f, &g);
            if !r.is_empty() {
                return false;
            }
            let mut h = h;
            make_monic(&mut h);
            return split(&g, j + 1, out) && split(&h, j + 1, out);
        }
    }
    false
}

/// All roots of a monic polynomial, or `None` unless it has exactly
/// `deg f` distinct roots in GF(2^64).
pub(crate) fn find_roots(f: &[u64]) -> Option<Vec<u64>> {
    let mut f = f.to_vec();
    trim(&mut f);
    make_monic(&mut f);
    let d = degree(&f)?;
    if d == 0 {
        return Some(Vec::new());
    }
    if d > 1 && !splits_completely(&f) {
        return None;
    }
    let mut roots = Vec::with_capacity(d);
    if !split(&f, 0, &mut roots) || roots.len() != d {
        return None;
    }
    Some(roots)
}
