/// Bessel function of the first kind J_n for any integer order.
pub fn bessel_j(n: i32, x: f64) -> f64 {
    if n >= 0 {
        libm::jn(n, x)
    } else if (-n) % 2 == 0 {
        libm::jn(-n, x)
    } else {
        -libm::jn(-n, x)
    }
}

/// First derivative of J_n.
pub fn bessel_j_prime(n: i32, x: f64) -> f64 {
    0.5 * (bessel_j(n - 1, x) - bessel_j(n + 1, x))
}

/// Second derivative of J_n.
pub fn bessel_j_second(n: i32, x: f64) -> f64 {
    0.25 * (bessel_j(n - 2, x) - 2. * bessel_j(n, x) + bessel_j(n + 2, x))
}

/// Compute the `count` first zeros of the derivative of J_v, estimated by
/// McMahon's asymptotic expansion and refined by Newton-Raphson on
/// `(J_v', J_v'')`. For v = 0 the first zero is 0.
pub fn bessel_j_prime_zeros(v: i32, count: usize) -> Vec<f64> {
    let mut zeros = Vec::with_capacity(count);
    let mu = 4. * (v as f64).powi(2);

    for i in 1..=count {
        if v == 0 && i == 1 {
            zeros.push(0.);
            continue;
        }

        // McMahon's asymptotic expansion, https://dlmf.nist.gov/10.21#vi
        let b = (i as f64 + 0.5 * v as f64 - 0.75) * std::f64::consts::PI;
        let b8 = 8. * b;
        let estimate = b
            - (mu + 3.) / 8. / b
            - 4. * (7. * mu * mu + 82. * mu - 9.) / 3. / b8.powi(3)
            - 32. * (83. * mu.powi(3) + 2075. * mu * mu - 3039. * mu + 3537.) / 15. / b8.powi(5)
            - 64.
                * (6949. * mu.powi(4) + 296492. * mu.powi(3) - 1248002. * mu * mu
                    + 7414380. * mu
                    - 5853627.)
                / 105.
                / b8.powi(7);

        let (lo, hi) = (estimate - 0.5, estimate + 0.5);
        let mut z = estimate;
        for _ in 0..60 {
            let f = bessel_j_prime(v, z);
            let df = bessel_j_second(v, z);
            if df == 0. {
                break;
            }
            let step = f / df;
            z = (z - step).clamp(lo, hi);
            if step.abs() < 1e-13 * z.abs().max(1.) {
                break;
            }
        }
        zeros.push(z);
    }
    zeros
}
