//! Small dense linear algebra over `Z_p` and over reals, used by the keyword encoder.
//!
//! Matrices are square, row-major `Vec<Vec<u64>>`. Modular routines only pivot on entries which are
//! invertible modulo `p`, so they are sound for composite moduli too, at the cost of possibly
//! reporting an invertible matrix as singular.

#[inline(always)]
pub const fn mul_mod(a: u64, b: u64, p: u64) -> u64 {
    ((a as u128 * b as u128) % p as u128) as u64
}

#[inline(always)]
pub const fn add_mod(a: u64, b: u64, p: u64) -> u64 {
    ((a as u128 + b as u128) % p as u128) as u64
}

#[inline(always)]
pub const fn sub_mod(a: u64, b: u64, p: u64) -> u64 {
    add_mod(a % p, p - (b % p), p)
}

/// Multiplicative inverse of `a` modulo `p`, if `gcd(a, p) = 1`.
pub fn inv_mod(a: u64, p: u64) -> Option<u64> {
    let (mut old_r, mut r) = ((a % p) as i128, p as i128);
    let (mut old_s, mut s) = (1i128, 0i128);

    while r != 0 {
        let quot = old_r / r;
        (old_r, r) = (r, old_r - quot * r);
        (old_s, s) = (s, old_s - quot * s);
    }

    if old_r != 1 {
        return None;
    }
    Some(old_s.rem_euclid(p as i128) as u64)
}

/// Reduces a signed integer into `[0, p)`.
pub fn reduce_signed(v: i128, p: u64) -> u64 {
    v.rem_euclid(p as i128) as u64
}

/// `sum(a[i] * b[i]) mod p`.
pub fn inner_product_mod(a: &[u64], b: &[u64], p: u64) -> u64 {
    a.iter().zip(b).fold(0u64, |acc, (&x, &y)| add_mod(acc, mul_mod(x % p, y % p, p), p))
}

/// Determinant modulo `p`, zero when elimination can't find an invertible pivot.
pub fn determinant_mod_p(mat: &[Vec<u64>], p: u64) -> u64 {
    match eliminate_mod_p(mat, &vec![0; mat.len()], p) {
        Some((det, _)) => det,
        None => 0,
    }
}

/// Solves `mat · x = y` modulo `p` by Gauss-Jordan elimination.
///
/// # Returns
///
/// The determinant of `mat` modulo `p` and the solution, or `None` if `mat` isn't square or is singular.
pub fn solve_mod_p(mat: &[Vec<u64>], y: &[u64], p: u64) -> Option<(u64, Vec<u64>)> {
    eliminate_mod_p(mat, y, p)
}

fn eliminate_mod_p(mat: &[Vec<u64>], y: &[u64], p: u64) -> Option<(u64, Vec<u64>)> {
    let n = mat.len();
    if n == 0 || y.len() != n || mat.iter().any(|row| row.len() != n) {
        return None;
    }

    // Augmented matrix [M | y]
    let mut aug = mat
        .iter()
        .zip(y)
        .map(|(row, &yi)| row.iter().map(|&v| v % p).chain(std::iter::once(yi % p)).collect::<Vec<u64>>())
        .collect::<Vec<_>>();

    let mut det = 1u64;

    for col in 0..n {
        let (pivot_row, pivot_inv) = (col..n).find_map(|r| inv_mod(aug[r][col], p).map(|inv| (r, inv)))?;

        if pivot_row != col {
            aug.swap(pivot_row, col);
            det = sub_mod(0, det, p);
        }
        det = mul_mod(det, aug[col][col], p);

        aug[col].iter_mut().for_each(|v| *v = mul_mod(*v, pivot_inv, p));

        let pivot = aug[col].clone();
        for (r, row) in aug.iter_mut().enumerate() {
            if r == col || row[col] == 0 {
                continue;
            }

            let factor = row[col];
            row.iter_mut().zip(&pivot).for_each(|(v, &pv)| *v = sub_mod(*v, mul_mod(factor, pv, p), p));
        }
    }

    Some((det, aug.into_iter().map(|row| row[n]).collect()))
}

/// Completes `rows` (each of length `d`, at most `d` of them) into a `d × d` matrix by appending unit
/// rows on the columns which aren't pivots of `rows`.
///
/// Returns `None` when `rows` are linearly dependent modulo `p`, or when there are more rows than columns.
pub fn complete_to_square(rows: &[Vec<u64>], d: usize, p: u64) -> Option<Vec<Vec<u64>>> {
    if rows.len() > d || rows.iter().any(|row| row.len() != d) {
        return None;
    }

    let mut echelon = rows.iter().map(|row| row.iter().map(|&v| v % p).collect::<Vec<u64>>()).collect::<Vec<_>>();
    let mut is_pivot_col = vec![false; d];
    let mut rank = 0;

    for col in 0..d {
        if rank == echelon.len() {
            break;
        }

        let Some((pivot_row, pivot_inv)) = (rank..echelon.len()).find_map(|r| inv_mod(echelon[r][col], p).map(|inv| (r, inv))) else {
            continue;
        };

        echelon.swap(pivot_row, rank);
        echelon[rank].iter_mut().for_each(|v| *v = mul_mod(*v, pivot_inv, p));

        let pivot = echelon[rank].clone();
        for row in echelon.iter_mut().skip(rank + 1) {
            let factor = row[col];
            if factor != 0 {
                row.iter_mut().zip(&pivot).for_each(|(v, &pv)| *v = sub_mod(*v, mul_mod(factor, pv, p), p));
            }
        }

        is_pivot_col[col] = true;
        rank += 1;
    }

    if rank < rows.len() {
        return None;
    }

    let mut square = rows.to_vec();
    square.extend(is_pivot_col.iter().enumerate().filter(|&(_, &is_pivot)| !is_pivot).map(|(col, _)| {
        let mut unit = vec![0u64; d];
        unit[col] = 1;
        unit
    }));

    Some(square)
}

/// LU decomposition with partial pivoting, in place. Returns the permutation and its sign, or `None` if singular.
fn lu_decompose(a: &mut [Vec<f64>]) -> Option<(Vec<usize>, f64)> {
    const EPSILON: f64 = 1e-9;

    let n = a.len();
    let mut perm = (0..n).collect::<Vec<_>>();
    let mut sign = 1.0;

    for k in 0..n {
        let pivot_row = (k..n).max_by(|&i, &j| a[i][k].abs().total_cmp(&a[j][k].abs()))?;
        if a[pivot_row][k].abs() < EPSILON {
            return None;
        }

        if pivot_row != k {
            a.swap(pivot_row, k);
            perm.swap(pivot_row, k);
            sign = -sign;
        }

        let (head, tail) = a.split_at_mut(k + 1);
        let pivot = &head[k];
        for row in tail.iter_mut() {
            row[k] /= pivot[k];
            let factor = row[k];
            row.iter_mut().zip(pivot.iter()).skip(k + 1).for_each(|(v, &pv)| *v -= factor * pv);
        }
    }

    Some((perm, sign))
}

/// Real valued determinant, via LU decomposition. Zero for (numerically) singular matrices.
pub fn determinant_real(mat: &[Vec<u64>]) -> f64 {
    let mut a = to_f64(mat);
    match lu_decompose(&mut a) {
        Some((_, sign)) => (0..a.len()).fold(sign, |acc, i| acc * a[i][i]),
        None => 0.0,
    }
}

/// Solves `mat · x = y` over reals, via LU decomposition with partial pivoting.
pub fn solve_real(mat: &[Vec<u64>], y: &[u64]) -> Option<Vec<f64>> {
    let n = mat.len();
    if n == 0 || y.len() != n || mat.iter().any(|row| row.len() != n) {
        return None;
    }

    let mut a = to_f64(mat);
    let (perm, _) = lu_decompose(&mut a)?;

    // Forward substitution, L has unit diagonal
    let mut z = perm.iter().map(|&i| y[i] as f64).collect::<Vec<f64>>();
    for i in 0..n {
        let acc = (0..i).map(|j| a[i][j] * z[j]).sum::<f64>();
        z[i] -= acc;
    }

    // Back substitution
    for i in (0..n).rev() {
        let acc = ((i + 1)..n).map(|j| a[i][j] * z[j]).sum::<f64>();
        z[i] = (z[i] - acc) / a[i][i];
    }

    Some(z)
}

fn to_f64(mat: &[Vec<u64>]) -> Vec<Vec<f64>> {
    mat.iter().map(|row| row.iter().map(|&v| v as f64).collect()).collect()
}

/// `mat · x mod p`.
pub fn mat_vec_mod(mat: &[Vec<u64>], x: &[u64], p: u64) -> Vec<u64> {
    mat.iter().map(|row| inner_product_mod(row, x, p)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use test_case::test_case;

    const P: u64 = 65537;

    fn random_matrix(rng: &mut ChaCha8Rng, n: usize, bound: u64) -> Vec<Vec<u64>> {
        (0..n).map(|_| (0..n).map(|_| rng.random_range(0..bound)).collect()).collect()
    }

    #[test_case(3, 7 => Some(5); "Inverse of 3 modulo 7")]
    #[test_case(2, 4 => None; "Even number is not invertible modulo 4")]
    #[test_case(1, 2 => Some(1); "One is its own inverse")]
    #[test_case(65536, 65537 => Some(65536); "Minus one is its own inverse")]
    fn modular_inverse(a: u64, p: u64) -> Option<u64> {
        inv_mod(a, p)
    }

    #[test]
    fn known_determinants() {
        let identity = vec![vec![1, 0, 0], vec![0, 1, 0], vec![0, 0, 1]];
        let singular = vec![vec![1, 1], vec![1, 1]];
        let swapped = vec![vec![0, 1], vec![1, 0]];

        assert_eq!(determinant_mod_p(&identity, P), 1);
        assert_eq!(determinant_mod_p(&singular, P), 0);
        assert_eq!(determinant_mod_p(&swapped, P), P - 1);

        assert_eq!(determinant_real(&identity), 1.0);
        assert_eq!(determinant_real(&singular), 0.0);
        assert_eq!(determinant_real(&swapped).round(), -1.0);
    }

    #[test]
    fn modular_solution_satisfies_system() {
        const N: usize = 12;

        let mut rng = ChaCha8Rng::from_os_rng();

        let mut solved = 0;
        while solved < 20 {
            let mat = random_matrix(&mut rng, N, P);
            let y = (0..N).map(|_| rng.random_range(0..P)).collect::<Vec<u64>>();

            if let Some((det, x)) = solve_mod_p(&mat, &y, P) {
                assert_ne!(det, 0);
                assert_eq!(det, determinant_mod_p(&mat, P));
                assert_eq!(mat_vec_mod(&mat, &x, P), y);
                solved += 1;
            }
        }
    }

    #[test]
    fn real_solution_satisfies_system() {
        const N: usize = 8;

        let mut rng = ChaCha8Rng::from_os_rng();

        let mut solved = 0;
        while solved < 20 {
            let mat = random_matrix(&mut rng, N, 2);
            let y = (0..N).map(|_| rng.random_range(0..100)).collect::<Vec<u64>>();

            if let Some(x) = solve_real(&mat, &y) {
                for (row, &yi) in mat.iter().zip(&y) {
                    let lhs = row.iter().zip(&x).map(|(&m, &xi)| m as f64 * xi).sum::<f64>();
                    assert!((lhs - yi as f64).abs() < 1e-6);
                }
                solved += 1;
            }
        }
    }

    #[test]
    fn completion_of_independent_rows_is_invertible() {
        let rows = vec![vec![1, 1, 0, 0], vec![0, 1, 1, 0]];
        let square = complete_to_square(&rows, 4, P).unwrap();

        assert_eq!(square.len(), 4);
        assert_eq!(&square[..2], &rows[..]);
        assert_ne!(determinant_mod_p(&square, P), 0);
    }

    #[test_case(vec![vec![1, 1, 0], vec![1, 1, 0]]; "Repeated rows are dependent")]
    #[test_case(vec![vec![0, 0, 0]]; "Zero row is dependent")]
    #[test_case(vec![vec![1, 0, 0], vec![0, 1, 0], vec![0, 0, 1], vec![1, 1, 1]]; "More rows than columns")]
    fn completion_rejects(rows: Vec<Vec<u64>>) {
        assert_eq!(complete_to_square(&rows, 3, P), None);
    }
}
