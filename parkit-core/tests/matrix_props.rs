use parkit_core::error::Error;
use parkit_core::gf::{data_bases, Field, Gf16, Gf8};
use parkit_core::matrix::Matrix;
use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn vandermonde16(rows: usize, cols: usize) -> Matrix<Gf16> {
    let exps: Vec<u32> = (0..rows as u32).collect();
    Matrix::vandermonde(&exps, &data_bases::<Gf16>(cols).unwrap())
}

proptest! {
    #[test]
    fn vandermonde_inverse_roundtrip(n in 1usize..12, seed in any::<u64>()) {
        let m = vandermonde16(n, n);
        let inv = m.invert().unwrap();
        prop_assert_eq!(m.mul(&inv).unwrap(), Matrix::identity(n));
        prop_assert_eq!(inv.invert().unwrap(), m.clone());

        let mut rng = StdRng::seed_from_u64(seed);
        let v: Vec<Gf16> = (0..n).map(|_| Gf16(rng.gen())).collect();
        let back = inv.mul_vec(&m.mul_vec(&v).unwrap()).unwrap();
        prop_assert_eq!(back, v);
    }

    #[test]
    fn block_product_matches_symbolwise_product(
        n in 1usize..6,
        k in 1usize..4,
        words in 1usize..16,
        seed in any::<u64>(),
    ) {
        let m = vandermonde16(k, n);
        let mut rng = StdRng::seed_from_u64(seed);
        let blocks: Vec<Vec<u8>> =
            (0..n).map(|_| (0..words * 2).map(|_| rng.gen()).collect()).collect();
        let refs: Vec<&[u8]> = blocks.iter().map(Vec::as_slice).collect();
        let out = m.mul_blocks(&refs).unwrap();
        prop_assert_eq!(out.len(), k);
        for w in 0..words {
            let col: Vec<Gf16> = blocks
                .iter()
                .map(|b| Gf16(u16::from_le_bytes([b[2 * w], b[2 * w + 1]])))
                .collect();
            let expect = m.mul_vec(&col).unwrap();
            for r in 0..k {
                let got = u16::from_le_bytes([out[r][2 * w], out[r][2 * w + 1]]);
                prop_assert_eq!(got, expect[r].0);
            }
        }
    }
}

#[test]
fn first_parity_row_is_plain_xor() {
    let m = Matrix::<Gf8>::vandermonde(&[0], &data_bases::<Gf8>(3).unwrap());
    let out = m.mul_blocks(&[&[1, 2][..], &[4, 8][..], &[16, 32][..]]).unwrap();
    assert_eq!(out, vec![vec![21, 42]]);
}

#[test]
fn singular_matrix_is_reported() {
    let m = Matrix::from_rows(vec![vec![Gf8(1), Gf8(2)], vec![Gf8(2), Gf8(4)]]).unwrap();
    // Second row is 2 × the first.
    assert_eq!(Gf8(2) * Gf8(2), Gf8(4));
    assert!(matches!(m.invert(), Err(Error::SingularMatrix)));
}

#[test]
fn pivot_search_skips_zero_diagonal() {
    let m = Matrix::from_rows(vec![vec![Gf16(0), Gf16(1)], vec![Gf16(1), Gf16(0)]]).unwrap();
    assert_eq!(m.invert().unwrap(), m);
}

#[test]
fn degenerate_shapes() {
    let empty: Matrix<Gf16> = Matrix::zero(0, 0);
    assert_eq!(empty.invert().unwrap(), empty);

    let one = Matrix::from_rows(vec![vec![Gf16(7)]]).unwrap();
    let inv = one.invert().unwrap();
    assert_eq!(inv.get(0, 0), Gf16::ONE.checked_div(Gf16(7)).unwrap());

    let rect: Matrix<Gf8> = Matrix::zero(2, 3);
    assert!(matches!(rect.invert(), Err(Error::DimensionMismatch { .. })));
    assert!(matches!(
        Matrix::from_rows(vec![vec![Gf8(1), Gf8(2)], vec![Gf8(3)]]),
        Err(Error::DimensionMismatch { expected: 2, actual: 1 })
    ));
    assert!(matches!(rect.mul(&rect), Err(Error::DimensionMismatch { .. })));
}

#[test]
fn block_product_rejects_bad_shapes() {
    let m = vandermonde16(1, 2);
    assert!(matches!(m.mul_blocks(&[&[0u8; 4][..]]), Err(Error::DimensionMismatch { .. })));
    let res = m.mul_blocks(&[&[0u8; 4][..], &[0u8; 6][..]]);
    assert!(matches!(res, Err(Error::DimensionMismatch { .. })));
    let res = m.mul_blocks(&[&[0u8; 3][..], &[0u8; 3][..]]);
    assert!(matches!(res, Err(Error::InvalidBlockSize(3))));
}
