use parkit_core::error::Error;
use parkit_core::gf::{data_bases, Field, Gf16, Gf8};
use proptest::prelude::*;
use reed_solomon_erasure::galois_8;

proptest! {
    #[test]
    fn gf8_matches_reference_field(a in any::<u8>(), b in any::<u8>()) {
        prop_assert_eq!((Gf8(a) * Gf8(b)).0, galois_8::mul(a, b));
        if b != 0 {
            prop_assert_eq!(Gf8(a).checked_div(Gf8(b)).unwrap().0, galois_8::div(a, b));
        }
    }

    #[test]
    fn gf8_pow_matches_reference_field(a in 1u8.., n in 0u32..600) {
        prop_assert_eq!(Gf8(a).pow(n).0, galois_8::exp(a, n as usize));
    }

    #[test]
    fn gf16_laws(a in any::<u16>(), b in any::<u16>(), c in any::<u16>()) {
        let (a, b, c) = (Gf16(a), Gf16(b), Gf16(c));
        prop_assert_eq!(a + a, Gf16::ZERO);
        prop_assert_eq!(a + b, b + a);
        prop_assert_eq!(a * b, b * a);
        prop_assert_eq!((a * b) * c, a * (b * c));
        prop_assert_eq!((a + b) + c, a + (b + c));
        prop_assert_eq!(a * (b + c), a * b + a * c);
        prop_assert_eq!(a * Gf16::ONE, a);
    }

    #[test]
    fn gf16_inverse(a in 1u16..) {
        let a = Gf16(a);
        prop_assert_eq!(a * a.inverse().unwrap(), Gf16::ONE);
    }

    #[test]
    fn gf16_mul_acc_is_symbolwise(
        words in proptest::collection::vec(any::<u16>(), 0..64),
        c in any::<u16>(),
    ) {
        let src: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut dst = vec![0u8; src.len()];
        Gf16::mul_acc(&mut dst, &src, Gf16(c));
        for (i, w) in words.iter().enumerate() {
            let got = u16::from_le_bytes([dst[2 * i], dst[2 * i + 1]]);
            prop_assert_eq!(got, (Gf16(*w) * Gf16(c)).0);
        }
    }
}

#[test]
fn division_by_zero_is_an_error() {
    assert!(matches!(Gf8(3).checked_div(Gf8(0)), Err(Error::DivisionByZero)));
    assert!(matches!(Gf16(0).inverse(), Err(Error::DivisionByZero)));
}

#[test]
fn generator_has_full_order() {
    // 2 is primitive: its powers only return to 1 after the whole multiplicative group.
    assert_eq!(Gf8(2).pow(255), Gf8::ONE);
    assert!((1..255).all(|e| Gf8(2).pow(e) != Gf8::ONE));
    assert_eq!(Gf16(2).pow(65535), Gf16::ONE);
    assert_ne!(Gf16(2).pow(65535 / 3), Gf16::ONE);
    assert_ne!(Gf16(2).pow(65535 / 5), Gf16::ONE);
    assert_ne!(Gf16(2).pow(65535 / 17), Gf16::ONE);
    assert_ne!(Gf16(2).pow(65535 / 257), Gf16::ONE);
}

#[test]
fn data_bases_follow_each_format() {
    let par1 = data_bases::<Gf8>(3).unwrap();
    assert_eq!(par1, vec![Gf8(1), Gf8(2), Gf8(3)]);

    let par2 = data_bases::<Gf16>(6).unwrap();
    assert_eq!(par2, vec![Gf16(2), Gf16(4), Gf16(16), Gf16(128), Gf16(256), Gf16(2048)]);

    let all = data_bases::<Gf16>(Gf16::MAX_DATA_BLOCKS).unwrap();
    let mut sorted: Vec<u16> = all.iter().map(|b| b.0).collect();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), Gf16::MAX_DATA_BLOCKS);
}

#[test]
fn too_many_data_blocks() {
    assert!(matches!(data_bases::<Gf8>(256), Err(Error::TooManyBlocks { count: 256, max: 255 })));
    assert!(matches!(
        data_bases::<Gf16>(32769),
        Err(Error::TooManyBlocks { count: 32769, max: 32768 })
    ));
}
