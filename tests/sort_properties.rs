//! Property tests for the radix sort and the ICRS conversion

use icrs_dist::{choose_radix, icrs_to_sprs, radix_sort, stable_bucket_sort, Icrs, KeyMode, Triples};
use proptest::prelude::*;

/// A dimension and up to 200 nonzeros inside it
fn triples_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize, i32)>)> {
    (1usize..300).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n, -50i32..50), 0..200)))
}

proptest! {
    #[test]
    fn radix_is_smallest_power_of_two(n in 0usize..1_000_000) {
        let radix = choose_radix(n);
        prop_assert!(radix.is_power_of_two());
        prop_assert!(radix * radix >= n);
        if radix > 1 {
            prop_assert!((radix / 2) * (radix / 2) < n);
        }
    }

    #[test]
    fn bucket_sort_is_stable((n, entries) in triples_strategy(), radix in 1usize..20, div in any::<bool>()) {
        let mode = if div { KeyMode::Div } else { KeyMode::Mod };
        let mut keys: Vec<usize> = entries.iter().map(|e| e.0).collect();
        let mut positions: Vec<usize> = (0..keys.len()).collect();
        let mut values = positions.clone();

        stable_bucket_sort(n, &mut keys, &mut positions, &mut values, radix, mode);

        for w in keys.iter().zip(&positions).collect::<Vec<_>>().windows(2) {
            let (ka, pa) = w[0];
            let (kb, pb) = w[1];
            let (ba, bb) = (mode.key(*ka, radix), mode.key(*kb, radix));
            prop_assert!(ba <= bb);
            if ba == bb {
                prop_assert!(pa < pb);
            }
        }
        prop_assert_eq!(positions, values);
    }

    #[test]
    fn radix_sort_orders_completely((n, entries) in triples_strategy()) {
        let mut keys: Vec<usize> = entries.iter().map(|e| e.0).collect();
        let mut positions: Vec<usize> = (0..keys.len()).collect();
        let mut values = positions.clone();

        let mut expected: Vec<(usize, usize)> = keys.iter().copied().zip(positions.iter().copied()).collect();
        expected.sort();

        radix_sort(n, &mut keys, &mut positions, &mut values, choose_radix(n));

        let sorted: Vec<(usize, usize)> = keys.into_iter().zip(positions).collect();
        prop_assert_eq!(sorted, expected);
    }

    #[test]
    fn icrs_round_trip((n, entries) in triples_strategy()) {
        let triples: Triples<i32> = Triples::new(
            entries.iter().map(|e| e.0).collect(),
            entries.iter().map(|e| e.1).collect(),
            entries.iter().map(|e| e.2).collect(),
        );
        let icrs = Icrs::from_triples(n, triples);

        prop_assert_eq!(icrs.inc().len(), entries.len() + 1);
        prop_assert!(icrs.rowindex().windows(2).all(|w| w[0] < w[1]));
        prop_assert!(icrs.colindex().windows(2).all(|w| w[0] < w[1]));

        let mut decoded: Vec<(usize, usize, i32)> = icrs.iter().map(|t| (t.row, t.col, t.value)).collect();
        // Row-major with ascending columns inside a row
        let order: Vec<(usize, usize)> = decoded.iter().map(|t| (t.0, t.1)).collect();
        prop_assert!(order.windows(2).all(|w| w[0] <= w[1]));

        let mut expected = entries.clone();
        decoded.sort();
        expected.sort();
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn local_product_matches_sprs((n, entries) in triples_strategy()) {
        let triples: Triples<f64> = Triples::new(
            entries.iter().map(|e| e.0).collect(),
            entries.iter().map(|e| e.1).collect(),
            entries.iter().map(|e| e.2 as f64).collect(),
        );
        let icrs = Icrs::from_triples(n, triples);
        let v: Vec<f64> = (0..icrs.ncols()).map(|j| (j % 7) as f64 - 3.0).collect();

        let u = icrs.local_product(&v);
        let csr = icrs_to_sprs(&icrs);
        let expected = &csr * &ndarray::Array1::from(v);

        prop_assert_eq!(u.len(), icrs.nrows());
        for (a, b) in u.iter().zip(expected.iter()) {
            prop_assert!((a - b).abs() < 1e-9);
        }
    }
}
