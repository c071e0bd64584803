//! Integration tests for matrix loading, vector resolution and the full setup

use std::io::Cursor;

use icrs_dist::{
    load_matrix, reference_matvec, resolve_vector, Communicator, DistributedSpmv, DistributionReader, ErrorKind,
    FileKind, LocalGroup, SetupConfig, SetupError, SetupSources, Triples,
};
use ndarray::Array1;

fn matrix_text(n: usize, starts: &[usize], entries: &[(usize, usize, f64)]) -> String {
    let mut text = format!("{} {} {} {}\n", n, n, entries.len(), starts.len() - 1);
    for start in starts {
        text.push_str(&format!("{}\n", start));
    }
    for &(i, j, value) in entries {
        text.push_str(&format!("{} {} {}\n", i + 1, j + 1, value));
    }
    text
}

fn vector_text(p: usize, owners: &[usize]) -> String {
    let mut text = format!("{} {}\n", owners.len(), p);
    for (k, owner) in owners.iter().enumerate() {
        text.push_str(&format!("{} {}\n", k + 1, owner + 1));
    }
    text
}

fn reader(text: &str) -> DistributionReader<Cursor<String>> {
    DistributionReader::new(Cursor::new(text.to_string()))
}

const SCENARIO_4X4: &str = "4 4 5 2\n0\n3\n5\n1 1 1.0\n1 3 2.0\n2 2 3.0\n3 3 4.0\n4 1 5.0\n";

#[test]
fn test_matrix_scenario_4x4() {
    let group = LocalGroup::new(2).unwrap();
    let config = SetupConfig::for_processes(2);

    let results = group
        .run(|comm| {
            let source = comm.is_root(0).then(|| reader(SCENARIO_4X4));
            load_matrix(comm, source, &config)
        })
        .unwrap();

    let first = &results[0];
    assert_eq!(first.n, 4);
    assert_eq!(first.triples.rows(), &[0, 0, 1]);
    assert_eq!(first.triples.cols(), &[0, 2, 1]);
    assert_eq!(first.triples.values(), &[1.0, 2.0, 3.0]);
    assert_eq!(results[1].nnz(), 2);

    let icrs = first.clone().into_icrs();
    assert_eq!(icrs.nrows(), 2);
    assert_eq!(icrs.rowindex(), &[0, 1]);
    assert_eq!(icrs.ncols(), 3);
    assert_eq!(icrs.colindex(), &[0, 1, 2]);
    assert_eq!(icrs.values(), &[1.0, 2.0, 3.0]);
    assert_eq!(icrs.inc(), &[0, 2, 2, 2]);

    let icrs = results[1].clone().into_icrs();
    assert_eq!(icrs.rowindex(), &[2, 3]);
    assert_eq!(icrs.colindex(), &[0, 2]);
    assert_eq!(icrs.values(), &[4.0, 5.0]);
    assert_eq!(icrs.inc(), &[1, 1, 2]);
}

#[test]
fn test_partition_conservation_and_staging() {
    let entries: Vec<(usize, usize, f64)> = (0..4).map(|i| (i % 3, (i + 1) % 3, i as f64)).collect();
    let text = matrix_text(3, &[0, 0, 3, 4], &entries);

    for root in 0..3 {
        let group = LocalGroup::new(3).unwrap();
        let config = SetupConfig::for_processes(3).with_root(root);
        let results = group
            .run(|comm| {
                let source = comm.is_root(root).then(|| reader(&text));
                load_matrix(comm, source, &config)
            })
            .unwrap();

        let counts: Vec<usize> = results.iter().map(|m| m.nnz()).collect();
        assert_eq!(counts, vec![0, 3, 1]);

        // Root only ever buffers shares of other processes
        let largest_other = [0, 3, 1]
            .iter()
            .enumerate()
            .filter(|&(q, _)| q != root)
            .map(|(_, &c)| c)
            .max()
            .unwrap();
        assert_eq!(results[root].staging_peak, largest_other);
        assert!(results[root].staging_peak <= 3);
        for (q, m) in results.iter().enumerate() {
            if q != root {
                assert_eq!(m.staging_peak, 0);
            }
        }
    }
}

#[test]
fn test_vector_scenario() {
    let group = LocalGroup::new(2).unwrap();
    let config = SetupConfig::for_processes(2);

    let results = group
        .run(|comm| {
            let source = comm.is_root(0).then(|| reader("4 2\n1 1\n2 1\n3 2\n4 2\n"));
            resolve_vector(comm, source, &config)
        })
        .unwrap();

    assert_eq!(results[0].vindex(), &[0, 1]);
    assert_eq!(results[1].vindex(), &[2, 3]);
    assert!(results.iter().all(|d| d.n() == 4));
}

#[test]
fn test_vector_index_bijection() {
    let owners: Vec<usize> = (0..23).map(|g| (g * 7 + g / 5) % 3).collect();
    let text = vector_text(3, &owners);

    for batch in [None, Some(1), Some(4), Some(100)] {
        let group = LocalGroup::new(3).unwrap();
        let mut config = SetupConfig::for_processes(3);
        config.vector_batch = batch;

        let results = group
            .run(|comm| {
                let source = comm.is_root(0).then(|| reader(&text));
                resolve_vector(comm, source, &config)
            })
            .unwrap();

        assert_eq!(results.iter().map(|d| d.nv()).sum::<usize>(), 23);
        let mut seen = vec![false; 23];
        for (q, dist) in results.iter().enumerate() {
            assert!(dist.vindex().windows(2).all(|w| w[0] < w[1]));
            for &g in dist.vindex() {
                assert_eq!(owners[g], q);
                assert!(!seen[g]);
                seen[g] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }
}

#[test]
fn test_empty_vector() {
    let group = LocalGroup::new(2).unwrap();
    let config = SetupConfig::for_processes(2);
    let results = group
        .run(|comm| {
            let source = comm.is_root(0).then(|| reader("0 2\n"));
            resolve_vector(comm, source, &config)
        })
        .unwrap();

    assert!(results.iter().all(|d| d.nv() == 0 && d.n() == 0));
}

#[test]
fn test_oversized_vector_batch() {
    for batch in [usize::MAX, 10_000_000] {
        let group = LocalGroup::new(2).unwrap();
        let config = SetupConfig::for_processes(2).with_vector_batch(batch);

        let results = group
            .run(|comm| {
                let source = comm.is_root(0).then(|| reader("4 2\n1 1\n2 1\n3 2\n4 2\n"));
                resolve_vector(comm, source, &config)
            })
            .unwrap();

        assert_eq!(results[0].vindex(), &[0, 1]);
        assert_eq!(results[1].vindex(), &[2, 3]);
    }
}

#[test]
fn test_received_share_is_not_padded() {
    let text = matrix_text(3, &[0, 1, 4], &[(0, 0, 1.0), (1, 1, 2.0), (2, 2, 3.0), (0, 2, 4.0)]);
    let group = LocalGroup::new(2).unwrap();
    let config = SetupConfig::for_processes(2);

    let results = group
        .run(|comm| {
            let source = comm.is_root(0).then(|| reader(&text));
            load_matrix(comm, source, &config)
        })
        .unwrap();

    assert_eq!(results[0].nnz(), 1);
    assert_eq!(results[1].nnz(), 3);
    assert_eq!(results[1].staging_peak, 0);
    assert_eq!(results[1].triples.capacity(), 3);
    assert_eq!(results[1].triples.rows(), &[1, 2, 0]);
}

#[test]
fn test_more_processes_than_rows() {
    // Process 1 holds no nonzeros and process 2 owns no vector components
    let text = matrix_text(2, &[0, 1, 1, 2], &[(0, 0, 3.0), (1, 1, 2.0)]);
    let vector = "2 3\n1 2\n2 1\n";

    let group = LocalGroup::new(3).unwrap();
    let config = SetupConfig::for_processes(3);
    let results = group
        .run(|comm| {
            let sources = comm.is_root(0).then(|| SetupSources {
                matrix: reader(&text),
                v: reader(vector),
                u: reader(vector),
            });
            let spmv = DistributedSpmv::setup(comm, sources, &config)?;

            let vloc: Vec<f64> = spmv.v().vindex().iter().map(|&g| (g + 1) as f64).collect();
            let mut uloc = vec![0.0; spmv.u().nv()];
            spmv.multiply(comm, &vloc, &mut uloc)?;
            Ok((spmv.matrix().nnz(), spmv.u().vindex().to_vec(), uloc))
        })
        .unwrap();

    assert_eq!(results[1].0, 0);
    assert_eq!(results[2].1.len(), 0);

    let mut u = vec![f64::NAN; 2];
    for (_, uindex, values) in &results {
        for (&g, &value) in uindex.iter().zip(values) {
            u[g] = value;
        }
    }
    assert_eq!(u, vec![3.0, 4.0]);
}

fn setup_error(matrix: &str, v: &str, u: &str, p: usize) -> SetupError {
    let group = LocalGroup::new(p).unwrap();
    let config = SetupConfig::for_processes(p);
    let result = group.run(|comm| {
        let sources = comm.is_root(0).then(|| SetupSources {
            matrix: reader(matrix),
            v: reader(v),
            u: reader(u),
        });
        DistributedSpmv::setup(comm, sources, &config)
    });
    match result {
        Err(error) => error,
        Ok(_) => panic!("setup succeeded on invalid input"),
    }
}

#[test]
fn test_setup_errors_abort_group() {
    let v = "4 2\n1 1\n2 1\n3 2\n4 2\n";

    // Matrix declares 2 processes, group has 3
    let error = setup_error(SCENARIO_4X4, v, v, 3);
    assert!(matches!(
        error,
        SetupError::ProcessCountMismatch {
            file: FileKind::Matrix,
            declared: 2,
            actual: 3
        }
    ));
    assert_eq!(error.abort_code(), -8);

    let error = setup_error("4 5 0 2\n0\n0\n0\n", v, v, 2);
    assert_eq!(error.abort_code(), -9);

    let error = setup_error(SCENARIO_4X4, "4 3\n", v, 2);
    assert_eq!(error.abort_code(), -10);

    let error = setup_error(SCENARIO_4X4, v, "4 2\n1 1\n2 1\n4 2\n3 2\n", 2);
    assert!(matches!(error, SetupError::DistributionInconsistency { expected: 2, found: 3 }));
    assert_eq!(error.abort_code(), -11);

    let error = setup_error(SCENARIO_4X4, "3 2\n1 1\n2 1\n3 2\n", v, 2);
    assert!(matches!(error, SetupError::DimensionMismatch { matrix: 4, vector: 3 }));
    assert_eq!(error.kind(), ErrorKind::MalformedHeader);

    // Truncated nonzeros
    let error = setup_error("4 4 5 2\n0\n3\n5\n1 1 1.0\n", v, v, 2);
    assert_eq!(error.kind(), ErrorKind::MalformedEntry);

    // Partition plan does not end at nz
    let error = setup_error("4 4 5 2\n0\n3\n4\n", v, v, 2);
    assert!(matches!(error, SetupError::InvalidPartition(_)));
}

#[test]
fn test_missing_file_aborts_group() {
    let dir = std::env::temp_dir().join(format!("icrs-dist-missing-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let matrix = dir.join("matrix.mtx");
    let v = dir.join("v.txt");
    std::fs::write(&matrix, SCENARIO_4X4).unwrap();
    std::fs::write(&v, "4 2\n1 1\n2 1\n3 2\n4 2\n").unwrap();
    let u = dir.join("does-not-exist.txt");

    let group = LocalGroup::new(2).unwrap();
    let config = SetupConfig::for_processes(2);
    let result = group.run(|comm| DistributedSpmv::from_files(comm, &matrix, &v, &u, &config));

    match result {
        Err(error @ SetupError::FileUnavailable { .. }) => assert_eq!(error.abort_code(), -2),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("setup succeeded without the u distribution"),
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_setup_from_files() {
    let dir = std::env::temp_dir().join(format!("icrs-dist-files-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let matrix = dir.join("matrix.mtx");
    let v = dir.join("v.txt");
    std::fs::write(&matrix, SCENARIO_4X4).unwrap();
    std::fs::write(&v, "4 2\n1 1\n2 1\n3 2\n4 2\n").unwrap();

    let group = LocalGroup::new(2).unwrap();
    let config = SetupConfig::for_processes(2);
    let results = group
        .run(|comm| {
            let spmv = DistributedSpmv::from_files(comm, &matrix, &v, &v, &config)?;
            let vloc: Vec<f64> = spmv.v().vindex().iter().map(|&g| (g + 1) as f64).collect();
            let mut uloc = vec![0.0; spmv.u().nv()];
            spmv.multiply(comm, &vloc, &mut uloc)?;
            Ok(uloc)
        })
        .unwrap();

    // A = [[1,0,2,0],[0,3,0,0],[0,0,4,0],[5,0,0,0]], v = [1,2,3,4]
    assert_eq!(results, vec![vec![7.0, 6.0], vec![12.0, 5.0]]);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_distributed_product_matches_reference() {
    let n = 10;
    let p = 3;
    let mut entries: Vec<(usize, usize, f64)> = (0..n).map(|i| (i, (i * 3 + 1) % n, (i + 1) as f64)).collect();
    entries.extend((0..n).map(|i| (i, i, 2.0)));
    let text = matrix_text(n, &[0, 7, 14, 20], &entries);
    let v_owners: Vec<usize> = (0..n).map(|g| (g * 7) % p).collect();
    let u_owners: Vec<usize> = (0..n).map(|g| (g + 1) % p).collect();
    let v_text = vector_text(p, &v_owners);
    let u_text = vector_text(p, &u_owners);

    let group = LocalGroup::new(p).unwrap();
    let config = SetupConfig::for_processes(p).with_root(2).with_vector_batch(3);
    let results = group
        .run(|comm| {
            let sources = comm.is_root(2).then(|| SetupSources {
                matrix: reader(&text),
                v: reader(&v_text),
                u: reader(&u_text),
            });
            let spmv = DistributedSpmv::setup(comm, sources, &config)?;

            let vloc: Vec<f64> = spmv.v().vindex().iter().map(|&g| (g + 1) as f64).collect();
            let mut uloc = vec![0.0; spmv.u().nv()];
            // Repeated products give the same answer
            for _ in 0..3 {
                spmv.multiply(comm, &vloc, &mut uloc)?;
            }
            Ok((spmv.u().vindex().to_vec(), uloc))
        })
        .unwrap();

    let triples: Triples<f64> = entries
        .iter()
        .map(|&(row, col, value)| icrs_dist::Triple { row, col, value })
        .collect();
    let v = Array1::from_iter((0..n).map(|g| (g + 1) as f64));
    let expected = reference_matvec(n, &triples, &v);

    let mut u = vec![f64::NAN; n];
    for (uindex, values) in &results {
        for (&g, &value) in uindex.iter().zip(values) {
            u[g] = value;
        }
    }
    for g in 0..n {
        assert!((u[g] - expected[g]).abs() < 1e-12, "u[{}] = {}, expected {}", g, u[g], expected[g]);
    }
}
