use std::fs;

use anneal_rs::{
    test_models::NormalMeanModel, CsvSink, InferenceEngine, MemorySink, Namespace,
    ParallelTempering, PtSettings, ScmSettings, SequentialChangeOfMeasure,
};
use arrow::array::{Array, Float64Array, Int64Array};
use pretty_assertions::assert_eq;

fn model() -> NormalMeanModel {
    NormalMeanModel::new(vec![0.3, -0.1], 0.7, 0.6)
}

#[test]
fn scm_csv_layout() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = SequentialChangeOfMeasure::new(ScmSettings {
        n_particles: 20,
        ..Default::default()
    });
    engine.bind_model(model());
    {
        let mut sink = CsvSink::new(dir.path()).with_precision(6);
        engine.run(&mut sink).unwrap();
    }

    let root = dir.path();
    for path in [
        root.join("logNormEstimate.csv"),
        root.join("logChiSquareDivergence.csv"),
        root.join("samples").join("samples.csv"),
        root.join("samples").join("logDensity.csv"),
        root.join("monitoring").join("propagation.csv"),
        root.join("monitoring").join("resampling.csv"),
    ] {
        assert!(path.exists(), "missing {:?}", path);
    }

    let estimate = fs::read_to_string(root.join("logNormEstimate.csv")).unwrap();
    let lines: Vec<&str> = estimate.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "estimator,value");
    assert!(lines[1].starts_with("SCM,"));

    let samples = fs::read_to_string(root.join("samples").join("samples.csv")).unwrap();
    let mut lines = samples.lines();
    assert_eq!(lines.next(), Some("sample,mu"));
    assert_eq!(lines.count(), 20);

    let propagation =
        fs::read_to_string(root.join("monitoring").join("propagation.csv")).unwrap();
    assert_eq!(propagation.lines().next(), Some("iteration,annealingParameter,ess"));
}

#[test]
fn pt_tables_to_arrow() {
    let mut engine = ParallelTempering::new(PtSettings {
        n_scans: 25,
        n_particles_per_temperature: 2,
        ..Default::default()
    });
    engine.bind_model(model());
    let mut sink = MemorySink::new();
    engine.run(&mut sink).unwrap();

    let batch = sink
        .table(Namespace::Samples, "logDensity")
        .unwrap()
        .to_record_batch()
        .unwrap();
    assert_eq!(batch.num_rows(), 50);
    assert_eq!(batch.num_columns(), 2);
    let samples = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(samples.value(0), 0);
    assert_eq!(samples.value(49), 49);
    let values = batch
        .column(1)
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert!(values.values().iter().all(|v| v.is_finite()));

    let swaps = sink
        .table(Namespace::Monitoring, "swapPrs")
        .unwrap()
        .to_record_batch()
        .unwrap();
    assert_eq!(swaps.num_rows(), 3);
    assert_eq!(swaps.schema().field(0).name(), "chain");
}
