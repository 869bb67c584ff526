use anyhow::Result;
use std::collections::BTreeMap;
use tfrecord_loader::Error;
use tfrecord_loader::dataset::{
    ExampleDecoder, MultiRecordDataset, MultiSourceConfig, RecordDataset, SequenceDecoder,
};
use tfrecord_loader::index::Shard;
use tfrecord_loader::reader::ReaderOptions;
use tfrecord_loader::record::{Example, Feature, FeatureType, Schema, SequenceExample};
use tfrecord_loader::sampler::SamplingMode;
use tfrecord_loader::testing::{
    RecordFixture, assert_proportion_near, assert_same_multiset, example_id, numbered_examples,
};
use tfrecord_loader::writer::RecordWriter;

fn ids(examples: &[Example]) -> Vec<i64> {
    examples.iter().map(|e| example_id(e).unwrap()).collect()
}

fn id_schema() -> Schema {
    Schema::new().field("id", FeatureType::Int)
}

#[test]
fn sequence_examples_keep_step_counts_and_values() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let first = SequenceExample::builder()
        .context_int64("length", [3])
        .context_int64("label", [1])
        .int64_sequence("tokens", [vec![0, 0, 1], vec![0, 1, 0], vec![1, 0, 0]])
        .build();
    let second = SequenceExample::builder()
        .context_int64("length", [3])
        .context_int64("label", [1])
        .int64_sequence("tokens", [vec![0, 0, 1], vec![1, 0, 0]])
        .build();

    let path = fixture.data_path("seq");
    let mut writer = RecordWriter::create(&path, Default::default())?;
    writer.write_sequence_example(&first)?;
    writer.write_sequence_example(&second)?;
    writer.finish()?;

    let context = Schema::new()
        .field("length", FeatureType::Int)
        .field("label", FeatureType::Int);
    let sequence = Schema::new().field("tokens", FeatureType::Int);
    let dataset = RecordDataset::new(
        ReaderOptions::new(&path),
        SequenceDecoder::new(context, sequence),
    )?;
    let read: Vec<SequenceExample> = dataset.iter()?.collect::<tfrecord_loader::Result<_>>()?;

    assert_eq!(read.len(), 2);
    let steps: Vec<usize> = read.iter().map(|r| r.steps("tokens").unwrap().len()).collect();
    assert_eq!(steps, vec![3, 2]);
    assert_eq!(read[0], first);
    assert_eq!(read[1], second);
    assert_eq!(
        read[1].steps("tokens").unwrap()[1],
        Feature::Int64List(vec![1, 0, 0])
    );
    assert_eq!(
        read[0].context.get("label"),
        Some(&Feature::Int64List(vec![1]))
    );
    Ok(())
}

#[test]
fn schema_projection_and_type_checks_apply_per_record() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let example = Example::builder()
        .int64("id", [4])
        .float("score", [0.5])
        .bytes("name", [b"x".as_slice()])
        .build();
    let files = fixture.write_examples("proj", &[example])?;

    let projected = RecordDataset::new(ReaderOptions::new(&files.data), ExampleDecoder::new(id_schema()))?;
    let got: Vec<Example> = projected.iter()?.collect::<tfrecord_loader::Result<_>>()?;
    assert_eq!(got[0].len(), 1);
    assert_eq!(example_id(&got[0]), Some(4));

    let wrong = Schema::new().field("score", FeatureType::Int);
    let mismatched = RecordDataset::new(ReaderOptions::new(&files.data), ExampleDecoder::new(wrong))?;
    let mut it = mismatched.iter()?;
    assert!(matches!(it.next(), Some(Err(Error::TypeMismatch { .. }))));
    assert!(it.next().is_none());

    let missing = Schema::new().field("absent", FeatureType::Bytes);
    let unknown = RecordDataset::new(ReaderOptions::new(&files.data), ExampleDecoder::new(missing))?;
    assert!(matches!(
        unknown.iter()?.next(),
        Some(Err(Error::UnknownField { .. }))
    ));
    Ok(())
}

#[test]
fn shuffled_passes_are_permutations() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let files = fixture.write_examples("shuf", &numbered_examples(0..500))?;
    let dataset = RecordDataset::new(
        ReaderOptions::new(&files.data).index(&files.index),
        ExampleDecoder::new(id_schema()),
    )?
    .shuffle_queue_size(64)
    .seed(3);
    assert_eq!(dataset.num_records(), Some(500));

    let expected: Vec<i64> = (0..500).collect();
    let first: Vec<Example> = dataset.iter()?.collect::<tfrecord_loader::Result<_>>()?;
    let second: Vec<Example> = dataset.iter()?.collect::<tfrecord_loader::Result<_>>()?;
    assert_same_multiset(&ids(&first), &expected);
    assert_same_multiset(&ids(&second), &expected);
    assert_ne!(ids(&first), expected);
    assert_ne!(ids(&first), ids(&second), "each pass reshuffles");
    Ok(())
}

#[test]
fn transform_runs_after_decode() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let files = fixture.write_examples("tf", &numbered_examples(0..5))?;
    let dataset = RecordDataset::new(ReaderOptions::new(&files.data), ExampleDecoder::default())?
        .transform(|mut e: Example| {
            let id = example_id(&e).unwrap_or_default();
            e.insert("double", vec![id * 2]);
            e
        });
    let got: Vec<Example> = dataset.iter()?.collect::<tfrecord_loader::Result<_>>()?;
    let doubled: Vec<_> = got
        .iter()
        .map(|e| e.get("double").and_then(Feature::as_int64_list).unwrap()[0])
        .collect();
    assert_eq!(doubled, vec![0, 2, 4, 6, 8]);
    Ok(())
}

#[test]
fn dataset_without_index_cannot_be_sharded() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let files = fixture.write_examples("ni", &numbered_examples(0..3))?;
    let opts = ReaderOptions::new(&files.data).shard(Shard::new(0, 3)?);
    assert!(matches!(
        RecordDataset::new(opts, ExampleDecoder::default()),
        Err(Error::MissingIndex { workers: 3, .. })
    ));
    Ok(())
}

fn two_split_config(fixture: &RecordFixture, a: usize, b: usize) -> Result<MultiSourceConfig> {
    fixture.write_examples("a", &numbered_examples(0..a as i64))?;
    fixture.write_examples("b", &numbered_examples(100_000..100_000 + b as i64))?;
    let mut splits = BTreeMap::new();
    splits.insert("a".to_string(), 0.8);
    splits.insert("b".to_string(), 0.2);
    let mut config = MultiSourceConfig::new(
        fixture.dir().join("{}.tfrecord").to_string_lossy().into_owned(),
        splits,
    );
    config.index_pattern = Some(fixture.dir().join("{}.idx").to_string_lossy().into_owned());
    config.seed = Some(17);
    Ok(config)
}

#[test]
fn finite_mode_ends_after_every_record_once() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let mut config = two_split_config(&fixture, 40, 15)?;
    config.infinite = false;
    config.shuffle_queue_size = Some(8);

    let dataset = MultiRecordDataset::new(config, ExampleDecoder::new(id_schema()))?;
    let sampler = dataset.iter()?;
    assert_eq!(sampler.mode(), SamplingMode::Finite);
    let got: Vec<Example> = sampler.collect::<tfrecord_loader::Result<_>>()?;

    let expected: Vec<i64> = (0..40).chain(100_000..100_015).collect();
    assert_eq!(got.len(), 55);
    assert_same_multiset(&ids(&got), &expected);
    Ok(())
}

#[test]
fn infinite_mode_keeps_going() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let config = two_split_config(&fixture, 3, 2)?;
    assert!(config.infinite);

    let dataset = MultiRecordDataset::new(config, ExampleDecoder::new(id_schema()))?;
    let got: Vec<Example> = dataset
        .iter()?
        .take(1_000)
        .collect::<tfrecord_loader::Result<_>>()?;
    assert_eq!(got.len(), 1_000);
    let seen = ids(&got);
    for id in [0, 1, 2, 100_000, 100_001] {
        assert!(seen.contains(&id), "{id} never sampled");
    }
    Ok(())
}

#[mark_flaky_tests::flaky]
#[test]
fn sampled_proportions_follow_weights() {
    let fixture = RecordFixture::new().unwrap();
    let mut config = two_split_config(&fixture, 5_000, 5_000).unwrap();
    config.infinite = false;
    config.seed = None;

    let dataset = MultiRecordDataset::new(config, ExampleDecoder::new(id_schema())).unwrap();
    let sampler = dataset.iter().unwrap();
    let probabilities = sampler.probabilities();
    assert!((probabilities[0].1 - 0.8).abs() < 1e-12);
    assert!((probabilities[1].1 - 0.2).abs() < 1e-12);

    let draws: Vec<Example> = sampler
        .take(4_000)
        .collect::<tfrecord_loader::Result<_>>()
        .unwrap();
    // 4000 draws at p = 0.8: std dev ~0.0063, tolerance ~4.7 sigma.
    assert_proportion_near(&ids(&draws), |&id| id < 100_000, 0.8, 0.03);
}

#[test]
fn config_loads_from_a_json_file() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let config = two_split_config(&fixture, 4, 4)?;
    let path = fixture.dir().join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;

    let loaded = MultiSourceConfig::from_json_file(&path)?;
    assert_eq!(loaded, config);

    let missing = MultiSourceConfig::from_json_file(fixture.dir().join("nope.json"));
    assert!(matches!(missing, Err(Error::Io { .. })));
    Ok(())
}

#[test]
fn zero_weight_split_is_never_read() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let mut config = two_split_config(&fixture, 10, 10)?;
    config.splits.insert("b".to_string(), 0.0);
    config.infinite = false;
    let dataset = MultiRecordDataset::new(config, ExampleDecoder::new(id_schema()))?;
    let got: Vec<Example> = dataset.iter()?.collect::<tfrecord_loader::Result<_>>()?;
    assert_same_multiset(&ids(&got), &(0..10).collect::<Vec<_>>());
    Ok(())
}
