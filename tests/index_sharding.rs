use anyhow::Result;
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use tfrecord_loader::Error;
use tfrecord_loader::index::{Index, IndexFormat, Shard};
use tfrecord_loader::io::compression::Compression;
use tfrecord_loader::reader::{ReaderOptions, RecordReader};
use tfrecord_loader::testing::RecordFixture;

fn numbered(n: u32) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("record-{i}").into_bytes()).collect()
}

#[test]
fn index_is_complete_and_contiguous() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let files = fixture.write_payloads("idx", numbered(57))?;
    let index = Index::build_from_file(&files.data, Compression::None)?;

    assert_eq!(index.len(), 57);
    assert_eq!(index.get(0).unwrap().offset, 0);
    for pair in index.entries().windows(2) {
        assert_eq!(pair[0].end(), pair[1].offset);
    }
    assert_eq!(
        index.entries().last().unwrap().end(),
        fs::metadata(&files.data)?.len()
    );
    Ok(())
}

#[test]
fn binary_and_text_indexes_are_equivalent() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let files = fixture.write_payloads("fmt", numbered(9))?;
    let index = Index::build_from_file(&files.data, Compression::None)?;

    let text = fixture.dir().join("fmt.txt.idx");
    index.save(&text, IndexFormat::Text)?;
    assert_eq!(Index::load(&text, IndexFormat::Text)?, index);
    assert_eq!(Index::load(&files.index, IndexFormat::Binary)?, index);
    assert_eq!(fs::metadata(&files.index)?.len(), 9 * 16);

    let first_line = fs::read_to_string(&text)?.lines().next().unwrap().to_string();
    let first = index.get(0).unwrap();
    assert_eq!(first_line, format!("{} {}", first.offset, first.length));
    Ok(())
}

#[test]
fn shards_partition_the_file() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let files = fixture.write_payloads("shard", numbered(23))?;
    let index = Arc::new(Index::load(&files.index, IndexFormat::Binary)?);

    for workers in 1..=5 {
        let mut seen = Vec::new();
        for w in 0..workers {
            let opts = ReaderOptions::new(&files.data).shard(Shard::new(w, workers)?);
            let reader = RecordReader::with_index(opts, Some(Arc::clone(&index)))?;
            let part: Vec<Vec<u8>> = reader.collect::<tfrecord_loader::Result<_>>()?;
            // Worker w owns entries w, w + W, w + 2W, ...
            let expected: Vec<Vec<u8>> = (w..23)
                .step_by(workers)
                .map(|i| format!("record-{i}").into_bytes())
                .collect();
            assert_eq!(part, expected, "worker {w} of {workers}");
            seen.extend(part);
        }
        let unique: BTreeSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), 23, "{workers} workers");
        assert_eq!(unique.len(), 23, "{workers} workers");
    }
    Ok(())
}

#[test]
fn sharding_without_index_is_rejected() -> Result<()> {
    let fixture = RecordFixture::new()?;
    let files = fixture.write_payloads("noidx", numbered(4))?;
    let opts = ReaderOptions::new(&files.data).shard(Shard::new(1, 2)?);
    match RecordReader::new(opts) {
        Err(Error::MissingIndex { path, workers }) => {
            assert_eq!(path, files.data);
            assert_eq!(workers, 2);
        }
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("expected MissingIndex"),
    }
    Ok(())
}

#[test]
fn invalid_shards_are_configuration_errors() {
    assert!(matches!(Shard::new(0, 0), Err(Error::Configuration(_))));
    assert!(matches!(Shard::new(3, 3), Err(Error::Configuration(_))));
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzip_shards_match_plain_shards() -> Result<()> {
    let plain = RecordFixture::new()?;
    let gz = RecordFixture::new()?.gzip();
    let p = plain.write_payloads("s", numbered(31))?;
    let g = gz.write_payloads("s", numbered(31))?;

    for w in 0..4 {
        let shard = Shard::new(w, 4)?;
        let a: Vec<Vec<u8>> = RecordReader::new(ReaderOptions::new(&p.data).index(&p.index).shard(shard))?
            .collect::<tfrecord_loader::Result<_>>()?;
        let b: Vec<Vec<u8>> = RecordReader::new(ReaderOptions::new(&g.data).index(&g.index).shard(shard))?
            .collect::<tfrecord_loader::Result<_>>()?;
        assert_eq!(a, b, "worker {w}");
    }
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzip_random_start_wraps_around() -> Result<()> {
    let fixture = RecordFixture::new()?.gzip();
    let files = fixture.write_payloads("rs", numbered(12))?;
    let opts = ReaderOptions::new(&files.data)
        .index(&files.index)
        .random_start(true)
        .seed(11);
    let got: Vec<String> = RecordReader::new(opts)?
        .map(|p| p.map(|p| String::from_utf8(p).unwrap()))
        .collect::<tfrecord_loader::Result<_>>()?;
    assert_eq!(got.len(), 12);
    let start: usize = got[0].trim_start_matches("record-").parse()?;
    for (k, name) in got.iter().enumerate() {
        assert_eq!(name, &format!("record-{}", (start + k) % 12));
    }
    Ok(())
}

#[test]
fn malformed_index_files_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ragged = dir.path().join("ragged.idx");
    fs::write(&ragged, [0u8; 20])?;
    assert!(matches!(
        Index::load(&ragged, IndexFormat::Binary),
        Err(Error::MalformedIndex(_))
    ));

    let text = dir.path().join("bad.idx");
    fs::write(&text, "0 20\nnot numbers\n")?;
    assert!(matches!(
        Index::load(&text, IndexFormat::Text),
        Err(Error::MalformedIndex(_))
    ));
    Ok(())
}
