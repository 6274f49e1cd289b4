use featurestore::prelude::*;
use featurestore::schema::FloatSize;
use featurestore::schema::IntSize;
use pretty_assertions::assert_eq;

fn point_wkb(x: f64, y: f64) -> Vec<u8> {
    let mut wkb = vec![1u8];
    wkb.extend_from_slice(&1u32.to_le_bytes());
    wkb.extend_from_slice(&x.to_le_bytes());
    wkb.extend_from_slice(&y.to_le_bytes());
    wkb
}

fn every_type() -> Schema {
    Schema::new(vec![
        Column::new(ColumnId::random(), "fid", DataType::integer(IntSize::I32)).primary_key(0),
        Column::new(ColumnId::random(), "flag", DataType::Boolean),
        Column::new(ColumnId::random(), "data", DataType::Blob { length: Some(8) }),
        Column::new(ColumnId::random(), "day", DataType::Date),
        Column::new(ColumnId::random(), "at", DataType::Time),
        Column::new(ColumnId::random(), "seen", DataType::Timestamp { utc: true }),
        Column::new(ColumnId::random(), "took", DataType::Interval),
        Column::new(
            ColumnId::random(),
            "ratio",
            DataType::Float {
                size: FloatSize::F32,
            },
        ),
        Column::new(
            ColumnId::random(),
            "score",
            DataType::Float {
                size: FloatSize::F64,
            },
        ),
        Column::new(
            ColumnId::random(),
            "count",
            DataType::Integer { size: IntSize::I16 },
        ),
        Column::new(
            ColumnId::random(),
            "price",
            DataType::Numeric {
                precision: Some(10),
                scale: Some(2),
            },
        ),
        Column::new(ColumnId::random(), "name", DataType::Text { length: Some(40) }),
        Column::new(
            ColumnId::random(),
            "geom",
            DataType::geometry("POINT".parse().unwrap(), Some("EPSG:4326")),
        ),
    ])
    .unwrap()
}

#[test]
fn every_type_roundtrips() {
    let dataset = Dataset::create(
        MemoryStore::new(),
        "all/types",
        every_type(),
        PathStructure::recommended(&every_type()),
    )
    .unwrap();
    let geometry = Geometry::from_wkb(&point_wkb(174.7, -41.3)).unwrap();
    let row = dataset
        .schema()
        .row([
            ("fid", Value::Int(12)),
            ("flag", Value::Bool(true)),
            ("data", Value::Bytes(vec![0, 1, 2])),
            ("day", "2024-02-29".into()),
            ("at", "23:59:59.5".into()),
            ("seen", "2024-02-29T12:00:00Z".into()),
            ("took", "P1DT2H".into()),
            ("ratio", Value::Float(0.25)),
            ("score", Value::Float(-1.0e300)),
            ("count", Value::Int(-32768)),
            ("price", "1234.50".into()),
            ("name", "Wellington".into()),
            ("geom", Value::Geometry(geometry)),
        ])
        .unwrap();
    dataset.write_feature(&row).unwrap();
    assert_eq!(dataset.read_feature(&[Value::Int(12)]).unwrap(), row);
}

#[test]
fn values_are_stored_canonically() {
    let dataset = Dataset::create(
        MemoryStore::new(),
        "canon",
        every_type(),
        PathStructure::recommended(&every_type()),
    )
    .unwrap();
    let schema = dataset.schema().clone();
    let row = schema
        .row([
            ("fid", Value::Int(1)),
            ("at", "08:00:00.000".into()),
            ("seen", "2024-01-01 10:00:00Z".into()),
            ("took", "P2W".into()),
            ("price", "+007.10".into()),
            ("geom", Value::Bytes(point_wkb(1.0, 2.0))),
        ])
        .unwrap();
    dataset.write_feature(&row).unwrap();
    let back = dataset.read_feature(&[Value::Int(1)]).unwrap();
    let get = |name: &str| back[&schema.column_by_name(name).unwrap().id].clone();
    assert_eq!(get("at"), Value::from("08:00:00"));
    assert_eq!(get("seen"), Value::from("2024-01-01T10:00:00Z"));
    assert_eq!(get("took"), Value::from("P14D"));
    assert_eq!(get("price"), Value::from("7.10"));
    assert_eq!(get("flag"), Value::Null);
    assert!(get("geom").as_geometry().is_some());
}

#[test]
fn violations_write_nothing() {
    let store = MemoryStore::new();
    let dataset = Dataset::create(
        store.clone(),
        "strict",
        every_type(),
        PathStructure::recommended(&every_type()),
    )
    .unwrap();
    let objects = store.len();
    let schema = dataset.schema();
    let too_long = schema
        .row([("fid", Value::Int(1)), ("name", Value::from("x".repeat(41)))])
        .unwrap();
    let err = dataset.write_feature(&too_long).unwrap_err();
    assert!(matches!(err, DatasetError::Violation(v) if v.column == "name"));

    let rows = vec![
        schema.row([("fid", Value::Int(2))]).unwrap(),
        schema
            .row([("fid", Value::Int(3)), ("count", Value::Int(40_000))])
            .unwrap(),
    ];
    assert!(matches!(
        dataset.write_features(&rows),
        Err(DatasetError::Violation(_))
    ));
    assert_eq!(store.len(), objects);
}

#[test]
fn bulk_write_enumerate_delete() {
    let schema = Schema::new(vec![
        Column::new(ColumnId::random(), "fid", DataType::integer(IntSize::I64)).primary_key(0),
        Column::new(ColumnId::random(), "name", DataType::text()),
    ])
    .unwrap();
    let dataset = Dataset::create(
        MemoryStore::new(),
        "bulk",
        schema.clone(),
        PathStructure::recommended(&schema),
    )
    .unwrap();
    let rows: Vec<Row> = (0..500)
        .map(|i| {
            schema
                .row([("fid", Value::Int(i * 37)), ("name", Value::from(format!("n{i}")))])
                .unwrap()
        })
        .collect();
    assert_eq!(dataset.write_features(&rows).unwrap(), 500);
    assert_eq!(dataset.feature_count().unwrap(), 500);

    let mut read: Vec<Row> = dataset.features().unwrap().map(Result::unwrap).collect();
    let fid = schema.column_by_name("fid").unwrap().id;
    read.sort_by_key(|row| row[&fid].as_i64());
    assert_eq!(read, rows);

    assert!(dataset.delete_feature(&[Value::Int(37)]).unwrap());
    assert!(!dataset.contains_feature(&[Value::Int(37)]).unwrap());
    assert_eq!(dataset.feature_count().unwrap(), 499);

    // Rewriting a key replaces the feature in place.
    let renamed = schema
        .row([("fid", Value::Int(74)), ("name", Value::from("renamed"))])
        .unwrap();
    dataset.write_feature(&renamed).unwrap();
    assert_eq!(dataset.feature_count().unwrap(), 499);
    assert_eq!(dataset.read_feature(&[Value::Int(74)]).unwrap(), renamed);
}

#[test]
fn bulk_write_keeps_the_last_row_per_key() {
    let schema = Schema::new(vec![
        Column::new(ColumnId::random(), "fid", DataType::integer(IntSize::I64)).primary_key(0),
        Column::new(ColumnId::random(), "v", DataType::integer(IntSize::I64)),
    ])
    .unwrap();
    let n = 4096;
    let mut rows: Vec<Row> = (0..n)
        .map(|i| {
            schema
                .row([("fid", Value::Int(1000 + i)), ("v", Value::Int(i))])
                .unwrap()
        })
        .collect();
    // The duplicates sit on either side of the midpoint, where rayon splits.
    let mid = n as usize / 2;
    rows[mid - 1] = schema.row([("fid", Value::Int(7)), ("v", Value::Int(0))]).unwrap();
    rows[mid] = schema.row([("fid", Value::Int(7)), ("v", Value::Int(1))]).unwrap();

    for round in 0..20 {
        let dataset = Dataset::create(
            MemoryStore::new(),
            &format!("dupes{round}"),
            schema.clone(),
            PathStructure::recommended(&schema),
        )
        .unwrap();
        assert_eq!(dataset.write_features(&rows).unwrap(), rows.len() - 1);
        assert_eq!(dataset.feature_count().unwrap(), rows.len() - 1);
        assert_eq!(dataset.read_feature(&[Value::Int(7)]).unwrap(), rows[mid]);
    }
}

#[test]
fn composite_keys_use_hash_paths() {
    let schema = Schema::new(vec![
        Column::new(ColumnId::random(), "region", DataType::text()).primary_key(0),
        Column::new(ColumnId::random(), "day", DataType::Date).primary_key(1),
        Column::new(ColumnId::random(), "rain", DataType::Float { size: FloatSize::F64 }),
    ])
    .unwrap();
    let structure = PathStructure::recommended(&schema);
    assert_eq!(structure.scheme, Scheme::Hash);
    let dataset = Dataset::create(MemoryStore::new(), "weather", schema.clone(), structure).unwrap();
    let row = schema
        .row([
            ("region", Value::from("north")),
            ("day", Value::from("2024-05-01")),
            ("rain", Value::Float(3.5)),
        ])
        .unwrap();
    dataset.write_feature(&row).unwrap();
    let pk = [Value::from("north"), Value::from("2024-05-01")];
    assert_eq!(dataset.read_feature(&pk).unwrap(), row);
    let rows: Vec<Row> = dataset.features().unwrap().map(Result::unwrap).collect();
    assert_eq!(rows, vec![row]);
}

#[test]
fn corrupt_feature_is_malformed() {
    let store = MemoryStore::new();
    let schema = Schema::new(vec![
        Column::new(ColumnId::random(), "fid", DataType::integer(IntSize::I64)).primary_key(0),
    ])
    .unwrap();
    let dataset = Dataset::create(
        store.clone(),
        "broken",
        schema.clone(),
        PathStructure::recommended(&schema),
    )
    .unwrap();
    let key = dataset.feature_key(&[Value::Int(5)]).unwrap();
    store
        .put(&key, featurestore::bytes::Bytes::from_static(b"\x92\x01"))
        .unwrap();
    match dataset.read_feature(&[Value::Int(5)]) {
        Err(DatasetError::MalformedEncoding { path, .. }) => assert_eq!(path, key),
        other => panic!("expected a malformed encoding error, got {other:?}"),
    }
}

fn scalar_types() -> Schema {
    Schema::new(vec![
        Column::new(ColumnId::random(), "fid", DataType::integer(IntSize::I32)).primary_key(0),
        Column::new(ColumnId::random(), "flag", DataType::Boolean),
        Column::new(ColumnId::random(), "data", DataType::Blob { length: Some(8) }),
        Column::new(ColumnId::random(), "ratio", DataType::Float { size: FloatSize::F32 }),
        Column::new(ColumnId::random(), "score", DataType::Float { size: FloatSize::F64 }),
        Column::new(ColumnId::random(), "count", DataType::Integer { size: IntSize::I16 }),
        Column::new(ColumnId::random(), "name", DataType::Text { length: Some(40) }),
    ])
    .unwrap()
}

proptest::proptest! {
    #[test]
    fn scalar_rows_roundtrip(
        fid: i32,
        flag: Option<bool>,
        data in proptest::option::of(proptest::collection::vec(proptest::num::u8::ANY, 0..=8)),
        ratio in proptest::option::of(-1.0e30f32..1.0e30f32),
        score in proptest::option::of(-1.0e300f64..1.0e300f64),
        count in proptest::option::of(proptest::num::i16::ANY),
        name in proptest::option::of("\\PC{0,40}"),
    ) {
        let schema = scalar_types();
        let dataset = Dataset::create(
            MemoryStore::new(),
            "scalars",
            schema.clone(),
            PathStructure::recommended(&schema),
        )
        .unwrap();
        let row = schema
            .row([
                ("fid", Value::from(fid)),
                ("flag", Value::from(flag)),
                ("data", Value::from(data)),
                ("ratio", Value::from(ratio.map(f64::from))),
                ("score", Value::from(score)),
                ("count", Value::from(count.map(i64::from))),
                ("name", Value::from(name)),
            ])
            .unwrap();
        dataset.write_feature(&row).unwrap();
        proptest::prop_assert_eq!(dataset.read_feature(&[Value::Int(fid.into())]).unwrap(), row);
    }
}
