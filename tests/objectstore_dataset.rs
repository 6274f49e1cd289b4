use fake::faker::address::en::CityName;
use fake::Fake;
use featurestore::dataset::list_datasets;
use featurestore::prelude::*;
use featurestore::url::Url;
use pretty_assertions::assert_eq;

fn schema() -> Schema {
    Schema::new(vec![
        Column::new(
            column_id!("5F0C5E4D3B2A19087766554433221100"),
            "fid",
            DataType::integer(IntSize::I64),
        )
        .primary_key(0),
        Column::new(
            column_id!("00112233445566778899AABBCCDDEEFF"),
            "city",
            DataType::text(),
        ),
    ])
    .unwrap()
}

fn exercise(store: ObjectStoreBackend) {
    let schema = schema();
    let dataset = Dataset::create(
        store.clone(),
        "nz/cities",
        schema.clone(),
        PathStructure::recommended(&schema),
    )
    .unwrap();
    dataset.set_title("Cities").unwrap();
    dataset
        .put_crs_definition("EPSG:4326", "GEOGCS[\"WGS 84\"]")
        .unwrap();

    let rows: Vec<Row> = (0..50i64)
        .map(|fid| {
            let city: String = CityName().fake();
            schema
                .row([("fid", Value::Int(fid)), ("city", Value::from(city))])
                .unwrap()
        })
        .collect();
    dataset.write_features(&rows).unwrap();
    assert_eq!(
        dataset.write_feature(&rows[7]).unwrap(),
        dataset.feature_key(&[Value::Int(7)]).unwrap()
    );

    let reopened = Dataset::open(store.clone(), "nz/cities").unwrap();
    assert_eq!(reopened.title().unwrap().as_deref(), Some("Cities"));
    assert_eq!(reopened.path_structure(), dataset.path_structure());
    assert_eq!(reopened.crs_identifiers().unwrap(), vec!["EPSG:4326".to_owned()]);
    assert_eq!(reopened.feature_count().unwrap(), 50);
    for row in &rows {
        let fid = row[&column_id!("5F0C5E4D3B2A19087766554433221100")].clone();
        assert_eq!(&reopened.read_feature(&[fid]).unwrap(), row);
    }
    assert_eq!(list_datasets(&store).unwrap(), vec!["nz/cities".to_owned()]);
}

#[test]
fn memory_url() {
    let url = Url::parse("memory:///").unwrap();
    exercise(ObjectStoreBackend::with_url(&url).unwrap());
}

#[test]
fn local_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::from_directory_path(dir.path()).unwrap();
    let store = ObjectStoreBackend::with_url(&url).unwrap();
    exercise(store);

    let layout = dir
        .path()
        .join("nz/cities/.table-dataset/feature/A/A/A/A")
        .join("kQA=");
    assert!(layout.is_file(), "{} is missing", layout.display());
}

#[test]
fn existing_datasets_are_not_replaced() {
    let store = ObjectStoreBackend::in_memory();
    let schema = schema();
    Dataset::create(store.clone(), "roads", schema.clone(), PathStructure::legacy()).unwrap();
    assert!(matches!(
        Dataset::create(store.clone(), "roads", schema.clone(), PathStructure::legacy()),
        Err(DatasetError::AlreadyExists(_))
    ));
    assert!(matches!(
        Dataset::create(store.clone(), "ROADS", schema, PathStructure::legacy()),
        Err(DatasetError::Naming(_))
    ));
    assert!(matches!(
        Dataset::open(store, "rivers"),
        Err(DatasetError::NoSuchDataset(_))
    ));
}
