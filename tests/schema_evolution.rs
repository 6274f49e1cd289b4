use featurestore::prelude::*;
use pretty_assertions::assert_eq;

fn columns() -> (Column, Column, Column, Column) {
    (
        Column::new(column_id!("A0000000000000000000000000000000"), "a", DataType::integer(IntSize::I64))
            .primary_key(0),
        Column::new(column_id!("B0000000000000000000000000000000"), "b", DataType::text()),
        Column::new(column_id!("C0000000000000000000000000000000"), "c", DataType::Boolean),
        Column::new(column_id!("D0000000000000000000000000000000"), "d", DataType::Date),
    )
}

#[test]
fn features_are_read_in_the_current_shape() {
    let (a, b, c, d) = columns();
    let store = MemoryStore::new();
    let schema = Schema::new(vec![a.clone(), b.clone(), c.clone()]).unwrap();
    let mut dataset = Dataset::create(
        store.clone(),
        "evolving",
        schema.clone(),
        PathStructure::recommended(&schema),
    )
    .unwrap();
    let row = schema
        .row([
            ("a", Value::Int(1)),
            ("b", Value::from("dropped")),
            ("c", Value::Bool(true)),
        ])
        .unwrap();
    let key = dataset.write_feature(&row).unwrap();
    let stored = store.get(&key).unwrap().unwrap();

    dataset
        .change_schema(Schema::new(vec![a.clone(), c.clone(), d.clone()]).unwrap())
        .unwrap();
    let read = dataset.read_feature(&[Value::Int(1)]).unwrap();
    let expected: Row = [
        (a.id, Value::Int(1)),
        (c.id, Value::Bool(true)),
        (d.id, Value::Null),
    ]
    .into_iter()
    .collect();
    assert_eq!(read, expected);

    // Changing the schema rewrote nothing.
    assert_eq!(store.get(&key).unwrap().unwrap(), stored);

    // A reopened dataset sees the new schema.
    let reopened = Dataset::open(store, "evolving").unwrap();
    assert_eq!(reopened.schema(), dataset.schema());
    assert_eq!(reopened.read_feature(&[Value::Int(1)]).unwrap(), expected);
}

#[test]
fn renames_and_type_changes_reuse_the_legend() {
    let (a, b, c, _) = columns();
    let schema = Schema::new(vec![a.clone(), b.clone(), c.clone()]).unwrap();
    let mut dataset = Dataset::create(
        MemoryStore::new(),
        "renamed",
        schema.clone(),
        PathStructure::recommended(&schema),
    )
    .unwrap();
    dataset
        .write_feature(&schema.row([("a", Value::Int(1))]).unwrap())
        .unwrap();
    let before = dataset.legends().keys().unwrap();
    assert_eq!(before.len(), 1);

    let mut renamed_b = b.clone();
    renamed_b.name = "title".to_owned();
    renamed_b.data_type = DataType::Text { length: Some(10) };
    let renamed = Schema::new(vec![a.clone(), renamed_b, c.clone()]).unwrap();
    dataset.change_schema(renamed.clone()).unwrap();
    dataset
        .write_feature(&renamed.row([("a", Value::Int(2)), ("title", Value::from("x"))]).unwrap())
        .unwrap();
    assert_eq!(dataset.legends().keys().unwrap(), before);

    // Reordering the value columns is a new legend.
    let reordered = Schema::new(vec![a, c, b]).unwrap();
    dataset.change_schema(reordered.clone()).unwrap();
    dataset
        .write_feature(&reordered.row([("a", Value::Int(3))]).unwrap())
        .unwrap();
    assert_eq!(dataset.legends().keys().unwrap().len(), 2);

    // Features written under either legend read back in the current order.
    for fid in 1..=3 {
        let row = dataset.read_feature(&[Value::Int(fid)]).unwrap();
        assert_eq!(row.len(), 3);
    }
}

#[test]
fn primary_key_changes_need_an_empty_dataset() {
    let (a, b, _, _) = columns();
    let schema = Schema::new(vec![a.clone(), b.clone()]).unwrap();
    let mut dataset = Dataset::create(
        MemoryStore::new(),
        "keys",
        schema.clone(),
        PathStructure::recommended(&schema),
    )
    .unwrap();

    let mut narrower = a.clone();
    narrower.data_type = DataType::integer(IntSize::I32);
    let narrowed = Schema::new(vec![narrower, b.clone()]).unwrap();
    dataset.change_schema(narrowed.clone()).unwrap();
    dataset.change_schema(schema.clone()).unwrap();

    dataset
        .write_feature(&schema.row([("a", Value::Int(9))]).unwrap())
        .unwrap();
    assert!(matches!(
        dataset.change_schema(narrowed),
        Err(DatasetError::PrimaryKeyChanged)
    ));
    assert_eq!(dataset.schema(), &schema);

    // A composite key cannot be addressed by integer paths at all.
    let composite = Schema::new(vec![a, b.primary_key(1)]).unwrap();
    assert!(matches!(
        dataset.change_schema(composite),
        Err(DatasetError::Path(_))
    ));
}

#[test]
fn unknown_legend_is_reported() {
    let (a, b, _, _) = columns();
    let store = MemoryStore::new();
    let schema = Schema::new(vec![a, b]).unwrap();
    let dataset = Dataset::create(
        store.clone(),
        "orphans",
        schema.clone(),
        PathStructure::recommended(&schema),
    )
    .unwrap();
    dataset
        .write_feature(&schema.row([("a", Value::Int(4))]).unwrap())
        .unwrap();
    for key in dataset.legends().keys().unwrap() {
        store.delete(&dataset.legends().path(&key)).unwrap();
    }

    // The writing dataset still has the legend cached; a fresh one does not.
    let cold = Dataset::open(store, "orphans").unwrap();
    assert!(matches!(
        cold.read_feature(&[Value::Int(4)]),
        Err(DatasetError::UnknownLegend(_))
    ));
}
