use strata_db::{
    column, AggregateShape, Config, DataType, Database, DbError, Filter, JoinKind, JoinQuery, ModelDecl,
    ReadQuery, Record, Registry, SchemaSnapshot, Size, Value,
};

fn blog() -> Registry {
    Registry::new()
        .with(ModelDecl::new("Author").column("name", column(DataType::Str).not_null()))
        .with(
            ModelDecl::new("Post")
                .column("title", column(DataType::Str).size(Size::Md))
                .column("views", column(DataType::Int).default(0))
                .column("author_id", column(DataType::Int).related_to("Author")),
        )
}

async fn setup() -> (Database, SchemaSnapshot) {
    let db = Database::connect(Config::sqlite_memory()).await.unwrap();
    let snapshot = blog().extract(db.dialect(), true).unwrap();
    for name in ["Author", "Post"] {
        let sql = db.dialect().create_table(snapshot.model(name).unwrap(), true);
        db.execute(&sql, vec![]).await.unwrap();
    }
    (db, snapshot)
}

#[tokio::test]
async fn test_quoted_value_round_trips_as_parameter() {
    let (db, _) = setup().await;
    let id = db
        .create("author", &Record::new().set("name", "O'Brien"))
        .await
        .unwrap();
    assert_eq!(id, 1);

    let row = db
        .read(
            "author",
            ReadQuery::new().filter(Filter::new().push("id--equal", id).unwrap()),
        )
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["name"], Value::Text("O'Brien".into()));

    let by_name = db
        .read("author", ReadQuery::new().filter(Filter::equal("name", "O'Brien").unwrap()))
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(by_name, 1);
}

#[tokio::test]
async fn test_create_multi_returns_ids_in_order() {
    let (db, _) = setup().await;
    let records: Vec<Record> = ["a", "b", "c"]
        .into_iter()
        .map(|name| Record::new().set("name", name))
        .collect();
    let ids = db.create_multi("author", &records).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(db.count_rows("author").await.unwrap(), 3);
}

#[tokio::test]
async fn test_update_and_delete_need_filter_or_confirmation() {
    let (db, _) = setup().await;
    db.create("author", &Record::new().set("name", "x")).await.unwrap();
    db.create("author", &Record::new().set("name", "y")).await.unwrap();

    let values = Record::new().set("name", "z");
    let err = db.update("author", &values, &Filter::new(), false).await.unwrap_err();
    assert!(matches!(err, DbError::Unconfirmed(_)));
    assert_eq!(
        db.read("author", ReadQuery::new().filter(Filter::equal("name", "z").unwrap()))
            .unwrap()
            .count()
            .await
            .unwrap(),
        0
    );

    let filter = Filter::new().push("name--ne", "x").unwrap();
    assert_eq!(db.update("author", &values, &filter, false).await.unwrap(), 1);
    assert_eq!(db.update("author", &values, &Filter::new(), true).await.unwrap(), 2);

    assert!(matches!(
        db.delete("author", &Filter::new(), false).await,
        Err(DbError::Unconfirmed(_))
    ));
    assert_eq!(db.count_rows("author").await.unwrap(), 2);
    assert_eq!(db.delete("author", &Filter::new(), true).await.unwrap(), 2);
    assert_eq!(db.count_rows("author").await.unwrap(), 0);
}

#[tokio::test]
async fn test_read_accessors_and_aggregates() {
    let (db, _) = setup().await;
    let author = db.create("author", &Record::new().set("name", "a")).await.unwrap();
    for (title, views) in [("one", 10), ("two", 30), ("three", 20)] {
        db.create(
            "post",
            &Record::new()
                .set("title", title)
                .set("views", views)
                .set("author_id", author),
        )
        .await
        .unwrap();
    }

    let read = db.read("post", ReadQuery::new().order_by("-views")).unwrap();
    assert_eq!(read.all().await.unwrap().len(), 3);
    assert_eq!(read.first().await.unwrap().unwrap()["title"], Value::Text("two".into()));
    assert_eq!(read.last().await.unwrap().unwrap()["title"], Value::Text("one".into()));
    assert_eq!(read.count().await.unwrap(), 3);

    let max = read.max("views", AggregateShape::Scalar).await.unwrap();
    assert_eq!(max.scalar(), Some(&Value::Int(30)));
    let sum = read.sum("views", AggregateShape::Scalar).await.unwrap();
    assert_eq!(sum.scalar().and_then(Value::as_i64), Some(60));
    let avg = read.avg("views", AggregateShape::Scalar).await.unwrap();
    assert_eq!(avg.scalar().and_then(Value::as_f64), Some(20.0));

    let filtered = db
        .read("post", ReadQuery::new().filter(Filter::new().push("views--ge", 20).unwrap()))
        .unwrap();
    let min = filtered.min("views", AggregateShape::Row).await.unwrap();
    match min {
        strata_db::Aggregate::Row(Some(row)) => assert_eq!(row["min"], Value::Int(20)),
        other => panic!("unexpected {other:?}"),
    }

    let windowed = db
        .read("post", ReadQuery::new().order_by("views").limit(2))
        .unwrap();
    assert_eq!(windowed.count().await.unwrap(), 2);
    let sum = windowed.sum("views", AggregateShape::Scalar).await.unwrap();
    assert_eq!(sum.scalar().and_then(Value::as_i64), Some(30));
}

#[tokio::test]
async fn test_grouped_aggregate_returns_rows() {
    let (db, _) = setup().await;
    let a = db.create("author", &Record::new().set("name", "a")).await.unwrap();
    let b = db.create("author", &Record::new().set("name", "b")).await.unwrap();
    for (author, views) in [(a, 1), (a, 2), (b, 5)] {
        db.create(
            "post",
            &Record::new().set("views", views).set("author_id", author),
        )
        .await
        .unwrap();
    }
    let read = db
        .read("post", ReadQuery::new().group_by("author_id"))
        .unwrap();
    let rows = read.sum("views", AggregateShape::Rows).await.unwrap();
    let mut totals: Vec<(i64, i64)> = rows
        .rows()
        .unwrap()
        .iter()
        .map(|row| (row["author_id"].as_i64().unwrap(), row["sum"].as_i64().unwrap()))
        .collect();
    totals.sort_unstable();
    assert_eq!(totals, vec![(a, 3), (b, 5)]);
    assert_eq!(read.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_null_filters_and_defaults() {
    let (db, _) = setup().await;
    let author = db.create("author", &Record::new().set("name", "a")).await.unwrap();
    db.create("post", &Record::new().set("title", Value::Null).set("author_id", author))
        .await
        .unwrap();
    db.create("post", &Record::new().set("title", "t")).await.unwrap();

    let untitled = db
        .read("post", ReadQuery::new().filter(Filter::new().push("title", Value::Null).unwrap()))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(untitled.len(), 1);
    assert_eq!(untitled[0]["views"], Value::Int(0));

    let orphaned = db
        .read(
            "post",
            ReadQuery::new().filter(
                Filter::new()
                    .push("author_id", Value::Null)
                    .unwrap()
                    .push("or--title--ne", Value::Null)
                    .unwrap(),
            ),
        )
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(orphaned, 1);
}

#[tokio::test]
async fn test_join_resolves_models_to_tables() {
    let (db, snapshot) = setup().await;
    let author = db.create("author", &Record::new().set("name", "Ann")).await.unwrap();
    db.create(
        "post",
        &Record::new().set("title", "hello").set("author_id", author),
    )
    .await
    .unwrap();
    db.create("post", &Record::new().set("title", "orphan")).await.unwrap();

    let query = JoinQuery::new(["Post", "Author"])
        .columns(["Post.title", "Author.name"])
        .filter(Filter::new().push("Author.name--l", "A%").unwrap());
    let read = db.join(&snapshot, query).unwrap();
    assert!(read.sql().contains("\"post\""));
    assert!(read.sql().contains("\"author\""));
    let rows = read.all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Post.title"], Value::Text("hello".into()));
    assert_eq!(rows[0]["Author.name"], Value::Text("Ann".into()));

    let left = db
        .join(&snapshot, JoinQuery::new(["Post", "Author"]).kind(JoinKind::Left))
        .unwrap();
    assert_eq!(left.count().await.unwrap(), 2);
    let max = left.max("Post.id", AggregateShape::Scalar).await.unwrap();
    assert_eq!(max.scalar(), Some(&Value::Int(2)));
}

#[tokio::test]
async fn test_introspection() {
    let (db, _) = setup().await;
    assert_eq!(db.list_tables().await.unwrap(), vec!["author", "post"]);
    assert_eq!(
        db.list_columns("post").await.unwrap(),
        vec!["id", "author_id", "title", "views"]
    );
    assert!(db.exist_table("post").await.unwrap());
    assert!(!db.exist_table("comment").await.unwrap());
    assert!(db.exist_column("post", "views").await.unwrap());
    assert!(!db.exist_column("post", "body").await.unwrap());
    assert!(matches!(
        db.foreign_key_names("post", "author_id").await,
        Err(DbError::Unsupported { .. })
    ));
}

#[tokio::test]
async fn test_raw_query_and_errors() {
    let (db, _) = setup().await;
    assert!(matches!(db.query("  ", vec![]), Err(DbError::MissingParameter("sql"))));
    assert!(matches!(db.execute("", vec![]).await, Err(DbError::MissingParameter("sql"))));
    assert!(matches!(
        db.execute("INSERT INTO nowhere VALUES (1)", vec![]).await,
        Err(DbError::Database(_))
    ));

    db.execute(
        "INSERT INTO author (name) VALUES (?), (?)",
        vec!["a".into(), "b".into()],
    )
    .await
    .unwrap();
    let rows = db
        .query("SELECT name FROM author WHERE name > ? ORDER BY name", vec!["a".into()])
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], Value::Text("b".into()));
}

#[tokio::test]
async fn test_connect_rejects_engine_mismatch() {
    let config = Config::new(strata_db::Engine::Postgres, "sqlite::memory:");
    assert!(matches!(
        Database::connect(config).await,
        Err(DbError::InvalidValue { .. })
    ));
}

#[tokio::test]
async fn test_create_returns_the_stored_id() {
    let (db, _) = setup().await;
    let ann = db.create("author", &Record::new().set("name", "Ann")).await.unwrap();
    let bob = db.create("author", &Record::new().set("name", "Bob")).await.unwrap();
    assert_eq!((ann, bob), (1, 2));

    let row = db
        .read("author", ReadQuery::new().filter(Filter::equal("name", "Bob").unwrap()))
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["id"], Value::Int(bob));

    let explicit = db
        .create("author", &Record::new().set("id", 10).set("name", "Cy"))
        .await
        .unwrap();
    assert_eq!(explicit, 10);
    assert_eq!(db.create("author", &Record::new().set("name", "Di")).await.unwrap(), 11);

    let post = db
        .create("post", &Record::new().set("title", "hello").set("author_id", ann))
        .await
        .unwrap();
    assert_eq!(post, 1);
}

#[tokio::test]
async fn test_create_on_table_without_id_column() {
    let db = Database::connect(Config::sqlite_memory()).await.unwrap();
    let snapshot = Registry::new()
        .with(
            ModelDecl::new("Country")
                .column("code", column(DataType::Str).size(Size::Xs).not_null())
                .column("label", column(DataType::Str))
                .primary_key("code"),
        )
        .extract(db.dialect(), true)
        .unwrap();
    let sql = db.dialect().create_table(snapshot.model("Country").unwrap(), true);
    db.execute(&sql, vec![]).await.unwrap();
    assert_eq!(db.list_columns("country").await.unwrap(), vec!["code", "label"]);

    let first = db
        .create("country", &Record::new().set("code", "fr").set("label", "France"))
        .await
        .unwrap();
    let second = db
        .create("country", &Record::new().set("code", "de").set("label", "Germany"))
        .await
        .unwrap();
    assert!(second > first);

    let row = db
        .read("country", ReadQuery::new().filter(Filter::equal("code", "de").unwrap()))
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["label"], Value::Text("Germany".into()));
}
