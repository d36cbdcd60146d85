use bulksync::{
    BulkSync, BulkSyncConfig, BulkUpdateOptions, CancellationToken, Connection, PostgresClient,
    PostgresCopyLoader, RowSet, SqlValue, TableName,
};

// Needs a PostgreSQL 15+ server in DATABASE_URL.
#[tokio::test]
#[ignore]
async fn test_copy_update_and_merge_against_postgres() {
    bulksync::setup_test_logger();
    let client = PostgresClient::new(2).await.unwrap();
    let conn = client.connection().await.unwrap();
    conn.batch_execute(
        "DROP TABLE IF EXISTS bulksync_it_accounts;
         CREATE TABLE bulksync_it_accounts (
            id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            balance NUMERIC(12, 2),
            opened_at TIMESTAMPTZ
         );",
    )
    .await
    .unwrap();

    let table = TableName::parse("public.bulksync_it_accounts");
    let bulk = BulkSync::new(PostgresCopyLoader, BulkSyncConfig::default());
    let cancel = CancellationToken::new();

    // above the COPY threshold
    let mut set = RowSet::new(["code", "balance", "opened_at"]);
    for i in 0..250 {
        set.push(vec![
            SqlValue::from(format!("acct-{}", i)),
            SqlValue::from("10.50"),
            SqlValue::from("2024-01-01T00:00:00Z"),
        ]);
    }
    let inserted =
        bulk.bulk_insert(&conn, &table, &set, &Default::default(), None, &cancel).await.unwrap();
    assert_eq!(inserted, 250);

    let mut changes = RowSet::new(["code", "balance"]);
    changes
        .push(vec!["acct-1".into(), SqlValue::from("1.00")])
        .push(vec!["acct-1".into(), SqlValue::from("2.00")])
        .push(vec!["acct-new".into(), SqlValue::from("3.00")]);
    let options = BulkUpdateOptions::default().with_qualifiers(["code"]);

    let updated = bulk.bulk_update(&conn, &table, &changes, &options, None, &cancel).await.unwrap();
    assert_eq!(updated, 1);

    let merged = bulk.bulk_merge(&conn, &table, &changes, &options, None, &cancel).await.unwrap();
    assert_eq!(merged, 2);

    bulk.truncate(&conn, &table, None, &cancel).await.unwrap();
    conn.batch_execute("DROP TABLE bulksync_it_accounts;").await.unwrap();
}
