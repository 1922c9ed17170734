use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection};

use dbprof_core::{Error, RowCountSource, RuleSet};
use dbprof_engine::{Driver, PostgresDriver, ProfilerConfig, RunOptions, postgres_profiler};

const FIXTURE: &str = r#"
drop schema if exists dbprof_it cascade;
create schema dbprof_it;
create table dbprof_it.people (
    id integer primary key,
    name varchar(40),
    age integer,
    active boolean,
    joined date
);
insert into dbprof_it.people
select g,
       case when g % 5 = 0 then null else 'person ' || g end,
       20 + g % 30,
       g % 2 = 0,
       date '2020-01-01' + g
from generate_series(1, 120) as g;
"#;

fn database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL").ok()
}

/// `{schema}.wide`: `columns` integer columns holding `g % distinct` over
/// `rows` rows.
fn wide_fixture(schema: &str, columns: usize, distinct: usize, rows: usize) -> String {
    let definitions: Vec<String> = (0..columns).map(|index| format!("c{index} integer")).collect();
    let values = vec![format!("g % {distinct}"); columns];
    format!(
        "drop schema if exists {schema} cascade; \
         create schema {schema}; \
         create table {schema}.wide ({}); \
         insert into {schema}.wide select {} from generate_series(1, {rows}) as g;",
        definitions.join(", "),
        values.join(", ")
    )
}

async fn load_fixture(url: &str, fixture: &str) -> Result<()> {
    let mut conn = PgConnection::connect(url)
        .await
        .context("connecting to Postgres")?;
    sqlx::raw_sql(fixture)
        .execute(&mut conn)
        .await
        .context("loading fixture")?;
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn profiles_a_postgres_table() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return Ok(());
    };
    load_fixture(&url, FIXTURE).await?;

    let mut profiler = postgres_profiler(&url, ProfilerConfig::default())?;
    assert!(profiler.schema_names().await?.contains(&"dbprof_it".to_string()));
    assert_eq!(profiler.table_names("dbprof_it").await?, vec!["people"]);

    let rules = RuleSet::from_json_str(
        r#"[
            {"name": "name_present", "kind": "not_null", "column": "name"},
            {"name": "young", "kind": "range", "column": "age", "max": 40},
            {"name": "no_minors", "kind": "sql", "column": "age",
             "query": "select count(*) from {schema}.{table} where age < 18"}
        ]"#,
    )?;
    let meta = profiler
        .run(
            "dbprof_it",
            "people",
            RunOptions {
                validation_rules: Some(&rules),
                timeout: Some(Duration::from_secs(30)),
                ..RunOptions::default()
            },
        )
        .await?;
    profiler.disconnect().await?;

    assert_eq!(meta.row_count, Some(120));
    assert_eq!(meta.row_count_source, Some(RowCountSource::Exact));
    assert_eq!(
        meta.column_names,
        vec!["id", "name", "age", "active", "joined"]
    );

    let name = meta.column("name").context("name column")?;
    assert_eq!(name.datatype.as_ref().map(|t| t.name.as_str()), Some("character varying"));
    assert_eq!(name.datatype.as_ref().and_then(|t| t.length), Some(40));
    assert_eq!(name.nulls, Some(24));
    assert_eq!(name.cardinality, Some(96));
    assert_eq!(name.validation.get("name_present"), Some(&24));

    let age = meta.column("age").context("age column")?;
    assert_eq!(age.min.as_deref(), Some("20"));
    assert_eq!(age.max.as_deref(), Some("49"));
    assert_eq!(age.cardinality, Some(30));
    assert_eq!(age.validation.get("young"), Some(&36));
    assert!(!age.validation.contains_key("no_minors"));

    let active = meta.column("active").context("active column")?;
    assert_eq!(active.min.as_deref(), Some("false"));
    assert_eq!(active.cardinality, Some(2));

    let joined = meta.column("joined").context("joined column")?;
    assert_eq!(joined.min.as_deref(), Some("2020-01-02"));
    Ok(())
}

#[tokio::test]
async fn statement_timeout_is_reported_as_timeout() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return Ok(());
    };

    let mut driver = PostgresDriver::new(&url)?;
    driver.connect().await?;
    let result = driver
        .execute("select pg_sleep(2)::text", Some(Duration::from_millis(100)))
        .await;
    assert!(matches!(result, Err(Error::QueryTimeout { .. })));

    let result = driver.execute("select 1::int8", None).await?;
    assert_eq!(result.single_count()?, 1);
    driver.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn row_cap_is_enforced() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return Ok(());
    };

    let mut driver = PostgresDriver::new(&url)?.with_max_rows(5);
    driver.connect().await?;
    let result = driver
        .execute("select g from generate_series(1, 10) as g", None)
        .await;
    assert!(matches!(result, Err(Error::RowLimit { limit: 5, .. })));
    driver.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn profiles_tables_wider_than_one_target_list() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return Ok(());
    };
    load_fixture(&url, &wide_fixture("dbprof_it_wide", 1100, 30, 60)).await?;

    let mut profiler = postgres_profiler(&url, ProfilerConfig::default())?;
    let meta = profiler
        .run("dbprof_it_wide", "wide", RunOptions::default())
        .await?;
    profiler.disconnect().await?;

    assert_eq!(meta.columns.len(), 1100);
    let last = meta.column("c1099").context("c1099 column")?;
    assert_eq!(last.nulls, Some(0));
    assert_eq!(last.min.as_deref(), Some("0"));
    assert_eq!(last.max.as_deref(), Some("29"));
    assert_eq!(last.cardinality, Some(30));
    assert_eq!(last.most_freq_values.as_ref().map(Vec::len), Some(10));
    Ok(())
}

#[tokio::test]
async fn freq_values_stay_under_the_row_cap() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return Ok(());
    };
    load_fixture(&url, &wide_fixture("dbprof_it_freq", 500, 30, 60)).await?;

    let config = ProfilerConfig {
        num_freq_values: 25,
        ..ProfilerConfig::default()
    };
    let mut profiler = postgres_profiler(&url, config)?;
    let meta = profiler
        .run("dbprof_it_freq", "wide", RunOptions::default())
        .await?;
    profiler.disconnect().await?;

    for column in &meta.columns {
        assert_eq!(column.most_freq_values.as_ref().map(Vec::len), Some(25));
        assert_eq!(column.least_freq_values.as_ref().map(Vec::len), Some(25));
    }
    let first = meta.column("c0").context("c0 column")?;
    let most = first.most_freq_values.as_ref().context("most frequent values")?;
    assert_eq!((most[0].value.as_str(), most[0].count), ("0", 2));
    Ok(())
}
